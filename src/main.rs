use std::{process, sync::Arc};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_cron::CronStream;
use specchio::{
    application::{
        cache::ObjectCache,
        error::AppError,
        jobs::{SweepContext, process_sweep_job, sweep_schedule},
        proxy::MirrorService,
    },
    config,
    domain::{
        origin::OriginResolver,
        rewrite::{MirrorRewriteParams, RuleSet},
    },
    infra::{
        error::InfraError,
        http::{ProxyState, build_router},
        store::{FilesystemStore, ObjectStore},
        telemetry,
        upstream::{HttpOriginFetcher, OriginFetcher},
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Sweep(_) => run_sweep(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let state = build_proxy_state(&settings)?;

    let monitor_handle = spawn_sweep_monitor(state.cache.clone(), &settings.cache)?;

    let result = serve_http(&settings, state).await;

    monitor_handle.abort();
    let _ = monitor_handle.await;

    result
}

async fn run_sweep(settings: config::Settings) -> Result<(), AppError> {
    let state = build_proxy_state(&settings)?;
    let retention = state.cache.retention();

    let evicted = state
        .cache
        .sweep_expired(retention)
        .await
        .map_err(|err| AppError::unexpected(format!("eviction sweep failed: {err}")))?;

    info!(target = "specchio::sweep", evicted, "Eviction sweep completed");
    Ok(())
}

fn build_proxy_state(settings: &config::Settings) -> Result<ProxyState, AppError> {
    let store: Arc<dyn ObjectStore> = Arc::new(
        FilesystemStore::new(settings.cache.directory.clone())
            .map_err(|err| AppError::from(InfraError::Io(err)))?,
    );
    let fetcher: Arc<dyn OriginFetcher> = Arc::new(
        HttpOriginFetcher::new()
            .map_err(|err| AppError::unexpected(format!("failed to build fetch client: {err}")))?,
    );

    let cache = Arc::new(ObjectCache::new(
        store,
        fetcher.clone(),
        settings.cache.retention,
    ));

    let rules = load_rules(settings)?;
    let resolver = OriginResolver::new(
        settings.mirror.public_base_url.clone(),
        settings.upstream.mirror_origin.clone(),
        settings.upstream.api_origin.clone(),
        settings.upstream.storage_origin.clone(),
        settings.mirror.profile_username.clone(),
    );

    let mirror = Arc::new(MirrorService::new(resolver, rules, fetcher, cache.clone()));

    Ok(ProxyState { mirror, cache })
}

fn load_rules(settings: &config::Settings) -> Result<RuleSet, AppError> {
    match settings.rewrite.rules_file.as_ref() {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|err| AppError::from(InfraError::Io(err)))?;
            let rules = RuleSet::from_toml_str(&raw).map_err(|err| {
                AppError::unexpected(format!(
                    "failed to load rewrite rules from `{}`: {err}",
                    path.display()
                ))
            })?;
            info!(
                target = "specchio::rewrite",
                rules = rules.len(),
                file = %path.display(),
                "Loaded rewrite rules"
            );
            Ok(rules)
        }
        None => Ok(RuleSet::mirror_defaults(&MirrorRewriteParams {
            public_base_url: settings.mirror.public_base_url.clone(),
            api_origin: origin_literal(&settings.upstream.api_origin),
            storage_origin: origin_literal(&settings.upstream.storage_origin),
            map_token: settings.mirror.map_token.clone(),
        })),
    }
}

/// The origin as it appears inside response bodies: scheme and host, no
/// trailing slash.
fn origin_literal(url: &url::Url) -> String {
    url.as_str().trim_end_matches('/').to_string()
}

fn spawn_sweep_monitor(
    cache: Arc<ObjectCache>,
    settings: &config::CacheSettings,
) -> Result<tokio::task::JoinHandle<()>, AppError> {
    let schedule = sweep_schedule(&settings.sweep_schedule)?;
    let context = SweepContext { cache };

    let sweep_worker = WorkerBuilder::new("cache-sweep-worker")
        .data(context)
        .backend(CronStream::new(schedule))
        .build_fn(process_sweep_job);

    let monitor = Monitor::new().register(sweep_worker);

    Ok(tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "sweep monitor stopped");
        }
    }))
}

async fn serve_http(settings: &config::Settings, state: ProxyState) -> Result<(), AppError> {
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "specchio::serve",
        addr = %settings.server.public_addr,
        "Mirror listening"
    );

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}
