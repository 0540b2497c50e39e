//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "specchio";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8787;
const DEFAULT_MIRROR_ORIGIN: &str = "https://bento.me";
const DEFAULT_API_ORIGIN: &str = "https://api.bento.me";
const DEFAULT_STORAGE_ORIGIN: &str = "https://storage.googleapis.com";
const DEFAULT_CACHE_DIR: &str = "cache";
const DEFAULT_RETENTION_DAYS: u64 = 3;
const DEFAULT_SWEEP_SCHEDULE: &str = "0 0 3 * * *";

/// Command-line arguments for the Specchio binary.
#[derive(Debug, Parser)]
#[command(name = "specchio", version, about = "Specchio mirroring proxy")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "SPECCHIO_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the Specchio HTTP service.
    Serve(Box<ServeArgs>),
    /// Run one eviction sweep over the object cache and exit.
    #[command(name = "sweep")]
    Sweep(SweepArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the public base URL of this service.
    #[arg(long = "mirror-public-base-url", value_name = "URL")]
    pub mirror_public_base_url: Option<String>,

    /// Override the mirrored profile username.
    #[arg(long = "mirror-profile-username", value_name = "NAME")]
    pub mirror_profile_username: Option<String>,

    /// Override the replacement map-service token.
    #[arg(long = "mirror-map-token", value_name = "TOKEN")]
    pub mirror_map_token: Option<String>,

    /// Override the rewrite rules file.
    #[arg(long = "rewrite-rules-file", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub rewrite_rules_file: Option<PathBuf>,

    #[command(flatten)]
    pub cache: CacheOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Override the object-cache directory.
    #[arg(long = "cache-directory", value_name = "PATH")]
    pub cache_directory: Option<PathBuf>,

    /// Override the cache retention period in days.
    #[arg(long = "cache-retention-days", value_name = "DAYS")]
    pub cache_retention_days: Option<u64>,

    /// Override the cron expression for the scheduled eviction sweep.
    #[arg(long = "cache-sweep-schedule", value_name = "CRON")]
    pub cache_sweep_schedule: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct SweepArgs {
    #[command(flatten)]
    pub cache: CacheOverrides,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub mirror: MirrorSettings,
    pub upstream: UpstreamSettings,
    pub cache: CacheSettings,
    pub rewrite: RewriteSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Identity of the mirror itself.
#[derive(Debug, Clone)]
pub struct MirrorSettings {
    /// Public base URL of this service; used for the restricted-prefix
    /// referer check and as the target of the host rewrite rules.
    pub public_base_url: String,
    /// Username of the mirrored profile; the bare root maps to it.
    pub profile_username: String,
    /// Replacement for the upstream's embedded map-service token.
    pub map_token: String,
}

/// Upstream hosts being mirrored.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub mirror_origin: Url,
    pub api_origin: Url,
    pub storage_origin: Url,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub directory: PathBuf,
    pub retention: Duration,
    pub sweep_schedule: String,
}

#[derive(Debug, Clone, Default)]
pub struct RewriteSettings {
    /// Optional TOML file replacing the built-in rewrite rules.
    pub rules_file: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("SPECCHIO").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Sweep(args)) => raw.apply_cache_overrides(&args.cache),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    mirror: RawMirrorSettings,
    upstream: RawUpstreamSettings,
    cache: RawCacheSettings,
    rewrite: RawRewriteSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.mirror_public_base_url.as_ref() {
            self.mirror.public_base_url = Some(url.clone());
        }
        if let Some(name) = overrides.mirror_profile_username.as_ref() {
            self.mirror.profile_username = Some(name.clone());
        }
        if let Some(token) = overrides.mirror_map_token.as_ref() {
            self.mirror.map_token = Some(token.clone());
        }
        if let Some(path) = overrides.rewrite_rules_file.as_ref() {
            self.rewrite.rules_file = Some(path.clone());
        }

        self.apply_cache_overrides(&overrides.cache);
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(directory) = overrides.cache_directory.as_ref() {
            self.cache.directory = Some(directory.clone());
        }
        if let Some(days) = overrides.cache_retention_days {
            self.cache.retention_days = Some(days);
        }
        if let Some(schedule) = overrides.cache_sweep_schedule.as_ref() {
            self.cache.sweep_schedule = Some(schedule.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            mirror,
            upstream,
            cache,
            rewrite,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let mirror = build_mirror_settings(mirror)?;
        let upstream = build_upstream_settings(upstream)?;
        let cache = build_cache_settings(cache)?;
        let rewrite = RewriteSettings {
            rules_file: rewrite.rules_file,
        };

        Ok(Self {
            server,
            logging,
            mirror,
            upstream,
            cache,
            rewrite,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;

    Ok(ServerSettings { public_addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_mirror_settings(mirror: RawMirrorSettings) -> Result<MirrorSettings, LoadError> {
    let profile_username = mirror
        .profile_username
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            LoadError::invalid(
                "mirror.profile_username",
                "the mirrored profile username must be configured",
            )
        })?;

    let public_base_url = mirror
        .public_base_url
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            LoadError::invalid(
                "mirror.public_base_url",
                "the public base URL must be configured",
            )
        })?;
    Url::parse(&public_base_url)
        .map_err(|err| LoadError::invalid("mirror.public_base_url", err.to_string()))?;

    Ok(MirrorSettings {
        public_base_url,
        profile_username,
        map_token: mirror.map_token.unwrap_or_default(),
    })
}

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    Ok(UpstreamSettings {
        mirror_origin: parse_origin(
            upstream.mirror_origin,
            DEFAULT_MIRROR_ORIGIN,
            "upstream.mirror_origin",
        )?,
        api_origin: parse_origin(upstream.api_origin, DEFAULT_API_ORIGIN, "upstream.api_origin")?,
        storage_origin: parse_origin(
            upstream.storage_origin,
            DEFAULT_STORAGE_ORIGIN,
            "upstream.storage_origin",
        )?,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let directory = cache
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "cache.directory",
            "path must not be empty",
        ));
    }

    let retention_days = cache.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS);
    if retention_days == 0 {
        return Err(LoadError::invalid(
            "cache.retention_days",
            "must be greater than zero",
        ));
    }

    let sweep_schedule = cache
        .sweep_schedule
        .unwrap_or_else(|| DEFAULT_SWEEP_SCHEDULE.to_string());

    Ok(CacheSettings {
        directory,
        retention: Duration::from_secs(retention_days * 24 * 60 * 60),
        sweep_schedule,
    })
}

fn parse_origin(value: Option<String>, default: &str, key: &'static str) -> Result<Url, LoadError> {
    let raw = value.unwrap_or_else(|| default.to_string());
    let url = Url::parse(raw.trim()).map_err(|err| LoadError::invalid(key, err.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(LoadError::invalid(key, "origin must be an absolute URL"));
    }
    Ok(url)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMirrorSettings {
    public_base_url: Option<String>,
    profile_username: Option<String>,
    map_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    mirror_origin: Option<String>,
    api_origin: Option<String>,
    storage_origin: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    directory: Option<PathBuf>,
    retention_days: Option<u64>,
    sweep_schedule: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRewriteSettings {
    rules_file: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}
