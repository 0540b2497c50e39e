//! Path classification: which method/path pairs the mirror serves at all,
//! and which paths name cacheable static resources.

use axum::http::Method;

/// Prefix proxied to the upstream API host. Restricted: requires a referer
/// from our own base URL.
pub const API_PREFIX: &str = "/api";
/// Prefix proxied to the cloud storage host. Restricted like [`API_PREFIX`].
pub const STORAGE_PREFIX: &str = "/googleapis_storage";
/// Upstream telemetry ingestion prefix.
pub const TELEMETRY_PREFIX: &str = "/_axiom";
/// Framework asset prefix (hashed chunks, build manifests).
pub const FRAMEWORK_ASSET_PREFIX: &str = "/_next";
/// Upstream image asset prefix.
pub const IMAGE_ASSET_PREFIX: &str = "/images";

/// Manual trigger for the cache eviction sweep.
pub const CLEANUP_PATH: &str = "/cleanup";

/// The upstream session endpoint, answered locally (the mirror has no
/// session to offer and must not relay visitor traffic to upstream auth).
pub const SESSION_PROBE_PATH: &str = "/api/v1/users/me";

const ALLOWED_PREFIXES: [&str; 5] = [
    API_PREFIX,
    STORAGE_PREFIX,
    TELEMETRY_PREFIX,
    FRAMEWORK_ASSET_PREFIX,
    IMAGE_ASSET_PREFIX,
];

/// Extensions that mark a path as a cacheable static resource.
const STATIC_EXTENSIONS: [&str; 16] = [
    "png",
    "jpg",
    "jpeg",
    "gif",
    "webp",
    "svg",
    "avif",
    "ico",
    "woff",
    "woff2",
    "ttf",
    "otf",
    "js",
    "mjs",
    "css",
    "webmanifest",
];

/// Decide whether a method/path pair is served at all.
///
/// GET passes for the root, for single-segment static resources, and for the
/// fixed prefix allowlist. POST passes only for the cleanup trigger and the
/// API proxy. Every other combination is refused.
pub fn is_allowed(path: &str, method: &Method) -> bool {
    if *method == Method::GET {
        path == "/"
            || is_single_segment_static(path)
            || ALLOWED_PREFIXES
                .iter()
                .any(|prefix| matches_prefix(path, prefix))
    } else if *method == Method::POST {
        path == CLEANUP_PATH || matches_prefix(path, API_PREFIX)
    } else {
        false
    }
}

/// True iff the path's extension is on the static-resource allowlist.
///
/// Deliberately independent of [`is_allowed`]: prefix-allowed paths such as
/// framework chunks also flow through the cache when their extension matches.
pub fn is_static_resource(path: &str) -> bool {
    let Some((_, extension)) = path.rsplit_once('.') else {
        return false;
    };
    if extension.contains('/') {
        return false;
    }
    let extension = extension.to_ascii_lowercase();
    STATIC_EXTENSIONS.iter().any(|known| *known == extension)
}

/// Separator-bounded prefix match: `/api` matches `/api` and `/api/v1`, but
/// never `/apiary`.
pub fn matches_prefix(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn is_single_segment_static(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    !rest.is_empty() && !rest.contains('/') && is_static_resource(path)
}
