//! Origin resolution: map an allowed request path (plus referer) to the
//! absolute upstream URL it mirrors, or refuse it.

use url::Url;

use super::routes::{API_PREFIX, STORAGE_PREFIX, matches_prefix};

/// Prefixes that must never be reachable without a referer from our own
/// base URL. Without this gate the mirror would be an open relay to the
/// upstream API and storage hosts.
const RESTRICTED_PREFIXES: [&str; 2] = [API_PREFIX, STORAGE_PREFIX];

/// Pure path-to-upstream mapping. Built once from settings, shared across
/// requests.
#[derive(Debug, Clone)]
pub struct OriginResolver {
    public_base_url: String,
    mirror_origin: Url,
    api_origin: Url,
    storage_origin: Url,
    profile_username: String,
}

impl OriginResolver {
    pub fn new(
        public_base_url: String,
        mirror_origin: Url,
        api_origin: Url,
        storage_origin: Url,
        profile_username: String,
    ) -> Self {
        Self {
            public_base_url,
            mirror_origin,
            api_origin,
            storage_origin,
            profile_username,
        }
    }

    /// Resolve a path to its upstream URL, or `None` when the request must
    /// be refused.
    ///
    /// The restricted-prefix gate runs before any mapping: the rewritten
    /// destination of a restricted prefix must never be derivable without a
    /// valid referer.
    pub fn resolve(&self, path: &str, referer: Option<&str>) -> Option<Url> {
        let restricted = RESTRICTED_PREFIXES
            .iter()
            .any(|prefix| matches_prefix(path, prefix));
        if restricted && !self.referer_is_trusted(referer) {
            return None;
        }

        if matches_prefix(path, API_PREFIX) {
            return self.join(&self.api_origin, strip_prefix(path, API_PREFIX));
        }
        if matches_prefix(path, STORAGE_PREFIX) {
            return self.join(&self.storage_origin, strip_prefix(path, STORAGE_PREFIX));
        }
        if path == "/" {
            return self.join(&self.mirror_origin, &format!("/{}", self.profile_username));
        }
        self.join(&self.mirror_origin, path)
    }

    fn referer_is_trusted(&self, referer: Option<&str>) -> bool {
        referer.is_some_and(|value| value.starts_with(&self.public_base_url))
    }

    fn join(&self, origin: &Url, path: &str) -> Option<Url> {
        if path.is_empty() {
            return Some(origin.clone());
        }
        origin.join(path).ok()
    }
}

/// Strip exactly the prefix's own length, keeping the separator that follows
/// it: `/api/v1/x` becomes `/v1/x`, bare `/api` becomes the empty path.
fn strip_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    &path[prefix.len()..]
}
