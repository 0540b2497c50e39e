//! Ordered literal rewrite rules applied to textual response bodies.
//!
//! Rules are plain find/replace pairs, never patterns. They are applied in
//! sequence, each one as a global replace, so later rules see the output of
//! earlier ones. The list is loaded at startup: the built-in defaults are
//! derived from the mirror settings, and deployments can swap in a TOML
//! rules file without recompiling.

use serde::Deserialize;
use thiserror::Error;

use super::routes::{API_PREFIX, STORAGE_PREFIX};

/// The map-service access token the upstream embeds in its pages. It is
/// domain-locked upstream, so the mirror swaps it for its own.
const UPSTREAM_MAP_TOKEN: &str =
    "pk.eyJ1IjoibXVnZWViIiwiYSI6ImNsdG5idzFrbTA0c3UycnA4OWRtbTJ6dmMifQ.Qa0vYWIbFEHuNuPpbVkdEQ";

/// Class-attribute values of the two upstream branding fragments the mirror
/// blanks out by renaming their class lists to `hidden`.
const UPSTREAM_BRANDING_CLASSES: [&str; 2] = [
    "flex w-full flex-col items-center bg-[#FBFBFB]",
    "fixed left-16 bottom-[52px] -m-1 hidden items-center space-x-1 rounded-[12px] p-1 transition-colors xl:flex 2xl:space-x-2",
];

/// One literal find/replace pair.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RewriteRule {
    pub find: String,
    pub replace: String,
}

impl RewriteRule {
    pub fn new(find: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            find: find.into(),
            replace: replace.into(),
        }
    }
}

/// Inputs for the default rule list.
#[derive(Debug, Clone)]
pub struct MirrorRewriteParams {
    /// Public base URL of this service, target of the host redirections.
    pub public_base_url: String,
    /// Upstream API origin as it appears inside response bodies.
    pub api_origin: String,
    /// Upstream storage origin as it appears inside response bodies.
    pub storage_origin: String,
    /// Replacement map-service token.
    pub map_token: String,
}

/// The ordered rule list.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<RewriteRule>,
}

#[derive(Debug, Error)]
pub enum RuleFileError {
    #[error("failed to parse rewrite rules: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rule: Vec<RewriteRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<RewriteRule>) -> Self {
        Self { rules }
    }

    /// The built-in rule list: redirect upstream API and storage references
    /// back through our own proxy prefixes, substitute the map token, and
    /// blank the two upstream branding fragments.
    pub fn mirror_defaults(params: &MirrorRewriteParams) -> Self {
        let api_target = format!("{}{API_PREFIX}", params.public_base_url);
        let storage_target = format!("{}{STORAGE_PREFIX}", params.public_base_url);

        let mut rules = vec![
            RewriteRule::new(params.api_origin.clone(), api_target),
            RewriteRule::new(params.storage_origin.clone(), storage_target),
            RewriteRule::new(UPSTREAM_MAP_TOKEN, params.map_token.clone()),
        ];
        for class_list in UPSTREAM_BRANDING_CLASSES {
            rules.push(RewriteRule::new(class_list, "hidden"));
        }
        Self { rules }
    }

    /// Parse a `[[rule]]` TOML document into a rule list.
    pub fn from_toml_str(input: &str) -> Result<Self, RuleFileError> {
        let file: RuleFile = toml::from_str(input)?;
        Ok(Self { rules: file.rule })
    }

    /// Apply every rule in order, each as a global literal replace.
    pub fn apply(&self, input: &str) -> String {
        self.rules
            .iter()
            .fold(input.to_string(), |text, rule| {
                text.replace(&rule.find, &rule.replace)
            })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> MirrorRewriteParams {
        MirrorRewriteParams {
            public_base_url: "https://profile.example.net".to_string(),
            api_origin: "https://api.bento.me".to_string(),
            storage_origin: "https://storage.googleapis.com".to_string(),
            map_token: "pk.replacement".to_string(),
        }
    }

    #[test]
    fn defaults_redirect_hosts_through_the_proxy() {
        let rules = RuleSet::mirror_defaults(&params());
        let output = rules.apply(
            "fetch(\"https://api.bento.me/v1/profile\"); \
             img.src = \"https://storage.googleapis.com/bucket/a.png\";",
        );
        assert!(output.contains("https://profile.example.net/api/v1/profile"));
        assert!(output.contains("https://profile.example.net/googleapis_storage/bucket/a.png"));
        assert!(!output.contains("api.bento.me"));
        assert!(!output.contains("storage.googleapis.com"));
    }

    #[test]
    fn token_and_branding_substitutions() {
        let rules = RuleSet::mirror_defaults(&params());
        let input = format!(
            "accessToken: \"{UPSTREAM_MAP_TOKEN}\" <div class=\"{}\">",
            UPSTREAM_BRANDING_CLASSES[0]
        );
        let output = rules.apply(&input);
        assert!(!output.contains(UPSTREAM_MAP_TOKEN));
        assert!(output.contains("pk.replacement"));
        assert!(output.contains("class=\"hidden\""));
    }

    #[test]
    fn application_is_idempotent_for_the_default_rules() {
        let rules = RuleSet::mirror_defaults(&params());
        let input = "see https://api.bento.me and token pk.eyJ1IjoibXVnZWViIiwiYSI6ImNsdG5idzFrbTA0c3UycnA4OWRtbTJ6dmMifQ.Qa0vYWIbFEHuNuPpbVkdEQ";
        let once = rules.apply(input);
        assert_eq!(rules.apply(&once), once);
    }

    #[test]
    fn rules_apply_in_order_over_previous_output() {
        let rules = RuleSet::new(vec![
            RewriteRule::new("alpha", "beta"),
            RewriteRule::new("beta", "gamma"),
        ]);
        // The second rule sees the first rule's output.
        assert_eq!(rules.apply("alpha beta"), "gamma gamma");
    }

    #[test]
    fn rule_file_round_trip() {
        let ruleset = RuleSet::from_toml_str(
            r#"
            [[rule]]
            find = "one"
            replace = "1"

            [[rule]]
            find = "two"
            replace = "2"
            "#,
        )
        .expect("rules parse");
        assert_eq!(ruleset.len(), 2);
        assert_eq!(ruleset.apply("one and two"), "1 and 2");
    }

    #[test]
    fn empty_rule_file_yields_an_empty_list() {
        let ruleset = RuleSet::from_toml_str("").expect("rules parse");
        assert!(ruleset.is_empty());
    }
}
