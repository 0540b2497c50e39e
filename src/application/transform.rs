//! Content-type-aware response transformation.
//!
//! Fetched bodies are decoded according to their declared content type,
//! HTML gets the two mirror fragments appended at body end, and every
//! textual result runs through the literal rewrite-rule list. Binary
//! categories are never touched.

use bytes::Bytes;
use lol_html::{RewriteStrSettings, element, html_content::ContentType, rewrite_str};
use thiserror::Error;

use crate::domain::{content::ContentCategory, rewrite::RuleSet};

/// Style block appended at body end. The blanked upstream fragments rely on
/// a `hidden` class; this guarantees one exists whatever the upstream
/// stylesheet ships.
pub const INJECTED_STYLE: &str = "\n<style>\n  .hidden { display: none !important; }\n</style>\n";

/// Script block appended at body end; marks the document so client-side
/// tooling can tell the mirror from the upstream.
pub const INJECTED_SCRIPT: &str =
    "\n<script>\n  window.__specchioMirror = true;\n</script>\n";

/// A transformed body: either rewritten text or opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformedBody {
    Text(String),
    Binary(Bytes),
}

impl TransformedBody {
    pub fn into_bytes(self) -> Bytes {
        match self {
            TransformedBody::Text(text) => Bytes::from(text),
            TransformedBody::Binary(bytes) => bytes,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("response body claimed JSON but could not be decoded: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response body is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("html rewriting failed: {0}")]
    HtmlRewrite(String),
}

/// Decode a fetched body per its declared content type and apply the
/// rewrite rules to every textual result.
pub fn transform(
    bytes: &Bytes,
    declared_content_type: Option<&str>,
    rules: &RuleSet,
) -> Result<TransformedBody, TransformError> {
    match ContentCategory::classify(declared_content_type) {
        ContentCategory::Json => {
            let value: serde_json::Value = serde_json::from_slice(bytes)?;
            Ok(TransformedBody::Text(rules.apply(&value.to_string())))
        }
        ContentCategory::Html => {
            let text = decode_text(bytes)?;
            let injected = inject_body_fragments(&text)?;
            Ok(TransformedBody::Text(rules.apply(&injected)))
        }
        ContentCategory::Font | ContentCategory::Image => {
            Ok(TransformedBody::Binary(bytes.clone()))
        }
        ContentCategory::Script | ContentCategory::Style | ContentCategory::PlainText => {
            let text = decode_text(bytes)?;
            Ok(TransformedBody::Text(rules.apply(&text)))
        }
    }
}

fn decode_text(bytes: &Bytes) -> Result<String, TransformError> {
    Ok(String::from_utf8(bytes.to_vec())?)
}

/// Append the style and script fragments immediately before the close of
/// the document body.
fn inject_body_fragments(html: &str) -> Result<String, TransformError> {
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("body", |body| {
                body.append(INJECTED_STYLE, ContentType::Html);
                body.append(INJECTED_SCRIPT, ContentType::Html);
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| TransformError::HtmlRewrite(err.to_string()))
}

#[cfg(test)]
mod tests {
    use crate::domain::rewrite::RewriteRule;

    use super::*;

    fn rules() -> RuleSet {
        RuleSet::new(vec![RewriteRule::new(
            "https://api.bento.me",
            "https://mirror.example/api",
        )])
    }

    #[test]
    fn html_gets_both_fragments_before_body_close() {
        let html = Bytes::from_static(b"<html><body><p>profile</p></body></html>");
        let result = transform(&html, Some("text/html; charset=utf-8"), &rules())
            .expect("transform");

        let TransformedBody::Text(text) = result else {
            panic!("html must decode as text");
        };
        let style_at = text.find("__specchioMirror").expect("script fragment");
        let body_close = text.find("</body>").expect("body close");
        assert!(text.contains(".hidden"));
        assert!(style_at < body_close);
    }

    #[test]
    fn json_is_canonicalized_and_rewritten() {
        let json = Bytes::from_static(b"{\n  \"avatar\": \"https://api.bento.me/v1/a.png\"\n}");
        let result = transform(&json, Some("application/json"), &rules()).expect("transform");
        assert_eq!(
            result,
            TransformedBody::Text(
                "{\"avatar\":\"https://mirror.example/api/v1/a.png\"}".to_string()
            )
        );
    }

    #[test]
    fn malformed_json_is_fatal() {
        let json = Bytes::from_static(b"{not json");
        assert!(matches!(
            transform(&json, Some("application/json"), &rules()),
            Err(TransformError::Json(_))
        ));
    }

    #[test]
    fn images_pass_through_even_when_they_contain_match_strings() {
        let body = Bytes::from_static(b"\x89PNG https://api.bento.me trailing");
        let result = transform(&body, Some("image/png"), &rules()).expect("transform");
        assert_eq!(result, TransformedBody::Binary(body));
    }

    #[test]
    fn absent_content_type_decodes_as_text() {
        let body = Bytes::from_static(b"plain https://api.bento.me");
        let result = transform(&body, None, &rules()).expect("transform");
        assert_eq!(
            result,
            TransformedBody::Text("plain https://mirror.example/api".to_string())
        );
    }

    #[test]
    fn scripts_are_rewritten() {
        let body = Bytes::from_static(b"fetch('https://api.bento.me/v1/me')");
        let result = transform(&body, Some("application/javascript"), &rules())
            .expect("transform");
        assert_eq!(
            result,
            TransformedBody::Text("fetch('https://mirror.example/api/v1/me')".to_string())
        );
    }

    #[test]
    fn invalid_utf8_text_is_fatal() {
        let body = Bytes::from_static(&[0xff, 0xfe, 0x00]);
        assert!(matches!(
            transform(&body, Some("text/css"), &rules()),
            Err(TransformError::Utf8(_))
        ));
    }
}
