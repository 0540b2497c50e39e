//! Content-type classification for the transformation pipeline.

/// Closed set of content categories the transformer understands.
///
/// Classification replaces the usual chain of ad-hoc substring checks: the
/// match arms are ordered most-specific first, so a header such as
/// `text/html; charset=utf-8` lands on [`ContentCategory::Html`] and a JSON
/// type with parameters still lands on [`ContentCategory::Json`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCategory {
    Json,
    Html,
    Script,
    Style,
    Font,
    Image,
    PlainText,
}

impl ContentCategory {
    /// Classify a raw `Content-Type` header value by substring containment.
    /// An absent header decodes as plain text.
    pub fn classify(content_type: Option<&str>) -> Self {
        let Some(raw) = content_type else {
            return Self::PlainText;
        };
        let value = raw.to_ascii_lowercase();

        if value.contains("application/json") {
            Self::Json
        } else if value.contains("text/html") {
            Self::Html
        } else if value.contains("javascript") {
            Self::Script
        } else if value.contains("text/css") {
            Self::Style
        } else if value.contains("font") {
            Self::Font
        } else if value.contains("image") {
            Self::Image
        } else {
            Self::PlainText
        }
    }

    /// Textual categories are decoded to strings and rewritten; binary
    /// categories pass through untouched.
    pub fn is_textual(self) -> bool {
        !matches!(self, Self::Font | Self::Image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_with_parameters() {
        assert_eq!(
            ContentCategory::classify(Some("text/html; charset=utf-8")),
            ContentCategory::Html
        );
        assert_eq!(
            ContentCategory::classify(Some("application/json;charset=UTF-8")),
            ContentCategory::Json
        );
    }

    #[test]
    fn script_and_style_variants() {
        assert_eq!(
            ContentCategory::classify(Some("application/javascript")),
            ContentCategory::Script
        );
        assert_eq!(
            ContentCategory::classify(Some("text/javascript")),
            ContentCategory::Script
        );
        assert_eq!(
            ContentCategory::classify(Some("text/css")),
            ContentCategory::Style
        );
    }

    #[test]
    fn binary_families() {
        assert_eq!(
            ContentCategory::classify(Some("image/png")),
            ContentCategory::Image
        );
        assert_eq!(
            ContentCategory::classify(Some("font/woff2")),
            ContentCategory::Font
        );
        assert_eq!(
            ContentCategory::classify(Some("application/font-woff")),
            ContentCategory::Font
        );
        assert!(!ContentCategory::Image.is_textual());
        assert!(!ContentCategory::Font.is_textual());
    }

    #[test]
    fn absent_and_unknown_fall_back_to_text() {
        assert_eq!(ContentCategory::classify(None), ContentCategory::PlainText);
        assert_eq!(
            ContentCategory::classify(Some("application/octet-stream")),
            ContentCategory::PlainText
        );
        assert!(ContentCategory::PlainText.is_textual());
    }
}
