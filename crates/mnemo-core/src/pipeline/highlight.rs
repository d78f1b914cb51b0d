//! Highlight layer.
//!
//! Rewrites `==highlighted==` markup into the bold/underline styling the
//! peer renderer understands.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::SyncConfig;
use crate::error::Result;

use super::mask::{code_spans, is_masked};
use super::{ConversionLayer, ConvertContext, LayerOutput};

fn highlight_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Content must not begin or end with whitespace, so "a == b == c"
    // never counts as a highlight.
    RE.get_or_init(|| Regex::new(r"==(\S|\S[^=\n]*\S)==").expect("Invalid regex"))
}

pub struct HighlightLayer;

impl ConversionLayer for HighlightLayer {
    fn name(&self) -> &'static str {
        "highlight"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn enabled(&self, config: &SyncConfig) -> bool {
        config.layers.highlight
    }

    fn convert(&self, content: &str, _ctx: &ConvertContext<'_>) -> Result<LayerOutput> {
        let spans = code_spans(content);
        let mut out = String::with_capacity(content.len());
        let mut changes = 0;
        let mut last = 0;

        for caps in highlight_regex().captures_iter(content) {
            let whole = caps.get(0).expect("capture 0 always present");
            if is_masked(&spans, whole.start()) {
                continue;
            }
            out.push_str(&content[last..whole.start()]);
            out.push_str("<b><u>");
            out.push_str(&caps[1]);
            out.push_str("</u></b>");
            changes += 1;
            last = whole.end();
        }
        out.push_str(&content[last..]);

        Ok(LayerOutput {
            content: out,
            warnings: Vec::new(),
            changes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(content: &str) -> LayerOutput {
        let config = SyncConfig::default();
        let ctx = ConvertContext {
            config: &config,
            source_path: None,
        };
        HighlightLayer.convert(content, &ctx).unwrap()
    }

    #[test]
    fn highlight_becomes_bold_underline() {
        let out = convert("the ==key term== here");
        assert_eq!(out.content, "the <b><u>key term</u></b> here");
        assert_eq!(out.changes, 1);
    }

    #[test]
    fn multiple_highlights_on_one_line() {
        let out = convert("==a== and ==b==");
        assert_eq!(out.content, "<b><u>a</u></b> and <b><u>b</u></b>");
        assert_eq!(out.changes, 2);
    }

    #[test]
    fn highlight_inside_code_is_untouched() {
        let out = convert("`==not marked==` but ==this==");
        assert_eq!(out.content, "`==not marked==` but <b><u>this</u></b>");
    }

    #[test]
    fn bare_equals_are_untouched() {
        let out = convert("a == b and a ==== b");
        assert_eq!(out.content, "a == b and a ==== b");
        assert_eq!(out.changes, 0);
    }
}
