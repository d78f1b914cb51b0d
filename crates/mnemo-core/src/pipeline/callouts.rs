//! Callout layer.
//!
//! Rewrites `> [!type] Title` block quotes into inline-styled HTML blocks
//! the peer renderer can display. Regular block quotes without a callout
//! marker are left alone.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::SyncConfig;
use crate::error::Result;

use super::{ConversionLayer, ConvertContext, LayerOutput};

fn callout_header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^>\s*\[!([A-Za-z]+)\][+-]?\s*(.*)$").expect("Invalid regex")
    })
}

pub struct CalloutLayer;

impl ConversionLayer for CalloutLayer {
    fn name(&self) -> &'static str {
        "callouts"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn enabled(&self, config: &SyncConfig) -> bool {
        config.layers.callouts
    }

    fn convert(&self, content: &str, _ctx: &ConvertContext<'_>) -> Result<LayerOutput> {
        Ok(rewrite_callouts(content))
    }
}

fn rewrite_callouts(content: &str) -> LayerOutput {
    let mut out: Vec<String> = Vec::new();
    let mut changes = 0;
    let mut in_fence = false;
    let mut lines = content.lines().peekable();

    while let Some(line) = lines.next() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            out.push(line.to_string());
            continue;
        }
        if in_fence {
            out.push(line.to_string());
            continue;
        }

        let Some(caps) = callout_header_regex().captures(line) else {
            out.push(line.to_string());
            continue;
        };

        let kind = caps[1].to_lowercase();
        let title = if caps[2].trim().is_empty() {
            capitalize(&kind)
        } else {
            caps[2].trim().to_string()
        };

        let mut body: Vec<String> = Vec::new();
        while let Some(next) = lines.peek() {
            let Some(rest) = quoted_rest(next) else { break };
            body.push(rest.to_string());
            lines.next();
        }

        out.push(render_callout(&kind, &title, &body));
        changes += 1;
    }

    let mut rendered = out.join("\n");
    if content.ends_with('\n') {
        rendered.push('\n');
    }
    LayerOutput {
        content: rendered,
        warnings: Vec::new(),
        changes,
    }
}

fn quoted_rest(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('>')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

fn render_callout(kind: &str, title: &str, body: &[String]) -> String {
    format!(
        "<div class=\"callout callout-{kind}\"><div class=\"callout-title\">{title}</div><div class=\"callout-content\">{}</div></div>",
        body.join("<br>")
    )
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().collect::<String>() + chars.as_str()
    })
}
