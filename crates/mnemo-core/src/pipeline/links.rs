//! Cross-reference layer.
//!
//! Rewrites `[[Target]]` / `[[Target|Alias]]` wiki links into either plain
//! display text or a deep link back to the source vault, depending on
//! configuration. Media embeds (`![[...]]`) belong to the media service;
//! they are swapped for placeholders before this layer's rewrite and
//! restored afterwards so their targets are never mangled.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::SyncConfig;
use crate::error::Result;

use super::mask::{code_spans, is_masked};
use super::{ConversionLayer, ConvertContext, LayerOutput};

// Private-use codepoints; no real note content contains them.
const PLACEHOLDER_OPEN: char = '\u{e000}';
const PLACEHOLDER_CLOSE: char = '\u{e001}';

fn embed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!\[\[[^\[\]]+\]\]").expect("Invalid regex"))
}

fn wiki_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[([^\[\]|]+)(?:\|([^\[\]]+))?\]\]").expect("Invalid regex"))
}

pub struct LinkLayer;

impl ConversionLayer for LinkLayer {
    fn name(&self) -> &'static str {
        "links"
    }

    fn priority(&self) -> i32 {
        30
    }

    fn enabled(&self, config: &SyncConfig) -> bool {
        config.layers.links
    }

    fn convert(&self, content: &str, ctx: &ConvertContext<'_>) -> Result<LayerOutput> {
        let (masked, embeds) = stash_embeds(content);
        let mut out = rewrite_links(&masked, ctx.config);
        out.content = restore_embeds(&out.content, &embeds);
        Ok(out)
    }
}

/// Build a deep link back to a vault note, optionally with an anchor
#[must_use]
pub fn deep_link(vault: &str, target: &str) -> String {
    format!(
        "obsidian://open?vault={}&file={}",
        urlencoding::encode(vault),
        urlencoding::encode(target)
    )
}

fn stash_embeds(content: &str) -> (String, Vec<String>) {
    let mut embeds = Vec::new();
    let replaced = embed_regex()
        .replace_all(content, |caps: &regex::Captures<'_>| {
            let token = format!("{PLACEHOLDER_OPEN}{}{PLACEHOLDER_CLOSE}", embeds.len());
            embeds.push(caps[0].to_string());
            token
        })
        .into_owned();
    (replaced, embeds)
}

fn restore_embeds(content: &str, embeds: &[String]) -> String {
    let mut restored = content.to_string();
    for (index, embed) in embeds.iter().enumerate() {
        let token = format!("{PLACEHOLDER_OPEN}{index}{PLACEHOLDER_CLOSE}");
        restored = restored.replace(&token, embed);
    }
    restored
}

fn rewrite_links(content: &str, config: &SyncConfig) -> LayerOutput {
    let spans = code_spans(content);
    let mut out = String::with_capacity(content.len());
    let mut changes = 0;
    let mut last = 0;

    for caps in wiki_link_regex().captures_iter(content) {
        let whole = caps.get(0).expect("capture 0 always present");
        if is_masked(&spans, whole.start()) {
            continue;
        }
        out.push_str(&content[last..whole.start()]);

        let target = caps[1].trim();
        let display = caps
            .get(2)
            .map_or_else(|| display_text(target), |alias| alias.as_str().trim().to_string());

        if config.deep_link_refs {
            out.push_str(&format!(
                "<a href=\"{}\">{display}</a>",
                deep_link(&config.vault_name, target)
            ));
        } else {
            out.push_str(&display);
        }
        changes += 1;
        last = whole.end();
    }
    out.push_str(&content[last..]);

    LayerOutput {
        content: out,
        warnings: Vec::new(),
        changes,
    }
}

// `[[Note#Section]]` displays as "Note > Section" when no alias is given.
fn display_text(target: &str) -> String {
    match target.split_once('#') {
        Some((note, section)) if !note.is_empty() => format!("{note} > {section}"),
        Some((_, section)) => section.to_string(),
        None => target.to_string(),
    }
}
