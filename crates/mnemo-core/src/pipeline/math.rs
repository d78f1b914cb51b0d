//! Math delimiter layer.
//!
//! Rewrites `$...$` to `\(...\)` and `$$...$$` to `\[...\]`, the delimiter
//! style the peer renderer expects. Currency amounts that merely look like
//! an opening delimiter are left untouched, as is anything inside code.

use crate::config::SyncConfig;
use crate::error::Result;

use super::mask::{code_spans, is_masked};
use super::{ConversionLayer, ConvertContext, LayerOutput};

pub struct MathLayer;

impl ConversionLayer for MathLayer {
    fn name(&self) -> &'static str {
        "math"
    }

    fn priority(&self) -> i32 {
        40
    }

    fn enabled(&self, config: &SyncConfig) -> bool {
        config.layers.math
    }

    fn convert(&self, content: &str, _ctx: &ConvertContext<'_>) -> Result<LayerOutput> {
        Ok(rewrite_math(content))
    }
}

fn rewrite_math(content: &str) -> LayerOutput {
    let spans = code_spans(content);
    let bytes = content.as_bytes();
    let mut out = String::with_capacity(content.len());
    let mut changes = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            // Copy everything up to the next dollar sign in one piece so
            // slicing always lands on char boundaries.
            let next = content[i..].find('$').map_or(content.len(), |n| i + n);
            out.push_str(&content[i..next]);
            i = next;
            continue;
        }
        if is_masked(&spans, i) || is_escaped(bytes, i) {
            out.push('$');
            i += 1;
            continue;
        }

        // Block math first: $$...$$ may span lines.
        if bytes.get(i + 1) == Some(&b'$') {
            if let Some(close) = find_unescaped(content, "$$", i + 2) {
                out.push_str("\\[");
                out.push_str(&content[i + 2..close]);
                out.push_str("\\]");
                changes += 1;
                i = close + 2;
                continue;
            }
            // Unmatched block opener: leave both dollars alone.
            out.push_str("$$");
            i += 2;
            continue;
        }

        match inline_close(content, &spans, i) {
            InlineMatch::Math(close) => {
                out.push_str("\\(");
                out.push_str(&content[i + 1..close]);
                out.push_str("\\)");
                changes += 1;
                i = close + 1;
            }
            InlineMatch::Currency | InlineMatch::Unmatched => {
                out.push('$');
                i += 1;
            }
        }
    }

    LayerOutput {
        content: out,
        warnings: Vec::new(),
        changes,
    }
}

enum InlineMatch {
    /// Closing delimiter at this byte position
    Math(usize),
    Currency,
    Unmatched,
}

/// Decide what a single `$` at `open` is.
///
/// Lookahead is bounded to the current line. A `$` immediately followed by
/// a digit with no closing `$` on the line is a currency amount; so is a
/// pair where the would-be closing `$` itself starts another amount, as in
/// "$12.50 and $13".
fn inline_close(content: &str, spans: &[std::ops::Range<usize>], open: usize) -> InlineMatch {
    let bytes = content.as_bytes();
    let line_end = content[open..]
        .find('\n')
        .map_or(content.len(), |n| open + n);
    let opens_amount = bytes.get(open + 1).is_some_and(u8::is_ascii_digit);

    let mut i = open + 1;
    while i < line_end {
        if bytes[i] == b'$' && !is_escaped(bytes, i) && !is_masked(spans, i) {
            if opens_amount && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
                // "$12.50 and $13": both dollars start amounts.
                return InlineMatch::Currency;
            }
            return InlineMatch::Math(i);
        }
        i += 1;
    }

    if opens_amount {
        InlineMatch::Currency
    } else {
        InlineMatch::Unmatched
    }
}

fn find_unescaped(content: &str, needle: &str, from: usize) -> Option<usize> {
    let bytes = content.as_bytes();
    let mut at = from;
    while let Some(pos) = content[at..].find(needle) {
        let pos = at + pos;
        if !is_escaped(bytes, pos) {
            return Some(pos);
        }
        at = pos + needle.len();
    }
    None
}

fn is_escaped(bytes: &[u8], position: usize) -> bool {
    position > 0 && bytes[position - 1] == b'\\'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(content: &str) -> LayerOutput {
        rewrite_math(content)
    }

    #[test]
    fn inline_math_is_rewritten() {
        let out = convert("Ohm's law: $V = IR$ applies.");
        assert_eq!(out.content, "Ohm's law: \\(V = IR\\) applies.");
        assert_eq!(out.changes, 1);
    }

    #[test]
    fn block_math_is_rewritten() {
        let out = convert("$$\\int_0^1 x\\,dx$$");
        assert_eq!(out.content, "\\[\\int_0^1 x\\,dx\\]");
        assert_eq!(out.changes, 1);
    }

    #[test]
    fn block_math_spans_lines() {
        let out = convert("$$\na^2 + b^2 = c^2\n$$");
        assert_eq!(out.content, "\\[\na^2 + b^2 = c^2\n\\]");
    }

    #[test]
    fn currency_without_closing_delimiter_is_left_alone() {
        let out = convert("The ticket costs $12.50 today.");
        assert_eq!(out.content, "The ticket costs $12.50 today.");
        assert_eq!(out.changes, 0);
    }

    #[test]
    fn two_currency_amounts_on_one_line_are_left_alone() {
        let out = convert("Lunch was $12.50 and coffee $4.");
        assert_eq!(out.content, "Lunch was $12.50 and coffee $4.");
        assert_eq!(out.changes, 0);
    }

    #[test]
    fn math_inside_fenced_code_is_untouched() {
        let src = "```\nlet price = \"$x$\";\n```\n$y$";
        let out = convert(src);
        assert!(out.content.contains("\"$x$\""));
        assert!(out.content.ends_with("\\(y\\)"));
        assert_eq!(out.changes, 1);
    }

    #[test]
    fn math_inside_inline_code_is_untouched() {
        let out = convert("run `echo $PATH$` now");
        assert_eq!(out.content, "run `echo $PATH$` now");
    }

    #[test]
    fn escaped_dollar_is_untouched() {
        let out = convert("literal \\$5 here");
        assert_eq!(out.content, "literal \\$5 here");
    }

    #[test]
    fn unmatched_dollar_is_untouched() {
        let out = convert("a lone $ sign");
        assert_eq!(out.content, "a lone $ sign");
    }

    #[test]
    fn lookahead_does_not_cross_lines() {
        let out = convert("price $5\nnext $line$ ok");
        assert_eq!(out.content, "price $5\nnext \\(line\\) ok");
    }
}
