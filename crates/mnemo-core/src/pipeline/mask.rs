//! Boundary detection for markup rewriting.
//!
//! Every layer must leave code samples alone. This module computes the byte
//! ranges covered by fenced code blocks and inline code spans once per
//! layer run; layers then skip any match that starts inside a masked range.

use std::ops::Range;

/// Byte ranges of fenced code blocks and inline code spans.
///
/// Fence lines themselves are part of the masked range. An unclosed fence
/// masks through the end of the content.
#[must_use]
pub fn code_spans(content: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut offset = 0;
    let mut fence_start: Option<usize> = None;

    for line in content.split_inclusive('\n') {
        let line_end = offset + line.len();
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            match fence_start.take() {
                Some(start) => spans.push(start..line_end),
                None => fence_start = Some(offset),
            }
        } else if fence_start.is_none() {
            inline_spans(line, offset, &mut spans);
        }
        offset = line_end;
    }

    if let Some(start) = fence_start {
        spans.push(start..content.len());
    }
    spans
}

/// Whether a byte position falls inside any masked range
#[must_use]
pub fn is_masked(spans: &[Range<usize>], position: usize) -> bool {
    spans.iter().any(|span| span.contains(&position))
}

// Inline spans are matched per line; a lone backtick never opens a span.
fn inline_spans(line: &str, line_offset: usize, spans: &mut Vec<Range<usize>>) {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'`' {
            if let Some(close) = line[i + 1..].find('`') {
                let end = i + 1 + close + 1;
                spans.push(line_offset + i..line_offset + end);
                i = end;
                continue;
            }
        }
        i += 1;
    }
}
