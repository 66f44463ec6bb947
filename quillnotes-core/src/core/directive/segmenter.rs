//! Splitting a line into text and directive segments for rendering.
//!
//! Rendering replaces each directive's source with its display value, which
//! changes the line length. [`LineDisplay`] keeps the mapping between source
//! and display offsets so cursor and selection logic can translate in both
//! directions. All offsets are byte offsets.

use super::finder::{directive_key, find_directives, FoundDirective};
use super::result::DirectiveResult;
use std::collections::HashMap;
use std::ops::Range;

/// A contiguous piece of a line.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveSegment {
    /// Plain text, rendered as is.
    Text { text: String, range: Range<usize> },
    /// A directive and its cached result, if any.
    Directive {
        directive: FoundDirective,
        key: String,
        result: Option<DirectiveResult>,
    },
}

impl DirectiveSegment {
    /// Byte range of this segment in the source line.
    pub fn source_range(&self) -> Range<usize> {
        match self {
            Self::Text { range, .. } => range.clone(),
            Self::Directive { directive, .. } => directive.start_offset..directive.end_offset,
        }
    }

    /// Text shown for this segment: the result's display string for a
    /// directive, or its source while nothing has been computed.
    pub fn display_text(&self) -> String {
        match self {
            Self::Text { text, .. } => text.clone(),
            Self::Directive { directive, result: Some(result), .. } => {
                result.to_display_string(&directive.source_text)
            }
            Self::Directive { directive, result: None, .. } => directive.source_text.clone(),
        }
    }
}

/// Where one directive sits in the source line and in the rendered line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveDisplayRange {
    pub key: String,
    pub source_start: usize,
    pub source_end: usize,
    pub display_start: usize,
    pub display_end: usize,
    pub is_computed: bool,
    pub has_error: bool,
    pub has_warning: bool,
}

/// A rendered line together with its offset map.
#[derive(Debug, Clone, PartialEq)]
pub struct LineDisplay {
    pub display_text: String,
    pub segments: Vec<DirectiveSegment>,
    /// One entry per directive segment, in line order.
    pub directive_ranges: Vec<DirectiveDisplayRange>,
    source_len: usize,
}

impl LineDisplay {
    /// Maps an offset in `display_text` back to the source line.
    ///
    /// Offsets strictly inside a rendered directive map to the start of its
    /// source; the end of a rendered directive maps to the end of its source.
    pub fn display_to_source(&self, offset: usize) -> usize {
        let (mut source, mut display) = (0, 0);
        for range in &self.directive_ranges {
            if offset <= range.display_start {
                break;
            }
            if offset < range.display_end {
                return range.source_start;
            }
            source = range.source_end;
            display = range.display_end;
        }
        (source + offset.saturating_sub(display)).min(self.source_len)
    }

    /// Maps an offset in the source line to `display_text`.
    ///
    /// Offsets strictly inside a directive's source map to the start of its
    /// rendered value; the end of the source maps to the end of the value.
    pub fn source_to_display(&self, offset: usize) -> usize {
        let (mut source, mut display) = (0, 0);
        for range in &self.directive_ranges {
            if offset <= range.source_start {
                break;
            }
            if offset < range.source_end {
                return range.display_start;
            }
            source = range.source_end;
            display = range.display_end;
        }
        (display + offset.saturating_sub(source)).min(self.display_text.len())
    }
}

/// Splits `content` (one line) into alternating text and directive segments
/// covering the whole line. `results` is keyed by [`directive_key`].
pub fn segment_line(
    content: &str,
    line_index: usize,
    results: &HashMap<String, DirectiveResult>,
) -> Vec<DirectiveSegment> {
    let mut segments = Vec::new();
    let mut cursor = 0;
    for directive in find_directives(content) {
        if directive.start_offset > cursor {
            segments.push(text_segment(content, cursor..directive.start_offset));
        }
        cursor = directive.end_offset;
        let key = directive_key(line_index, directive.start_offset);
        let result = results.get(&key).cloned();
        segments.push(DirectiveSegment::Directive { directive, key, result });
    }
    if cursor < content.len() {
        segments.push(text_segment(content, cursor..content.len()));
    }
    segments
}

fn text_segment(content: &str, range: Range<usize>) -> DirectiveSegment {
    DirectiveSegment::Text {
        text: content[range.clone()].to_string(),
        range,
    }
}

/// Renders `content` (one line), substituting each directive's display value.
pub fn build_display_text(
    content: &str,
    line_index: usize,
    results: &HashMap<String, DirectiveResult>,
) -> LineDisplay {
    let segments = segment_line(content, line_index, results);
    let mut display_text = String::with_capacity(content.len());
    let mut directive_ranges = Vec::new();

    for segment in &segments {
        let display_start = display_text.len();
        display_text.push_str(&segment.display_text());
        if let DirectiveSegment::Directive { directive, key, result } = segment {
            directive_ranges.push(DirectiveDisplayRange {
                key: key.clone(),
                source_start: directive.start_offset,
                source_end: directive.end_offset,
                display_start,
                display_end: display_text.len(),
                is_computed: result.is_some(),
                has_error: result.as_ref().is_some_and(DirectiveResult::is_error),
                has_warning: result.as_ref().is_some_and(DirectiveResult::is_warning),
            });
        }
    }

    LineDisplay {
        display_text,
        segments,
        directive_ranges,
        source_len: content.len(),
    }
}
