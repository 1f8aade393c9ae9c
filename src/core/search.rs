//! Find-and-highlight over rendered text. Input is the page text as ordered
//! segments tagged with their owning element; output splits each segment into
//! plain and matched fragments, numbering matches in document order.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

/// Text owned by these elements is never searched.
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSegment {
    pub tag: String,
    pub text: String,
}

impl TextSegment {
    pub fn new(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            text: text.into(),
        }
    }

    fn is_searchable(&self) -> bool {
        !SKIPPED_TAGS
            .iter()
            .any(|t| self.tag.eq_ignore_ascii_case(t))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Fragment {
    Text { text: String },
    Match { text: String, index: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightedSegment {
    /// Position in the input slice.
    pub segment: usize,
    pub fragments: Vec<Fragment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    /// Only segments with at least one match.
    pub segments: Vec<HighlightedSegment>,
    pub total_matches: usize,
}

/// Literal, case-insensitive search. A blank query matches nothing.
pub fn highlight(segments: &[TextSegment], query: &str) -> Highlight {
    if query.trim().is_empty() {
        return Highlight::default();
    }
    let regex = match RegexBuilder::new(&regex::escape(query))
        .case_insensitive(true)
        .build()
    {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!("search pattern rejected: {}", e);
            return Highlight::default();
        }
    };

    let mut result = Highlight::default();
    for (position, segment) in segments.iter().enumerate() {
        if !segment.is_searchable() {
            continue;
        }
        let mut fragments = Vec::new();
        let mut last = 0;
        for m in regex.find_iter(&segment.text) {
            if m.start() > last {
                fragments.push(Fragment::Text {
                    text: segment.text[last..m.start()].to_string(),
                });
            }
            fragments.push(Fragment::Match {
                text: m.as_str().to_string(),
                index: result.total_matches,
            });
            result.total_matches += 1;
            last = m.end();
        }
        if fragments.is_empty() {
            continue;
        }
        if last < segment.text.len() {
            fragments.push(Fragment::Text {
                text: segment.text[last..].to_string(),
            });
        }
        result.segments.push(HighlightedSegment {
            segment: position,
            fragments,
        });
    }
    result
}

/// Current match position for next/previous navigation. Wraps both ways.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchCursor {
    total: usize,
    current: usize,
}

impl MatchCursor {
    pub fn new(total: usize) -> Self {
        Self { total, current: 0 }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn current(&self) -> Option<usize> {
        (self.total > 0).then_some(self.current)
    }

    pub fn next(&mut self) -> Option<usize> {
        if self.total == 0 {
            return None;
        }
        self.current = if self.current + 1 < self.total {
            self.current + 1
        } else {
            0
        };
        Some(self.current)
    }

    pub fn previous(&mut self) -> Option<usize> {
        if self.total == 0 {
            return None;
        }
        self.current = if self.current > 0 {
            self.current - 1
        } else {
            self.total - 1
        };
        Some(self.current)
    }

    /// "3/7" as shown next to the search box.
    pub fn label(&self) -> String {
        match self.current() {
            Some(i) => format!("{}/{}", i + 1, self.total),
            None => "0/0".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highlight_numbers_matches_across_segments() {
        let segments = vec![
            TextSegment::new("td", "Coto Supermercado"),
            TextSegment::new("script", "var coto = 1;"),
            TextSegment::new("p", "Pagado en COTO y coto"),
        ];
        let result = highlight(&segments, "coto");
        assert_eq!(result.total_matches, 3);
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[1].segment, 2);
        assert_eq!(
            result.segments[1].fragments,
            vec![
                Fragment::Text { text: "Pagado en ".into() },
                Fragment::Match { text: "COTO".into(), index: 1 },
                Fragment::Text { text: " y ".into() },
                Fragment::Match { text: "coto".into(), index: 2 },
            ]
        );
    }

    #[test]
    fn test_metacharacters_are_literal() {
        let segments = vec![TextSegment::new("span", "Total (USD) 1.5 vs 105")];
        let result = highlight(&segments, "1.5");
        assert_eq!(result.total_matches, 1);
        assert_eq!(highlight(&segments, "(usd)").total_matches, 1);
    }

    #[test]
    fn test_blank_query() {
        let segments = vec![TextSegment::new("td", "algo")];
        assert_eq!(highlight(&segments, "   "), Highlight::default());
    }

    #[test]
    fn test_cursor_wraps() {
        let mut cursor = MatchCursor::new(3);
        assert_eq!(cursor.label(), "1/3");
        assert_eq!(cursor.previous(), Some(2));
        assert_eq!(cursor.next(), Some(0));
        assert_eq!(cursor.next(), Some(1));

        let mut empty = MatchCursor::new(0);
        assert_eq!(empty.next(), None);
        assert_eq!(empty.label(), "0/0");
    }
}
