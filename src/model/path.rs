// model/path.rs - Path-based task naming/creation (C7)
//
// `A/B/C` parses into an ordered list of segment names. Creating a path
// auto-creates missing intermediate tasks under the current list and finds
// existing intermediates by case-insensitive name within the same parent,
// never duplicating them (spec §4.7).

/// A parsed `/`-separated path, e.g. `"Research/Draft/Outline"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPath {
    pub segments: Vec<String>,
}

impl TaskPath {
    /// Parse `input` into path segments. Empty segments (leading/trailing or
    /// doubled slashes) are rejected as invalid, matching the intuition that
    /// `"A//B"` is not a meaningful path.
    pub fn parse(input: &str) -> Option<Self> {
        if !input.contains('/') {
            return None;
        }
        let segments: Vec<String> = input.split('/').map(|s| s.trim().to_string()).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        Some(Self { segments })
    }

    pub fn leaf(&self) -> &str {
        self.segments.last().expect("path always has >=1 segment")
    }

    pub fn parents(&self) -> &[String] {
        &self.segments[..self.segments.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_levels() {
        let p = TaskPath::parse("A/B/C").unwrap();
        assert_eq!(p.segments, vec!["A", "B", "C"]);
        assert_eq!(p.leaf(), "C");
        assert_eq!(p.parents(), &["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn plain_summary_is_not_a_path() {
        assert!(TaskPath::parse("Buy milk").is_none());
    }

    #[test]
    fn rejects_empty_segments() {
        assert!(TaskPath::parse("A//B").is_none());
        assert!(TaskPath::parse("/A/B").is_none());
        assert!(TaskPath::parse("A/B/").is_none());
    }
}
