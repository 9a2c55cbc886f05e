// src/applicator.rs
use crate::scanner::LineIndex;
use crate::types::OptimizationSuggestion;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// The text at the suggestion's range is no longer its `before_code`.
    /// Re-analyze and offer fresh suggestions instead of forcing the edit.
    #[error("suggestion '{id}' is stale: expected {expected:?} at its range, found {found:?}")]
    StaleRange {
        id: String,
        expected: String,
        found: String,
    },
}

/// Replaces the suggestion's range with its `after_code`.
///
/// The source is never modified on failure. Re-analysis of the returned text is
/// left to the caller.
pub fn apply(suggestion: &OptimizationSuggestion, source: &str) -> Result<String, ApplyError> {
    let index = LineIndex::new(source);
    let stale = |found: &str| ApplyError::StaleRange {
        id: suggestion.id.clone(),
        expected: suggestion.before_code.clone(),
        found: found.to_string(),
    };

    let Some((start, end)) = index.span(&suggestion.range) else {
        warn!(id = %suggestion.id, "suggestion range is outside the source");
        return Err(stale(""));
    };
    let Some(current) = source.get(start..end) else {
        return Err(stale(""));
    };
    if current != suggestion.before_code {
        warn!(id = %suggestion.id, "suggestion range no longer matches");
        return Err(stale(current));
    }

    let mut rewritten = String::with_capacity(source.len() + suggestion.after_code.len());
    rewritten.push_str(&source[..start]);
    rewritten.push_str(&suggestion.after_code);
    rewritten.push_str(&source[end..]);
    debug!(id = %suggestion.id, start, end, "applied suggestion");
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;

    fn suggestion(range: SourceRange, before: &str, after: &str) -> OptimizationSuggestion {
        OptimizationSuggestion {
            id: "visibility:2:5".to_string(),
            title: "Declare `f` as external".to_string(),
            category: GasCategory::Call,
            difficulty: Difficulty::Easy,
            impact: Impact::Low,
            before_code: before.to_string(),
            after_code: after.to_string(),
            range,
            savings: 24,
            auto_fix_available: true,
        }
    }

    const SOURCE: &str = "contract C {\n    function f() public {}\n}\n";

    fn header_range() -> SourceRange {
        SourceRange {
            start_line: 2,
            start_column: 5,
            end_line: 2,
            end_column: 24,
        }
    }

    #[test]
    fn test_apply_replaces_range() {
        let s = suggestion(header_range(), "function f() public", "function f() external");
        let rewritten = apply(&s, SOURCE).unwrap();
        assert_eq!(rewritten, "contract C {\n    function f() external {}\n}\n");
    }

    #[test]
    fn test_changed_text_is_stale() {
        let s = suggestion(header_range(), "function f() public", "function f() external");
        let edited = SOURCE.replace("f()", "g()");
        match apply(&s, &edited) {
            Err(ApplyError::StaleRange { found, .. }) => assert_eq!(found, "function g() public"),
            other => panic!("expected stale range, got {:?}", other),
        }
    }

    #[test]
    fn test_out_of_bounds_range_is_stale() {
        let mut range = header_range();
        range.start_line = 40;
        let s = suggestion(range, "function f() public", "x");
        assert!(matches!(apply(&s, SOURCE), Err(ApplyError::StaleRange { .. })));
    }

    #[test]
    fn test_huge_column_is_stale() {
        let range = SourceRange {
            start_line: 2,
            start_column: usize::MAX,
            end_line: 2,
            end_column: usize::MAX,
        };
        let s = suggestion(range, "b;", "c;");
        assert!(matches!(apply(&s, "a;\nb;\n"), Err(ApplyError::StaleRange { .. })));
    }

    #[test]
    fn test_multiline_range() {
        let source = "a;\nb;\nc;\n";
        let range = SourceRange {
            start_line: 1,
            start_column: 1,
            end_line: 2,
            end_column: 3,
        };
        let s = suggestion(range, "a;\nb;", "b;\na;");
        assert_eq!(apply(&s, source).unwrap(), "b;\na;\nc;\n");
    }
}
