use thiserror::Error;

/// The only failure a compile can produce.
///
/// `line` is 1-based, `column` is the 0-based byte offset into `source_line`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}\n  Line {line}\n    {}", excerpt(.source_line, .column))]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub source_line: String,
}

/// Rejected open/close marker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid delimiter {0:?}")]
pub struct InvalidDelimiters(pub String);

impl SyntaxError {
    /// Locate `offset` in `source` and build the diagnostic for it.
    pub(crate) fn at(source: &str, offset: usize, message: impl Into<String>) -> Self {
        let offset = offset.min(source.len());
        let consumed = &source[..offset];
        let line_start = consumed.rfind('\n').map_or(0, |i| i + 1);
        let line_end = source[offset..]
            .find('\n')
            .map_or(source.len(), |i| offset + i);

        SyntaxError {
            message: message.into(),
            line: consumed.matches('\n').count() + 1,
            column: offset - line_start,
            source_line: source[line_start..line_end]
                .trim_end_matches('\r')
                .to_string(),
        }
    }
}

/// Trimmed source line with a caret under the failing column.
///
/// `column` is a byte offset; the caret is indented by characters.
fn excerpt(source_line: &str, column: &usize) -> String {
    let indent = source_line.len() - source_line.trim_start().len();
    let caret = source_line
        .get(indent..(*column).min(source_line.len()))
        .map_or(0, |prefix| prefix.chars().count());
    format!("{}\n    {}^", source_line.trim(), " ".repeat(caret))
}
