//
// line_index.rs
//
// Byte-offset to line/column mapping for manifest documents
//

/// Zero-based line/column position inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinePos {
    pub line: usize,
    pub col: usize,
}

/// Maps byte offsets in a document to line/column positions.
///
/// Built once per parse from the offsets of every `\n` in the text.
/// `\r\n` sequences end at the `\n`; the `\r` is not normalized, so a
/// position just before a Windows line ending points at the `\r`.
#[derive(Debug, Clone, Default)]
pub struct LineIndex {
    /// Sorted byte offsets of every `\n` in the source text.
    breaks: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let breaks = text
            .bytes()
            .enumerate()
            .filter(|(_, b)| *b == b'\n')
            .map(|(offset, _)| offset)
            .collect();
        Self { breaks }
    }

    /// Resolve a byte offset to a line/column position.
    ///
    /// The line is the number of line terminators strictly before the
    /// offset; the column is the distance from the previous terminator
    /// (or the raw offset on the first line). Offsets at or past the
    /// final terminator resolve to a synthetic last-line position.
    pub fn position(&self, offset: usize) -> LinePos {
        // Index of the first terminator at or after `offset`.
        let line = self.breaks.partition_point(|&b| b < offset);
        let col = if line == 0 {
            offset
        } else {
            offset - self.breaks[line - 1] - 1
        };
        LinePos { line, col }
    }

    /// Number of line terminators in the indexed text.
    pub fn line_break_count(&self) -> usize {
        self.breaks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_all_first_line() {
        let index = LineIndex::new("");
        assert_eq!(index.position(0), LinePos { line: 0, col: 0 });
        assert_eq!(index.position(7), LinePos { line: 0, col: 7 });
    }

    #[test]
    fn single_line_columns_are_raw_offsets() {
        let index = LineIndex::new("abcdef");
        assert_eq!(index.position(0), LinePos { line: 0, col: 0 });
        assert_eq!(index.position(5), LinePos { line: 0, col: 5 });
    }

    #[test]
    fn breaks_collected_for_mixed_line_endings() {
        // \r\n ends at the \n; the \r gets no special treatment.
        let index = LineIndex::new("0123\n456\r\n789\n\n\n");
        assert_eq!(index.line_break_count(), 5);
    }

    #[test]
    fn positions_across_lines() {
        let text = "0123\n456\r\n789\n\n\n";
        let index = LineIndex::new(text);
        assert_eq!(index.position(0), LinePos { line: 0, col: 0 });
        assert_eq!(index.position(4), LinePos { line: 0, col: 4 });
        assert_eq!(index.position(5), LinePos { line: 1, col: 0 });
        // Offset of the \r in "456\r\n".
        assert_eq!(index.position(8), LinePos { line: 1, col: 3 });
        assert_eq!(index.position(10), LinePos { line: 2, col: 0 });
        assert_eq!(index.position(14), LinePos { line: 4, col: 0 });
    }

    #[test]
    fn offset_past_final_terminator_is_synthetic_last_line() {
        let index = LineIndex::new("ab\ncd\n");
        assert_eq!(index.position(6), LinePos { line: 2, col: 0 });
        assert_eq!(index.position(9), LinePos { line: 2, col: 3 });
    }

    #[test]
    fn offset_exactly_at_terminator() {
        let index = LineIndex::new("ab\ncd");
        // The terminator itself belongs to the line it ends.
        assert_eq!(index.position(2), LinePos { line: 0, col: 2 });
        assert_eq!(index.position(3), LinePos { line: 1, col: 0 });
    }
}
