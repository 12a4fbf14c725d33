//! Uniform view over assembly source files

use std::fmt;

/// A single assembly source file, split into lines.
///
/// Lines are 0-indexed internally; diagnostics report them 1-indexed.
#[derive(Debug, Clone)]
pub struct SourceFile {
    name: String,
    lines: Vec<String>,
}

impl SourceFile {
    /// Create a source file from its full text, splitting on newlines
    pub fn from_text(name: &str, text: &str) -> SourceFile {
        SourceFile {
            name: name.to_string(),
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    /// Create a source file from pre-split lines
    pub fn from_lines(name: &str, lines: Vec<String>) -> SourceFile {
        SourceFile {
            name: name.to_string(),
            lines,
        }
    }

    /// Get the file name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of lines in the file
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Get a line by its 0-based index
    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }
}

/// A position in a source file, attached to tokens and carried by errors.
///
/// `line` and `column` are 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(file: &str, line: usize, column: usize) -> SourceLocation {
        SourceLocation {
            file: file.to_string(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_text_splits_lines() {
        let file = SourceFile::from_text("prog.asm", "main:\n  li $v0, 10\n  syscall");
        assert_eq!(file.name(), "prog.asm");
        assert_eq!(file.line_count(), 3);
        assert_eq!(file.line(1), Some("  li $v0, 10"));
        assert_eq!(file.line(3), None);
    }

    #[test]
    fn from_lines_keeps_lines_verbatim() {
        let lines = vec!["main:".to_string(), "syscall".to_string()];
        let file = SourceFile::from_lines("prog.asm", lines);
        assert_eq!(file.line_count(), 2);
        assert_eq!(file.line(0), Some("main:"));
    }

    #[test]
    fn location_displays_file_line_column() {
        let loc = SourceLocation::new("prog.asm", 4, 9);
        assert_eq!(loc.to_string(), "prog.asm:4:9");
    }
}
