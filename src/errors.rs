// File: src/errors.rs
//
// Error handling and reporting for the language's lexer, parser, compiler
// and VM. Provides a single structured error type with source location
// information and a rustc-flavored pretty-printed rendering.

use colored::Colorize;
use std::fmt;

/// Source location information for tracking where code appears in a file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
    pub file: Option<String>,
}

#[allow(dead_code)]
impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column, file: None }
    }

    pub fn with_file(line: usize, column: usize, file: String) -> Self {
        Self { line, column, file: Some(file) }
    }

    pub fn unknown() -> Self {
        Self { line: 0, column: 0, file: None }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}:{}:{}", file, self.line, self.column)
        } else {
            write!(f, "{}:{}", self.line, self.column)
        }
    }
}

/// Broad classification of every fatal the core can raise.
///
/// `Lex`/`Parse` come from the ambient front end; `Compile` covers
/// compile-time fatals; `Type`/`Arity` cover the VM's runtime fatals;
/// `Name` is used only for the CLI's "did you mean?" ergonomics around
/// undefined globals, which the core itself treats as ordinary nil lookups.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    Lex,
    Parse,
    Compile,
    Type,
    Arity,
    Name,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Lex => write!(f, "Lex Error"),
            ErrorKind::Parse => write!(f, "Parse Error"),
            ErrorKind::Compile => write!(f, "Compile Error"),
            ErrorKind::Type => write!(f, "Type Error"),
            ErrorKind::Arity => write!(f, "Arity Error"),
            ErrorKind::Name => write!(f, "Name Error"),
        }
    }
}

/// A structured, fatal error with location information.
///
/// Every fatal in this crate (lexer, parser, compiler, or VM) is one of
/// these. There is no recoverable in-language exception mechanism:
/// a `KalaError` either aborts `run`'s top-level handler or, inside the
/// compiler/VM, is fatal by construction.
#[derive(Debug, Clone)]
pub struct KalaError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: SourceLocation,
    pub source_line: Option<String>,
    pub suggestion: Option<String>,
    pub help: Option<String>,
    pub note: Option<String>,
}

#[allow(dead_code)]
impl KalaError {
    pub fn new(kind: ErrorKind, message: String, location: SourceLocation) -> Self {
        Self {
            kind,
            message,
            location,
            source_line: None,
            suggestion: None,
            help: None,
            note: None,
        }
    }

    pub fn with_source(mut self, source_line: String) -> Self {
        self.source_line = Some(source_line);
        self
    }

    pub fn with_suggestion(mut self, suggestion: String) -> Self {
        self.suggestion = Some(suggestion);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.note = Some(note);
        self
    }

    pub fn lex(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::new(ErrorKind::Lex, message.into(), location)
    }

    pub fn parse(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::new(ErrorKind::Parse, message.into(), location)
    }

    pub fn compile(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Compile, message.into(), SourceLocation::unknown())
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message.into(), SourceLocation::unknown())
    }

    pub fn arity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Arity, message.into(), SourceLocation::unknown())
    }

    pub fn undefined_name(name: &str, location: SourceLocation) -> Self {
        Self::new(ErrorKind::Name, format!("'{}' is not defined", name), location)
    }
}

impl fmt::Display for KalaError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind_str = format!("{}", self.kind);
        writeln!(f, "{}: {}", kind_str.red().bold(), self.message.bold())?;

        if self.location != SourceLocation::unknown() {
            let location_str = format!("  --> {}", self.location);
            writeln!(f, "{}", location_str.bright_blue())?;
        }

        if let Some(ref source) = self.source_line {
            let line_num = self.location.line;
            let col_num = self.location.column;

            writeln!(f, "   {}", "|".bright_blue())?;
            writeln!(
                f,
                "{} {} {}",
                format!("{:3}", line_num).bright_blue(),
                "|".bright_blue(),
                source
            )?;
            writeln!(
                f,
                "   {} {}{}",
                "|".bright_blue(),
                " ".repeat(col_num.saturating_sub(1)),
                "^".red().bold()
            )?;
            writeln!(f, "   {}", "|".bright_blue())?;
        }

        if let Some(ref help) = self.help {
            writeln!(
                f,
                "   {} {}",
                "=".bright_yellow(),
                format!("help: {}", help).bright_yellow()
            )?;
        }

        if let Some(ref suggestion) = self.suggestion {
            writeln!(
                f,
                "   {} {}",
                "=".bright_green(),
                format!("did you mean '{}'?", suggestion).bright_green()
            )?;
        }

        if let Some(ref note) = self.note {
            writeln!(f, "   {} {}", "=".bright_cyan(), format!("note: {}", note).bright_cyan())?;
        }

        Ok(())
    }
}

/// Computes the Levenshtein distance between two strings.
/// Used for "did you mean?" suggestions against the global table.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let len1 = s1.chars().count();
    let len2 = s2.chars().count();

    if len1 == 0 {
        return len2;
    }
    if len2 == 0 {
        return len1;
    }

    let mut matrix = vec![vec![0; len2 + 1]; len1 + 1];

    for (i, row) in matrix.iter_mut().enumerate().take(len1 + 1) {
        row[0] = i;
    }
    for j in 0..=len2 {
        matrix[0][j] = j;
    }

    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();

    for i in 1..=len1 {
        for j in 1..=len2 {
            let cost = if s1_chars[i - 1] == s2_chars[j - 1] { 0 } else { 1 };
            matrix[i][j] = std::cmp::min(
                std::cmp::min(matrix[i - 1][j] + 1, matrix[i][j - 1] + 1),
                matrix[i - 1][j - 1] + cost,
            );
        }
    }

    matrix[len1][len2]
}

/// Finds the closest match from a list of candidates using Levenshtein distance.
/// Returns `None` if no candidate is within distance 3.
pub fn find_closest_match<'a>(target: &str, candidates: &'a [String]) -> Option<&'a str> {
    if candidates.is_empty() {
        return None;
    }

    let mut best_match = None;
    let mut best_distance = usize::MAX;

    for candidate in candidates {
        let distance = levenshtein_distance(target, candidate);
        if distance <= 3 && distance < best_distance {
            best_distance = distance;
            best_match = Some(candidate.as_str());
        }
    }

    best_match
}

impl std::error::Error for KalaError {}

pub type KalaResult<T> = Result<T, KalaError>;
