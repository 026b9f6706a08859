// Carbon Error Handling Module
// Compile-time and runtime errors with spans, source context and script-level tracebacks

#[cfg(not(target_arch = "wasm32"))]
use colored::*;
use std::fmt;

/// Represents a position in the source code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self {
            line: 0,
            column: 0,
            offset: 0,
        }
    }
}

/// Represents a span in the source code (start to end position)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn from_positions(
        start_line: usize,
        start_col: usize,
        end_line: usize,
        end_col: usize,
    ) -> Self {
        Self {
            start: Position::new(start_line, start_col, 0),
            end: Position::new(end_line, end_col, 0),
        }
    }

    pub fn single(line: usize, column: usize, offset: usize) -> Self {
        let pos = Position::new(line, column, offset);
        Self {
            start: pos,
            end: pos,
        }
    }

    /// Span covering both `self` and `other`
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start,
            end: other.end,
        }
    }

    pub fn line(&self) -> usize {
        self.start.line
    }

    /// A span with no known source location (line 0)
    pub fn is_unknown(&self) -> bool {
        self.start.line == 0
    }

    /// Whether this span starts before `other` in the source
    pub fn is_before(&self, other: &Span) -> bool {
        (self.start.line, self.start.column) < (other.start.line, other.start.column)
    }
}

/// Types of errors in Carbon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TypeError,
    NameError,
    AttributeError,
    InvalidArgCount,
    SyntaxError,
    NotImplemented,
    Assertion,
    OperatorNotSupported,
    InvalidIndex,
    ZeroDivision,
    StackOverflow,
    NullPointer,
    IoError,
    Bug,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TypeError => write!(f, "TypeError"),
            ErrorKind::NameError => write!(f, "NameError"),
            ErrorKind::AttributeError => write!(f, "AttributeError"),
            ErrorKind::InvalidArgCount => write!(f, "InvalidArgCount"),
            ErrorKind::SyntaxError => write!(f, "SyntaxError"),
            ErrorKind::NotImplemented => write!(f, "NotImplemented"),
            ErrorKind::Assertion => write!(f, "AssertionError"),
            ErrorKind::OperatorNotSupported => write!(f, "OperatorNotSupported"),
            ErrorKind::InvalidIndex => write!(f, "InvalidIndex"),
            ErrorKind::ZeroDivision => write!(f, "ZeroDivisionError"),
            ErrorKind::StackOverflow => write!(f, "StackOverflow"),
            ErrorKind::NullPointer => write!(f, "NullPointerError"),
            ErrorKind::IoError => write!(f, "IOError"),
            ErrorKind::Bug => write!(f, "InternalBug"),
        }
    }
}

/// A script-level traceback frame
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub function_name: String,
    pub file: String,
    pub line: usize,
}

impl StackFrame {
    pub fn new(function_name: impl Into<String>, file: impl Into<String>, line: usize) -> Self {
        Self {
            function_name: function_name.into(),
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  at {} ({}:{})", self.function_name, self.file, self.line)
    }
}

/// Main error type for Carbon
#[derive(Debug, Clone)]
pub struct CarbonError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
    pub file: String,
    pub help: Option<String>,
    pub stack_trace: Vec<StackFrame>,
    source_lines: Vec<String>,
}

impl CarbonError {
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        span: Span,
        file: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
            file: file.into(),
            help: None,
            stack_trace: Vec::new(),
            source_lines: Vec::new(),
        }
    }

    /// Error raised by the value layer, which has no source position of its own.
    /// The analyzer or the VM attaches one with `at`.
    pub fn runtime(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, Span::default(), "")
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source_lines = source.lines().map(String::from).collect();
        self
    }

    /// Fill in the location if the error doesn't carry one yet
    pub fn at(mut self, span: Span, file: &str) -> Self {
        if self.span.is_unknown() {
            self.span = span;
        }
        if self.file.is_empty() {
            self.file = file.to_string();
        }
        self
    }

    pub fn push_frame(&mut self, frame: StackFrame) {
        self.stack_trace.push(frame);
    }

    /// Attach source lines unless a nested file already did
    pub fn with_source_if_missing(self, source: &str) -> Self {
        if self.has_source() {
            self
        } else {
            self.with_source(source)
        }
    }

    pub fn has_source(&self) -> bool {
        !self.source_lines.is_empty()
    }

    /// Format the error for display (with colors for native)
    #[cfg(not(target_arch = "wasm32"))]
    pub fn format(&self) -> String {
        let mut output = String::new();

        // Error header: TypeError: message at file:line:column
        let header = format!(
            "{}: {} at {}:{}:{}",
            self.kind.to_string().red().bold(),
            self.message.white().bold(),
            self.file,
            self.span.start.line,
            self.span.start.column
        );
        output.push_str(&header);
        output.push('\n');

        if let Some(line_content) = self.error_line() {
            let line_num_str = format!("{:>4} |", self.span.start.line);
            output.push('\n');
            output.push_str(&format!("{} {}\n", line_num_str.red(), line_content));
            output.push_str(&format!(
                "{}{}\n",
                " ".repeat(6 + self.span.start.column),
                "^".repeat(self.caret_len()).red().bold()
            ));
        }

        if let Some(ref help) = self.help {
            output.push_str(&format!("\n      {}: {}\n", "Help".cyan().bold(), help));
        }

        if !self.stack_trace.is_empty() {
            output.push_str(&format!("\n{}:\n", "Stack trace".yellow().bold()));
            for frame in self.stack_trace.iter() {
                output.push_str(&format!("{}\n", frame));
            }
        }

        output
    }

    /// Format the error for display (plain text for WASM)
    #[cfg(target_arch = "wasm32")]
    pub fn format(&self) -> String {
        let mut output = format!(
            "{}: {} at {}:{}:{}\n",
            self.kind, self.message, self.file, self.span.start.line, self.span.start.column
        );

        if let Some(line_content) = self.error_line() {
            output.push_str(&format!("\n{:>4} | {}\n", self.span.start.line, line_content));
            output.push_str(&format!(
                "{}{}\n",
                " ".repeat(6 + self.span.start.column),
                "^".repeat(self.caret_len())
            ));
        }

        if let Some(ref help) = self.help {
            output.push_str(&format!("\n      Help: {}\n", help));
        }

        if !self.stack_trace.is_empty() {
            output.push_str("\nStack trace:\n");
            for frame in self.stack_trace.iter() {
                output.push_str(&format!("{}\n", frame));
            }
        }

        output
    }

    fn error_line(&self) -> Option<&String> {
        let line = self.span.start.line;
        if line == 0 {
            return None;
        }
        self.source_lines.get(line - 1)
    }

    fn caret_len(&self) -> usize {
        if self.span.end.line == self.span.start.line
            && self.span.end.column >= self.span.start.column
        {
            self.span.end.column - self.span.start.column + 1
        } else {
            1
        }
    }
}

impl fmt::Display for CarbonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

impl std::error::Error for CarbonError {}

/// Result type for Carbon operations
pub type CarbonResult<T> = Result<T, CarbonError>;

// Convenience constructors for common errors
impl CarbonError {
    pub fn syntax_error(message: impl Into<String>, span: Span, file: impl Into<String>) -> Self {
        Self::new(ErrorKind::SyntaxError, message, span, file)
    }

    pub fn type_error(message: impl Into<String>, span: Span, file: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message, span, file)
    }

    pub fn name_error(message: impl Into<String>, span: Span, file: impl Into<String>) -> Self {
        Self::new(ErrorKind::NameError, message, span, file)
    }

    pub fn attribute_error(
        message: impl Into<String>,
        span: Span,
        file: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::AttributeError, message, span, file)
    }

    pub fn arg_count_error(
        message: impl Into<String>,
        span: Span,
        file: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::InvalidArgCount, message, span, file)
    }

    pub fn not_implemented(
        message: impl Into<String>,
        span: Span,
        file: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::NotImplemented, message, span, file)
    }

    pub fn operator_not_supported(
        message: impl Into<String>,
        span: Span,
        file: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::OperatorNotSupported, message, span, file)
    }

    pub fn bug(message: impl Into<String>) -> Self {
        Self::runtime(ErrorKind::Bug, message)
    }
}

/// Arity check shared by the analyzer, the VM and native callables.
/// `arg_count` of -1 means variadic. Returns the message on mismatch.
pub fn arg_count_mismatch(arg_count: i32, default_count: i32, given: usize) -> Option<String> {
    if arg_count < 0 {
        return None;
    }
    let given = given as i32;
    let required = arg_count - default_count;
    if given < required {
        if default_count == 0 {
            return Some(format!("expected exactly {} argument(s).", arg_count));
        }
        return Some(format!("expected at least {} argument(s).", required));
    }
    if given > arg_count {
        if default_count == 0 {
            return Some(format!("expected exactly {} argument(s).", arg_count));
        }
        return Some(format!(
            "expected minimum {} and maximum {} argument(s).",
            required, arg_count
        ));
    }
    None
}

/// Non-fatal diagnostics collected by the analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    StandAloneExpression,
    UnreachableCode,
    NonTerminatingLoop,
    MissedEnumInSwitch,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningKind::StandAloneExpression => write!(f, "StandAloneExpression"),
            WarningKind::UnreachableCode => write!(f, "UnreachableCode"),
            WarningKind::NonTerminatingLoop => write!(f, "NonTerminatingLoop"),
            WarningKind::MissedEnumInSwitch => write!(f, "MissedEnumInSwitch"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
    pub span: Span,
    pub file: String,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>, span: Span, file: &str) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
            file: file.to_string(),
        }
    }

    /// Promote to a hard error (used with `warnings_as_errors`)
    pub fn into_error(self) -> CarbonError {
        CarbonError::syntax_error(self.message, self.span, self.file)
            .with_help(format!("raised from warning {}", self.kind))
    }
}

impl fmt::Display for Warning {
    #[cfg(not(target_arch = "wasm32"))]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {} at {}:{}:{}",
            "warning".yellow().bold(),
            self.kind,
            self.message,
            self.file,
            self.span.start.line,
            self.span.start.column
        )
    }

    #[cfg(target_arch = "wasm32")]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "warning {}: {} at {}:{}:{}",
            self.kind, self.message, self.file, self.span.start.line, self.span.start.column
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_keeps_existing_location() {
        let span = Span::single(3, 4, 10);
        let err = CarbonError::type_error("bad", span, "a.cb").at(Span::single(9, 9, 0), "b.cb");
        assert_eq!(err.span.start.line, 3);
        assert_eq!(err.file, "a.cb");
    }

    #[test]
    fn test_at_fills_runtime_error() {
        let err = CarbonError::runtime(ErrorKind::ZeroDivision, "division by zero")
            .at(Span::single(2, 5, 0), "main.cb");
        assert_eq!(err.span.start.line, 2);
        assert_eq!(err.file, "main.cb");
    }

    #[test]
    fn test_format_contains_caret_and_trace() {
        let mut err = CarbonError::name_error(
            "identifier \"x\" isn't defined.",
            Span::from_positions(1, 9, 1, 10),
            "main.cb",
        )
        .with_source("var a = x;");
        err.push_frame(StackFrame::new("main", "main.cb", 1));
        let text = err.format();
        assert!(text.contains("isn't defined"));
        assert!(text.contains("var a = x;"));
        assert!(text.contains('^'));
        assert!(text.contains("at main (main.cb:1)"));
    }

    #[test]
    fn test_arg_count_boundaries() {
        assert_eq!(
            arg_count_mismatch(3, 1, 1).as_deref(),
            Some("expected at least 2 argument(s).")
        );
        assert_eq!(
            arg_count_mismatch(3, 1, 4).as_deref(),
            Some("expected minimum 2 and maximum 3 argument(s).")
        );
        assert!(arg_count_mismatch(3, 1, 2).is_none());
        assert!(arg_count_mismatch(3, 1, 3).is_none());
        assert!(arg_count_mismatch(-1, 0, 7).is_none());
        assert_eq!(
            arg_count_mismatch(1, 0, 0).as_deref(),
            Some("expected exactly 1 argument(s).")
        );
    }

    #[test]
    fn test_span_ordering() {
        let a = Span::single(1, 5, 0);
        let b = Span::single(2, 1, 0);
        assert!(a.is_before(&b));
        assert!(!b.is_before(&a));
    }
}
