//! Script errors

use std::fmt;

/// The kind of script error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed command arguments, or a prefix the command does not accept
    Usage,
    /// Command name not in the dispatch table
    UnknownCommand,
    /// Invalid line syntax or condition guard
    Syntax,
    /// An expected condition did not hold
    Assertion,
    /// Process exited unsuccessfully or could not be started
    Process,
    /// The run deadline expired while an operation was outstanding
    Timeout,
    /// Filesystem error
    Io,
}

impl ErrorKind {
    /// Short label used in result listings
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Usage => "usage",
            ErrorKind::UnknownCommand => "unknown command",
            ErrorKind::Syntax => "syntax",
            ErrorKind::Assertion => "assertion",
            ErrorKind::Process => "process",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Io => "io",
        }
    }
}

/// A fatal script error with file/line context
#[derive(Debug, Clone)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub command: Option<String>,
    pub args: Vec<String>,
}

impl ScriptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file: None,
            line: None,
            command: None,
            args: Vec::new(),
        }
    }

    pub fn with_location(mut self, file: impl Into<String>, line: usize) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    pub fn with_command(mut self, cmd: impl Into<String>, args: &[String]) -> Self {
        self.command = Some(cmd.into());
        self.args = args.to_vec();
        self
    }

    pub fn usage(cmd: &str, expected: &str) -> Self {
        if expected.is_empty() {
            Self::new(ErrorKind::Usage, format!("usage: {}", cmd))
        } else {
            Self::new(ErrorKind::Usage, format!("usage: {} {}", cmd, expected))
        }
    }

    pub fn syntax(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, msg)
    }

    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Assertion, msg)
    }

    pub fn process(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Process, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, msg)
    }

    /// Wrap an I/O error with the path or operation it concerns
    pub fn io(context: impl fmt::Display, err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, format!("{}: {}", context, err))
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}:", file)?;
        }
        if let Some(line) = self.line {
            write!(f, "{}:", line)?;
        }
        if let Some(ref cmd) = self.command {
            if self.args.is_empty() {
                write!(f, " {}: ", cmd)?;
            } else {
                let quoted = self.args.iter()
                    .map(|a| crate::parser::quote_arg(a))
                    .collect::<Vec<_>>()
                    .join(" ");
                write!(f, " {} {}: ", cmd, quoted)?;
            }
        } else if self.file.is_some() || self.line.is_some() {
            write!(f, " ")?;
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ScriptError {}
