//! Command dispatch
//!
//! The command set is closed: every script command is a `CommandKind`
//! variant, and `dispatch` maps each variant to its handler. Script text
//! is external input, so names are still looked up at runtime, but an
//! unknown name never reaches a handler.

use crate::commands;
use crate::engine::Engine;
use crate::error::ScriptError;
use crate::matcher::MatchOp;
use crate::state::State;

/// Per-line prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negation {
    /// No prefix: the command must succeed
    Assert,
    /// `!`: the command must fail (or, for `grep`/`sed`, run in extract mode)
    Negate,
    /// `?`: the caller doesn't care about the outcome
    Absent,
}

impl Negation {
    pub fn prefix(self) -> &'static str {
        match self {
            Negation::Assert => "",
            Negation::Negate => "!",
            Negation::Absent => "?",
        }
    }
}

/// Result of a handler that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmdResult {
    /// Continue with the next line
    Ok,
    /// End the run as passed
    Stop(Option<String>),
    /// End the run as skipped
    Skip(Option<String>),
}

/// Every command the script language knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Call,
    Cd,
    Chmod,
    Cmp,
    Cmpenv,
    Cp,
    Env,
    Exec,
    Exists,
    Grep,
    Http,
    Mkdir,
    Regexp,
    Rm,
    Sed,
    Skip,
    Stdin,
    Stderr,
    Stdout,
    Status,
    Stop,
    Symlink,
    Unquote,
    Wait,
}

impl CommandKind {
    pub const ALL: [CommandKind; 24] = [
        CommandKind::Call,
        CommandKind::Cd,
        CommandKind::Chmod,
        CommandKind::Cmp,
        CommandKind::Cmpenv,
        CommandKind::Cp,
        CommandKind::Env,
        CommandKind::Exec,
        CommandKind::Exists,
        CommandKind::Grep,
        CommandKind::Http,
        CommandKind::Mkdir,
        CommandKind::Regexp,
        CommandKind::Rm,
        CommandKind::Sed,
        CommandKind::Skip,
        CommandKind::Stdin,
        CommandKind::Stderr,
        CommandKind::Stdout,
        CommandKind::Status,
        CommandKind::Stop,
        CommandKind::Symlink,
        CommandKind::Unquote,
        CommandKind::Wait,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "call" => CommandKind::Call,
            "cd" => CommandKind::Cd,
            "chmod" => CommandKind::Chmod,
            "cmp" => CommandKind::Cmp,
            "cmpenv" => CommandKind::Cmpenv,
            "cp" => CommandKind::Cp,
            "env" => CommandKind::Env,
            "exec" => CommandKind::Exec,
            "exists" => CommandKind::Exists,
            "grep" => CommandKind::Grep,
            "http" => CommandKind::Http,
            "mkdir" => CommandKind::Mkdir,
            "regexp" => CommandKind::Regexp,
            "rm" => CommandKind::Rm,
            "sed" => CommandKind::Sed,
            "skip" => CommandKind::Skip,
            "stdin" => CommandKind::Stdin,
            "stderr" => CommandKind::Stderr,
            "stdout" => CommandKind::Stdout,
            "status" => CommandKind::Status,
            "stop" => CommandKind::Stop,
            "symlink" => CommandKind::Symlink,
            "unquote" => CommandKind::Unquote,
            "wait" => CommandKind::Wait,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandKind::Call => "call",
            CommandKind::Cd => "cd",
            CommandKind::Chmod => "chmod",
            CommandKind::Cmp => "cmp",
            CommandKind::Cmpenv => "cmpenv",
            CommandKind::Cp => "cp",
            CommandKind::Env => "env",
            CommandKind::Exec => "exec",
            CommandKind::Exists => "exists",
            CommandKind::Grep => "grep",
            CommandKind::Http => "http",
            CommandKind::Mkdir => "mkdir",
            CommandKind::Regexp => "regexp",
            CommandKind::Rm => "rm",
            CommandKind::Sed => "sed",
            CommandKind::Skip => "skip",
            CommandKind::Stdin => "stdin",
            CommandKind::Stderr => "stderr",
            CommandKind::Stdout => "stdout",
            CommandKind::Status => "status",
            CommandKind::Stop => "stop",
            CommandKind::Symlink => "symlink",
            CommandKind::Unquote => "unquote",
            CommandKind::Wait => "wait",
        }
    }

    /// Whether a `!` or `?` prefix is meaningful for this command
    pub fn supports_negation(self) -> bool {
        matches!(
            self,
            CommandKind::Call
                | CommandKind::Exec
                | CommandKind::Exists
                | CommandKind::Grep
                | CommandKind::Http
                | CommandKind::Regexp
                | CommandKind::Sed
                | CommandKind::Stderr
                | CommandKind::Stdout
                | CommandKind::Status
        )
    }

    /// Argument synopsis, as printed by usage errors and `--list-commands`
    pub fn usage(self) -> &'static str {
        match self {
            CommandKind::Call => "function [args...]",
            CommandKind::Cd => "dir",
            CommandKind::Chmod => "mode file",
            CommandKind::Cmp => "file1 file2",
            CommandKind::Cmpenv => "file1 file2",
            CommandKind::Cp => "src... dst",
            CommandKind::Env => "[key[=value]...]",
            CommandKind::Exec => "program [args...] [&]",
            CommandKind::Exists => "[-readonly] file...",
            CommandKind::Grep => "[-count=N] pattern file",
            CommandKind::Http => "function [args...]",
            CommandKind::Mkdir => "dir...",
            CommandKind::Regexp => "[-count=N] pattern file",
            CommandKind::Rm => "file...",
            CommandKind::Sed => "pattern replace file",
            CommandKind::Skip => "[msg]",
            CommandKind::Stdin => "filename",
            CommandKind::Stderr => "[-count=N] pattern",
            CommandKind::Stdout => "[-count=N] pattern",
            CommandKind::Status => "code",
            CommandKind::Stop => "[msg]",
            CommandKind::Symlink => "file -> target",
            CommandKind::Unquote => "file...",
            CommandKind::Wait => "",
        }
    }

    pub fn summary(self) -> &'static str {
        match self {
            CommandKind::Call => "Run a registered in-process function",
            CommandKind::Cd => "Change working directory",
            CommandKind::Chmod => "Change file mode bits",
            CommandKind::Cmp => "Compare two files",
            CommandKind::Cmpenv => "Compare files with environment expansion",
            CommandKind::Cp => "Copy files",
            CommandKind::Env => "Set or print environment variables",
            CommandKind::Exec => "Run a program, optionally in the background",
            CommandKind::Exists => "Check that files exist",
            CommandKind::Grep => "Extract pattern matches into stdout (requires !)",
            CommandKind::Http => "Run a registered network call",
            CommandKind::Mkdir => "Create directories",
            CommandKind::Regexp => "Match a file against a pattern",
            CommandKind::Rm => "Remove files or directories",
            CommandKind::Sed => "Replace pattern matches into stdout (requires !)",
            CommandKind::Skip => "Skip the test",
            CommandKind::Stdin => "Use a file as stdin for the next command",
            CommandKind::Stderr => "Match stderr against a pattern",
            CommandKind::Stdout => "Match stdout against a pattern",
            CommandKind::Status => "Check the last exit status",
            CommandKind::Stop => "Stop the script, marking it passed",
            CommandKind::Symlink => "Create a symbolic link",
            CommandKind::Unquote => "Strip txtar '>' quoting from files",
            CommandKind::Wait => "Wait for background commands",
        }
    }
}

/// One decoded, expanded script line
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    pub kind: CommandKind,
    pub neg: Negation,
    pub args: Vec<String>,
}

/// Run one command against the script state.
pub fn dispatch(engine: &Engine, state: &mut State, inv: &CommandInvocation) -> Result<CmdResult, ScriptError> {
    let (kind, neg, args) = (inv.kind, inv.neg, inv.args.as_slice());
    if neg != Negation::Assert && !kind.supports_negation() {
        return Err(ScriptError::new(
            crate::error::ErrorKind::Usage,
            format!("unsupported: {} {}", neg.prefix(), kind.name()),
        ));
    }

    match kind {
        CommandKind::Call => commands::exec::call(engine, state, neg, args),
        CommandKind::Cd => commands::env::cd(state, args),
        CommandKind::Chmod => commands::file_ops::chmod(state, args),
        CommandKind::Cmp => commands::cmp::cmp(state, args, false),
        CommandKind::Cmpenv => commands::cmp::cmp(state, args, true),
        CommandKind::Cp => commands::file_ops::cp(state, args),
        CommandKind::Env => commands::env::env(state, args),
        CommandKind::Exec => commands::exec::exec(state, neg, args),
        CommandKind::Exists => commands::file_ops::exists(state, neg, args),
        CommandKind::Grep => crate::matcher::run(MatchOp::Grep, state, neg, args),
        CommandKind::Http => commands::exec::http(engine, state, neg, args),
        CommandKind::Mkdir => commands::file_ops::mkdir(state, args),
        CommandKind::Regexp => crate::matcher::run(MatchOp::Regexp, state, neg, args),
        CommandKind::Rm => commands::file_ops::rm(state, args),
        CommandKind::Sed => crate::matcher::run(MatchOp::Sed, state, neg, args),
        CommandKind::Skip => commands::flow::skip(state, args),
        CommandKind::Stdin => commands::file_ops::stdin(state, args),
        CommandKind::Stderr => crate::matcher::run(MatchOp::Stderr, state, neg, args),
        CommandKind::Stdout => crate::matcher::run(MatchOp::Stdout, state, neg, args),
        CommandKind::Status => commands::flow::status(state, neg, args),
        CommandKind::Stop => commands::flow::stop(state, args),
        CommandKind::Symlink => commands::file_ops::symlink(state, args),
        CommandKind::Unquote => commands::file_ops::unquote(state, args),
        CommandKind::Wait => commands::flow::wait(state, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_round_trips_every_name() {
        for kind in CommandKind::ALL {
            assert_eq!(CommandKind::from_name(kind.name()), Some(kind));
        }
        let mut names: Vec<_> = CommandKind::ALL.iter().map(|k| k.name()).collect();
        let sorted = {
            let mut s = names.clone();
            s.sort();
            s
        };
        assert_eq!(names, sorted, "ALL is kept in name order");
        names.dedup();
        assert_eq!(names.len(), CommandKind::ALL.len());
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert_eq!(CommandKind::from_name("echo"), None);
        assert_eq!(CommandKind::from_name("Exec"), None);
        assert_eq!(CommandKind::from_name(""), None);
    }

    #[test]
    fn commands_without_negation() {
        let plain = [
            "cd", "chmod", "cmp", "cmpenv", "cp", "env", "mkdir", "rm",
            "skip", "stdin", "stop", "symlink", "unquote", "wait",
        ];
        for kind in CommandKind::ALL {
            assert_eq!(kind.supports_negation(), !plain.contains(&kind.name()), "{}", kind.name());
        }
    }
}
