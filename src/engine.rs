//! Script engine
//!
//! The Engine holds the `call` and `http` function tables. It is
//! stateless config: one engine can run many scripts, each against its
//! own `State`.

use crate::archive::Archive;
use crate::commands::flow::join_background;
use crate::conditions::Condition;
use crate::dispatch::{dispatch, CmdResult, CommandInvocation, CommandKind};
use crate::error::{ErrorKind, ScriptError};
use crate::funcs::{FuncIo, FuncTable};
use crate::parser::{parse_line, ArgFragment};
use crate::state::State;

/// How a script run ended
#[derive(Debug)]
pub enum Outcome {
    Pass,
    Fail(ScriptError),
    Skip(Option<String>),
}

impl Outcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Pass)
    }
}

/// The script engine
#[derive(Debug, Default, Clone)]
pub struct Engine {
    /// Functions reachable through `call`
    pub(crate) calls: FuncTable,
    /// Functions reachable through `http`
    pub(crate) http: FuncTable,
    /// Whether to suppress command echo in the log
    pub quiet: bool,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function for `call name [args...]`
    pub fn register_call<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut FuncIo, &[String]) -> Result<(), String> + Send + Sync + 'static,
    {
        self.calls.register(name, f);
    }

    /// Register a function for `http name [args...]`
    pub fn register_http<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut FuncIo, &[String]) -> Result<(), String> + Send + Sync + 'static,
    {
        self.http.register(name, f);
    }

    /// Names registered for `call`
    pub fn call_names(&self) -> impl Iterator<Item = &str> {
        self.calls.names()
    }

    /// Seed the sandbox from `archive` and run its script.
    pub fn run_archive(&self, state: &mut State, archive: &Archive, filename: &str) -> Outcome {
        if let Err(e) = state.extract_files(archive) {
            return Outcome::Fail(ScriptError::io(format!("{}: extracting archive files", filename), e));
        }
        self.run(state, &archive.comment, filename)
    }

    /// Run a script to completion and settle any background commands.
    ///
    /// Commands still running when the script ends are interrupted and
    /// joined with the same checks as `wait`. After a failure they are
    /// simply killed.
    pub fn run(&self, state: &mut State, script: &str, filename: &str) -> Outcome {
        let result = self.execute(state, script, filename);
        let outcome = match result {
            Ok(CmdResult::Skip(msg)) => Outcome::Skip(msg),
            Ok(_) if state.background.is_empty() => Outcome::Pass,
            Ok(_) => {
                tracing::debug!(count = state.background.len(), "script ended with background commands");
                state.logf("[interrupting background commands]");
                match join_background(state, true) {
                    Ok(()) => Outcome::Pass,
                    Err(e) => Outcome::Fail(e.with_location(filename, script.lines().count())),
                }
            }
            Err(e) => Outcome::Fail(e),
        };
        // Dropping a task kills its process group.
        state.background.clear();
        outcome
    }

    /// Execute script lines in order.
    ///
    /// Returns how the script ended: `Ok` after the last line, `Stop` or
    /// `Skip` when a command ended it early. Any error aborts the
    /// remaining lines.
    pub fn execute(&self, state: &mut State, script: &str, filename: &str) -> Result<CmdResult, ScriptError> {
        for (i, line) in script.lines().enumerate() {
            let line_number = i + 1;

            if state.deadline.expired() {
                return Err(ScriptError::timeout("test timed out").with_location(filename, line_number));
            }

            // Only a `#` in the first column marks a section comment.
            if line.starts_with('#') {
                if !self.quiet {
                    state.logf(line.trim_end());
                }
                continue;
            }

            let parsed = match parse_line(line) {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(e) => return Err(ScriptError::syntax(e.message).with_location(filename, line_number)),
            };

            if !self.quiet {
                state.logf(&format!("> {}", parsed.raw));
            }

            let mut active = true;
            for guard in &parsed.guards {
                let cond = Condition::parse(&guard.tag).map_err(|e| e.with_location(filename, line_number))?;
                if cond.eval(state) == guard.negate {
                    active = false;
                    break;
                }
            }
            if !active {
                state.logf("[condition not met]");
                continue;
            }

            let kind = CommandKind::from_name(&parsed.command).ok_or_else(|| {
                ScriptError::new(ErrorKind::UnknownCommand, format!("unknown command {:?}", parsed.command))
                    .with_location(filename, line_number)
            })?;
            let inv = CommandInvocation {
                kind,
                neg: parsed.neg,
                args: expand_args(state, &parsed.args),
            };

            tracing::debug!(file = filename, line = line_number, command = kind.name(), "dispatching");
            let result = dispatch(self, state, &inv).map_err(|e| {
                let cmd = format!("{}{}", inv.neg.prefix(), kind.name());
                e.with_command(cmd, &inv.args).with_location(filename, line_number)
            })?;
            match result {
                CmdResult::Ok => {}
                CmdResult::Stop(msg) => {
                    state.stopped = true;
                    return Ok(CmdResult::Stop(msg));
                }
                CmdResult::Skip(msg) => return Ok(CmdResult::Skip(msg)),
            }
        }
        Ok(CmdResult::Ok)
    }
}

/// Join each argument's fragments, expanding variables in the unquoted
/// ones only.
pub fn expand_args(state: &State, raw_args: &[Vec<ArgFragment>]) -> Vec<String> {
    raw_args
        .iter()
        .map(|frags| {
            frags
                .iter()
                .map(|f| if f.quoted { f.s.clone() } else { state.expand(&f.s) })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(script: &str) -> (Outcome, State, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut state = State::new(dir.path().to_path_buf());
        let outcome = Engine::new().run(&mut state, script, "test.txt");
        (outcome, state, dir)
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let (outcome, state, _d) = run("# section\n\n  # indented comment\nenv A=1\n");
        assert!(outcome.is_pass());
        assert!(state.log.starts_with("# section\n"));
        assert_eq!(state.getenv("A"), Some("1"));
    }

    #[test]
    fn quoted_fragments_are_not_expanded() {
        let (outcome, state, _d) = run("env A=x\nenv B=$A'$A'\"\n");
        assert!(outcome.is_pass(), "{:?}", outcome);
        assert_eq!(state.getenv("B"), Some("x$A\""));
    }

    #[test]
    fn unknown_command_aborts() {
        let (outcome, state, _d) = run("env A=1\nfrobnicate\nenv B=2\n");
        match outcome {
            Outcome::Fail(e) => {
                assert_eq!(e.kind, ErrorKind::UnknownCommand);
                assert_eq!(e.line, Some(2));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(state.getenv("B"), None);
    }

    #[test]
    fn errors_carry_command_and_location() {
        let (outcome, _s, _d) = run("\nenv X=1\ncd nowhere\n");
        let Outcome::Fail(e) = outcome else { panic!("expected failure") };
        assert!(e.to_string().starts_with("test.txt:3: cd nowhere: "), "{}", e);
    }

    #[test]
    fn unsupported_prefix_is_a_usage_error() {
        let (outcome, _s, _d) = run("! cd .\n");
        let Outcome::Fail(e) = outcome else { panic!("expected failure") };
        assert_eq!(e.kind, ErrorKind::Usage);
        assert_eq!(e.message, "unsupported: ! cd");
    }

    #[test]
    fn guards_select_lines() {
        let (outcome, state, _d) = run("env A=no\n[env:A] env B=yes\n[!env:A] env C=yes\n[plan9] env D=yes\n");
        // `plan9` is not a known condition
        assert!(matches!(outcome, Outcome::Fail(ref e) if e.kind == ErrorKind::Syntax));
        assert_eq!(state.getenv("B"), Some("yes"));
        assert_eq!(state.getenv("C"), None);
        assert!(state.log.contains("[condition not met]"));
    }

    #[test]
    fn stop_passes_and_skip_skips() {
        let (outcome, state, _d) = run("stop 'all done'\nfrobnicate\n");
        assert!(outcome.is_pass());
        assert!(state.stopped);

        let (outcome, _s, _d) = run("skip 'not today'\nfrobnicate\n");
        assert!(matches!(outcome, Outcome::Skip(Some(ref m)) if m == "not today"));
    }

    #[test]
    fn expired_deadline_fails_before_the_next_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = State::new(dir.path().to_path_buf())
            .with_deadline(crate::deadline::Deadline::after(std::time::Duration::ZERO));
        let outcome = Engine::new().run(&mut state, "env A=1\n", "t");
        assert!(matches!(outcome, Outcome::Fail(ref e) if e.is_timeout()));
    }

    #[test]
    fn call_reaches_registered_functions() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = State::new(dir.path().to_path_buf());
        let mut engine = Engine::new();
        engine.register_call("version", |io, _| {
            io.stdout.push_str("v1.2.3\n");
            Ok(())
        });
        let outcome = engine.run(&mut state, "call version\nstdout '^v1\\.2\\.3$'\nstatus 0\n", "t");
        assert!(outcome.is_pass(), "{:?}\n{}", outcome, state.log);
        assert_eq!(engine.call_names().collect::<Vec<_>>(), vec!["version"]);
    }

    #[test]
    fn run_archive_seeds_the_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = State::new(dir.path().to_path_buf());
        let archive = Archive::parse("exists a.txt sub/b.txt\nregexp '^hello' a.txt\n-- a.txt --\nhello\n-- sub/b.txt --\n").unwrap();
        let outcome = Engine::new().run_archive(&mut state, &archive, "archive.txtar");
        assert!(outcome.is_pass(), "{:?}\n{}", outcome, state.log);
    }
}
