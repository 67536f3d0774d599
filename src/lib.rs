//! emx-script: a scripted-test interpreter for CLI E2E testing
//!
//! Inspired by Go's `cmd/internal/script` and `rogpeppe/go-internal/testscript`.
//!
//! # Overview
//!
//! Each test is a txtar archive. Its comment section is the script, its
//! file sections seed a temporary sandbox. Scripts run programs (in the
//! foreground or in the background), call in-process functions, and assert
//! on captured output, exit status and the filesystem. Every run has a
//! deadline, and no background process outlives it.
//!
//! # Script Syntax
//!
//! ```text
//! # Section comment
//! exec mytool arg1 arg2
//! stdout 'expected output'
//! ! exec mytool --bad-flag
//! stderr 'error message'
//! exec server --port 8080 &
//! wait
//! cmp stdout golden.txt
//!
//! -- golden.txt --
//! expected content
//! ```
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `exec` | Run a program, `&` for background |
//! | `call` / `http` | Run a registered in-process function |
//! | `wait` | Join background programs |
//! | `stdout` / `stderr` | Match captured output with a regexp |
//! | `regexp` | Match a file with a regexp |
//! | `! grep` / `! sed` | Extract or replace matches into stdout |
//! | `cmp` / `cmpenv` | Compare files (golden files update in place) |
//! | `status` | Check the last exit status |
//! | `exists`, `cp`, `mkdir`, `rm`, `chmod`, `symlink`, `unquote` | File operations |
//! | `cd`, `env`, `stdin` | Sandbox state |
//! | `stop`, `skip` | End the run |
//!
//! # Prefixes
//!
//! - `!` - Command must fail (`grep`/`sed`: extract mode)
//! - `?` - Command may succeed or fail
//! - `[cond]` / `[!cond]` - Conditional execution

mod archive;
mod commands;
mod conditions;
mod deadline;
mod dispatch;
mod engine;
mod error;
mod funcs;
mod matcher;
mod parser;
mod process;
mod runner;
mod state;

pub use archive::{unquote, Archive, ArchiveFile};
pub use conditions::Condition;
pub use deadline::Deadline;
pub use dispatch::{dispatch, CmdResult, CommandInvocation, CommandKind, Negation};
pub use engine::{expand_args, Engine, Outcome};
pub use error::{ErrorKind, ScriptError};
pub use funcs::{Func, FuncIo, FuncTable};
pub use matcher::MatchOp;
pub use parser::{expand_env, parse_line, quote_arg, ArgFragment, Guard, ParseError, ParsedLine};
pub use process::{BackgroundTask, ProcessHandle, ProcessOutput};
pub use runner::{
    parse_duration, RunConfig, RunnerError, SetupEnv, SetupFn, TestCaseResult, TestResult, TestRunner,
    TestRunnerBuilder,
};
pub use state::State;

// Convenience functions for cargo test integration
pub use runner::{run, run_and_assert, run_and_assert_with};
