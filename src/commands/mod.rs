//! Built-in script command handlers
//!
//! Each handler is a plain function called from `dispatch`. The matching
//! commands (`stdout`, `stderr`, `regexp`, `grep`, `sed`) live in
//! `crate::matcher`.

pub(crate) mod cmp;
pub(crate) mod env;
pub(crate) mod exec;
pub(crate) mod file_ops;
pub(crate) mod flow;

use crate::dispatch::Negation;
use crate::error::ScriptError;
use crate::state::State;

/// Check a finished command against the line's prefix.
///
/// `failure` is `None` on success, otherwise a short description such as
/// `exit status 1`, which is logged.
pub(crate) fn expect_outcome(state: &mut State, neg: Negation, failure: Option<String>) -> Result<(), ScriptError> {
    match failure {
        None if neg == Negation::Negate => Err(ScriptError::assertion("unexpected command success")),
        None => Ok(()),
        Some(detail) => {
            state.logf(&format!("[{}]", detail));
            if neg == Negation::Assert {
                Err(ScriptError::process("unexpected command failure"))
            } else {
                Ok(())
            }
        }
    }
}

/// Append non-empty capture buffers to the log
pub(crate) fn log_output(state: &mut State, stdout: &str, stderr: &str) {
    if !stdout.is_empty() {
        state.logf(&format!("[stdout]\n{}", stdout));
    }
    if !stderr.is_empty() {
        state.logf(&format!("[stderr]\n{}", stderr));
    }
}

