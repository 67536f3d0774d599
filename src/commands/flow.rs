//! Flow control commands: wait, skip, stop, status

use std::time::Duration;

use crate::commands::log_output;
use crate::dispatch::{CmdResult, Negation};
use crate::error::{ErrorKind, ScriptError};
use crate::state::State;

/// How long an interrupted background program gets to exit before it is
/// killed
pub(crate) const INTERRUPT_GRACE: Duration = Duration::from_secs(2);

// ──────────────────────────────────────────────────────────
// wait: join background commands
// ──────────────────────────────────────────────────────────

pub(crate) fn wait(state: &mut State, args: &[String]) -> Result<CmdResult, ScriptError> {
    if !args.is_empty() {
        return Err(ScriptError::usage("wait", ""));
    }
    join_background(state, false)?;
    Ok(CmdResult::Ok)
}

/// Join every background task in launch order, then leave their
/// concatenated output in the capture buffers.
///
/// With `interrupt`, every task is first sent an interrupt and each join
/// is capped at `INTERRUPT_GRACE`; a task that ignores the interrupt is
/// killed. A task that outlives the run deadline is a timeout; tasks not
/// yet joined at that point are killed when dropped.
pub(crate) fn join_background(state: &mut State, interrupt: bool) -> Result<(), ScriptError> {
    let tasks = std::mem::take(&mut state.background);
    if interrupt {
        for task in &tasks {
            tracing::debug!(pid = task.handle.pid(), "interrupting background command");
            task.handle.interrupt();
        }
    }

    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut failure = None;
    for mut task in tasks {
        let deadline = if interrupt {
            state.deadline.capped(INTERRUPT_GRACE)
        } else {
            state.deadline
        };
        let out = task.handle.wait(&deadline);
        state.logf(&format!("[background] {}: {}", task.cmdline, out.describe()));
        log_output(state, &out.stdout, &out.stderr);
        stdout.push_str(&out.stdout);
        stderr.push_str(&out.stderr);

        if out.timed_out && state.deadline.expired() {
            failure = Some(ScriptError::timeout("test timed out while running command"));
            break;
        }
        let err = match (out.success(), task.neg) {
            (true, Negation::Negate) => Some(ScriptError::assertion("unexpected command success")),
            (false, Negation::Assert) => Some(ScriptError::process("unexpected command failure")),
            _ => None,
        };
        if err.is_some() {
            failure = err;
            break;
        }
    }

    state.stdout = stdout;
    state.stderr = stderr;
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

// ──────────────────────────────────────────────────────────
// skip: end the run as skipped
// ──────────────────────────────────────────────────────────

pub(crate) fn skip(state: &mut State, args: &[String]) -> Result<CmdResult, ScriptError> {
    if args.len() > 1 {
        return Err(ScriptError::usage("skip", "[msg]"));
    }
    join_background(state, true)?;
    let msg = args.first().cloned();
    if let Some(ref msg) = msg {
        state.logf(&format!("skip: {}", msg));
    }
    Ok(CmdResult::Skip(msg))
}

// ──────────────────────────────────────────────────────────
// stop: end the run as passed
// ──────────────────────────────────────────────────────────

pub(crate) fn stop(state: &mut State, args: &[String]) -> Result<CmdResult, ScriptError> {
    if args.len() > 1 {
        return Err(ScriptError::usage("stop", "[msg]"));
    }
    let msg = args.first().cloned();
    match msg {
        Some(ref msg) => state.logf(&format!("stop: {}", msg)),
        None => state.logf("stop"),
    }
    Ok(CmdResult::Stop(msg))
}

// ──────────────────────────────────────────────────────────
// status: check the last exit status
// ──────────────────────────────────────────────────────────

pub(crate) fn status(state: &mut State, neg: Negation, args: &[String]) -> Result<CmdResult, ScriptError> {
    if args.len() != 1 {
        return Err(ScriptError::usage("status", "code"));
    }
    let want: i32 = args[0].parse().map_err(|e| {
        ScriptError::new(ErrorKind::Usage, format!("status: bad code {:?}: {}", args[0], e))
    })?;
    match neg {
        Negation::Absent => {}
        Negation::Negate if state.status == want => {
            return Err(ScriptError::assertion(format!("unexpected status match: {}", want)));
        }
        Negation::Assert if state.status != want => {
            return Err(ScriptError::assertion(format!(
                "unexpected status mismatch: want {}, have {}",
                want, state.status
            )));
        }
        _ => {}
    }
    Ok(CmdResult::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn state() -> (tempfile::TempDir, State) {
        let dir = tempfile::tempdir().unwrap();
        let state = State::new(dir.path().to_path_buf());
        (dir, state)
    }

    #[test]
    fn status_tri_state() {
        let (_d, mut s) = state();
        s.status = 2;
        status(&mut s, Negation::Assert, &args(&["2"])).unwrap();
        status(&mut s, Negation::Negate, &args(&["0"])).unwrap();
        status(&mut s, Negation::Absent, &args(&["99"])).unwrap();
        assert!(status(&mut s, Negation::Assert, &args(&["0"])).is_err());
        assert!(status(&mut s, Negation::Negate, &args(&["2"])).is_err());
        assert_eq!(status(&mut s, Negation::Assert, &args(&["x"])).unwrap_err().kind, ErrorKind::Usage);
        // The code must parse even when the result is ignored.
        assert_eq!(status(&mut s, Negation::Absent, &args(&["abc"])).unwrap_err().kind, ErrorKind::Usage);
    }

    #[test]
    fn stop_and_skip_carry_messages() {
        let (_d, mut s) = state();
        assert_eq!(stop(&mut s, &args(&["done"])).unwrap(), CmdResult::Stop(Some("done".into())));
        assert!(s.log.contains("stop: done\n"));
        assert_eq!(skip(&mut s, &[]).unwrap(), CmdResult::Skip(None));
        assert_eq!(skip(&mut s, &args(&["a", "b"])).unwrap_err().kind, ErrorKind::Usage);
    }

    #[test]
    fn wait_with_nothing_to_join() {
        let (_d, mut s) = state();
        s.stdout = "stale".into();
        wait(&mut s, &[]).unwrap();
        assert_eq!(s.stdout, "");
        assert_eq!(wait(&mut s, &args(&["x"])).unwrap_err().kind, ErrorKind::Usage);
    }

    #[cfg(unix)]
    #[test]
    fn wait_concatenates_in_launch_order() {
        use crate::commands::exec::exec;
        let (_d, mut s) = state();
        exec(&mut s, Negation::Assert, &args(&["sh", "-c", "sleep 0.3; echo first", "&"])).unwrap();
        exec(&mut s, Negation::Assert, &args(&["sh", "-c", "echo second", "&"])).unwrap();
        exec(&mut s, Negation::Negate, &args(&["sh", "-c", "echo third >&2; exit 1", "&"])).unwrap();
        wait(&mut s, &[]).unwrap();
        assert_eq!(s.stdout, "first\nsecond\n");
        assert_eq!(s.stderr, "third\n");
        assert!(s.background.is_empty());
        assert!(s.log.contains("[background] sh -c 'sleep 0.3; echo first': exit status 0"));
    }

    #[cfg(unix)]
    #[test]
    fn wait_checks_launch_time_negation() {
        use crate::commands::exec::exec;
        let (_d, mut s) = state();
        exec(&mut s, Negation::Assert, &args(&["sh", "-c", "exit 3", "&"])).unwrap();
        let err = wait(&mut s, &[]).unwrap_err();
        assert_eq!(err.message, "unexpected command failure");

        exec(&mut s, Negation::Negate, &args(&["true", "&"])).unwrap();
        let err = wait(&mut s, &[]).unwrap_err();
        assert_eq!(err.message, "unexpected command success");

        exec(&mut s, Negation::Absent, &args(&["false", "&"])).unwrap();
        wait(&mut s, &[]).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn skip_interrupts_background_commands() {
        use crate::commands::exec::exec;
        use std::time::Instant;
        let (_d, mut s) = state();
        exec(&mut s, Negation::Negate, &args(&["sleep", "30", "&"])).unwrap();
        exec(&mut s, Negation::Negate, &args(&["sleep", "30", "&"])).unwrap();
        let start = Instant::now();
        assert_eq!(skip(&mut s, &args(&["later"])).unwrap(), CmdResult::Skip(Some("later".into())));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(s.background.is_empty());
    }
}
