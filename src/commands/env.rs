//! Environment commands: cd, env

use crate::dispatch::CmdResult;
use crate::error::{ErrorKind, ScriptError};
use crate::state::State;

// ──────────────────────────────────────────────────────────
// cd: change directory
// ──────────────────────────────────────────────────────────

pub(crate) fn cd(state: &mut State, args: &[String]) -> Result<CmdResult, ScriptError> {
    if args.len() != 1 {
        return Err(ScriptError::usage("cd", "dir"));
    }
    state.chdir(&args[0]).map_err(|e| ScriptError::new(ErrorKind::Io, e.to_string()))?;
    let pwd = state.pwd.display().to_string();
    state.logf(&pwd);
    Ok(CmdResult::Ok)
}

// ──────────────────────────────────────────────────────────
// env: set or print environment variables
// ──────────────────────────────────────────────────────────

/// With no arguments every variable is logged once with its effective
/// value. `NAME=value` sets; a value of `@stdout`, `@stderr` or `@file`
/// takes that content. A bare `NAME` logs `NAME=value`.
pub(crate) fn env(state: &mut State, args: &[String]) -> Result<CmdResult, ScriptError> {
    if args.is_empty() {
        let listing = state
            .env_listing()
            .into_iter()
            .map(|(k, v)| format!("{}={}\n", k, v))
            .collect::<String>();
        state.logf(&listing);
        return Ok(CmdResult::Ok);
    }

    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            let shown = format!("{}={}", arg, state.getenv(arg).unwrap_or_default());
            state.logf(&shown);
            continue;
        };
        let value = match value.strip_prefix('@') {
            Some(source) => state.read_file(source).map_err(|e| ScriptError::io(source, e))?,
            None => value.to_string(),
        };
        state.setenv(key, value);
    }
    Ok(CmdResult::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn cd_moves_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut s = State::new(dir.path().to_path_buf());
        cd(&mut s, &args(&["sub"])).unwrap();
        assert_eq!(s.pwd, dir.path().join("sub"));
        assert_eq!(s.getenv("PWD"), Some(dir.path().join("sub").to_str().unwrap()));
        assert!(s.log.ends_with("sub\n"));

        let err = cd(&mut s, &args(&["missing"])).unwrap_err();
        assert!(err.message.contains("does not exist"));
        assert_eq!(cd(&mut s, &[]).unwrap_err().kind, ErrorKind::Usage);
    }

    #[test]
    fn cd_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), "").unwrap();
        let mut s = State::new(dir.path().to_path_buf());
        let err = cd(&mut s, &args(&["f"])).unwrap_err();
        assert!(err.message.contains("is not a directory"));
    }

    #[test]
    fn env_sets_and_shows() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = State::new(dir.path().to_path_buf());
        env(&mut s, &args(&["FOO=bar", "EMPTY="])).unwrap();
        assert_eq!(s.getenv("FOO"), Some("bar"));
        assert_eq!(s.getenv("EMPTY"), Some(""));

        env(&mut s, &args(&["FOO", "UNSET_VAR"])).unwrap();
        assert!(s.log.contains("FOO=bar\n"));
        assert!(s.log.contains("UNSET_VAR=\n"));
        assert_eq!(s.stdout, "", "env output goes to the log");
    }

    #[test]
    fn env_sources_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("token"), "secret").unwrap();
        let mut s = State::new(dir.path().to_path_buf());
        s.stdout = "from stdout".into();
        env(&mut s, &args(&["A=@stdout", "B=@token"])).unwrap();
        assert_eq!(s.getenv("A"), Some("from stdout"));
        assert_eq!(s.getenv("B"), Some("secret"));
        assert!(env(&mut s, &args(&["C=@missing"])).is_err());
    }

    #[test]
    fn env_listing_shows_each_name_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = State::new(dir.path().to_path_buf());
        env(&mut s, &args(&["X=1", "X=2"])).unwrap();
        s.log.clear();
        env(&mut s, &[]).unwrap();
        assert_eq!(s.log.matches("\nX=").count() + usize::from(s.log.starts_with("X=")), 1);
        assert!(s.log.contains("X=2\n"));
        assert!(s.log.contains("WORK="));
    }
}
