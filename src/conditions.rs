//! Line guards
//!
//! `[cond]` runs a line only when the condition holds, `[!cond]` only when
//! it doesn't. Conditions are a fixed set, like the commands.

use crate::error::ScriptError;
use crate::state::State;

/// A known condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Unix,
    Windows,
    Darwin,
    Linux,
    Amd64,
    Arm64,
    /// `exec:prog`: `prog` is on the sandbox `PATH`
    Exec(String),
    /// `env:NAME`: `NAME` is set and non-empty in the sandbox
    Env(String),
}

impl Condition {
    /// Parse a guard tag such as `linux` or `exec:git`
    pub fn parse(tag: &str) -> Result<Self, ScriptError> {
        let cond = match tag.split_once(':') {
            Some(("exec", prog)) if !prog.is_empty() => Condition::Exec(prog.to_string()),
            Some(("env", name)) if !name.is_empty() => Condition::Env(name.to_string()),
            Some((prefix, _)) => {
                return Err(ScriptError::syntax(format!("unknown condition prefix {:?}", prefix)));
            }
            None => match tag {
                "unix" => Condition::Unix,
                "windows" => Condition::Windows,
                "darwin" => Condition::Darwin,
                "linux" => Condition::Linux,
                "amd64" => Condition::Amd64,
                "arm64" => Condition::Arm64,
                "exec" | "env" => {
                    return Err(ScriptError::syntax(format!("condition {:?} requires a suffix", tag)));
                }
                _ => return Err(ScriptError::syntax(format!("unknown condition {:?}", tag))),
            },
        };
        Ok(cond)
    }

    pub fn eval(&self, state: &State) -> bool {
        match self {
            Condition::Unix => cfg!(unix),
            Condition::Windows => cfg!(windows),
            Condition::Darwin => cfg!(target_os = "macos"),
            Condition::Linux => cfg!(target_os = "linux"),
            Condition::Amd64 => cfg!(target_arch = "x86_64"),
            Condition::Arm64 => cfg!(target_arch = "aarch64"),
            Condition::Exec(prog) => state.look_path(prog).is_some(),
            Condition::Env(name) => state.getenv(name).map_or(false, |v| !v.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_tags() {
        assert_eq!(Condition::parse("unix").unwrap(), Condition::Unix);
        assert_eq!(Condition::parse("exec:git").unwrap(), Condition::Exec("git".into()));
        assert_eq!(Condition::parse("env:CI").unwrap(), Condition::Env("CI".into()));
    }

    #[test]
    fn rejects_unknown_and_malformed_tags() {
        assert!(Condition::parse("plan9").is_err());
        assert!(Condition::parse("exec").is_err());
        assert!(Condition::parse("exec:").is_err());
        assert!(Condition::parse("GOOS:linux").is_err());
    }

    #[test]
    fn env_condition_reads_the_sandbox() {
        let mut state = State::new(std::env::temp_dir());
        let cond = Condition::Env("FEATURE".into());
        assert!(!cond.eval(&state));
        state.setenv("FEATURE", "1");
        assert!(cond.eval(&state));
        assert_eq!(Condition::Unix.eval(&state), cfg!(unix));
    }
}
