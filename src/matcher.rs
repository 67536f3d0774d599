//! Pattern matching shared by `stdout`, `stderr`, `regexp`, `grep`, `sed`
//!
//! Patterns are always regular expressions compiled in multi-line mode.
//! `stdout`, `stderr` and `regexp` assert; `grep` and `sed` transform the
//! source text into the stdout buffer.

use crate::dispatch::{CmdResult, Negation};
use crate::error::{ErrorKind, ScriptError};
use crate::state::State;

/// Compiled-program size limit, to keep hostile patterns bounded
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Which command is matching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Stdout,
    Stderr,
    Regexp,
    Grep,
    Sed,
}

impl MatchOp {
    fn name(self) -> &'static str {
        match self {
            MatchOp::Stdout => "stdout",
            MatchOp::Stderr => "stderr",
            MatchOp::Regexp => "regexp",
            MatchOp::Grep => "grep",
            MatchOp::Sed => "sed",
        }
    }

    /// Positional arguments after `-count=`
    fn arity(self) -> usize {
        match self {
            MatchOp::Stdout | MatchOp::Stderr => 1,
            MatchOp::Regexp | MatchOp::Grep => 2,
            MatchOp::Sed => 3,
        }
    }

    fn usage(self) -> &'static str {
        match self {
            MatchOp::Stdout | MatchOp::Stderr => "[-count=N] 'pattern'",
            MatchOp::Regexp | MatchOp::Grep => "[-count=N] 'pattern' file",
            MatchOp::Sed => "'pattern' replace file",
        }
    }

    fn transforms(self) -> bool {
        matches!(self, MatchOp::Grep | MatchOp::Sed)
    }
}

/// What the command does with the match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Fail unless the pattern matches (or, when negated, unless it doesn't)
    Assert { negated: bool },
    /// Rewrite stdout from the source text
    Extract,
    /// `?` prefix: the pattern is checked but the outcome is ignored
    Ignore,
}

/// Run a matching command.
pub fn run(op: MatchOp, state: &mut State, neg: Negation, args: &[String]) -> Result<CmdResult, ScriptError> {
    let name = op.name();
    let (count, args) = split_count(name, args)?;
    if args.len() != op.arity() {
        return Err(ScriptError::usage(name, op.usage()));
    }

    // grep and sed overload `!`: it selects extract mode rather than
    // inverting the result, and is mandatory.
    let mode = match (op.transforms(), neg) {
        (true, Negation::Negate) => Mode::Extract,
        (true, _) => {
            return Err(ScriptError::new(
                ErrorKind::Usage,
                format!("{} does not support status checking", name),
            ));
        }
        (false, Negation::Negate) => Mode::Assert { negated: true },
        (false, Negation::Absent) => Mode::Ignore,
        (false, Negation::Assert) => Mode::Assert { negated: false },
    };
    if count.is_some() && mode != Mode::Extract && neg != Negation::Assert {
        return Err(ScriptError::new(ErrorKind::Usage, "cannot use -count= with negated match"));
    }

    let pattern = resolve_token(state, &args[0])?;
    let re = compile(name, &pattern)?;

    let (source, text) = match op {
        MatchOp::Stdout => ("stdout".to_string(), state.stdout.clone()),
        MatchOp::Stderr => ("stderr".to_string(), state.stderr.clone()),
        MatchOp::Regexp | MatchOp::Grep => resolve_source(state, &args[1])?,
        MatchOp::Sed => resolve_source(state, &args[2])?,
    };
    let shows_source = !matches!(op, MatchOp::Stdout | MatchOp::Stderr);

    match mode {
        Mode::Ignore => {}
        Mode::Assert { negated: true } => {
            if let Some(m) = re.find(&text) {
                if shows_source {
                    state.logf(&format!("[{}]\n{}", source, text));
                }
                return Err(ScriptError::assertion(format!(
                    "unexpected match for `{}` found in {}: {}",
                    pattern, source, m.as_str()
                )));
            }
        }
        Mode::Assert { negated: false } => {
            if !re.is_match(&text) {
                if shows_source {
                    state.logf(&format!("[{}]\n{}", source, text));
                }
                return Err(ScriptError::assertion(format!("no match for `{}` found in {}", pattern, source)));
            }
            if let Some(want) = count {
                let have = re.find_iter(&text).count();
                if have != want {
                    return Err(ScriptError::assertion(format!(
                        "have {} matches for `{}`, want {}",
                        have, pattern, want
                    )));
                }
            }
        }
        Mode::Extract => {
            state.stdout = match op {
                MatchOp::Sed => {
                    let replacement = resolve_token(state, &args[1])?;
                    re.replace_all(&text, replacement.as_str()).into_owned()
                }
                _ => re
                    .find_iter(&text)
                    .take(count.unwrap_or(usize::MAX))
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            };
            if !state.stdout.is_empty() {
                state.logf(&format!("[{}]\n{}", name, state.stdout));
            }
        }
    }
    Ok(CmdResult::Ok)
}

/// Peel a leading `-count=N` off the arguments.
fn split_count<'a>(name: &str, args: &'a [String]) -> Result<(Option<usize>, &'a [String]), ScriptError> {
    let Some(value) = args.first().and_then(|a| a.strip_prefix("-count=")) else {
        return Ok((None, args));
    };
    let n: usize = value.parse().map_err(|e| {
        ScriptError::new(ErrorKind::Usage, format!("{}: bad -count=: {}", name, e))
    })?;
    if n < 1 {
        return Err(ScriptError::new(ErrorKind::Usage, format!("{}: bad -count=: must be at least 1", name)));
    }
    Ok((Some(n), &args[1..]))
}

fn compile(name: &str, pattern: &str) -> Result<regex::Regex, ScriptError> {
    regex::RegexBuilder::new(&format!("(?m){}", pattern))
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| ScriptError::new(ErrorKind::Usage, format!("{}: invalid regexp: {}", name, e)))
}

/// Pattern or replacement: a capture buffer, `@file`, or the token itself.
fn resolve_token(state: &State, token: &str) -> Result<String, ScriptError> {
    match token {
        "stdout" => Ok(state.stdout.clone()),
        "stderr" => Ok(state.stderr.clone()),
        _ => match token.strip_prefix('@') {
            Some(file) => read_sandbox_file(state, file),
            None => Ok(token.to_string()),
        },
    }
}

/// Content source: a capture buffer, `@file`, or a file path.
/// Returns a display name alongside the text.
fn resolve_source(state: &State, token: &str) -> Result<(String, String), ScriptError> {
    let work = state.getenv("WORK").unwrap_or_default();
    if token == "stdout" || token == format!("{}/stdout", work) {
        return Ok(("stdout".into(), state.stdout.clone()));
    }
    if token == "stderr" || token == format!("{}/stderr", work) {
        return Ok(("stderr".into(), state.stderr.clone()));
    }
    let file = token.strip_prefix('@').unwrap_or(token);
    Ok((file.to_string(), read_sandbox_file(state, file)?))
}

fn read_sandbox_file(state: &State, file: &str) -> Result<String, ScriptError> {
    std::fs::read_to_string(state.resolve_path(file)).map_err(|e| ScriptError::io(file, e))
}
