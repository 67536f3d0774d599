//! exec, call, http: run something and capture its output

use std::process::Command;

use crate::commands::{expect_outcome, log_output};
use crate::dispatch::{CmdResult, Negation};
use crate::engine::Engine;
use crate::error::{ErrorKind, ScriptError};
use crate::funcs::{self, FuncIo, FuncTable};
use crate::process::{BackgroundTask, ProcessHandle};
use crate::state::State;

const EXEC_TIMEOUT: &str = "test timed out while running command";
const HTTP_TIMEOUT: &str = "test timed out while making http request";

/// `exec program [args...] [&]`
pub(crate) fn exec(state: &mut State, neg: Negation, args: &[String]) -> Result<CmdResult, ScriptError> {
    let (args, background) = match args.split_last() {
        Some((last, rest)) if last == "&" => (rest, true),
        _ => (args, false),
    };
    if args.is_empty() {
        return Err(ScriptError::usage("exec", "program [args...] [&]"));
    }

    let stdin = state.stdin.take();
    let spawned = command_for(state, &args[0], &args[1..])
        .and_then(|cmd| ProcessHandle::spawn(cmd, stdin.map(String::into_bytes)).map_err(|e| e.to_string()));
    let mut handle = match spawned {
        Ok(handle) => handle,
        Err(detail) => {
            state.stdout.clear();
            state.stderr.clear();
            state.status = -1;
            expect_outcome(state, neg, Some(format!("{}: {}", args[0], detail)))?;
            return Ok(CmdResult::Ok);
        }
    };

    if background {
        tracing::debug!(pid = handle.pid(), program = %args[0], "started background command");
        state.stdout.clear();
        state.stderr.clear();
        state.background.push(BackgroundTask {
            handle,
            neg,
            cmdline: cmdline(args),
        });
        return Ok(CmdResult::Ok);
    }

    let out = handle.wait(&state.deadline);
    log_output(state, &out.stdout, &out.stderr);
    state.status = out.code();
    if out.timed_out {
        state.logf(&format!("[{}]", out.describe()));
        state.stdout = out.stdout;
        state.stderr = out.stderr;
        return Err(ScriptError::timeout(EXEC_TIMEOUT));
    }
    let failure = (!out.success()).then(|| out.describe());
    state.stdout = out.stdout;
    state.stderr = out.stderr;
    expect_outcome(state, neg, failure)?;
    Ok(CmdResult::Ok)
}

/// `call function [args...]`
pub(crate) fn call(engine: &Engine, state: &mut State, neg: Negation, args: &[String]) -> Result<CmdResult, ScriptError> {
    let Some((name, rest)) = args.split_first() else {
        return Err(ScriptError::usage("call", "function [args...]"));
    };
    let (io, error) = invoke_registered(&engine.calls, "call", state, name, rest, EXEC_TIMEOUT)?;
    state.status = match error {
        None => 0,
        Some(_) if io.status != 0 => io.status,
        Some(_) => 1,
    };
    state.stdout = io.stdout;
    state.stderr = io.stderr;
    expect_outcome(state, neg, error)?;
    Ok(CmdResult::Ok)
}

/// `http function [args...]`
pub(crate) fn http(engine: &Engine, state: &mut State, neg: Negation, args: &[String]) -> Result<CmdResult, ScriptError> {
    let Some((name, rest)) = args.split_first() else {
        return Err(ScriptError::usage("http", "function [args...]"));
    };
    let (io, error) = invoke_registered(&engine.http, "http", state, name, rest, HTTP_TIMEOUT)?;
    state.status = io.status;
    state.stdout = io.stdout;
    state.stderr = io.stderr;
    expect_outcome(state, neg, error)?;
    Ok(CmdResult::Ok)
}

/// Run a function from `table` with the sandbox's view, logging its
/// output. Returns the function's io and its error, if any.
fn invoke_registered(
    table: &FuncTable,
    cmd: &str,
    state: &mut State,
    name: &str,
    args: &[String],
    timeout_msg: &str,
) -> Result<(FuncIo, Option<String>), ScriptError> {
    let func = table.get(name).ok_or_else(|| {
        ScriptError::new(ErrorKind::Usage, format!("{}: unknown function {:?}", cmd, name))
    })?;
    let io = FuncIo {
        dir: state.pwd.clone(),
        env: state.environ(),
        stdin: state.stdin.take().unwrap_or_default(),
        ..Default::default()
    };

    tracing::debug!(cmd, function = name, "invoking registered function");
    let outcome = funcs::invoke(func, io, args.to_vec(), &state.deadline);
    log_output(state, &outcome.io.stdout, &outcome.io.stderr);
    if outcome.timed_out {
        state.status = -1;
        state.stdout.clear();
        state.stderr.clear();
        state.logf("[deadline exceeded]");
        return Err(ScriptError::timeout(timeout_msg));
    }
    Ok((outcome.io, outcome.error))
}

/// Build the OS command, resolving the program on the sandbox `PATH`
fn command_for(state: &State, program: &str, args: &[String]) -> Result<Command, String> {
    let resolved = state
        .look_path(program)
        .ok_or_else(|| "executable file not found in $PATH".to_string())?;
    let mut cmd = Command::new(resolved);
    cmd.args(args).current_dir(&state.pwd).env_clear().envs(state.environ());
    Ok(cmd)
}

/// Program base name plus arguments, as shown by `wait`
fn cmdline(args: &[String]) -> String {
    let base = std::path::Path::new(&args[0])
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args[0].clone());
    std::iter::once(base)
        .chain(args[1..].iter().map(|a| crate::parser::quote_arg(a)))
        .collect::<Vec<_>>()
        .join(" ")
}
