//! cmp / cmpenv: compare text, optionally rewriting golden files

use similar::TextDiff;

use crate::dispatch::CmdResult;
use crate::error::ScriptError;
use crate::state::State;

/// `cmp file1 file2`, or `cmpenv` when `expand` is set.
///
/// `file1` may be `stdout` or `stderr`. `file2` is always read from disk;
/// for `cmpenv` its text is environment-expanded before comparing.
pub(crate) fn cmp(state: &mut State, args: &[String], expand: bool) -> Result<CmdResult, ScriptError> {
    let name = if expand { "cmpenv" } else { "cmp" };
    if args.len() != 2 {
        return Err(ScriptError::usage(name, "file1 file2"));
    }
    let (name1, name2) = (args[0].as_str(), args[1].as_str());

    let text1 = state.read_file(name1).map_err(|e| ScriptError::io(name1, e))?;
    let path2 = state.resolve_path(name2);
    let mut text2 = std::fs::read_to_string(&path2).map_err(|e| ScriptError::io(name2, e))?;
    if expand {
        text2 = state.expand(&text2);
    }

    if text1 == text2 {
        return Ok(CmdResult::Ok);
    }

    if state.update_scripts && !expand && (name1 == "stdout" || name1 == "stderr") {
        if let Some(section) = state.script_files.get(&path2).cloned() {
            tracing::info!(section = %section, "recording golden update");
            state.logf(&format!("[updating {} from {}]", section, name1));
            state.script_updates.insert(section, text1);
            return Ok(CmdResult::Ok);
        }
    }

    let diff = TextDiff::from_lines(&text1, &text2)
        .unified_diff()
        .header(name1, name2)
        .to_string();
    state.logf(&format!("[diff -{} +{}]\n{}", name1, name2, diff));
    Err(ScriptError::assertion(format!("{} and {} differ", name1, name2)))
}
