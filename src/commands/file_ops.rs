//! File operation commands: exists, cp, mkdir, rm, chmod, symlink, unquote, stdin

use std::path::Path;

use crate::dispatch::{CmdResult, Negation};
use crate::error::{ErrorKind, ScriptError};
use crate::state::State;

// ──────────────────────────────────────────────────────────
// exists: check that files exist (or don't)
// ──────────────────────────────────────────────────────────

pub(crate) fn exists(state: &mut State, neg: Negation, args: &[String]) -> Result<CmdResult, ScriptError> {
    let (readonly, files) = match args.split_first() {
        Some((flag, rest)) if flag == "-readonly" => (true, rest),
        _ => (false, args),
    };
    if files.is_empty() {
        return Err(ScriptError::usage("exists", "[-readonly] file..."));
    }

    for file in files {
        let path = state.resolve_path(file);
        // Links are followed: a dangling link does not exist.
        let meta = std::fs::metadata(&path).ok();
        match (neg, meta) {
            (Negation::Negate, Some(meta)) => {
                let what = if meta.is_dir() { "directory" } else { "file" };
                return Err(ScriptError::assertion(format!("{} {} unexpectedly exists", what, path.display())));
            }
            (Negation::Assert, None) => {
                return Err(ScriptError::assertion(format!("{} does not exist", path.display())));
            }
            (Negation::Assert, Some(meta)) if readonly && is_writable(&meta) => {
                return Err(ScriptError::assertion(format!("{} exists but is writable", path.display())));
            }
            _ => {}
        }
    }
    Ok(CmdResult::Ok)
}

#[cfg(unix)]
fn is_writable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o222 != 0
}

#[cfg(not(unix))]
fn is_writable(meta: &std::fs::Metadata) -> bool {
    !meta.permissions().readonly()
}

// ──────────────────────────────────────────────────────────
// cp: copy files or capture buffers
// ──────────────────────────────────────────────────────────

pub(crate) fn cp(state: &mut State, args: &[String]) -> Result<CmdResult, ScriptError> {
    let Some((dst, srcs)) = args.split_last().filter(|(_, srcs)| !srcs.is_empty()) else {
        return Err(ScriptError::usage("cp", "src... dst"));
    };

    let dst_path = state.resolve_path(dst);
    let dst_is_dir = dst_path.is_dir();
    if srcs.len() > 1 && !dst_is_dir {
        return Err(ScriptError::new(
            ErrorKind::Usage,
            format!("cp: destination {} is not a directory", dst_path.display()),
        ));
    }

    for src in srcs {
        let (name, data, mode) = match src.as_str() {
            "stdout" => (src.clone(), state.stdout.clone().into_bytes(), 0o666),
            "stderr" => (src.clone(), state.stderr.clone().into_bytes(), 0o666),
            _ => {
                let path = state.resolve_path(src);
                let meta = std::fs::metadata(&path).map_err(|e| ScriptError::io(src, e))?;
                let data = std::fs::read(&path).map_err(|e| ScriptError::io(src, e))?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| src.clone());
                (name, data, file_mode(&meta))
            }
        };
        let target = if dst_is_dir { dst_path.join(&name) } else { dst_path.clone() };
        std::fs::write(&target, &data).map_err(|e| ScriptError::io(target.display(), e))?;
        set_mode(&target, mode)?;
    }
    Ok(CmdResult::Ok)
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() { 0o444 } else { 0o666 }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), ScriptError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| ScriptError::io(path.display(), e))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> Result<(), ScriptError> {
    let mut perms = std::fs::metadata(path)
        .map_err(|e| ScriptError::io(path.display(), e))?
        .permissions();
    perms.set_readonly(mode & 0o222 == 0);
    std::fs::set_permissions(path, perms).map_err(|e| ScriptError::io(path.display(), e))
}

// ──────────────────────────────────────────────────────────
// mkdir: create directories with parents
// ──────────────────────────────────────────────────────────

pub(crate) fn mkdir(state: &mut State, args: &[String]) -> Result<CmdResult, ScriptError> {
    if args.is_empty() {
        return Err(ScriptError::usage("mkdir", "dir..."));
    }
    for dir in args {
        std::fs::create_dir_all(state.resolve_path(dir)).map_err(|e| ScriptError::io(dir, e))?;
    }
    Ok(CmdResult::Ok)
}

// ──────────────────────────────────────────────────────────
// rm: remove files or trees, read-only ones included
// ──────────────────────────────────────────────────────────

pub(crate) fn rm(state: &mut State, args: &[String]) -> Result<CmdResult, ScriptError> {
    if args.is_empty() {
        return Err(ScriptError::usage("rm", "file..."));
    }
    for arg in args {
        let path = state.resolve_path(arg);
        let Ok(meta) = std::fs::symlink_metadata(&path) else {
            continue;
        };
        let removed = if meta.is_dir() {
            make_writable(&path);
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        removed.map_err(|e| ScriptError::io(arg, e))?;
    }
    Ok(CmdResult::Ok)
}

/// Add owner write permission to every directory under `dir`, so their
/// entries can be unlinked.
fn make_writable(dir: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let Ok(meta) = std::fs::symlink_metadata(dir) else {
            return;
        };
        if !meta.is_dir() {
            return;
        }
        let mode = meta.permissions().mode();
        let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(mode | 0o700));
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                make_writable(&entry.path());
            }
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}

// ──────────────────────────────────────────────────────────
// chmod: change file mode bits
// ──────────────────────────────────────────────────────────

pub(crate) fn chmod(state: &mut State, args: &[String]) -> Result<CmdResult, ScriptError> {
    if args.len() != 2 {
        return Err(ScriptError::usage("chmod", "mode file"));
    }
    let mode = u32::from_str_radix(&args[0], 8).map_err(|e| {
        ScriptError::new(ErrorKind::Usage, format!("bad file mode {:?}: {}", args[0], e))
    })?;
    if mode > 0o777 {
        return Err(ScriptError::new(ErrorKind::Usage, format!("unsupported file mode {:03o}", mode)));
    }
    let path = state.resolve_path(&args[1]);
    if !path.exists() {
        return Err(ScriptError::new(ErrorKind::Io, format!("{}: no such file or directory", args[1])));
    }
    set_mode(&path, mode)?;
    Ok(CmdResult::Ok)
}

// ──────────────────────────────────────────────────────────
// symlink: create a symbolic link
// ──────────────────────────────────────────────────────────

pub(crate) fn symlink(state: &mut State, args: &[String]) -> Result<CmdResult, ScriptError> {
    if args.len() != 3 || args[1] != "->" {
        return Err(ScriptError::usage("symlink", "file -> target"));
    }
    let link = state.resolve_path(&args[0]);
    // The target stays relative to the link's own directory.
    let target = Path::new(&args[2]);

    #[cfg(unix)]
    let made = std::os::unix::fs::symlink(target, &link);
    #[cfg(windows)]
    let made = {
        let resolved = link.parent().map(|p| p.join(target)).unwrap_or_else(|| target.to_path_buf());
        if resolved.is_dir() {
            std::os::windows::fs::symlink_dir(target, &link)
        } else {
            std::os::windows::fs::symlink_file(target, &link)
        }
    };
    made.map_err(|e| ScriptError::io(format!("symlink {}", args[0]), e))?;
    Ok(CmdResult::Ok)
}

// ──────────────────────────────────────────────────────────
// unquote: strip txtar `>` quoting in place
// ──────────────────────────────────────────────────────────

pub(crate) fn unquote(state: &mut State, args: &[String]) -> Result<CmdResult, ScriptError> {
    if args.is_empty() {
        return Err(ScriptError::usage("unquote", "file..."));
    }
    for arg in args {
        let path = state.resolve_path(arg);
        let data = std::fs::read(&path).map_err(|e| ScriptError::io(arg, e))?;
        let data = crate::archive::unquote(&data)
            .map_err(|e| ScriptError::new(ErrorKind::Io, format!("{}: {}", arg, e)))?;
        std::fs::write(&path, data).map_err(|e| ScriptError::io(arg, e))?;
    }
    Ok(CmdResult::Ok)
}

// ──────────────────────────────────────────────────────────
// stdin: feed a file to the next command
// ──────────────────────────────────────────────────────────

pub(crate) fn stdin(state: &mut State, args: &[String]) -> Result<CmdResult, ScriptError> {
    if args.len() != 1 {
        return Err(ScriptError::usage("stdin", "filename"));
    }
    let data = state.read_file(&args[0]).map_err(|e| ScriptError::io(&args[0], e))?;
    state.stdin = Some(data);
    Ok(CmdResult::Ok)
}
