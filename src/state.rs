//! Script execution state
//!
//! One `State` per test run. It is the sandbox (working directory and
//! isolated environment), the capture buffers of the last synchronous
//! command, the background registry, the log, and the golden-file
//! bookkeeping. It is passed by `&mut` to every handler.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

use crate::archive::Archive;
use crate::deadline::Deadline;
use crate::process::BackgroundTask;

/// Variables that exist for expansion only and never reach subprocesses
const PSEUDO_VARS: &[&str] = &["/", ":", "$"];

/// Mutable state for a single script execution
pub struct State {
    /// Sandbox root (archive files are extracted here)
    pub workdir: PathBuf,
    /// Current directory, changed by `cd`
    pub pwd: PathBuf,
    /// `K=V` entries in the order they were set; names may repeat
    env: Vec<String>,
    /// Folded name → effective value
    env_map: HashMap<String, String>,
    /// Last synchronous command's stdout
    pub stdout: String,
    /// Last synchronous command's stderr
    pub stderr: String,
    /// Last exit status from `exec`, `call` or `http`
    pub status: i32,
    /// Input for the next `exec`, `call` or `http`, set by `stdin`
    pub stdin: Option<String>,
    /// Background commands not yet joined, in launch order
    pub background: Vec<BackgroundTask>,
    /// Execution log
    pub log: String,
    /// Set once `stop` ran
    pub stopped: bool,
    /// Rewrite archive files from `cmp stdout` instead of failing
    pub update_scripts: bool,
    /// Run-wide deadline
    pub deadline: Deadline,
    /// Absolute sandbox path → archive section it was extracted from
    pub script_files: HashMap<PathBuf, String>,
    /// Archive section → new content recorded by `cmp` in update mode
    pub script_updates: BTreeMap<String, String>,
}

impl State {
    /// Create the state for a sandbox rooted at `workdir`, with the
    /// isolated default environment.
    pub fn new(workdir: PathBuf) -> Self {
        let mut state = Self {
            pwd: workdir.clone(),
            workdir,
            env: Vec::new(),
            env_map: HashMap::new(),
            stdout: String::new(),
            stderr: String::new(),
            status: 0,
            stdin: None,
            background: Vec::new(),
            log: String::new(),
            stopped: false,
            update_scripts: false,
            deadline: Deadline::never(),
            script_files: HashMap::new(),
            script_updates: BTreeMap::new(),
        };

        let work = state.workdir.to_string_lossy().into_owned();
        let tmp = state.workdir.join(".tmp").to_string_lossy().into_owned();
        state.setenv("WORK", &work);
        state.setenv("PATH", std::env::var("PATH").unwrap_or_default());
        #[cfg(windows)]
        {
            state.setenv("USERPROFILE", "/no-home");
            state.setenv("TMP", &tmp);
            state.setenv("TEMP", &tmp);
            if let Ok(root) = std::env::var("SYSTEMROOT") {
                state.setenv("SYSTEMROOT", root);
            }
            state.setenv("devnull", "NUL");
        }
        #[cfg(not(windows))]
        {
            state.setenv("HOME", "/no-home");
            state.setenv("TMPDIR", &tmp);
            state.setenv("devnull", "/dev/null");
        }
        state.setenv("/", std::path::MAIN_SEPARATOR.to_string());
        state.setenv(":", if cfg!(windows) { ";" } else { ":" });
        state.setenv("$", "$");
        state.setenv("PWD", &work);
        state
    }

    /// Builder-style deadline
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Builder-style update mode
    pub fn with_update_scripts(mut self, update: bool) -> Self {
        self.update_scripts = update;
        self
    }

    /// Set an environment variable. A later setting overrides an earlier
    /// one with the same (case-folded) name.
    pub fn setenv(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        self.env.push(format!("{}={}", key, value));
        self.env_map.insert(fold_name(&key), value);
    }

    /// Get an environment variable
    pub fn getenv(&self, key: &str) -> Option<&str> {
        self.env_map.get(&fold_name(key)).map(|v| v.as_str())
    }

    /// Distinct variable names in first-set order, with effective values.
    /// Includes the expansion-only pseudo-variables.
    pub fn env_listing(&self) -> Vec<(String, String)> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for kv in &self.env {
            let name = kv.split_once('=').map_or(kv.as_str(), |(k, _)| k);
            if seen.insert(fold_name(name)) {
                let value = self.getenv(name).unwrap_or_default().to_string();
                out.push((name.to_string(), value));
            }
        }
        out
    }

    /// The environment handed to subprocesses and functions
    pub fn environ(&self) -> Vec<(String, String)> {
        self.env_listing()
            .into_iter()
            .filter(|(k, _)| !PSEUDO_VARS.contains(&k.as_str()))
            .collect()
    }

    /// Expand `$VAR` / `${VAR}` against the sandbox environment
    pub fn expand(&self, s: &str) -> String {
        crate::parser::expand_env(s, &|key| self.getenv(key).map(|v| v.to_string()))
    }

    /// Resolve a path against the current directory. Absolute paths are
    /// used as-is; both are lexically cleaned.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            clean_path(p)
        } else {
            clean_path(&self.pwd.join(p))
        }
    }

    /// Change the current directory and `PWD`.
    pub fn chdir(&mut self, dir: &str) -> std::io::Result<()> {
        let target = self.resolve_path(dir);
        let meta = std::fs::metadata(&target).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                std::io::Error::new(e.kind(), format!("directory {} does not exist", target.display()))
            } else {
                e
            }
        })?;
        if !meta.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("{} is not a directory", target.display()),
            ));
        }
        let pwd = target.to_string_lossy().into_owned();
        self.pwd = target;
        self.setenv("PWD", pwd);
        Ok(())
    }

    /// Read a file, treating `stdout` and `stderr` as the capture buffers
    pub fn read_file(&self, name: &str) -> std::io::Result<String> {
        match name {
            "stdout" => Ok(self.stdout.clone()),
            "stderr" => Ok(self.stderr.clone()),
            _ => std::fs::read_to_string(self.resolve_path(name)),
        }
    }

    /// Append to the log, ending the entry with a newline
    pub fn logf(&mut self, msg: &str) {
        self.log.push_str(msg);
        if !msg.ends_with('\n') {
            self.log.push('\n');
        }
    }

    /// Write the archive's files into the sandbox and remember where each
    /// came from. Names are variable-expanded and may not escape the
    /// sandbox.
    pub fn extract_files(&mut self, archive: &Archive) -> std::io::Result<()> {
        std::fs::create_dir_all(self.workdir.join(".tmp"))?;
        let root = clean_path(&self.workdir);
        for file in &archive.files {
            let path = self.resolve_path(&self.expand(&file.name));
            if !path.starts_with(&root) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    format!("archive file {} escapes the sandbox", file.name),
                ));
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &file.data)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = if file.executable { 0o755 } else { 0o644 };
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))?;
            }
            self.script_files.insert(path, file.name.clone());
        }
        Ok(())
    }

    /// Find an executable on the sandbox `PATH`
    pub fn look_path(&self, program: &str) -> Option<PathBuf> {
        if program.contains('/') || program.contains(std::path::MAIN_SEPARATOR) {
            let path = self.resolve_path(program);
            return is_executable(&path).then_some(path);
        }
        let path_var = self.getenv("PATH").unwrap_or_default();
        for dir in std::env::split_paths(path_var) {
            if dir.as_os_str().is_empty() {
                continue;
            }
            let candidate = dir.join(program);
            if is_executable(&candidate) {
                return Some(candidate);
            }
            #[cfg(windows)]
            for ext in ["exe", "bat", "cmd", "com"] {
                let with_ext = candidate.with_extension(ext);
                if is_executable(&with_ext) {
                    return Some(with_ext);
                }
            }
        }
        None
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).map_or(false, |m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Environment names are case-insensitive on Windows only
fn fold_name(name: &str) -> String {
    if cfg!(windows) {
        name.to_lowercase()
    } else {
        name.to_string()
    }
}

/// Resolve `.` and `..` lexically, without touching the filesystem.
/// `..` at the root is dropped.
fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    out.pop();
                    depth -= 1;
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
