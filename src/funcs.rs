//! In-process function tables for `call` and `http`
//!
//! The embedding application registers functions by name. A function
//! receives a `FuncIo` describing the sandbox and writes its output into
//! it, so the tool's own command surface can be exercised without
//! spawning a process.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;

use crate::deadline::Deadline;

/// Sandbox view handed to a registered function
#[derive(Debug, Clone, Default)]
pub struct FuncIo {
    /// Current script directory
    pub dir: PathBuf,
    /// Effective sandbox environment
    pub env: Vec<(String, String)>,
    /// Contents set by the `stdin` command, if any
    pub stdin: String,
    pub stdout: String,
    pub stderr: String,
    /// Status reported to `status`; for `http` typically the response code
    pub status: i32,
}

impl FuncIo {
    /// Look up a sandbox environment variable
    pub fn getenv(&self, key: &str) -> Option<&str> {
        self.env.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// A registered function. `Err` means the function failed.
pub type Func = Arc<dyn Fn(&mut FuncIo, &[String]) -> Result<(), String> + Send + Sync>;

/// Name → function table
#[derive(Clone, Default)]
pub struct FuncTable {
    funcs: BTreeMap<String, Func>,
}

impl FuncTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut FuncIo, &[String]) -> Result<(), String> + Send + Sync + 'static,
    {
        self.funcs.insert(name.into(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<Func> {
        self.funcs.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.funcs.keys().map(|k| k.as_str())
    }
}

impl std::fmt::Debug for FuncTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.funcs.keys()).finish()
    }
}

/// How a function call ended
#[derive(Debug)]
pub struct FuncOutcome {
    pub io: FuncIo,
    pub error: Option<String>,
    pub timed_out: bool,
}

/// Run `func` on its own thread, racing the deadline.
///
/// A function that overruns the deadline cannot be stopped; its thread is
/// abandoned and the outcome reports `timed_out`.
pub fn invoke(func: Func, io: FuncIo, args: Vec<String>, deadline: &Deadline) -> FuncOutcome {
    let (tx, rx) = mpsc::sync_channel(1);
    let fallback = FuncIo {
        dir: io.dir.clone(),
        ..Default::default()
    };
    thread::spawn(move || {
        let mut io = io;
        let result = func(&mut io, &args);
        let _ = tx.send((io, result));
    });

    let received = match deadline.remaining() {
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        Some(left) => rx.recv_timeout(left),
    };
    match received {
        Ok((io, result)) => FuncOutcome { io, error: result.err(), timed_out: false },
        Err(RecvTimeoutError::Timeout) => FuncOutcome {
            io: fallback,
            error: Some("deadline exceeded".to_string()),
            timed_out: true,
        },
        Err(RecvTimeoutError::Disconnected) => FuncOutcome {
            io: fallback,
            error: Some("function panicked".to_string()),
            timed_out: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn invoke_collects_output() {
        let mut table = FuncTable::new();
        table.register("greet", |io, args| {
            io.stdout.push_str(&format!("hello {}\n", args.join(" ")));
            Ok(())
        });
        let f = table.get("greet").unwrap();
        let out = invoke(f, FuncIo::default(), vec!["world".into()], &Deadline::never());
        assert_eq!(out.io.stdout, "hello world\n");
        assert!(out.error.is_none());
        assert!(!out.timed_out);
    }

    #[test]
    fn invoke_reports_errors_and_panics() {
        let mut table = FuncTable::new();
        table.register("fail", |io, _| {
            io.stderr.push_str("bad\n");
            Err("failed".into())
        });
        table.register("boom", |_, _| panic!("boom"));

        let out = invoke(table.get("fail").unwrap(), FuncIo::default(), vec![], &Deadline::never());
        assert_eq!(out.error.as_deref(), Some("failed"));
        assert_eq!(out.io.stderr, "bad\n");

        let out = invoke(table.get("boom").unwrap(), FuncIo::default(), vec![], &Deadline::never());
        assert_eq!(out.error.as_deref(), Some("function panicked"));
    }

    #[test]
    fn invoke_times_out() {
        let mut table = FuncTable::new();
        table.register("slow", |_, _| {
            std::thread::sleep(Duration::from_secs(2));
            Ok(())
        });
        let out = invoke(
            table.get("slow").unwrap(),
            FuncIo::default(),
            vec![],
            &Deadline::after(Duration::from_millis(50)),
        );
        assert!(out.timed_out);
    }

    #[test]
    fn getenv_prefers_later_entries() {
        let io = FuncIo {
            env: vec![("A".into(), "1".into()), ("A".into(), "2".into())],
            ..Default::default()
        };
        assert_eq!(io.getenv("A"), Some("2"));
        assert_eq!(io.getenv("B"), None);
    }
}
