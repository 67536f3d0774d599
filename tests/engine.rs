//! Engine tests driven through the public API
//!
//! Each test gets a fresh sandbox from `tempfile`.

use std::time::{Duration, Instant};

use emx_script::{Archive, Deadline, Engine, ErrorKind, Outcome, State};

fn sandbox() -> (tempfile::TempDir, State) {
    let dir = tempfile::tempdir().unwrap();
    let state = State::new(dir.path().to_path_buf());
    (dir, state)
}

fn run(script: &str) -> (tempfile::TempDir, State, Outcome) {
    let (dir, mut state) = sandbox();
    let outcome = Engine::new().run(&mut state, script, "script.txt");
    (dir, state, outcome)
}

fn expect_fail(outcome: Outcome) -> emx_script::ScriptError {
    match outcome {
        Outcome::Fail(e) => e,
        other => panic!("expected failure, got {:?}", other),
    }
}

#[test]
fn env_is_visible_to_later_lines() {
    let (_d, state, outcome) = run("env FOO=bar\nenv BAZ=$FOO-x\n");
    assert!(outcome.is_pass(), "{:?}\n{}", outcome, state.log);
    assert_eq!(state.getenv("BAZ"), Some("bar-x"));
}

#[test]
fn bare_env_name_logs_its_value() {
    let (_d, state, outcome) = run("env FOO=bar\nenv FOO\n");
    assert!(outcome.is_pass());
    assert!(state.log.contains("\nFOO=bar\n"), "{}", state.log);
}

#[test]
fn grep_and_sed_require_negation() {
    for script in ["grep x stdout\n", "sed x y stdout\n"] {
        let (_d, _s, outcome) = run(script);
        let e = expect_fail(outcome);
        assert_eq!(e.kind, ErrorKind::Usage);
        assert!(e.message.contains("does not support status checking"), "{}", e);
    }
}

#[test]
fn count_must_match_exactly() {
    let archive = Archive::parse("regexp -count=3 '^x' data\n! regexp -count=2 '^x' data\n-- data --\nx\nx\nx\n").unwrap();
    let (_d, mut state) = sandbox();
    let outcome = Engine::new().run_archive(&mut state, &archive, "count.txtar");
    let e = expect_fail(outcome);
    assert_eq!(e.line, Some(2));
    assert_eq!(e.kind, ErrorKind::Usage);

    let archive = Archive::parse("regexp -count=2 '^x' data\n-- data --\nx\nx\nx\n").unwrap();
    let (_d, mut state) = sandbox();
    let e = expect_fail(Engine::new().run_archive(&mut state, &archive, "count.txtar"));
    assert!(e.message.contains("have 3 matches"), "{}", e);
}

#[test]
fn cmp_in_update_mode_records_new_content() {
    let archive = Archive::parse("call emit\ncmp stdout want.txt\n-- want.txt --\nold\n").unwrap();
    let (_d, state) = sandbox();
    let mut state = state.with_update_scripts(true);
    let mut engine = Engine::new();
    engine.register_call("emit", |io, _| {
        io.stdout = "new\n".into();
        Ok(())
    });
    let outcome = engine.run_archive(&mut state, &archive, "update.txtar");
    assert!(outcome.is_pass(), "{:?}\n{}", outcome, state.log);
    assert_eq!(state.script_updates.get("want.txt").map(String::as_str), Some("new\n"));

    let mut updated = archive.clone();
    updated.apply_updates(&state.script_updates);
    assert!(updated.format().contains("-- want.txt --\nnew\n"));
}

#[test]
fn cmp_without_update_mode_fails_with_diff() {
    let archive = Archive::parse("call emit\ncmp stdout want.txt\n-- want.txt --\nold\n").unwrap();
    let (_d, mut state) = sandbox();
    let mut engine = Engine::new();
    engine.register_call("emit", |io, _| {
        io.stdout = "new\n".into();
        Ok(())
    });
    let e = expect_fail(engine.run_archive(&mut state, &archive, "update.txtar"));
    assert_eq!(e.message, "stdout and want.txt differ");
    assert!(state.log.contains("-old\n+new\n"), "{}", state.log);
}

fn with_deadline(secs: u64) -> (tempfile::TempDir, State) {
    let (dir, state) = sandbox();
    (dir, state.with_deadline(Deadline::after(Duration::from_secs(secs))))
}

fn slow_engine() -> Engine {
    let mut engine = Engine::new();
    let slow = |_: &mut emx_script::FuncIo, _: &[String]| -> Result<(), String> {
        std::thread::sleep(Duration::from_secs(5));
        Ok(())
    };
    engine.register_call("slow", slow);
    engine.register_http("slow", slow);
    engine
}

#[test]
fn slow_functions_time_out_whatever_the_prefix() {
    let cases = [
        ("call slow\n", "test timed out while running command"),
        ("! call slow\n", "test timed out while running command"),
        ("? call slow\n", "test timed out while running command"),
        ("http slow\n", "test timed out while making http request"),
        ("! http slow\n", "test timed out while making http request"),
        ("? http slow\n", "test timed out while making http request"),
    ];
    let engine = slow_engine();
    for (script, want) in cases {
        let (_d, mut state) = with_deadline(1);
        let start = Instant::now();
        let e = expect_fail(engine.run(&mut state, script, "t"));
        assert_eq!(e.kind, ErrorKind::Timeout, "{}: {}", script, e);
        assert_eq!(e.message, want, "{}", script);
        assert!(start.elapsed() < Duration::from_secs(4), "{}", script);
    }
}

#[cfg(unix)]
mod unix {
    use super::*;

    #[test]
    fn exec_captures_output_and_status() {
        let (_d, state, outcome) = run("exec echo hello\nstdout '^hello$'\n! exec false\nstatus 1\n");
        assert!(outcome.is_pass(), "{:?}\n{}", outcome, state.log);
        assert_eq!(state.status, 1);
    }

    #[test]
    fn unexpected_failure_is_reported() {
        let (_d, _s, outcome) = run("exec false\n");
        let e = expect_fail(outcome);
        assert_eq!(e.message, "unexpected command failure");
        assert!(e.to_string().starts_with("script.txt:1: exec false: "), "{}", e);
    }

    #[test]
    fn background_wait_times_out_at_the_deadline() {
        let (_d, mut state) = with_deadline(1);
        let start = Instant::now();
        let outcome = Engine::new().run(&mut state, "exec sleep 5 &\nwait\n", "t");
        let e = expect_fail(outcome);
        assert!(e.is_timeout(), "{}", e);
        assert_eq!(e.message, "test timed out while running command");
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(state.background.is_empty());
    }

    #[test]
    fn foreground_exec_times_out_whatever_the_prefix() {
        for script in ["exec sleep 5\n", "! exec sleep 5\n", "? exec sleep 5\n"] {
            let (_d, mut state) = with_deadline(1);
            let start = Instant::now();
            let e = expect_fail(Engine::new().run(&mut state, script, "t"));
            assert_eq!(e.kind, ErrorKind::Timeout, "{}: {}", script, e);
            assert_eq!(e.message, "test timed out while running command", "{}", script);
            assert!(start.elapsed() < Duration::from_secs(4), "{}", script);
        }
    }

    #[test]
    fn wait_output_follows_launch_order() {
        let script = "exec sh -c 'sleep 0.3; echo a' &\nexec sh -c 'echo b' &\nwait\n";
        let (_d, state, outcome) = run(script);
        assert!(outcome.is_pass(), "{:?}\n{}", outcome, state.log);
        assert_eq!(state.stdout, "a\nb\n");
    }

    fn alive(pid: i32) -> bool {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
    }

    #[test]
    fn skip_leaves_no_processes_behind() {
        let script = "\
! exec sh -c 'echo $$ > pid1; exec sleep 30' &
! exec sh -c 'echo $$ > pid2; exec sleep 30' &
exec sh -c 'while [ ! -s pid1 ] || [ ! -s pid2 ]; do sleep 0.05; done'
skip 'done here'
";
        let (dir, state, outcome) = run(script);
        assert!(matches!(outcome, Outcome::Skip(Some(ref m)) if m == "done here"), "{:?}\n{}", outcome, state.log);
        for name in ["pid1", "pid2"] {
            let pid: i32 = std::fs::read_to_string(dir.path().join(name)).unwrap().trim().parse().unwrap();
            assert!(!alive(pid), "{} still running", pid);
        }
    }

    #[test]
    fn unfinished_background_commands_are_settled_at_script_end() {
        let (_d, state, outcome) = run("! exec sleep 30 &\n");
        assert!(outcome.is_pass(), "{:?}\n{}", outcome, state.log);
        assert!(state.log.contains("[interrupting background commands]"));
    }
}
