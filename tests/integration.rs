//! Integration test: run script archives via cargo test
//!
//! Discovers and runs every `.txtar` file under `tests/testdata/`.
//!
//! Usage:
//!   cargo test --test integration
//!   TESTSCRIPT_VERBOSE=1 cargo test --test integration
//!
//! Environment variables:
//!   TESTSCRIPT_VERBOSE=1  print script execution logs
//!   TESTSCRIPT_WORK=1     preserve working directories
//!   TESTSCRIPT_UPDATE=1   rewrite golden sections from `cmp stdout` mismatches
//!   TESTSCRIPT_TIMEOUT=1m per-test deadline

use std::path::PathBuf;

fn testdata() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/testdata")
}

#[test]
fn testscript_all() {
    emx_script::run_and_assert_with(testdata(), |engine| {
        engine.register_call("greet", |io, args| {
            let who = args.first().map(String::as_str).unwrap_or("world");
            io.stdout = format!("hello, {}!\n", who);
            Ok(())
        });
        engine.register_call("wc", |io, _| {
            io.stdout = format!("{}\n", io.stdin.lines().count());
            Ok(())
        });
        engine.register_call("fail", |io, args| {
            io.stderr = format!("{}\n", args.join(" "));
            io.status = 2;
            Err("function failed".into())
        });
        engine.register_http("get", |io, args| {
            match args.first().map(String::as_str) {
                Some("/health") => {
                    io.stdout = "{\"status\":\"ok\"}\n".into();
                    io.status = 200;
                    Ok(())
                }
                _ => {
                    io.status = 404;
                    Err("404 Not Found".into())
                }
            }
        });
    });
}
