//! emx-script CLI
//!
//! Run script E2E tests from txtar files.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use emx_script::{parse_duration, CommandKind, RunConfig, TestRunner};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "emx-script")]
#[command(author = "nzinfo <li.monan@gmail.com>")]
#[command(version)]
#[command(about = "Run script E2E tests from txtar files")]
struct Cli {
    /// Directory or file to test
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Only run tests whose name contains this string
    #[arg(short = 'f', long)]
    filter: Option<String>,

    /// Verbose output: show script execution log
    #[arg(short, long, env = "TESTSCRIPT_VERBOSE")]
    verbose: bool,

    /// Leave command echo and comments out of script logs
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Keep working directories after test (for debugging)
    #[arg(short = 'k', long = "keep", env = "TESTSCRIPT_WORK")]
    keep: bool,

    /// Root directory for working directories
    #[arg(long = "workdir")]
    workdir: Option<PathBuf>,

    /// File extensions to match
    #[arg(long = "ext", default_value = ".txtar")]
    extensions: Vec<String>,

    /// Rewrite golden files from `cmp stdout|stderr` mismatches
    #[arg(short = 'u', long, env = "TESTSCRIPT_UPDATE")]
    update: bool,

    /// Deadline for each test, e.g. 30s or 1m30s
    #[arg(short = 't', long, env = "TESTSCRIPT_TIMEOUT", value_parser = duration_arg)]
    timeout: Option<Duration>,

    /// List available commands and conditions
    #[arg(long = "list-commands")]
    list_commands: bool,

    /// Environment variables to set in every sandbox (KEY=VALUE)
    #[arg(short = 'e', long = "env")]
    env_vars: Vec<String>,

    /// Show number of tests without running
    #[arg(long = "count")]
    count: bool,
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    if cli.list_commands {
        print_commands();
        return Ok(ExitCode::SUCCESS);
    }

    let mut env = Vec::with_capacity(cli.env_vars.len());
    for kv in &cli.env_vars {
        let Some((k, v)) = kv.split_once('=') else {
            bail!("invalid --env {:?}: expected KEY=VALUE", kv);
        };
        env.push((k.to_string(), v.to_string()));
    }

    let config = RunConfig {
        dir: cli.path.clone(),
        filter: cli.filter,
        workdir_root: cli.workdir,
        preserve_work: cli.keep,
        verbose: cli.verbose,
        extensions: cli.extensions,
        timeout: cli.timeout,
        update_scripts: cli.update,
        env,
        quiet: cli.quiet,
        setup: None,
    };
    let runner = TestRunner::new(config);

    if cli.count {
        let count = runner.count_tests().context("counting tests")?;
        println!("Found {} test(s)", count);
        return Ok(ExitCode::SUCCESS);
    }

    let result = runner
        .run_all()
        .with_context(|| format!("running tests in {}", cli.path.display()))?;

    for case in &result.cases {
        if case.skipped {
            println!("SKIP  {} - {}", case.name, case.error.as_deref().unwrap_or(""));
        } else if case.passed {
            println!("PASS  {} ({}ms)", case.name, case.duration.as_millis());
            if case.updated > 0 {
                println!("      updated {} section(s) in {}", case.updated, case.file.display());
            }
            if cli.verbose && !case.log.is_empty() {
                for line in case.log.lines() {
                    println!("      {}", line);
                }
            }
        } else {
            match case.kind {
                Some(kind) => println!("FAIL  {} [{}]", case.name, kind.label()),
                None => println!("FAIL  {}", case.name),
            }
            if let Some(ref err) = case.error {
                for line in err.lines() {
                    println!("      {}", line);
                }
            }
            if !case.log.is_empty() {
                println!("      --- log ---");
                for line in case.log.lines() {
                    println!("      {}", line);
                }
            }
            if let Some(ref wd) = case.workdir {
                println!("      workdir: {}", wd.display());
            }
        }
    }

    println!();
    println!("{}", result.summary());

    Ok(if result.all_passed() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn print_commands() {
    println!("Built-in commands:");
    println!();
    for kind in CommandKind::ALL {
        let prefix = if kind.supports_negation() { "[!?]" } else { "" };
        println!("  {:<4}{:<10} {:<28} {}", prefix, kind.name(), kind.usage(), kind.summary());
    }

    println!();
    println!("Built-in conditions:");
    println!();
    println!("  unix, windows, darwin, linux");
    println!("  amd64, arm64");
    println!("  exec:PROGRAM  PROGRAM is on the sandbox PATH");
    println!("  env:NAME      NAME is set and non-empty");

    println!();
    println!("Prefixes:");
    println!("  !            Command must fail (grep/sed: extract into stdout)");
    println!("  ?            Command may fail or succeed");
    println!("  [cond]       Conditional execution");
    println!("  [!cond]      Negated condition");
}
