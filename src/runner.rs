//! Test runner
//!
//! Orchestrates running script archives: discovers txtar files in a
//! directory, creates one temp sandbox per test, runs the script under a
//! deadline, writes golden updates back, and reports results.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::archive::Archive;
use crate::deadline::Deadline;
use crate::engine::{Engine, Outcome};
use crate::error::ErrorKind;
use crate::state::State;

/// Runner-level failures: everything that goes wrong outside a script
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("test directory not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("failed to create workdir: {0}")]
    Workdir(#[source] std::io::Error),
    #[error("setup failed: {0}")]
    Setup(String),
    #[error("failed to update {path}: {source}")]
    WriteBack {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid duration {value:?}: {source}")]
    Duration {
        value: String,
        #[source]
        source: humantime::DurationError,
    },
}

/// Hook run before each test, after the archive is extracted
pub type SetupFn = Box<dyn Fn(&mut SetupEnv) -> Result<(), Box<dyn std::error::Error>> + Send + Sync>;

/// Configuration for the test runner
pub struct RunConfig {
    /// Directory containing test scripts (txtar files), or a single file
    pub dir: PathBuf,
    /// Optional filter: only run tests whose name contains this
    pub filter: Option<String>,
    /// Root directory for temp working directories
    pub workdir_root: Option<PathBuf>,
    /// Preserve working directories after test (for debugging)
    pub preserve_work: bool,
    /// Setup function called before each test
    pub setup: Option<SetupFn>,
    /// Verbose mode: print script execution log
    pub verbose: bool,
    /// File extensions to scan (default: [".txtar"])
    pub extensions: Vec<String>,
    /// Overall deadline for each test
    pub timeout: Option<Duration>,
    /// Rewrite archive sections from `cmp stdout|stderr` mismatches
    pub update_scripts: bool,
    /// Extra sandbox variables for every test
    pub env: Vec<(String, String)>,
    /// Leave command echo and comments out of the log
    pub quiet: bool,
}

/// Environment available during setup
pub struct SetupEnv {
    /// The working directory for the test
    pub work_dir: PathBuf,
    /// Environment variables to set
    pub env: Vec<(String, String)>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("testdata"),
            filter: None,
            workdir_root: None,
            preserve_work: false,
            setup: None,
            verbose: false,
            extensions: vec![".txtar".into()],
            timeout: None,
            update_scripts: false,
            env: Vec::new(),
            quiet: false,
        }
    }
}

impl RunConfig {
    /// Defaults overridden from the environment:
    ///
    /// - `TESTSCRIPT_VERBOSE`: print logs
    /// - `TESTSCRIPT_WORK`: keep working directories
    /// - `TESTSCRIPT_UPDATE`: rewrite golden files
    /// - `TESTSCRIPT_TIMEOUT`: per-test deadline, e.g. `30s` or `1m30s`
    pub fn from_env(dir: impl Into<PathBuf>) -> Result<Self, RunnerError> {
        let timeout = match std::env::var("TESTSCRIPT_TIMEOUT") {
            Ok(value) if !value.is_empty() => Some(parse_duration(&value)?),
            _ => None,
        };
        Ok(Self {
            dir: dir.into(),
            verbose: env_flag("TESTSCRIPT_VERBOSE"),
            preserve_work: env_flag("TESTSCRIPT_WORK"),
            update_scripts: env_flag("TESTSCRIPT_UPDATE"),
            timeout,
            ..Default::default()
        })
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var_os(name).map_or(false, |v| !v.is_empty() && v != "0")
}

/// Result of running all tests
#[derive(Debug)]
pub struct TestResult {
    /// Individual test case results
    pub cases: Vec<TestCaseResult>,
    /// Total duration
    pub duration: Duration,
}

impl TestResult {
    /// Check if all tests passed
    pub fn all_passed(&self) -> bool {
        self.cases.iter().all(|c| c.passed || c.skipped)
    }

    pub fn passed_count(&self) -> usize {
        self.cases.iter().filter(|c| c.passed && !c.skipped).count()
    }

    pub fn failed_count(&self) -> usize {
        self.cases.iter().filter(|c| !c.passed && !c.skipped).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.cases.iter().filter(|c| c.skipped).count()
    }

    /// Format a summary line
    pub fn summary(&self) -> String {
        format!(
            "{} passed, {} failed, {} skipped ({}ms)",
            self.passed_count(),
            self.failed_count(),
            self.skipped_count(),
            self.duration.as_millis(),
        )
    }
}

/// Result of a single test case
#[derive(Debug)]
pub struct TestCaseResult {
    /// Test name (filename without extension)
    pub name: String,
    /// Source file path
    pub file: PathBuf,
    pub passed: bool,
    pub skipped: bool,
    /// Failure message, or the skip reason
    pub error: Option<String>,
    /// What kind of script error failed the test, if it got that far
    pub kind: Option<ErrorKind>,
    /// Execution log
    pub log: String,
    pub duration: Duration,
    /// Working directory (if preserved)
    pub workdir: Option<PathBuf>,
    /// Archive sections rewritten in update mode
    pub updated: usize,
}

/// The test runner
pub struct TestRunner {
    engine: Engine,
    config: RunConfig,
}

impl TestRunner {
    pub fn new(config: RunConfig) -> Self {
        Self::with_engine(Engine::new(), config)
    }

    /// Create a new runner with a custom engine
    pub fn with_engine(mut engine: Engine, config: RunConfig) -> Self {
        engine.quiet |= config.quiet;
        Self { engine, config }
    }

    /// Mutable access to the engine, for registering functions
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Discover test files in the configured directory
    pub fn discover(&self) -> Result<Vec<PathBuf>, RunnerError> {
        let dir = &self.config.dir;
        if !dir.exists() {
            return Err(RunnerError::NotFound(dir.clone()));
        }
        if dir.is_file() {
            return Ok(vec![dir.clone()]);
        }

        let mut files = Vec::new();
        self.scan_dir(dir, &mut files)
            .map_err(|source| RunnerError::Read { path: dir.clone(), source })?;
        files.sort();
        Ok(files)
    }

    fn scan_dir(&self, dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.scan_dir(&path, files)?;
            } else if self.is_test_file(&path) {
                if let Some(ref filter) = self.config.filter {
                    let name = test_name(&path);
                    if !name.contains(filter.as_str()) {
                        continue;
                    }
                }
                files.push(path);
            }
        }
        Ok(())
    }

    fn is_test_file(&self, path: &Path) -> bool {
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => self.config.extensions.iter().any(|ext| name.ends_with(ext.as_str())),
            None => false,
        }
    }

    /// Run all discovered tests
    pub fn run_all(&self) -> Result<TestResult, RunnerError> {
        let start = Instant::now();
        let files = self.discover()?;
        tracing::info!(count = files.len(), dir = %self.config.dir.display(), "running scripts");

        let cases = files.iter().map(|file| self.run_one(file)).collect();
        Ok(TestResult { cases, duration: start.elapsed() })
    }

    /// Count the number of tests that would be run
    pub fn count_tests(&self) -> Result<usize, RunnerError> {
        Ok(self.discover()?.len())
    }

    /// Run a single test file
    pub fn run_one(&self, file: &Path) -> TestCaseResult {
        let start = Instant::now();
        let name = test_name(file);
        let mut result = TestCaseResult {
            name,
            file: file.to_path_buf(),
            passed: false,
            skipped: false,
            error: None,
            kind: None,
            log: String::new(),
            duration: Duration::ZERO,
            workdir: None,
            updated: 0,
        };

        let (mut archive, tmpdir) = match self.prepare_test(file, &result.name) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "could not prepare test");
                result.error = Some(e.to_string());
                result.duration = start.elapsed();
                return result;
            }
        };

        let deadline = self.config.timeout.map_or_else(Deadline::never, Deadline::after);
        let mut state = State::new(tmpdir.path().to_path_buf())
            .with_deadline(deadline)
            .with_update_scripts(self.config.update_scripts);

        match self.execute_test(file, &archive, &mut state) {
            Ok(Outcome::Pass) => {
                result.passed = true;
                if !state.script_updates.is_empty() {
                    match write_updates(file, &mut archive, &state) {
                        Ok(n) => result.updated = n,
                        Err(e) => {
                            result.passed = false;
                            result.error = Some(e.to_string());
                        }
                    }
                }
            }
            Ok(Outcome::Skip(msg)) => {
                result.passed = true;
                result.skipped = true;
                result.error = msg;
            }
            Ok(Outcome::Fail(e)) => {
                result.kind = Some(e.kind);
                result.error = Some(e.to_string());
            }
            Err(e) => result.error = Some(e.to_string()),
        }

        if self.config.preserve_work || !result.passed {
            result.workdir = Some(tmpdir.keep());
        }
        result.log = state.log;
        result.duration = start.elapsed();

        if result.skipped {
            tracing::info!(test = %result.name, "skipped");
        } else if result.passed {
            tracing::info!(test = %result.name, ms = result.duration.as_millis() as u64, "passed");
        } else {
            tracing::warn!(test = %result.name, error = result.error.as_deref().unwrap_or(""), "failed");
        }
        result
    }

    /// Parse the txtar file and create a working directory.
    fn prepare_test(&self, file: &Path, name: &str) -> Result<(Archive, tempfile::TempDir), RunnerError> {
        let data = std::fs::read_to_string(file)
            .map_err(|source| RunnerError::Read { path: file.to_path_buf(), source })?;
        let archive = Archive::parse(&data)
            .map_err(|message| RunnerError::Parse { path: file.to_path_buf(), message })?;
        let tmpdir = self.create_workdir(name).map_err(RunnerError::Workdir)?;
        Ok((archive, tmpdir))
    }

    /// Seed the sandbox, run setup, and execute the script.
    fn execute_test(&self, file: &Path, archive: &Archive, state: &mut State) -> Result<Outcome, RunnerError> {
        for (k, v) in &self.config.env {
            state.setenv(k.as_str(), v.as_str());
        }

        if let Some(ref setup) = self.config.setup {
            let mut env = SetupEnv { work_dir: state.workdir.clone(), env: Vec::new() };
            setup(&mut env).map_err(|e| RunnerError::Setup(e.to_string()))?;
            for (k, v) in env.env {
                state.setenv(k, v);
            }
        }

        let filename = file.to_string_lossy();
        Ok(self.engine.run_archive(state, archive, &filename))
    }

    fn create_workdir(&self, name: &str) -> std::io::Result<tempfile::TempDir> {
        let prefix = format!("testscript-{}-", name);
        match self.config.workdir_root {
            Some(ref root) => {
                std::fs::create_dir_all(root)?;
                tempfile::Builder::new().prefix(&prefix).tempdir_in(root)
            }
            None => tempfile::Builder::new().prefix(&prefix).tempdir(),
        }
    }
}

fn test_name(file: &Path) -> String {
    let name = file.file_name().and_then(|s| s.to_str()).unwrap_or("unknown");
    match name.rfind('.') {
        Some(dot) if dot > 0 => name[..dot].to_string(),
        _ => name.to_string(),
    }
}

/// Apply the recorded golden updates to the archive and rewrite `file`.
/// Returns how many sections changed.
fn write_updates(file: &Path, archive: &mut Archive, state: &State) -> Result<usize, RunnerError> {
    let changed = archive.apply_updates(&state.script_updates);
    if changed == 0 {
        return Ok(0);
    }
    std::fs::write(file, archive.format())
        .map_err(|source| RunnerError::WriteBack { path: file.to_path_buf(), source })?;
    tracing::info!(file = %file.display(), sections = changed, "updated golden files");
    Ok(changed)
}

/// Parse a duration written like `500ms`, `30s` or `1m30s`.
pub fn parse_duration(s: &str) -> Result<Duration, RunnerError> {
    humantime::parse_duration(s).map_err(|source| RunnerError::Duration {
        value: s.to_string(),
        source,
    })
}

/// Builder API for convenient test runner construction
pub struct TestRunnerBuilder {
    config: RunConfig,
    engine: Option<Engine>,
}

impl TestRunnerBuilder {
    /// Start building a runner for the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            config: RunConfig { dir: dir.into(), ..Default::default() },
            engine: None,
        }
    }

    /// Start from an existing configuration
    pub fn from_config(config: RunConfig) -> Self {
        Self { config, engine: None }
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.config.filter = Some(filter.into());
        self
    }

    pub fn workdir_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.workdir_root = Some(root.into());
        self
    }

    pub fn preserve_work(mut self, preserve: bool) -> Self {
        self.config.preserve_work = preserve;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.config.quiet = quiet;
        self
    }

    pub fn extensions(mut self, exts: Vec<String>) -> Self {
        self.config.extensions = exts;
        self
    }

    /// Per-test deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Rewrite golden sections instead of failing `cmp`
    pub fn update_scripts(mut self, update: bool) -> Self {
        self.config.update_scripts = update;
        self
    }

    /// Add a sandbox variable for every test
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.push((key.into(), value.into()));
        self
    }

    /// Run `f` before each test
    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut SetupEnv) -> Result<(), Box<dyn std::error::Error>> + Send + Sync + 'static,
    {
        self.config.setup = Some(Box::new(f));
        self
    }

    /// Use a custom engine
    pub fn engine(mut self, engine: Engine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn build(self) -> TestRunner {
        match self.engine {
            Some(engine) => TestRunner::with_engine(engine, self.config),
            None => TestRunner::new(self.config),
        }
    }

    /// Build and run all tests
    pub fn run(self) -> Result<TestResult, RunnerError> {
        self.build().run_all()
    }
}

/// Convenience function: create a runner builder for a directory
pub fn run(dir: impl Into<PathBuf>) -> TestRunnerBuilder {
    TestRunnerBuilder::new(dir)
}

/// Run script files and integrate with `#[test]` by panicking on failure.
///
/// Usage in cargo tests:
/// ```rust,ignore
/// #[test]
/// fn test_scripts() {
///     emx_script::run_and_assert("tests/testdata");
/// }
/// ```
pub fn run_and_assert(dir: impl Into<PathBuf>) {
    run_and_assert_with(dir, |_| {});
}

/// Like `run_and_assert` but allows engine customization.
pub fn run_and_assert_with(dir: impl Into<PathBuf>, customize: impl FnOnce(&mut Engine)) {
    let mut engine = Engine::new();
    customize(&mut engine);

    let config = RunConfig::from_env(dir).unwrap_or_else(|e| panic!("{}", e));
    let verbose = config.verbose;
    let runner = TestRunner::with_engine(engine, config);
    let result = runner.run_all().unwrap_or_else(|e| panic!("failed to run tests: {}", e));

    for case in &result.cases {
        if case.skipped {
            eprintln!("SKIP  {}: {}", case.name, case.error.as_deref().unwrap_or(""));
        } else if case.passed {
            eprintln!("PASS  {} ({}ms)", case.name, case.duration.as_millis());
            if case.updated > 0 {
                eprintln!("  updated {} section(s) in {}", case.updated, case.file.display());
            }
        } else {
            eprintln!("FAIL  {}", case.name);
            if let Some(ref err) = case.error {
                eprintln!("  {}", err);
            }
        }
        if (verbose || (!case.passed && !case.skipped)) && !case.log.is_empty() {
            eprintln!("  --- log ---");
            for line in case.log.lines() {
                eprintln!("  {}", line);
            }
        }
        if !case.passed {
            if let Some(ref wd) = case.workdir {
                eprintln!("  workdir: {}", wd.display());
            }
        }
    }

    eprintln!("\n{}", result.summary());

    if !result.all_passed() {
        panic!("{} test(s) failed", result.failed_count());
    }
}
