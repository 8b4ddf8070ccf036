//! Process-level test harness for the `tg` binary.
//!
//! Each run executes the real binary in an isolated temp workspace and
//! captures a per-invocation log file for post-mortem inspection.

use assert_cmd::Command;
use std::ffi::OsStr;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};
use tempfile::TempDir;

#[derive(Debug)]
pub struct TgRun {
    pub stdout: String,
    pub stderr: String,
    pub status: std::process::ExitStatus,
    pub duration: Duration,
    pub log_path: PathBuf,
}

impl TgRun {
    pub fn exit_code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    pub fn assert_success(&self, context: &str) {
        assert!(
            self.status.success(),
            "{context}: expected success, got {:?}\nstdout:\n{}\nstderr:\n{}",
            self.status.code(),
            self.stdout,
            self.stderr
        );
    }

    pub fn assert_exit_code(&self, expected: i32, context: &str) {
        assert_eq!(
            self.exit_code(),
            expected,
            "{context}: expected exit code {expected}\nstdout:\n{}\nstderr:\n{}",
            self.stdout,
            self.stderr
        );
    }
}

pub struct TgWorkspace {
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub log_dir: PathBuf,
}

impl TgWorkspace {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path().to_path_buf();
        let log_dir = root.join("logs");
        fs::create_dir_all(&log_dir).expect("log dir");
        Self {
            temp_dir,
            root,
            log_dir,
        }
    }

    /// Create a workspace with `tg init` already run.
    pub fn initialized() -> Self {
        let ws = Self::new();
        run_tg(&ws, ["init"], "setup_init").assert_success("tg init");
        ws
    }

    pub fn tangle_dir(&self) -> PathBuf {
        self.root.join(".tangle")
    }

    pub fn jsonl_path(&self) -> PathBuf {
        self.tangle_dir().join("issues.jsonl")
    }

    pub fn db_path(&self) -> PathBuf {
        self.tangle_dir().join("tangle.db")
    }

    /// Create an issue and return its assigned ID.
    pub fn create_issue(&self, title: &str) -> String {
        let run = run_tg(self, ["create", title, "--silent"], "setup_create");
        run.assert_success("tg create");
        run.stdout.trim().to_string()
    }
}

pub fn run_tg<I, S>(workspace: &TgWorkspace, args: I, label: &str) -> TgRun
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    run_tg_with_env(
        workspace,
        args,
        std::iter::empty::<(String, String)>(),
        label,
    )
}

pub fn run_tg_with_env<I, S, E, K, V>(
    workspace: &TgWorkspace,
    args: I,
    env_vars: E,
    label: &str,
) -> TgRun
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
    E: IntoIterator<Item = (K, V)>,
    K: AsRef<OsStr>,
    V: AsRef<OsStr>,
{
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tg"));
    cmd.current_dir(&workspace.root);
    cmd.args(args);
    cmd.env("NO_COLOR", "1");
    cmd.env_remove("RUST_LOG");
    cmd.env("RUST_BACKTRACE", "1");
    cmd.env("HOME", &workspace.root);
    cmd.env("TANGLE_ACTOR", "test-actor");
    cmd.env_remove("TANGLE_DIR");
    cmd.env_remove("TANGLE_JSONL");
    cmd.envs(env_vars);

    let start = Instant::now();
    let output = cmd.output().expect("run tg");
    let duration = start.elapsed();

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let log_path = workspace.log_dir.join(format!("{label}.log"));
    let log_body = format!(
        "label: {label}\nstarted: {:?}\nduration: {:?}\nstatus: {}\nargs: {:?}\ncwd: {}\n\nstdout:\n{}\n\nstderr:\n{}\n",
        SystemTime::now(),
        duration,
        output.status,
        cmd.get_args().collect::<Vec<_>>(),
        workspace.root.display(),
        stdout,
        stderr
    );
    fs::write(&log_path, log_body).expect("write log");

    TgRun {
        stdout,
        stderr,
        status: output.status,
        duration,
        log_path,
    }
}
