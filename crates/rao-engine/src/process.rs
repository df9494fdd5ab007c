//! ---
//! rao_section: "05-case-dispatch"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Optimisation engine dispatch and process adapter."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
//! External-process engine adapter.
//!
//! Each run gets its own directory under `engine.working_dir` holding
//! `case.json`, `parameters.json`, the combined engine output in `engine.log`
//! and, on success, `result.json`. File locations are passed to the command
//! through environment variables.
//!
//! Cancelling a run kills the process but remembers the run, so a later poll
//! still reports a `result.json` the engine managed to write before the kill.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use parking_lot::Mutex;
use rao_common::EngineConfig;
use rao_model::OptimizationResult;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{OptimizationEngine, RunHandle, RunStatus, SubmittedCase};
use crate::errors::EngineFault;

pub const CASE_FILE: &str = "case.json";
pub const PARAMETERS_FILE: &str = "parameters.json";
pub const RESULT_FILE: &str = "result.json";
pub const LOG_FILE: &str = "engine.log";

pub const ENV_CASE_FILE: &str = "RAO_CASE_FILE";
pub const ENV_PARAMETERS_FILE: &str = "RAO_PARAMETERS_FILE";
pub const ENV_RESULT_FILE: &str = "RAO_RESULT_FILE";
pub const ENV_CASE_ID: &str = "RAO_CASE_ID";
pub const ENV_TIMEOUT_SECS: &str = "RAO_TIMEOUT_SECS";

const LOG_TAIL_LINES: usize = 20;

/// Engine process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineExit {
    Success,
    InvalidInput,
    SolverError,
    Segfault,
    Other(i32),
    Signalled,
}

impl EngineExit {
    pub fn from_raw(code: Option<i32>) -> Self {
        match code {
            Some(0) => EngineExit::Success,
            Some(1) => EngineExit::InvalidInput,
            Some(2) => EngineExit::SolverError,
            Some(139) => EngineExit::Segfault,
            Some(other) => EngineExit::Other(other),
            None => EngineExit::Signalled,
        }
    }

    fn fault(self, log_tail: String) -> Option<EngineFault> {
        match self {
            EngineExit::Success => None,
            EngineExit::InvalidInput => Some(EngineFault::InvalidInput(log_tail)),
            EngineExit::SolverError => Some(EngineFault::Solver(log_tail)),
            EngineExit::Segfault => Some(EngineFault::Crashed(format!("segmentation fault; {log_tail}"))),
            EngineExit::Signalled => Some(EngineFault::Crashed(format!("terminated by signal; {log_tail}"))),
            EngineExit::Other(code) => Some(EngineFault::Solver(format!("exit code {code}; {log_tail}"))),
        }
    }
}

type RunTask = JoinHandle<Result<OptimizationResult, EngineFault>>;

#[derive(Debug)]
enum RunState {
    Live(RunTask),
    /// Process killed; the run directory is read once by the next poll.
    Cancelled,
}

/// Runs the configured command once per submitted case.
pub struct ProcessEngine {
    config: EngineConfig,
    runs: Mutex<HashMap<Uuid, RunState>>,
}

impl std::fmt::Debug for ProcessEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessEngine")
            .field("command", &self.config.command)
            .field("runs", &self.runs.lock().len())
            .finish()
    }
}

impl ProcessEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding the files of one run.
    pub fn run_dir(&self, handle: &RunHandle) -> PathBuf {
        self.config
            .working_dir
            .join(handle.case_id.key())
            .join(format!("attempt-{}-{}", handle.attempt, handle.run_id.simple()))
    }

    async fn prepare(&self, case: &SubmittedCase, run_dir: &Path) -> Result<(), EngineFault> {
        let unavailable = |what: &str, err: std::io::Error| {
            EngineFault::Unavailable(format!("{what} {}: {err}", run_dir.display()))
        };
        tokio::fs::create_dir_all(run_dir)
            .await
            .map_err(|err| unavailable("cannot create run directory", err))?;
        let case_bytes = case
            .case
            .to_json_bytes()
            .map_err(|err| EngineFault::InvalidInput(format!("case serialisation failed: {err}")))?;
        tokio::fs::write(run_dir.join(CASE_FILE), case_bytes)
            .await
            .map_err(|err| unavailable("cannot write case file in", err))?;
        tokio::fs::write(run_dir.join(PARAMETERS_FILE), case.parameters.canonical_bytes())
            .await
            .map_err(|err| unavailable("cannot write parameters file in", err))?;
        Ok(())
    }

    /// Status of a killed run: whatever `result.json` it left behind.
    async fn cancelled_outcome(&self, handle: &RunHandle) -> RunStatus {
        let path = self.run_dir(handle).join(RESULT_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => match OptimizationResult::from_json_slice(&bytes) {
                Ok(result) => RunStatus::Finished(result),
                Err(err) => RunStatus::Faulted(EngineFault::Protocol(format!(
                    "unreadable {RESULT_FILE} from cancelled run: {err}"
                ))),
            },
            Err(_) => RunStatus::Faulted(EngineFault::Crashed(format!(
                "run cancelled before writing {RESULT_FILE}"
            ))),
        }
    }

    fn command(&self, case: &SubmittedCase, run_dir: &Path) -> Result<Command, EngineFault> {
        let log = std::fs::File::create(run_dir.join(LOG_FILE))
            .map_err(|err| EngineFault::Unavailable(format!("cannot open engine log: {err}")))?;
        let log_err = log
            .try_clone()
            .map_err(|err| EngineFault::Unavailable(format!("cannot share engine log: {err}")))?;

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .current_dir(run_dir)
            .envs(&self.config.env)
            .env(ENV_CASE_FILE, run_dir.join(CASE_FILE))
            .env(ENV_PARAMETERS_FILE, run_dir.join(PARAMETERS_FILE))
            .env(ENV_RESULT_FILE, run_dir.join(RESULT_FILE))
            .env(ENV_CASE_ID, &case.case.id)
            .env(ENV_TIMEOUT_SECS, case.timeout.as_secs().to_string())
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err)
            .kill_on_drop(true);
        Ok(command)
    }
}

#[async_trait]
impl OptimizationEngine for ProcessEngine {
    fn name(&self) -> &str {
        &self.config.command
    }

    async fn submit(&self, case: &SubmittedCase) -> Result<RunHandle, EngineFault> {
        let handle = RunHandle::new(case.case_id.clone(), case.attempt);
        let run_dir = std::path::absolute(self.run_dir(&handle)).map_err(|err| {
            EngineFault::Unavailable(format!("cannot resolve engine working directory: {err}"))
        })?;
        self.prepare(case, &run_dir).await?;
        let child = self.command(case, &run_dir)?.spawn().map_err(|err| {
            EngineFault::Unavailable(format!("failed to start '{}': {err}", self.config.command))
        })?;
        info!(
            case = %handle.case_id,
            attempt = handle.attempt,
            run = %handle.run_id,
            pid = child.id().unwrap_or_default(),
            dir = %run_dir.display(),
            "engine process started"
        );
        let task = tokio::spawn(await_exit(child, run_dir));
        self.runs.lock().insert(handle.run_id, RunState::Live(task));
        Ok(handle)
    }

    async fn poll(&self, handle: &RunHandle) -> Result<RunStatus, EngineFault> {
        let state = {
            let mut runs = self.runs.lock();
            let running = matches!(
                runs.get(&handle.run_id),
                Some(RunState::Live(task)) if !task.is_finished()
            );
            if running {
                return Ok(RunStatus::Running);
            }
            runs.remove(&handle.run_id)
        };
        let task = match state {
            Some(RunState::Live(task)) => task,
            Some(RunState::Cancelled) => return Ok(self.cancelled_outcome(handle).await),
            None => return Err(EngineFault::UnknownRun(handle.to_string())),
        };
        Ok(match task.await {
            Ok(Ok(result)) => RunStatus::Finished(result),
            Ok(Err(fault)) => RunStatus::Faulted(fault),
            Err(join) => RunStatus::Faulted(EngineFault::Crashed(format!(
                "engine supervisor task failed: {join}"
            ))),
        })
    }

    async fn cancel(&self, handle: &RunHandle) {
        let mut runs = self.runs.lock();
        if let Some(RunState::Live(task)) = runs.get(&handle.run_id) {
            // dropping the child inside the aborted task kills the process
            task.abort();
            runs.insert(handle.run_id, RunState::Cancelled);
            info!(case = %handle.case_id, run = %handle.run_id, "engine process cancelled");
        }
    }
}

async fn await_exit(mut child: Child, run_dir: PathBuf) -> Result<OptimizationResult, EngineFault> {
    let status = child
        .wait()
        .await
        .map_err(|err| EngineFault::Crashed(format!("failed to await engine process: {err}")))?;
    let exit = EngineExit::from_raw(status.code());
    debug!(dir = %run_dir.display(), ?exit, "engine process exited");
    if exit != EngineExit::Success {
        if let Some(fault) = exit.fault(log_tail(&run_dir.join(LOG_FILE)).await) {
            warn!(dir = %run_dir.display(), error = %fault, "engine process failed");
            return Err(fault);
        }
    }
    let bytes = tokio::fs::read(run_dir.join(RESULT_FILE)).await.map_err(|err| {
        EngineFault::Protocol(format!("engine exited cleanly without {RESULT_FILE}: {err}"))
    })?;
    OptimizationResult::from_json_slice(&bytes)
        .map_err(|err| EngineFault::Protocol(format!("unreadable {RESULT_FILE}: {err}")))
}

async fn log_tail(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let lines: Vec<&str> = contents.lines().collect();
            let start = lines.len().saturating_sub(LOG_TAIL_LINES);
            let tail = lines[start..].join("\n");
            if tail.trim().is_empty() {
                "no engine output".to_owned()
            } else {
                tail
            }
        }
        Err(err) => format!("engine log unavailable: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_map_to_faults() {
        assert_eq!(EngineExit::from_raw(Some(0)), EngineExit::Success);
        assert!(EngineExit::Success.fault(String::new()).is_none());
        assert!(matches!(
            EngineExit::from_raw(Some(1)).fault("bad".into()),
            Some(EngineFault::InvalidInput(msg)) if msg == "bad"
        ));
        assert!(matches!(
            EngineExit::from_raw(Some(2)).fault("x".into()),
            Some(EngineFault::Solver(_))
        ));
        assert!(matches!(
            EngineExit::from_raw(Some(139)).fault("x".into()),
            Some(EngineFault::Crashed(_))
        ));
        assert!(matches!(
            EngineExit::from_raw(None).fault("x".into()),
            Some(EngineFault::Crashed(_))
        ));
        assert!(matches!(
            EngineExit::from_raw(Some(42)).fault("x".into()),
            Some(EngineFault::Solver(msg)) if msg.starts_with("exit code 42")
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn log_tail_keeps_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE);
        let body: String = (1..=30).map(|i| format!("line {i}\n")).collect();
        tokio::fs::write(&path, body).await.unwrap();
        let tail = log_tail(&path).await;
        assert!(tail.starts_with("line 11"));
        assert!(tail.ends_with("line 30"));
        assert!(log_tail(&dir.path().join("missing.log"))
            .await
            .starts_with("engine log unavailable"));
    }
}
