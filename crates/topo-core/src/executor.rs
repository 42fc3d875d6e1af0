//! Invocation of the external action executor.
//!
//! The executor is an opaque binary. It receives the action on its command
//! line, does its work, and reports success through its exit code. Its
//! stdout and stderr are captured together for the agent's log. There is no
//! timeout: a partially applied administrative action is worse than an agent
//! that waits.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::error::{Result, TopoError};

/// Everything the executor is told about one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionInvocation {
    pub action: String,
    pub action_path: String,
    pub action_guid: String,
    pub mycnf_path: PathBuf,
    pub log_destination: PathBuf,
}

impl ActionInvocation {
    pub fn args(&self) -> Vec<OsString> {
        vec![
            "-action".into(),
            self.action.clone().into(),
            "-action-node".into(),
            self.action_path.clone().into(),
            "-action-guid".into(),
            self.action_guid.clone().into(),
            "-mycnf-path".into(),
            self.mycnf_path.clone().into_os_string(),
            "-logfile".into(),
            self.log_destination.clone().into_os_string(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Interleaved stdout and stderr.
    pub output: String,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Run one action to completion. `Err` means the executor could not be
    /// run at all; a failed action is an `Ok` outcome with a nonzero code.
    async fn execute(&self, invocation: &ActionInvocation) -> Result<ExecOutcome>;
}

// ---------------------------------------------------------------------------
// ProcessExecutor
// ---------------------------------------------------------------------------

/// Runs the executor binary as a child process.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    binary: PathBuf,
}

impl ProcessExecutor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl ActionExecutor for ProcessExecutor {
    async fn execute(&self, invocation: &ActionInvocation) -> Result<ExecOutcome> {
        let mut child = Command::new(&self.binary)
            .args(invocation.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TopoError::ExecutorSpawn {
                binary: self.binary.display().to_string(),
                source,
            })?;

        let combined = Arc::new(Mutex::new(String::new()));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(collect_output(stdout, Arc::clone(&combined))));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(collect_output(stderr, Arc::clone(&combined))));
        }

        let status = child.wait().await?;
        for reader in readers {
            let _ = reader.await;
        }

        let output = combined
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default();
        Ok(ExecOutcome {
            exit_code: status.code(),
            output,
        })
    }
}

/// Append every line the child writes to `buf`. Reads raw bytes until EOF so
/// the pipe stays open for as long as the child runs, whatever it prints.
async fn collect_output<R>(reader: R, buf: Arc<Mutex<String>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if let Ok(mut b) = buf.lock() {
                    b.push_str(&String::from_utf8_lossy(&line));
                    if !line.ends_with(b"\n") {
                        b.push('\n');
                    }
                }
            }
            Err(_) => {
                let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation() -> ActionInvocation {
        ActionInvocation {
            action: "Ping".into(),
            action_path: "/zk/c1/vt/tablets/0000000007/action/0000000001".into(),
            action_guid: "guid-1".into(),
            mycnf_path: PathBuf::from("/etc/my.cnf"),
            log_destination: PathBuf::from("/dev/stderr"),
        }
    }

    #[test]
    fn args_follow_executor_flag_order() {
        let args: Vec<String> = invocation()
            .args()
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        assert_eq!(
            args,
            vec![
                "-action",
                "Ping",
                "-action-node",
                "/zk/c1/vt/tablets/0000000007/action/0000000001",
                "-action-guid",
                "guid-1",
                "-mycnf-path",
                "/etc/my.cnf",
                "-logfile",
                "/dev/stderr",
            ]
        );
    }

    #[tokio::test]
    async fn captures_output_of_successful_run() {
        let outcome = ProcessExecutor::new("echo")
            .execute(&invocation())
            .await
            .unwrap();
        assert!(outcome.success());
        assert!(outcome.output.contains("-action-guid guid-1"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_outcome_not_an_error() {
        let outcome = ProcessExecutor::new("false")
            .execute(&invocation())
            .await
            .unwrap();
        assert!(!outcome.success());
        assert_eq!(outcome.exit_code, Some(1));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let err = ProcessExecutor::new("/nonexistent/tabletd/vtaction")
            .execute(&invocation())
            .await
            .unwrap_err();
        assert!(matches!(err, TopoError::ExecutorSpawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn binary_output_does_not_cut_the_run_short() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("vtaction");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             printf 'bin\\377ary\\n'\n\
             i=0\n\
             while [ $i -lt 20000 ]; do echo \"line $i\"; i=$((i+1)); done\n\
             echo last >&2\n\
             touch \"$(dirname \"$0\")/finished\"\n\
             exit 0\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let outcome = ProcessExecutor::new(&script)
            .execute(&invocation())
            .await
            .unwrap();
        assert!(outcome.success(), "exit: {:?}", outcome.exit_code);
        assert!(dir.path().join("finished").exists());
        assert!(outcome.output.contains("bin\u{FFFD}ary"));
        assert!(outcome.output.contains("line 19999\n"));
        assert!(outcome.output.contains("last\n"));
    }
}
