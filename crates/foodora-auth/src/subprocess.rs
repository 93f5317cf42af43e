//! Helper process plumbing
//!
//! The browser login and Chrome cookie helpers are external programs with a
//! fixed contract: a JSON request on stdin, a JSON result written to the file
//! named by `ORDERCLI_OUTPUT_PATH`. Stdout is discarded and stderr is passed
//! through so the helper can talk to the user (keychain prompts, browser
//! progress).
//!
//! The child is killed when the returned future is dropped, so racing a run
//! against a cancellation signal needs no extra cleanup.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::constants::HELPER_OUTPUT_ENV;
use crate::error::{Error, Result};

/// Program and fixed arguments of a helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl HelperCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// Exit status and output file contents of a finished helper.
#[derive(Debug)]
pub(crate) struct HelperRun {
    pub status: ExitStatus,
    /// `None` when the helper did not write the output file.
    pub output: Option<Vec<u8>>,
}

pub(crate) async fn run_helper<I: Serialize>(
    helper: &'static str,
    command: &HelperCommand,
    input: &I,
    timeout: Duration,
) -> Result<HelperRun> {
    let payload = serde_json::to_vec(input)
        .map_err(|e| Error::helper(helper, format!("encoding request: {e}")))?;

    let scratch = tempfile::Builder::new()
        .prefix("ordercli-helper-")
        .tempdir()
        .map_err(|e| Error::Io(format!("creating helper scratch dir: {e}")))?;
    let out_path = scratch.path().join("out.json");

    debug!(helper, program = %command.program, "starting helper");
    let mut child = tokio::process::Command::new(&command.program)
        .args(&command.args)
        .env(HELPER_OUTPUT_ENV, &out_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::helper(helper, format!("starting {}: {e}", command.program)))?;

    if let Some(mut stdin) = child.stdin.take() {
        // A helper that exits without reading stdin closes the pipe; its exit
        // status and output file tell the real story.
        if let Err(e) = stdin.write_all(&payload).await {
            debug!(helper, error = %e, "helper closed stdin early");
        }
        drop(stdin);
    }

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => {
            status.map_err(|e| Error::helper(helper, format!("waiting for helper: {e}")))?
        }
        Err(_) => {
            return Err(Error::helper(
                helper,
                format!("timed out after {}s", timeout.as_secs()),
            ));
        }
    };

    let output = tokio::fs::read(&out_path).await.ok();
    debug!(helper, %status, wrote_output = output.is_some(), "helper finished");
    Ok(HelperRun { status, output })
}


#[cfg(all(test, unix))]
mod tests {
    use super::test_support::scripted_helper;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn passes_stdin_and_reads_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let request = dir.path().join("request.json");
        let helper = scripted_helper(r#"{"ok":true}"#, 0, Some(&request));
        let run = run_helper("test helper", &helper, &json!({"x": 1}), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(run.status.success());
        assert_eq!(run.output.as_deref(), Some(&br#"{"ok":true}"#[..]));

        let sent: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&request).unwrap()).unwrap();
        assert_eq!(sent, json!({"x": 1}));
    }

    #[tokio::test]
    async fn missing_output_file_is_none() {
        let helper = HelperCommand::new("sh", vec!["-c".into(), "exit 3".into()]);
        let run = run_helper("test helper", &helper, &json!({}), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(run.status.code(), Some(3));
        assert!(run.output.is_none());
    }

    #[tokio::test]
    async fn slow_helper_times_out() {
        let helper = HelperCommand::new("sh", vec!["-c".into(), "sleep 5".into()]);
        let err = run_helper("test helper", &helper, &json!({}), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"), "got {err}");
    }

    #[tokio::test]
    async fn unknown_program_is_helper_error() {
        let helper = HelperCommand::new("/nonexistent/ordercli-helper", vec![]);
        let err = run_helper("test helper", &helper, &json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Helper { helper: "test helper", .. }));
    }
}
