use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use super::{BridgeError, CommandOutput, CommandResult};

/// Run one external program and capture its output.
///
/// Spawns exactly one child process. `stdout` and `stderr` are drained
/// concurrently with waiting for exit so a chatty child cannot block on a
/// full pipe. If the process does not exit within `timeout` it is killed and
/// [`BridgeError::Timeout`] is returned. A non-zero exit status becomes
/// [`BridgeError::Exit`]. Nothing is retried here.
pub async fn run_command(program: &str, args: &[String], timeout: Duration) -> CommandResult {
    let start = Instant::now();

    tracing::debug!(program, args = %args.join(" "), "spawning command");

    let mut child = Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| BridgeError::Spawn {
            program: program.to_owned(),
            source,
        })?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let read_stdout = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stdout_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };

    let read_stderr = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stderr_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };

    let waited = tokio::time::timeout(timeout, async {
        tokio::join!(child.wait(), read_stdout, read_stderr)
    })
    .await;

    match waited {
        Ok((Ok(status), stdout, stderr)) => {
            let duration_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);
            let exit_code = status.code();

            tracing::debug!(program, ?exit_code, duration_ms, "command finished");

            if !status.success() {
                return Err(BridgeError::Exit {
                    program: program.to_owned(),
                    code: exit_code,
                    stderr: stderr.trim().to_owned(),
                });
            }

            Ok(CommandOutput {
                stdout,
                stderr,
                exit_code,
                duration_ms,
            })
        }
        Ok((Err(source), _, _)) => Err(BridgeError::Spawn {
            program: program.to_owned(),
            source,
        }),
        Err(_) => {
            let _ = child.kill().await;
            Err(BridgeError::Timeout {
                program: program.to_owned(),
                timeout,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[tokio::test]
    async fn captures_stdout_on_success() {
        let output = run_command("echo", &args(&["hello device"]), Duration::from_secs(5))
            .await
            .expect("echo should succeed");

        assert_eq!(output.exit_code, Some(0));
        assert!(
            output.stdout.contains("hello device"),
            "unexpected stdout: {:?}",
            output.stdout
        );
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let err = run_command("false", &[], Duration::from_secs(5))
            .await
            .expect_err("false should fail");

        match err {
            BridgeError::Exit { code, .. } => assert_eq!(code, Some(1)),
            other => panic!("expected Exit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exit_error_carries_stderr() {
        let err = run_command(
            "sh",
            &args(&["-c", "echo 'error: device offline' >&2; exit 1"]),
            Duration::from_secs(5),
        )
        .await
        .expect_err("should fail");

        assert!(
            err.to_string().contains("device offline"),
            "stderr should be in the message, got: {err}"
        );
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let err = run_command("hookfleet_no_such_program_test", &[], Duration::from_secs(5))
            .await
            .expect_err("should fail to spawn");

        assert!(matches!(err, BridgeError::Spawn { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let started = Instant::now();
        let err = run_command("sleep", &args(&["30"]), Duration::from_millis(300))
            .await
            .expect_err("sleep should time out");

        assert!(matches!(err, BridgeError::Timeout { .. }), "got {err:?}");
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "timeout should fire well before the command finishes"
        );
    }

    #[tokio::test]
    async fn large_output_does_not_deadlock() {
        let output = run_command(
            "sh",
            &args(&[
                "-c",
                "i=0; while [ $i -lt 50000 ]; do echo 1234567890; i=$((i+1)); done",
            ]),
            Duration::from_secs(20),
        )
        .await
        .expect("should complete");

        assert!(output.stdout.len() >= 500_000);
    }
}
