/// Degraded local-process backend
///
/// Spawns the interpreter directly on the worker host. Same deadline and
/// same outcome rules as the container engine, but no memory, CPU, pid or
/// network isolation. Never point this at untrusted multi-tenant input.

use async_trait::async_trait;
use judgebox_common::error::{JudgeError, Result};
use judgebox_common::types::{ExecutionResult, Job};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::container::CappedBuffer;
use crate::engine::ExecutionEngine;
use crate::runtime::runtime_for;

pub struct LocalEngine {
    timeout: Duration,
    max_output_bytes: usize,
}

impl LocalEngine {
    pub fn new(timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            timeout,
            max_output_bytes,
        }
    }
}

#[async_trait]
impl ExecutionEngine for LocalEngine {
    async fn execute(&self, job: &Job) -> Result<ExecutionResult> {
        let argv = runtime_for(job.language).command(&job.code);
        run_process(&argv, self.timeout, self.max_output_bytes).await
    }
}

/// Run `argv` as a child process, killing it if `deadline` elapses first
pub async fn run_process(argv: &[String], deadline: Duration, limit: usize) -> Result<ExecutionResult> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| JudgeError::provisioning("spawn", "empty command"))?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| JudgeError::provisioning("spawn", e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| JudgeError::provisioning("spawn", "stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| JudgeError::provisioning("spawn", "stderr not captured"))?;

    let started = Instant::now();

    let collect = async {
        tokio::try_join!(
            read_capped(stdout, limit),
            read_capped(stderr, limit),
            child.wait()
        )
    };
    let outcome = tokio::time::timeout(deadline, collect).await;

    match outcome {
        Ok(Ok((stdout, stderr, status))) => {
            let elapsed = started.elapsed().as_millis() as u64;
            // Killed by a signal: no exit code, reported as a runtime error
            let exit_code = status.code().map(i64::from).unwrap_or(-1);
            Ok(ExecutionResult::exited(
                stdout.into_inner(),
                stderr.into_inner(),
                exit_code,
                elapsed,
            ))
        }
        Ok(Err(e)) => Err(JudgeError::provisioning("wait", e)),
        Err(_) => {
            let elapsed = started.elapsed().as_millis() as u64;
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to kill timed-out process");
            }
            Ok(ExecutionResult::time_limit_exceeded(elapsed))
        }
    }
}

/// Drain a pipe to EOF, keeping at most `limit` bytes. Reading continues
/// past the cap so the child never blocks on a full pipe.
async fn read_capped<R>(mut pipe: R, limit: usize) -> std::io::Result<CappedBuffer>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = CappedBuffer::new(limit);
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buffer);
        }
        buffer.push(&chunk[..n]);
    }
}
