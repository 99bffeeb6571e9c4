/// One ephemeral sandbox container
///
/// A `ContainerHandle` is owned by exactly one execution call. It is removed
/// explicitly with [`ContainerHandle::remove`]; if the owning future is dropped
/// first, `Drop` hands a forced removal to the runtime so the container still
/// does not outlive the call.

use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::{Stream, StreamExt};
use futures_util::pin_mut;
use judgebox_common::error::{JudgeError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use crate::runtime::Runtime;

pub const SUBMISSION_LABEL: &str = "judgebox.submission";

/// Per-container ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub pids_limit: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Started,
    Exited(i64),
    Killed,
    Removed,
}

/// Container configuration for one submission.
/// No network, no TTY, stdout/stderr captured, memory/CPU/pid caps applied.
pub fn sandbox_config(
    runtime: &Runtime,
    code: &str,
    submission_id: &str,
    limits: ResourceLimits,
) -> Config<String> {
    let mut labels = HashMap::new();
    labels.insert(SUBMISSION_LABEL.to_string(), submission_id.to_string());

    Config {
        image: Some(runtime.image.to_string()),
        cmd: Some(runtime.command(code)),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(false),
        network_disabled: Some(true),
        labels: Some(labels),
        host_config: Some(HostConfig {
            memory: Some(limits.memory_bytes),
            // Same value as memory: no swap on top of the ceiling
            memory_swap: Some(limits.memory_bytes),
            nano_cpus: Some(limits.nano_cpus),
            pids_limit: Some(limits.pids_limit),
            network_mode: Some("none".to_string()),
            readonly_rootfs: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[derive(Debug)]
pub struct ContainerHandle {
    docker: Docker,
    id: String,
    image: String,
    state: ContainerState,
}

impl ContainerHandle {
    pub async fn create(docker: &Docker, config: Config<String>) -> Result<Self> {
        let image = config.image.clone().unwrap_or_default();
        let name = format!("judgebox-{}", uuid::Uuid::new_v4());

        let created = docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| JudgeError::provisioning("create", e))?;

        for warning in &created.warnings {
            tracing::warn!(container_id = %created.id, "{}", warning);
        }

        Ok(Self {
            docker: docker.clone(),
            id: created.id,
            image,
            state: ContainerState::Created,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub async fn start(&mut self) -> Result<()> {
        self.docker
            .start_container(&self.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| JudgeError::provisioning("start", e))?;
        self.state = ContainerState::Started;
        Ok(())
    }

    /// Wait for the container to stop, or kill it once `deadline` elapses.
    /// Returns the exit code, or `JudgeError::Timeout` after a forced kill.
    pub async fn wait_with_deadline(&mut self, deadline: Duration) -> Result<i64> {
        let outcome = race_deadline(wait_for_exit(&self.docker, &self.id), deadline).await;

        match &outcome {
            Ok(code) => {
                self.state = ContainerState::Exited(*code);
            }
            Err(JudgeError::Timeout(_)) => {
                let kill = self
                    .docker
                    .kill_container(&self.id, Some(KillContainerOptions { signal: "SIGKILL" }))
                    .await;
                if let Err(e) = kill {
                    // Usually means it exited right at the deadline; removal is forced anyway
                    tracing::warn!(container_id = %self.id, error = %e, "Kill after deadline failed");
                }
                self.state = ContainerState::Killed;
            }
            Err(_) => {}
        }

        outcome
    }

    /// Read stdout and stderr of a stopped container, each capped at `limit` bytes
    pub async fn output(&self, limit: usize) -> Result<(Vec<u8>, Vec<u8>)> {
        let logs = self.docker.logs(
            &self.id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: false,
                ..Default::default()
            }),
        );

        let (stdout, stderr) = demux_logs(logs, limit)
            .await
            .map_err(|e| JudgeError::provisioning("logs", e))?;

        if stdout.truncated || stderr.truncated {
            tracing::warn!(container_id = %self.id, limit, "Output truncated");
        }

        Ok((stdout.into_inner(), stderr.into_inner()))
    }

    /// Force-remove the container. Always consumes the handle.
    pub async fn remove(mut self) {
        force_remove(&self.docker, &self.id).await;
        self.state = ContainerState::Removed;
    }
}

impl Drop for ContainerHandle {
    fn drop(&mut self) {
        if self.state == ContainerState::Removed {
            return;
        }

        let docker = self.docker.clone();
        let id = std::mem::take(&mut self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(container_id = %id, image = %self.image, "Container handle dropped before removal");
                handle.spawn(async move { force_remove(&docker, &id).await });
            }
            Err(_) => {
                tracing::error!(container_id = %id, "Container dropped outside a runtime and may leak");
            }
        }
    }
}

async fn force_remove(docker: &Docker, id: &str) {
    let options = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };

    match docker.remove_container(id, Some(options)).await {
        Ok(()) => tracing::debug!(container_id = %id, "Container removed"),
        Err(e) => tracing::error!(container_id = %id, error = %e, "Failed to remove container"),
    }
}

async fn wait_for_exit(docker: &Docker, id: &str) -> Result<i64> {
    let stream = docker.wait_container(
        id,
        Some(WaitContainerOptions {
            condition: "not-running",
        }),
    );
    pin_mut!(stream);

    match stream.next().await {
        Some(Ok(response)) => Ok(response.status_code),
        // The daemon reports a non-zero exit as a wait error carrying the code
        Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
        Some(Err(e)) => Err(JudgeError::provisioning("wait", e)),
        None => Err(JudgeError::provisioning("wait", "wait stream closed without a status")),
    }
}

/// Timeout race: whichever of "exited" and "deadline" resolves first wins.
pub async fn race_deadline<F>(exit: F, deadline: Duration) -> Result<i64>
where
    F: Future<Output = Result<i64>>,
{
    tokio::select! {
        code = exit => code,
        _ = tokio::time::sleep(deadline) => Err(JudgeError::Timeout(deadline)),
    }
}

/// Byte buffer that stops growing at a fixed limit
#[derive(Debug)]
pub struct CappedBuffer {
    data: Vec<u8>,
    limit: usize,
    pub truncated: bool,
}

impl CappedBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            truncated: false,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        if bytes.len() > room {
            self.truncated = true;
        }
        self.data.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

/// Split the runtime's framed log stream into stdout and stderr.
/// Each frame arrives already stripped of its header, so multi-chunk and
/// interleaved output is handled frame by frame.
pub async fn demux_logs<S>(
    stream: S,
    limit: usize,
) -> std::result::Result<(CappedBuffer, CappedBuffer), bollard::errors::Error>
where
    S: Stream<Item = std::result::Result<LogOutput, bollard::errors::Error>>,
{
    pin_mut!(stream);
    let mut stdout = CappedBuffer::new(limit);
    let mut stderr = CappedBuffer::new(limit);

    while let Some(frame) = stream.next().await {
        match frame? {
            LogOutput::StdOut { message } => stdout.push(&message),
            LogOutput::StdErr { message } => stderr.push(&message),
            // Only produced with a TTY, which sandboxes never get
            LogOutput::Console { message } => stdout.push(&message),
            LogOutput::StdIn { .. } => {}
        }
    }

    Ok((stdout, stderr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::runtime_for;
    use bytes::Bytes;
    use futures_util::stream;
    use judgebox_common::types::Language;

    fn limits() -> ResourceLimits {
        ResourceLimits {
            memory_bytes: 256 * 1024 * 1024,
            nano_cpus: 500_000_000,
            pids_limit: 50,
        }
    }

    #[test]
    fn test_sandbox_config_isolation() {
        let runtime = runtime_for(Language::Python);
        let config = sandbox_config(&runtime, "print(1)", "sub-9", limits());

        assert_eq!(config.image.as_deref(), Some("python:3.11-alpine"));
        assert_eq!(config.network_disabled, Some(true));
        assert_eq!(config.tty, Some(false));
        assert_eq!(config.attach_stdout, Some(true));
        assert_eq!(config.attach_stderr, Some(true));
        assert_eq!(
            config.labels.as_ref().unwrap().get(SUBMISSION_LABEL).map(String::as_str),
            Some("sub-9")
        );

        let host = config.host_config.unwrap();
        assert_eq!(host.memory, Some(256 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.nano_cpus, Some(500_000_000));
        assert_eq!(host.pids_limit, Some(50));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.readonly_rootfs, Some(false));
    }

    #[test]
    fn test_sandbox_config_command() {
        let runtime = runtime_for(Language::Ruby);
        let config = sandbox_config(&runtime, "puts 1", "x", limits());
        assert_eq!(
            config.cmd,
            Some(vec!["ruby".to_string(), "-e".to_string(), "puts 1".to_string()])
        );
    }

    #[tokio::test]
    async fn test_race_exit_wins() {
        let code = race_deadline(async { Ok(3) }, Duration::from_secs(5)).await.unwrap();
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn test_race_deadline_wins() {
        let never = std::future::pending::<Result<i64>>();
        let err = race_deadline(never, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, JudgeError::Timeout(d) if d == Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_race_propagates_wait_errors() {
        let failing = async { Err(JudgeError::provisioning("wait", "daemon went away")) };
        let err = race_deadline(failing, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, JudgeError::Provisioning { stage: "wait", .. }));
    }

    #[tokio::test]
    async fn test_demux_multiple_frames() {
        let frames = vec![
            Ok(LogOutput::StdOut { message: Bytes::from_static(b"hel") }),
            Ok(LogOutput::StdErr { message: Bytes::from_static(b"warn\n") }),
            Ok(LogOutput::StdOut { message: Bytes::from_static(b"lo\n") }),
            Ok(LogOutput::StdOut { message: Bytes::from_static(b"bye\n") }),
        ];

        let (stdout, stderr) = demux_logs(stream::iter(frames), 1024).await.unwrap();

        assert_eq!(stdout.into_inner(), b"hello\nbye\n");
        assert_eq!(stderr.into_inner(), b"warn\n");
    }

    #[tokio::test]
    async fn test_demux_keeps_short_output_intact() {
        // A single tiny frame must not lose leading bytes
        let frames = vec![Ok(LogOutput::StdOut { message: Bytes::from_static(b"hi\n") })];
        let (stdout, stderr) = demux_logs(stream::iter(frames), 1024).await.unwrap();

        assert_eq!(stdout.into_inner(), b"hi\n");
        assert!(stderr.into_inner().is_empty());
    }

    #[tokio::test]
    async fn test_demux_truncates_at_limit() {
        let frames = vec![
            Ok(LogOutput::StdOut { message: Bytes::from_static(b"0123456789") }),
            Ok(LogOutput::StdOut { message: Bytes::from_static(b"abcdef") }),
        ];

        let (stdout, _) = demux_logs(stream::iter(frames), 12).await.unwrap();

        assert!(stdout.truncated);
        assert_eq!(stdout.into_inner(), b"0123456789ab");
    }

    #[test]
    fn test_capped_buffer_exact_fit() {
        let mut buffer = CappedBuffer::new(4);
        buffer.push(b"abcd");
        assert!(!buffer.truncated);
        buffer.push(b"");
        assert!(!buffer.truncated);
        buffer.push(b"e");
        assert!(buffer.truncated);
        assert_eq!(buffer.into_inner(), b"abcd");
    }
}
