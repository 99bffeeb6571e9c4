/// Execution Engine - Abstraction for Code Execution
///
/// **Core Responsibility:**
/// Run one submission in isolation and hand back its raw output.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (Docker container or local process)
/// - Engine does NOT know about the queue or submission records
/// - Engine holds no per-execution state shared across calls
///
/// Outcome rules are the same for every backend: exit code 0 → SUCCESS,
/// non-zero → RUNTIME_ERROR, killed at the deadline → TIME_LIMIT_EXCEEDED.
/// Anything that fails before the program could run is a provisioning error.

use async_trait::async_trait;
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use judgebox_common::config::Config;
use judgebox_common::error::{JudgeError, Result};
use judgebox_common::types::{ExecutionResult, Job};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::container::{sandbox_config, ContainerHandle, ResourceLimits};
use crate::runtime::{all_images, runtime_for};

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Execute one job to completion (or to its deadline)
    async fn execute(&self, job: &Job) -> Result<ExecutionResult>;
}

/// Docker-based execution engine
///
/// Per execution:
/// 1. Resolve image and command from the language
/// 2. Make sure the image is present (pull bounded by its own timeout)
/// 3. Create a container: no network, memory/CPU/pid caps, no TTY
/// 4. Start it and race its exit against the wall-clock deadline
/// 5. Read stdout/stderr once it has stopped
/// 6. Remove it, on every path
///
/// Concurrently running containers are bounded by an admission semaphore.
pub struct DockerEngine {
    docker: Docker,
    limits: ResourceLimits,
    timeout: Duration,
    pull_timeout: Duration,
    max_output_bytes: usize,
    admission: Semaphore,
}

impl DockerEngine {
    pub fn connect(config: &Config) -> anyhow::Result<Self> {
        let timeout = client_timeout(config);
        let docker = match &config.docker_socket {
            Some(socket) => {
                Docker::connect_with_unix(socket, timeout.as_secs(), bollard::API_DEFAULT_VERSION)?
            }
            None => Docker::connect_with_local_defaults()?.with_timeout(timeout),
        };
        Ok(Self::with_docker(docker, config))
    }

    pub fn with_docker(docker: Docker, config: &Config) -> Self {
        Self {
            docker,
            limits: ResourceLimits {
                memory_bytes: config.memory_limit_bytes(),
                nano_cpus: config.nano_cpus(),
                pids_limit: config.pids_limit,
            },
            timeout: config.execution_timeout(),
            pull_timeout: config.image_pull_timeout(),
            max_output_bytes: config.max_output_bytes,
            admission: Semaphore::new(config.max_concurrent_containers),
        }
    }

    #[cfg(test)]
    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        self.docker.ping().await?;
        Ok(())
    }

    /// Pull every runtime image up front so the first submissions don't
    /// pay for a cold cache. Failures are logged, not fatal.
    pub async fn prewarm(&self) {
        for image in all_images() {
            match self.ensure_image_bounded(image).await {
                Ok(()) => tracing::info!(image, "Image ready"),
                Err(e) => tracing::warn!(image, error = %e, "Could not pre-pull image"),
            }
        }
    }

    async fn ensure_image_bounded(&self, image: &str) -> Result<()> {
        match tokio::time::timeout(self.pull_timeout, self.ensure_image(image)).await {
            Ok(result) => result,
            Err(_) => Err(JudgeError::provisioning(
                "pull",
                format!("pulling {} took longer than {:?}", image, self.pull_timeout),
            )),
        }
    }

    /// Ensure Docker image is available (pull if needed)
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        tracing::info!(image, "Pulling image");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| JudgeError::provisioning("pull", e))?;
        }

        Ok(())
    }

    /// Start, wait and collect. Removal is the caller's job.
    async fn run(&self, container: &mut ContainerHandle, job: &Job) -> Result<ExecutionResult> {
        container.start().await?;
        let started = Instant::now();

        match container.wait_with_deadline(self.timeout).await {
            Ok(exit_code) => {
                let elapsed = started.elapsed().as_millis() as u64;
                let (stdout, stderr) = container.output(self.max_output_bytes).await?;
                Ok(ExecutionResult::exited(stdout, stderr, exit_code, elapsed))
            }
            Err(JudgeError::Timeout(limit)) => {
                tracing::warn!(
                    submission_id = %job.submission_id,
                    container_id = %container.id(),
                    state = ?container.state(),
                    timeout_ms = limit.as_millis() as u64,
                    "Execution hit the deadline; container killed"
                );
                Ok(ExecutionResult::time_limit_exceeded(started.elapsed().as_millis() as u64))
            }
            Err(e) => Err(e),
        }
    }
}

/// Per-request timeout for the Docker client. A blocking wait or pull must
/// outlive our own deadlines, or the client error would win the race.
fn client_timeout(config: &Config) -> Duration {
    const MARGIN: Duration = Duration::from_secs(30);
    let longest = config.execution_timeout().max(config.image_pull_timeout());
    // Whole seconds, and never below the client's stock 120s
    Duration::from_secs((longest + MARGIN).as_secs() + 1).max(Duration::from_secs(120))
}

#[async_trait]
impl ExecutionEngine for DockerEngine {
    async fn execute(&self, job: &Job) -> Result<ExecutionResult> {
        let runtime = runtime_for(job.language);

        let _permit = self
            .admission
            .acquire()
            .await
            .map_err(|e| JudgeError::provisioning("admission", e))?;

        self.ensure_image_bounded(runtime.image).await?;

        let config = sandbox_config(&runtime, &job.code, &job.submission_id, self.limits);
        let mut container = ContainerHandle::create(&self.docker, config).await?;

        tracing::debug!(
            submission_id = %job.submission_id,
            container_id = %container.id(),
            image = runtime.image,
            "Container created"
        );

        let outcome = self.run(&mut container, job).await;
        container.remove().await;
        outcome
    }
}
