//! Isolated execution contexts for external analysis tools.
//!
//! Every tool invocation and every proof-of-concept run goes through a
//! [`Sandbox`]: an ephemeral, network-restricted container with enforced
//! memory/CPU ceilings. Teardown is guaranteed on every exit path, including
//! timeout and cancellation. Partial stdout captured before a timeout is
//! still returned so adapters can salvage findings already reported.

use crate::core::CancelToken;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Description of one sandboxed command.
#[derive(Debug, Clone)]
pub struct ExecSpec {
    pub image: String,
    pub command: Vec<String>,
    /// Host path -> container path bind mounts.
    pub mounts: Vec<(PathBuf, String)>,
    pub env: Vec<(String, String)>,
    pub workdir: String,
    pub memory_mb: u64,
    pub cpus: f64,
}

impl ExecSpec {
    pub fn new(image: &str, command: Vec<String>) -> Self {
        Self {
            image: image.to_string(),
            command,
            mounts: Vec::new(),
            env: Vec::new(),
            workdir: "/contracts".to_string(),
            memory_mb: 4096,
            cpus: 2.0,
        }
    }

    pub fn mount(mut self, host: PathBuf, container: &str) -> Self {
        self.mounts.push((host, container.to_string()));
        self
    }

    pub fn env_var(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = memory_mb;
        self
    }
}

/// Outcome of a sandboxed command. `timed_out` executions still carry
/// whatever output was captured before termination.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ExecOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run `spec` to completion, timeout, or cancellation. Returns `Err` only
    /// for environment-level faults (sandbox startup failure, cancellation);
    /// a non-zero tool exit or timeout is a normal `ExecOutput`.
    async fn execute(
        &self,
        spec: &ExecSpec,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecOutput>;
}

/// Docker-backed sandbox. Containers run with `--network none`, hard memory
/// and CPU limits, and a unique name so teardown can always target them.
pub struct ContainerSandbox {
    name_prefix: String,
}

impl ContainerSandbox {
    pub fn new() -> Self {
        Self {
            name_prefix: "vulnhunter".to_string(),
        }
    }

    fn container_name(&self, image: &str) -> String {
        let tag = image
            .split(['/', ':'])
            .next()
            .unwrap_or("tool")
            .to_string();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        format!("{}-{}-{}", self.name_prefix, tag, nanos)
    }

    fn build_command(&self, spec: &ExecSpec, name: &str) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("run")
            .arg("--rm")
            .arg("--name")
            .arg(name)
            .arg("--network")
            .arg("none")
            .arg("--memory")
            .arg(format!("{}m", spec.memory_mb))
            .arg("--cpus")
            .arg(format!("{}", spec.cpus))
            .arg("-w")
            .arg(&spec.workdir);
        for (host, container) in &spec.mounts {
            cmd.arg("-v")
                .arg(format!("{}:{}", host.display(), container));
        }
        for (key, value) in &spec.env {
            cmd.arg("-e").arg(format!("{key}={value}"));
        }
        cmd.arg(&spec.image);
        cmd.args(&spec.command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Best-effort forced removal; `--rm` handles the clean-exit path but a
    /// killed container can linger.
    async fn remove_container(name: &str) {
        let result = Command::new("docker")
            .args(["rm", "-f", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            warn!(container = name, error = %e, "container teardown failed");
        }
    }
}

impl Default for ContainerSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sandbox for ContainerSandbox {
    async fn execute(
        &self,
        spec: &ExecSpec,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecOutput> {
        let name = self.container_name(&spec.image);
        let start = Instant::now();

        let mut child = self
            .build_command(spec, &name)
            .spawn()
            .with_context(|| format!("failed to start sandbox for image {}", spec.image))?;

        let mut stdout_pipe = child.stdout.take().context("sandbox stdout unavailable")?;
        let mut stderr_pipe = child.stderr.take().context("sandbox stderr unavailable")?;

        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stdout_pipe.read_to_string(&mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr_pipe.read_to_string(&mut buf).await;
            buf
        });

        let mut timed_out = false;
        let mut exit_code = None;

        tokio::select! {
            status = child.wait() => {
                exit_code = status.ok().and_then(|s| s.code());
            }
            _ = tokio::time::sleep(timeout) => {
                timed_out = true;
                let _ = child.start_kill();
                Self::remove_container(&name).await;
                let _ = child.wait().await;
            }
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                Self::remove_container(&name).await;
                let _ = child.wait().await;
                return Err(crate::error::PipelineError::Cancelled.into());
            }
        }

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let duration = start.elapsed();

        debug!(
            image = %spec.image,
            ?exit_code,
            timed_out,
            duration_ms = duration.as_millis() as u64,
            "sandbox execution finished"
        );

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
            duration,
            timed_out,
        })
    }
}
