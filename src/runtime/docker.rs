//! Docker engine implementation
//!
//! Drives the `docker` CLI (or a compatible binary such as `podman`). Every
//! call carries a timeout. Environment values are written to a private
//! temporary `--env-file` so they never appear in the process list.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::types::{
    ContainerEngine, ContainerState, EngineHealth, EngineResult, LaunchRequest, LABEL_STACK,
};
use crate::error::EngineError;
use crate::registry::{Digest, ImageRef};

/// Seconds docker waits for a graceful stop before killing.
const STOP_GRACE_SECS: u64 = 10;

/// Docker engine that manages long-running vendor containers
#[derive(Debug, Clone)]
pub struct DockerEngine {
    /// Engine binary (`docker`, `podman`, or an absolute path)
    binary: String,
    /// Timeout for start/stop/inspect calls
    timeout: Duration,
    /// Timeout for image pulls
    pull_timeout: Duration,
}

impl DockerEngine {
    pub fn new(timeout: Duration) -> Self {
        Self {
            binary: "docker".to_string(),
            timeout,
            pull_timeout: timeout.max(Duration::from_secs(600)),
        }
    }

    /// Use a different engine binary
    pub fn with_binary(mut self, binary: &str) -> Self {
        self.binary = binary.to_string();
        self
    }

    /// Set the image pull timeout
    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }

    async fn exec(&self, args: &[String], timeout: Duration) -> EngineResult<String> {
        debug!(binary = %self.binary, command = %args.first().map(String::as_str).unwrap_or(""), "Engine call");
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| EngineError::Timeout(timeout.as_secs()))?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EngineError::Unavailable(format!("'{}' not found", self.binary))
                } else {
                    EngineError::CommandFailed(e.to_string())
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(EngineError::CommandFailed(stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

fn is_missing(err: &EngineError) -> bool {
    matches!(err, EngineError::CommandFailed(msg)
        if msg.contains("No such container") || msg.contains("No such object") || msg.contains("no such container"))
}

/// Arguments for `docker run`, env values excluded.
pub fn run_args(request: &LaunchRequest, env_file: Option<&Path>) -> Vec<String> {
    let spec = &request.spec;
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.container_name.clone(),
        "--restart".to_string(),
        spec.restart.as_docker_arg().to_string(),
    ];
    if let Some(platform) = &spec.platform {
        args.push("--platform".to_string());
        args.push(platform.clone());
    }
    for (key, value) in &request.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }
    if let Some(path) = env_file {
        args.push("--env-file".to_string());
        args.push(path.to_string_lossy().to_string());
    }
    for volume in &spec.volumes {
        args.push("-v".to_string());
        args.push(volume.to_mount_arg());
    }
    args.push(request.image.clone());
    args.extend(spec.command.iter().map(|a| a.expose().to_string()));
    args
}

/// Contents of the `--env-file`. Docker reads values verbatim to end of line.
pub fn env_file_contents(request: &LaunchRequest) -> EngineResult<String> {
    let mut out = String::new();
    for (key, value) in &request.spec.env {
        let raw = value.expose();
        if raw.contains('\n') || raw.contains('\r') {
            return Err(EngineError::CommandFailed(format!(
                "environment variable {} contains a line break",
                key
            )));
        }
        out.push_str(key);
        out.push('=');
        out.push_str(raw);
        out.push('\n');
    }
    Ok(out)
}

fn parse_started_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|d| d.with_timezone(&Utc))
        // Never-started containers report year 1.
        .filter(|d| d.timestamp() > 0)
}

/// Build a [`ContainerState`] from one `docker inspect` object.
pub fn parse_inspect(value: &Value) -> EngineResult<ContainerState> {
    let str_at = |ptr: &str| value.pointer(ptr).and_then(Value::as_str).unwrap_or("");
    let name = str_at("/Name").trim_start_matches('/').to_string();
    if name.is_empty() {
        return Err(EngineError::Parse("inspect output without Name".into()));
    }
    let labels = value
        .pointer("/Config/Labels")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Ok(ContainerState {
        name,
        id: str_at("/Id").to_string(),
        image: str_at("/Config/Image").to_string(),
        running: value
            .pointer("/State/Running")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        status: str_at("/State/Status").to_string(),
        health: EngineHealth::parse(str_at("/State/Health/Status")),
        exit_code: value.pointer("/State/ExitCode").and_then(Value::as_i64),
        restart_count: value
            .pointer("/RestartCount")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        labels,
        started_at: parse_started_at(str_at("/State/StartedAt")),
    })
}

/// Pick the digest for `image` out of `{{json .RepoDigests}}` output.
pub fn parse_repo_digests(raw: &str, image: &ImageRef) -> EngineResult<Digest> {
    let entries: Vec<String> = serde_json::from_str(raw.trim())
        .map_err(|e| EngineError::Parse(format!("RepoDigests: {}", e)))?;
    let wanted = image.name();
    let pick = entries
        .iter()
        .filter_map(|entry| entry.split_once('@'))
        .find(|(name, _)| ImageRef::parse(name).is_ok_and(|r| r.name() == wanted))
        .or_else(|| entries.iter().find_map(|e| e.split_once('@')));
    match pick {
        Some((_, digest)) => Digest::parse(digest).map_err(|e| EngineError::Parse(e.to_string())),
        None => Err(EngineError::Parse(format!("no repo digest for {}", wanted))),
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn name(&self) -> &str {
        "docker"
    }

    async fn is_available(&self) -> bool {
        // Binary installed and daemon answering within the call timeout
        let args = [
            "info".to_string(),
            "--format".to_string(),
            "{{.ServerVersion}}".to_string(),
        ];
        match self.exec(&args, self.timeout).await {
            Ok(_) => true,
            Err(e) => {
                debug!(binary = %self.binary, error = %e, "Engine not available");
                false
            }
        }
    }

    async fn pull(&self, image: &ImageRef, platform: Option<&str>) -> EngineResult<Digest> {
        let reference = image.to_string();
        let mut args = vec!["pull".to_string(), "--quiet".to_string()];
        if let Some(p) = platform {
            args.push("--platform".to_string());
            args.push(p.to_string());
        }
        args.push(reference.clone());
        self.exec(&args, self.pull_timeout).await?;

        let out = self
            .exec(
                &[
                    "image".to_string(),
                    "inspect".to_string(),
                    "--format".to_string(),
                    "{{json .RepoDigests}}".to_string(),
                    reference,
                ],
                self.timeout,
            )
            .await?;
        parse_repo_digests(&out, image)
    }

    async fn image_present(&self, reference: &str) -> EngineResult<bool> {
        let args = ["image", "inspect", "--format", "{{.Id}}", reference].map(String::from);
        match self.exec(&args, self.timeout).await {
            Ok(_) => Ok(true),
            Err(EngineError::CommandFailed(msg))
                if msg.contains("No such image") || msg.contains("No such object") =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn run(&self, request: &LaunchRequest) -> EngineResult<String> {
        // The file must outlive the docker call; it is removed on drop.
        let mut env_file = tempfile::Builder::new()
            .prefix("bandstack-env-")
            .tempfile()
            .map_err(|e| EngineError::CommandFailed(format!("env file: {}", e)))?;
        env_file
            .write_all(env_file_contents(request)?.as_bytes())
            .and_then(|_| env_file.flush())
            .map_err(|e| EngineError::CommandFailed(format!("env file: {}", e)))?;

        let args = run_args(request, Some(env_file.path()));
        let out = self.exec(&args, self.timeout).await?;
        Ok(out.trim().to_string())
    }

    async fn stop(&self, name: &str) -> EngineResult<()> {
        let args = vec![
            "stop".to_string(),
            "-t".to_string(),
            STOP_GRACE_SECS.to_string(),
            name.to_string(),
        ];
        match self.exec(&args, self.timeout).await {
            Ok(_) => Ok(()),
            Err(e) if is_missing(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn remove(&self, name: &str) -> EngineResult<()> {
        let args = vec!["rm".to_string(), "-f".to_string(), name.to_string()];
        match self.exec(&args, self.timeout).await {
            Ok(_) => Ok(()),
            Err(e) if is_missing(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn inspect(&self, name: &str) -> EngineResult<Option<ContainerState>> {
        let args = ["inspect", "--type", "container", name].map(String::from);
        let out = match self.exec(&args, self.timeout).await {
            Ok(out) => out,
            Err(e) if is_missing(&e) => return Ok(None),
            Err(e) => return Err(e),
        };
        let parsed: Vec<Value> =
            serde_json::from_str(&out).map_err(|e| EngineError::Parse(e.to_string()))?;
        parsed.first().map(parse_inspect).transpose()
    }

    async fn list(&self, stack: &str) -> EngineResult<Vec<ContainerState>> {
        let args = vec![
            "ps".to_string(),
            "-a".to_string(),
            "--filter".to_string(),
            format!("label={}={}", LABEL_STACK, stack),
            "--format".to_string(),
            "{{.Names}}".to_string(),
        ];
        let names: Vec<String> = self
            .exec(&args, self.timeout)
            .await?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec![
            "inspect".to_string(),
            "--type".to_string(),
            "container".to_string(),
        ];
        args.extend(names);
        let out = self.exec(&args, self.timeout).await?;
        let parsed: Vec<Value> =
            serde_json::from_str(&out).map_err(|e| EngineError::Parse(e.to_string()))?;
        let mut states = parsed
            .iter()
            .map(parse_inspect)
            .collect::<EngineResult<Vec<_>>>()?;
        states.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(states)
    }
}
