//! Podman/docker engine driven through its command line
//!
//! Each engine call shells out to the configured binary:
//! - Single-shot calls (`create`, `start`, `wait`, `rm -f`, ...) collect the
//!   process output and map a non-zero exit to a [`ContainerError`]
//! - Streaming calls (`pull`, `logs -f`) forward stdout/stderr line by line
//!   and kill the process once the reader goes away

use async_trait::async_trait;
use keel_core::domain::pipeline::ContainerSpec;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use super::engine::{ContainerEngine, LineStream, LogLine, OutputStream};
use super::ContainerError;

/// Lines buffered between the engine process and a slow reader
const LINE_BUFFER: usize = 256;

/// Container engine backed by the `podman` (or `docker`) CLI
#[derive(Debug, Clone)]
pub struct CliEngine {
    binary: String,
}

impl CliEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Checks that the engine binary is installed and working
    ///
    /// # Returns
    /// The engine's version string
    pub async fn check_available(&self) -> Result<String, ContainerError> {
        let version = self.run(args(&["--version"]), None).await?;
        let version = version.trim().to_string();
        info!("{} is available: {}", self.binary, version);
        Ok(version)
    }

    /// Runs a single engine command to completion
    ///
    /// # Arguments
    /// * `args` - Command line after the binary
    /// * `target` - Container the command addresses, used to report
    ///   "no such container" as [`ContainerError::NotFound`]
    ///
    /// # Returns
    /// The command's stdout
    async fn run(&self, args: Vec<String>, target: Option<&str>) -> Result<String, ContainerError> {
        let command = describe(&self.binary, &args);
        debug!("Running '{}'", command);

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ContainerError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !stderr.is_empty() {
            debug!("'{}' stderr: {}", command, stderr);
        }

        if !output.status.success() {
            if let Some(id) = target {
                if stderr.to_ascii_lowercase().contains("no such container") {
                    return Err(ContainerError::NotFound(id.to_string()));
                }
            }
            return Err(ContainerError::Command {
                command,
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(stdout)
    }

    /// Spawns an engine command whose output is consumed as a stream
    fn spawn_lines(&self, args: Vec<String>) -> Result<LineStream, ContainerError> {
        let command = describe(&self.binary, &args);
        debug!("Streaming '{}'", command);

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ContainerError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (tx, rx) = mpsc::channel(LINE_BUFFER);

        tokio::spawn(async move {
            let pump = async {
                let (_, last_stderr) = tokio::join!(
                    forward_lines(stdout, OutputStream::Stdout, &tx),
                    forward_lines(stderr, OutputStream::Stderr, &tx)
                );
                last_stderr
            };

            tokio::select! {
                last_stderr = pump => {
                    if tx.is_closed() {
                        let _ = child.kill().await;
                        return;
                    }
                    match child.wait().await {
                        Ok(status) if status.success() => {}
                        Ok(status) => {
                            let _ = tx
                                .send(Err(ContainerError::Command {
                                    command,
                                    code: status.code().unwrap_or(-1),
                                    stderr: last_stderr.unwrap_or_default(),
                                }))
                                .await;
                        }
                        Err(source) => {
                            let _ = tx
                                .send(Err(ContainerError::Spawn { binary: command, source }))
                                .await;
                        }
                    }
                }
                _ = tx.closed() => {
                    debug!("Reader of '{}' went away, killing it", command);
                    let _ = child.kill().await;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(
    reader: Option<R>,
    stream: OutputStream,
    tx: &mpsc::Sender<Result<LogLine, ContainerError>>,
) -> Option<String> {
    let reader = reader?;
    let mut lines = BufReader::new(reader).lines();
    let mut last = None;

    while let Ok(Some(text)) = lines.next_line().await {
        last = Some(text.clone());
        if tx.send(Ok(LogLine { stream, text })).await.is_err() {
            break;
        }
    }

    last
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn describe(binary: &str, args: &[String]) -> String {
    match args.first() {
        Some(verb) => format!("{} {}", binary, verb),
        None => binary.to_string(),
    }
}

/// Builds the `create` command line for a container spec
///
/// Environment variables are rendered as `KEY=VALUE` in key order and
/// volumes as `host:container[:ro]`.
pub(crate) fn create_args(name: &str, spec: &ContainerSpec) -> Vec<String> {
    let mut out = args(&["create", "--name", name]);

    if spec.privileged {
        out.push("--privileged".to_string());
    }
    for opt in &spec.security_opt {
        out.push("--security-opt".to_string());
        out.push(opt.clone());
    }
    for cap in &spec.cap_add {
        out.push("--cap-add".to_string());
        out.push(cap.clone());
    }
    for mount in &spec.tmpfs {
        out.push("--tmpfs".to_string());
        out.push(mount.clone());
    }
    if let Some(hostname) = &spec.hostname {
        out.push("--hostname".to_string());
        out.push(hostname.clone());
    }
    if let Some(dir) = &spec.working_dir {
        out.push("-w".to_string());
        out.push(dir.clone());
    }
    if let Some(cpu) = spec.resources.cpu {
        out.push("--cpus".to_string());
        out.push(cpu.to_string());
    }
    if let Some(memory) = spec.resources.memory_bytes {
        out.push("--memory".to_string());
        out.push(memory.to_string());
    }

    let mut env: Vec<_> = spec.environment.iter().collect();
    env.sort();
    for (key, value) in env {
        out.push("-e".to_string());
        out.push(format!("{}={}", key, value));
    }

    for volume in &spec.volumes {
        out.push("-v".to_string());
        out.push(volume.to_bind());
    }

    out.push(spec.image.clone());
    out.extend(spec.command.iter().cloned());
    out
}

fn last_line(output: &str) -> Option<&str> {
    output.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}

#[async_trait]
impl ContainerEngine for CliEngine {
    async fn image_exists(&self, image: &str) -> Result<bool, ContainerError> {
        match self
            .run(args(&["image", "inspect", "--format", "{{.Id}}", image]), None)
            .await
        {
            Ok(_) => Ok(true),
            Err(ContainerError::Command { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<LineStream, ContainerError> {
        self.spawn_lines(args(&["pull", image]))
    }

    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<String, ContainerError> {
        let stdout = self.run(create_args(name, spec), None).await?;
        last_line(&stdout)
            .map(str::to_string)
            .ok_or_else(|| ContainerError::Parse(format!("no container id for {}", name)))
    }

    async fn start(&self, id: &str) -> Result<(), ContainerError> {
        self.run(args(&["start", id]), Some(id)).await.map(|_| ())
    }

    async fn wait(&self, id: &str) -> Result<i64, ContainerError> {
        let stdout = self.run(args(&["wait", id]), Some(id)).await?;
        last_line(&stdout)
            .and_then(|l| l.parse::<i64>().ok())
            .ok_or_else(|| ContainerError::Parse(format!("bad exit code for {}: {:?}", id, stdout)))
    }

    async fn logs(
        &self,
        id: &str,
        follow: bool,
        tail: Option<u32>,
    ) -> Result<LineStream, ContainerError> {
        let mut cmd = args(&["logs"]);
        if follow {
            cmd.push("-f".to_string());
        }
        if let Some(n) = tail {
            cmd.push("--tail".to_string());
            cmd.push(n.to_string());
        }
        cmd.push(id.to_string());
        self.spawn_lines(cmd)
    }

    async fn stop(&self, id: &str) -> Result<(), ContainerError> {
        self.run(args(&["stop", id]), Some(id)).await.map(|_| ())
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), ContainerError> {
        let cmd = if force {
            args(&["rm", "-f", id])
        } else {
            args(&["rm", id])
        };
        self.run(cmd, Some(id)).await.map(|_| ())
    }

    async fn restart(&self, id: &str) -> Result<(), ContainerError> {
        self.run(args(&["restart", id]), Some(id)).await.map(|_| ())
    }

    async fn running_count(&self) -> Result<u32, ContainerError> {
        let stdout = self.run(args(&["ps", "-q"]), None).await?;
        Ok(stdout.lines().filter(|l| !l.trim().is_empty()).count() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::domain::pipeline::{ResourceRequirements, VolumeMapping};
    use std::collections::HashMap;

    #[test]
    fn test_create_args_minimal() {
        let spec = ContainerSpec {
            image: "alpine:3".to_string(),
            command: vec!["echo".to_string(), "hi".to_string()],
            ..Default::default()
        };
        assert_eq!(
            create_args("keel-abc", &spec),
            vec!["create", "--name", "keel-abc", "alpine:3", "echo", "hi"]
        );
    }

    #[test]
    fn test_create_args_full_spec() {
        let spec = ContainerSpec {
            image: "builder:latest".to_string(),
            command: vec![],
            environment: HashMap::from([
                ("B".to_string(), "2".to_string()),
                ("A".to_string(), "1".to_string()),
            ]),
            volumes: vec![VolumeMapping {
                host_path: "/srv/cache".to_string(),
                container_path: "/cache".to_string(),
                read_only: true,
            }],
            privileged: true,
            security_opt: vec!["seccomp=unconfined".to_string()],
            cap_add: vec!["SYS_ADMIN".to_string()],
            tmpfs: vec!["/tmp".to_string()],
            hostname: Some("build".to_string()),
            working_dir: Some("/src".to_string()),
            resources: ResourceRequirements {
                cpu: Some(1.5),
                memory_bytes: Some(536870912),
            },
        };

        let rendered = create_args("keel-x", &spec).join(" ");
        assert_eq!(
            rendered,
            "create --name keel-x --privileged --security-opt seccomp=unconfined \
             --cap-add SYS_ADMIN --tmpfs /tmp --hostname build -w /src --cpus 1.5 \
             --memory 536870912 -e A=1 -e B=2 -v /srv/cache:/cache:ro builder:latest"
        );
    }

    #[test]
    fn test_last_line() {
        assert_eq!(last_line("Trying to pull...\nabc123\n\n"), Some("abc123"));
        assert_eq!(last_line("  \n"), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let engine = CliEngine::new("keel-definitely-not-installed");
        assert!(matches!(
            engine.check_available().await,
            Err(ContainerError::Spawn { .. })
        ));
        assert!(matches!(
            engine.pull_image("alpine").await,
            Err(ContainerError::Spawn { .. })
        ));
    }
}
