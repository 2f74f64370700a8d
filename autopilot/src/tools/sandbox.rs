//! Code execution inside a throwaway Docker container.
//!
//! The workspace is mounted read-only at `/workspace` and the container has no
//! network. Output is bounded. Every container is named, so one that outlives
//! its deadline is removed with `docker rm -f`, not just its client.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::{Tool, ToolDescriptor, str_arg, string_params};
use crate::io::config::SandboxConfig;
use crate::io::process::{ProcessLimits, run_with_cleanup, run_with_limits};

const MOUNT_POINT: &str = "/workspace";
const REMOVE_LIMITS: ProcessLimits = ProcessLimits {
    timeout: Duration::from_secs(30),
    output_limit_bytes: 4096,
};

static NEXT_CONTAINER: AtomicU64 = AtomicU64::new(1);

/// Unique per process and per call.
fn container_name() -> String {
    format!(
        "autopilot-sandbox-{}-{}",
        std::process::id(),
        NEXT_CONTAINER.fetch_add(1, Ordering::Relaxed)
    )
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    workspace: PathBuf,
    image: String,
    limits: ProcessLimits,
}

impl Sandbox {
    pub fn new(workspace: &Path, config: &SandboxConfig, output_limit_bytes: usize) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            image: config.image.clone(),
            limits: ProcessLimits {
                timeout: Duration::from_secs(config.timeout_secs),
                output_limit_bytes,
            },
        }
    }

    /// `docker run` invocation for `program` in container `name`, reading
    /// stdin when `interactive`.
    pub fn command(&self, name: &str, program: &[String], interactive: bool) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("run").arg("--rm").arg("--name").arg(name);
        if interactive {
            cmd.arg("-i");
        }
        cmd.arg("--network")
            .arg("none")
            .arg("-v")
            .arg(format!("{}:{MOUNT_POINT}:ro", self.workspace.display()))
            .arg("-w")
            .arg(MOUNT_POINT)
            .arg(&self.image)
            .args(program);
        cmd
    }

    pub fn run(&self, program: &[String], stdin: Option<&[u8]>) -> Result<String> {
        let name = container_name();
        let cmd = self.command(&name, program, stdin.is_some());
        debug!(image = %self.image, container = %name, ?program, "running sandbox");
        let output = run_with_cleanup(cmd, stdin, &self.limits, || remove_container(&name))
            .context("run docker sandbox")?;
        Ok(output.render(&self.limits))
    }
}

/// `docker rm -f <name>`: stops the container and removes it.
pub fn remove_command(name: &str) -> Command {
    let mut cmd = Command::new("docker");
    cmd.arg("rm").arg("-f").arg(name);
    cmd
}

fn remove_container(name: &str) {
    match run_with_limits(remove_command(name), None, &REMOVE_LIMITS) {
        Ok(output) if output.status.success() => {
            info!(container = %name, "removed timed-out sandbox container");
        }
        Ok(output) => warn!(
            container = %name,
            stderr = %String::from_utf8_lossy(&output.stderr.bytes),
            "docker rm failed"
        ),
        Err(err) => warn!(container = %name, err = %format!("{err:#}"), "docker rm failed"),
    }
}

pub struct ExecutePythonCode {
    descriptor: ToolDescriptor,
    sandbox: Sandbox,
}

impl ExecutePythonCode {
    pub fn new(sandbox: Sandbox) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "execute_python_code",
                "Run a Python snippet in an isolated sandbox with the workspace mounted \
                 read-only. Returns exit code, stdout and stderr.",
                string_params(&[("code", "Python source to execute.")]),
            )
            .confirmed(),
            sandbox,
        }
    }
}

impl Tool for ExecutePythonCode {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &Map<String, Value>) -> Result<String> {
        let code = str_arg(args, "code")?;
        self.sandbox.run(
            &["python".to_string(), "-".to_string()],
            Some(code.as_bytes()),
        )
    }
}

pub struct RunTests {
    descriptor: ToolDescriptor,
    sandbox: Sandbox,
    test_command: Vec<String>,
}

impl RunTests {
    pub fn new(sandbox: Sandbox, test_command: Vec<String>) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "run_tests",
                "Run the project's test suite in the sandbox and return the results.",
                json!({"type": "object", "properties": {}}),
            ),
            sandbox,
            test_command,
        }
    }
}

impl Tool for RunTests {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn invoke(&self, _args: &Map<String, Value>) -> Result<String> {
        self.sandbox.run(&self.test_command, None)
    }
}

/// Build the sandbox image (`docker build -t <image> -f <dockerfile> <root>`).
pub fn build_image(root: &Path, config: &SandboxConfig) -> Result<()> {
    let dockerfile = root.join(&config.dockerfile);
    info!(image = %config.image, dockerfile = %dockerfile.display(), "building sandbox image");
    let status = Command::new("docker")
        .arg("build")
        .arg("-t")
        .arg(&config.image)
        .arg("-f")
        .arg(&dockerfile)
        .arg(root)
        .status()
        .context("spawn docker build")?;
    if !status.success() {
        anyhow::bail!("docker build failed with {status}");
    }
    Ok(())
}
