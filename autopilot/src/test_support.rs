//! Test-only helpers: scripted models, scripted tools and workspace fixtures.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use serde_json::{Map, Value};
use tempfile::TempDir;

use crate::controller::RunController;
use crate::core::correction::ErrorMarkerPolicy;
use crate::core::types::Part;
use crate::gate::lock;
use crate::io::documents::DocumentStore;
use crate::io::init::{AgentPaths, InitOptions, init_workspace};
use crate::io::model::{Model, ModelFactory, ModelReply, ModelRequest};
use crate::io::prompt::PromptEngine;
use crate::io::retrieval::NoContext;
use crate::looping::{LoopSettings, RunEnvironment};
use crate::tools::{Tool, ToolDescriptor, ToolRegistry, string_params};

/// One scripted model response.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(ModelReply),
    Fail(String),
}

/// A model that replays a fixed script and records every request.
///
/// Once the script is exhausted it keeps returning empty replies.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
    delay: Duration,
}

impl ScriptedModel {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            requests: Arc::default(),
            delay: Duration::ZERO,
        }
    }

    /// Script made only of replies.
    pub fn replies(replies: Vec<Vec<Part>>) -> Self {
        Self::new(
            replies
                .into_iter()
                .map(|parts| Scripted::Reply(ModelReply::new(parts)))
                .collect(),
        )
    }

    /// Hold every reply for `delay` after the request is recorded.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        lock(&self.requests).clone()
    }

    pub fn factory(&self) -> Arc<dyn ModelFactory> {
        let model = self.clone();
        Arc::new(move |_name: &str| -> Result<Box<dyn Model>> { Ok(Box::new(model.clone())) })
    }
}

impl Model for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate(&mut self, request: &ModelRequest) -> Result<ModelReply> {
        lock(&self.requests).push(request.clone());
        thread::sleep(self.delay);
        match lock(&self.script).pop_front() {
            Some(Scripted::Reply(reply)) => Ok(reply),
            Some(Scripted::Fail(message)) => Err(anyhow!(message)),
            None => Ok(ModelReply::default()),
        }
    }
}

/// Build a tool-call part with an explicit id.
pub fn call(id: &str, name: &str, args: Value) -> Part {
    let arguments = match args {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Part::tool_call(id, name, arguments)
}

/// A tool that returns a fixed output and records its arguments.
#[derive(Clone)]
pub struct RecordingTool {
    descriptor: ToolDescriptor,
    output: String,
    calls: Arc<Mutex<Vec<Map<String, Value>>>>,
    delay: Duration,
}

impl RecordingTool {
    pub fn new(name: &str, params: &[&str], output: &str) -> Self {
        let params: Vec<(&str, &str)> = params.iter().map(|p| (*p, "test parameter")).collect();
        Self {
            descriptor: ToolDescriptor::new(name, "recording test tool", string_params(&params)),
            output: output.to_string(),
            calls: Arc::default(),
            delay: Duration::ZERO,
        }
    }

    /// Sleep for `delay` on each call, after the call is recorded.
    pub fn taking(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requiring_confirmation(mut self) -> Self {
        self.descriptor.requires_confirmation = true;
        self
    }

    pub fn calls(&self) -> Vec<Map<String, Value>> {
        lock(&self.calls).clone()
    }
}

impl Tool for RecordingTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &Map<String, Value>) -> Result<String> {
        lock(&self.calls).push(args.clone());
        thread::sleep(self.delay);
        Ok(self.output.clone())
    }
}

/// A tool whose every invocation returns `Err`.
pub struct FailingTool {
    descriptor: ToolDescriptor,
    message: String,
}

impl FailingTool {
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            descriptor: ToolDescriptor::new(name, "failing test tool", string_params(&[])),
            message: message.to_string(),
        }
    }
}

impl Tool for FailingTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn invoke(&self, _args: &Map<String, Value>) -> Result<String> {
        bail!("{}", self.message)
    }
}

/// A tool that panics.
pub struct PanickingTool {
    descriptor: ToolDescriptor,
}

impl PanickingTool {
    pub fn new(name: &str) -> Self {
        Self {
            descriptor: ToolDescriptor::new(name, "panicking test tool", string_params(&[])),
        }
    }
}

impl Tool for PanickingTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn invoke(&self, _args: &Map<String, Value>) -> Result<String> {
        panic!("tool exploded")
    }
}

/// A scaffolded workspace in a temp dir.
pub struct TestWorkspace {
    _dir: TempDir,
    pub paths: AgentPaths,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let paths = init_workspace(dir.path(), &InitOptions { force: false })?;
        Ok(Self { _dir: dir, paths })
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    /// Loop collaborators with short backoffs and no retrieval.
    pub fn environment(&self, registry: ToolRegistry) -> Result<RunEnvironment> {
        Ok(RunEnvironment {
            paths: self.paths.clone(),
            registry,
            documents: DocumentStore::from_paths(&self.paths),
            prompts: PromptEngine::new()?,
            correction: Box::new(ErrorMarkerPolicy::default()),
            context: Box::new(NoContext),
            settings: LoopSettings {
                empty_response_backoff: Duration::from_millis(20),
                error_backoff: Duration::from_millis(20),
            },
        })
    }

    pub fn controller(
        &self,
        registry: ToolRegistry,
        model: &ScriptedModel,
    ) -> Result<RunController> {
        self.controller_with_join_timeout(registry, model, Duration::from_secs(5))
    }

    pub fn controller_with_join_timeout(
        &self,
        registry: ToolRegistry,
        model: &ScriptedModel,
        join_timeout: Duration,
    ) -> Result<RunController> {
        Ok(RunController::new(
            self.environment(registry)?,
            model.factory(),
            "scripted",
            false,
            join_timeout,
        ))
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}
