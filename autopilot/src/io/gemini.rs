//! Gemini `generateContent` transport.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::core::transcript::{FunctionCallRecord, PartRecord, TurnRecord};
use crate::core::types::{Part, Role, Turn};
use crate::io::config::{AgentConfig, GeminiConfig};
use crate::io::model::{Model, ModelFactory, ModelReply, ModelRequest};
use crate::tools::ToolDescriptor;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub struct GeminiModel {
    client: Client,
    model: String,
    base_url: String,
    api_key: String,
    temperature: f32,
}

impl GeminiModel {
    pub fn new(model: &str, config: &GeminiConfig, temperature: f32) -> Result<Self> {
        let api_key = api_key(config)?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            model: model.trim_start_matches("models/").to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            temperature,
        })
    }
}

impl Model for GeminiModel {
    fn name(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model, turns = request.transcript.len()))]
    fn generate(&mut self, request: &ModelRequest) -> Result<ModelReply> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = request_body(request, self.temperature);
        let response: Value = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .context("send generateContent request")?
            .error_for_status()
            .context("generateContent rejected")?
            .json()
            .context("decode generateContent response")?;
        let reply = parse_reply(response)?;
        debug!(parts = reply.parts.len(), "model replied");
        Ok(reply)
    }
}

/// Creates a [`GeminiModel`] per run from the loaded configuration.
#[derive(Debug, Clone)]
pub struct GeminiFactory {
    config: GeminiConfig,
    temperature: f32,
}

impl GeminiFactory {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            config: config.gemini.clone(),
            temperature: config.temperature,
        }
    }
}

impl ModelFactory for GeminiFactory {
    fn create(&self, model: &str) -> Result<Box<dyn Model>> {
        Ok(Box::new(GeminiModel::new(
            model,
            &self.config,
            self.temperature,
        )?))
    }
}

/// Names of models that support `generateContent`.
pub fn list_models(config: &GeminiConfig) -> Result<Vec<String>> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ModelInfo {
        name: String,
        #[serde(default)]
        supported_generation_methods: Vec<String>,
    }
    #[derive(Deserialize)]
    struct ModelList {
        #[serde(default)]
        models: Vec<ModelInfo>,
    }

    let api_key = api_key(config)?;
    let url = format!("{}/models", config.base_url.trim_end_matches('/'));
    let list: ModelList = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("build http client")?
        .get(&url)
        .query(&[("key", api_key.as_str())])
        .send()
        .context("send list models request")?
        .error_for_status()
        .context("list models rejected")?
        .json()
        .context("decode model list")?;
    Ok(list
        .models
        .into_iter()
        .filter(|m| {
            m.supported_generation_methods
                .iter()
                .any(|method| method == "generateContent")
        })
        .map(|m| m.name.trim_start_matches("models/").to_string())
        .collect())
}

fn api_key(config: &GeminiConfig) -> Result<String> {
    std::env::var(&config.api_key_env)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| anyhow!("{} is not set", config.api_key_env))
}

/// Build the JSON body: transcript turns plus the turn prompt, with
/// consecutive same-role turns merged (the API requires alternation).
pub fn request_body(request: &ModelRequest, temperature: f32) -> Value {
    let mut contents: Vec<(&'static str, Vec<PartRecord>)> = Vec::new();
    let prompt = Turn::user_text(request.prompt.clone());
    for turn in request
        .transcript
        .turns()
        .iter()
        .chain(std::iter::once(&prompt))
    {
        let role = match turn.role {
            Role::Model => "model",
            Role::User | Role::Tool => "user",
        };
        let parts = TurnRecord::from_turn(turn).parts;
        if let Some((last_role, last_parts)) = contents.last_mut() {
            if *last_role == role {
                last_parts.extend(parts);
                continue;
            }
        }
        contents.push((role, parts));
    }
    let contents: Vec<Value> = contents
        .into_iter()
        .map(|(role, parts)| json!({"role": role, "parts": parts}))
        .collect();

    let mut body = json!({
        "contents": contents,
        "generationConfig": {"temperature": temperature},
    });
    if !request.tools.is_empty() {
        let declarations: Vec<Value> = request.tools.iter().map(function_declaration).collect();
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
    }
    body
}

fn function_declaration(tool: &ToolDescriptor) -> Value {
    let mut declaration = json!({
        "name": tool.name,
        "description": tool.description,
    });
    // The API rejects object schemas without properties.
    let has_properties = tool
        .parameters
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|p| !p.is_empty());
    if has_properties {
        declaration["parameters"] = tool.parameters.clone();
    }
    declaration
}

/// Map `candidates[0].content.parts` to parts. A reply without candidates is
/// an empty reply, not an error.
pub fn parse_reply(response: Value) -> Result<ModelReply> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ReplyPart {
        text: Option<String>,
        function_call: Option<FunctionCallRecord>,
    }
    #[derive(Deserialize)]
    struct Content {
        #[serde(default)]
        parts: Vec<ReplyPart>,
    }
    #[derive(Deserialize)]
    struct Candidate {
        content: Option<Content>,
    }
    #[derive(Deserialize)]
    struct Reply {
        #[serde(default)]
        candidates: Vec<Candidate>,
    }

    let reply: Reply = serde_json::from_value(response).context("parse generateContent reply")?;
    let Some(content) = reply.candidates.into_iter().next().and_then(|c| c.content) else {
        return Ok(ModelReply::default());
    };
    let mut parts = Vec::new();
    for part in content.parts {
        if let Some(call) = part.function_call {
            parts.push(Part::tool_call(call.id, call.name, call.args));
        } else if let Some(text) = part.text {
            parts.push(Part::Text(text));
        }
    }
    Ok(ModelReply::new(parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    use crate::core::transcript::Transcript;
    use crate::core::types::ToolResult;
    use crate::tools::string_params;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn request() -> ModelRequest {
        let mut transcript = Transcript::new();
        transcript.push(Turn::user_text("System Prompt: s")).expect("push");
        transcript
            .push(Turn::new(
                Role::Model,
                vec![
                    Part::text("reading"),
                    Part::tool_call("c1", "read_file", object(json!({"filepath": "a.py"}))),
                    Part::tool_call("c2", "run_tests", Map::new()),
                ],
            ))
            .expect("push");
        for (id, name) in [("c1", "read_file"), ("c2", "run_tests")] {
            transcript
                .push(Turn::tool_result(ToolResult {
                    call_id: id.to_string(),
                    name: name.to_string(),
                    output: "ok".to_string(),
                }))
                .expect("push");
        }
        ModelRequest {
            transcript,
            prompt: "Goal: g".to_string(),
            tools: vec![
                ToolDescriptor::new("read_file", "Read", string_params(&[("filepath", "p")])),
                ToolDescriptor::new(
                    "run_tests",
                    "Test",
                    json!({"type": "object", "properties": {}}),
                ),
            ],
        }
    }

    #[test]
    fn request_merges_roles_and_declares_tools() {
        let body = request_body(&request(), 0.1);
        let contents = body["contents"].as_array().expect("contents");
        // user, model, user(tool results + prompt)
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][1]["functionCall"]["name"], "read_file");
        assert_eq!(contents[2]["role"], "user");
        let last_parts = contents[2]["parts"].as_array().expect("parts");
        assert_eq!(last_parts.len(), 3);
        assert_eq!(last_parts[0]["functionResponse"]["response"]["result"], "ok");
        assert_eq!(last_parts[2]["text"], "Goal: g");

        let declarations = body["tools"][0]["functionDeclarations"]
            .as_array()
            .expect("declarations");
        assert_eq!(declarations.len(), 2);
        assert!(declarations[0].get("parameters").is_some());
        assert!(declarations[1].get("parameters").is_none());
        assert!(body["generationConfig"]["temperature"].as_f64().is_some());
    }

    #[test]
    fn reply_parts_map_back() {
        let reply = parse_reply(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "I will write the test first."},
                        {"functionCall": {
                            "name": "write_file",
                            "args": {"filepath": "t.py", "content": "x"}
                        }},
                        {"thoughtSignature": "opaque"}
                    ]
                },
                "finishReason": "STOP"
            }]
        }))
        .expect("parse");
        assert_eq!(reply.parts.len(), 2);
        let calls: Vec<_> = reply.tool_calls().collect();
        assert_eq!(calls[0].name, "write_file");
        assert_eq!(calls[0].arguments["filepath"], "t.py");
        assert!(calls[0].call_id.is_empty());
    }

    #[test]
    fn missing_candidates_is_an_empty_reply() {
        assert!(parse_reply(json!({})).expect("parse").is_empty());
        assert!(
            parse_reply(json!({"candidates": [{"finishReason": "SAFETY"}]}))
                .expect("parse")
                .is_empty()
        );
    }
}
