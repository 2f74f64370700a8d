//! Append-only transcript and its persisted wire shape.
//!
//! The wire shape is a sequence of `{role, parts}` records where each part is
//! one of `{text}`, `{functionCall:{id,name,args}}` or
//! `{functionResponse:{id,name,response:{result}}}`. [`Transcript::from_records`]
//! is the exact left inverse of [`Transcript::to_records`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::types::{Part, Role, ToolCall, ToolResult, Turn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptError {
    #[error("tool result for '{name}' refers to unknown call id '{call_id}'")]
    UnknownCallId { call_id: String, name: String },
}

/// Ordered log of turns. Only grows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "Vec<TurnRecord>", try_from = "Vec<TurnRecord>")]
pub struct Transcript {
    turns: Vec<Turn>,
    call_ids: HashSet<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn. Every `ToolResult` must answer a call emitted earlier
    /// (or earlier in the same turn).
    pub fn push(&mut self, turn: Turn) -> Result<(), TranscriptError> {
        let mut seen = self.call_ids.clone();
        for part in &turn.parts {
            match part {
                Part::ToolCall(call) => {
                    seen.insert(call.call_id.clone());
                }
                Part::ToolResult(result) if !seen.contains(&result.call_id) => {
                    return Err(TranscriptError::UnknownCallId {
                        call_id: result.call_id.clone(),
                        name: result.name.clone(),
                    });
                }
                _ => {}
            }
        }
        self.call_ids = seen;
        self.turns.push(turn);
        Ok(())
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Tool calls that have no matching result yet. Non-empty means the last
    /// model turn is still being dispatched (or the loop died mid-dispatch).
    pub fn pending_calls(&self) -> Vec<&ToolCall> {
        let answered: HashSet<&str> = self
            .turns
            .iter()
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| match part {
                Part::ToolResult(result) => Some(result.call_id.as_str()),
                _ => None,
            })
            .collect();
        self.turns
            .iter()
            .flat_map(|turn| turn.tool_calls())
            .filter(|call| !answered.contains(call.call_id.as_str()))
            .collect()
    }

    pub fn to_records(&self) -> Vec<TurnRecord> {
        self.turns.iter().map(TurnRecord::from_turn).collect()
    }

    pub fn from_records(records: Vec<TurnRecord>) -> Result<Self, TranscriptError> {
        let mut transcript = Transcript::new();
        for record in records {
            transcript.push(record.into_turn())?;
        }
        Ok(transcript)
    }
}

impl From<Transcript> for Vec<TurnRecord> {
    fn from(transcript: Transcript) -> Self {
        transcript.to_records()
    }
}

impl TryFrom<Vec<TurnRecord>> for Transcript {
    type Error = TranscriptError;

    fn try_from(records: Vec<TurnRecord>) -> Result<Self, Self::Error> {
        Transcript::from_records(records)
    }
}

/// Persisted form of a [`Turn`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub role: Role,
    pub parts: Vec<PartRecord>,
}

/// Persisted form of a [`Part`]; serializes as a single-key object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartRecord {
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "functionCall")]
    FunctionCall(FunctionCallRecord),
    #[serde(rename = "functionResponse")]
    FunctionResponse(FunctionResponseRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponseRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    pub response: ResponseBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub result: String,
}

impl TurnRecord {
    pub fn from_turn(turn: &Turn) -> Self {
        Self {
            role: turn.role,
            parts: turn.parts.iter().map(PartRecord::from_part).collect(),
        }
    }

    pub fn into_turn(self) -> Turn {
        Turn {
            role: self.role,
            parts: self.parts.into_iter().map(PartRecord::into_part).collect(),
        }
    }
}

impl PartRecord {
    pub fn from_part(part: &Part) -> Self {
        match part {
            Part::Text(text) => PartRecord::Text(text.clone()),
            Part::ToolCall(call) => PartRecord::FunctionCall(FunctionCallRecord {
                id: call.call_id.clone(),
                name: call.name.clone(),
                args: call.arguments.clone(),
            }),
            Part::ToolResult(result) => PartRecord::FunctionResponse(FunctionResponseRecord {
                id: result.call_id.clone(),
                name: result.name.clone(),
                response: ResponseBody {
                    result: result.output.clone(),
                },
            }),
        }
    }

    pub fn into_part(self) -> Part {
        match self {
            PartRecord::Text(text) => Part::Text(text),
            PartRecord::FunctionCall(call) => Part::ToolCall(ToolCall {
                call_id: call.id,
                name: call.name,
                arguments: call.args,
            }),
            PartRecord::FunctionResponse(response) => Part::ToolResult(ToolResult {
                call_id: response.id,
                name: response.name,
                output: response.response.result,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn sample() -> Transcript {
        let mut transcript = Transcript::new();
        transcript
            .push(Turn::user_text("System Prompt: be careful\n\nUser Goal: greet"))
            .expect("push");
        transcript
            .push(Turn::new(
                Role::Model,
                vec![
                    Part::text("I will write the file."),
                    Part::tool_call(
                        "call-1-0",
                        "write_file",
                        args(json!({
                            "filepath": "greet.py",
                            "content": "def greet():\n    return 'hi'\n"
                        })),
                    ),
                    Part::tool_call("call-1-1", "finish_task", Map::new()),
                ],
            ))
            .expect("push");
        transcript
            .push(Turn::tool_result(ToolResult {
                call_id: "call-1-0".to_string(),
                name: "write_file".to_string(),
                output: "File written successfully.".to_string(),
            }))
            .expect("push");
        transcript
            .push(Turn::user_text("User approved the action."))
            .expect("push");
        transcript
            .push(Turn::tool_result(ToolResult {
                call_id: "call-1-1".to_string(),
                name: "finish_task".to_string(),
                output: "Task marked as complete.".to_string(),
            }))
            .expect("push");
        transcript
    }

    #[test]
    fn records_round_trip_exactly() {
        let transcript = sample();
        let rebuilt = Transcript::from_records(transcript.to_records()).expect("rebuild");
        assert_eq!(rebuilt, transcript);
    }

    #[test]
    fn json_round_trip_through_serde() {
        let transcript = sample();
        let json = serde_json::to_string(&transcript).expect("serialize");
        let back: Transcript = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, transcript);
    }

    fn assert_round_trips(name: &str, turns: Vec<Turn>) {
        let mut transcript = Transcript::new();
        for turn in turns {
            transcript.push(turn).expect("push");
        }
        let rebuilt = Transcript::from_records(transcript.to_records()).expect("rebuild");
        assert_eq!(rebuilt, transcript, "records: {name}");
        let json = serde_json::to_string(&transcript).expect("serialize");
        let back: Transcript = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, transcript, "json: {name}");
    }

    fn result(id: &str, name: &str, output: &str) -> Part {
        Part::ToolResult(ToolResult {
            call_id: id.to_string(),
            name: name.to_string(),
            output: output.to_string(),
        })
    }

    #[test]
    fn varied_transcripts_round_trip() {
        let nested = args(json!({
            "filepath": "pkg/mod.py",
            "options": {
                "overwrite": true,
                "mode": null,
                "lines": [1, 2, {"deep": ["x", "y"]}]
            },
            "count": -3,
            "ratio": 1.5,
            "note": "naïve \"quoted\" \\ tab\t"
        }));
        let cases: Vec<(&str, Vec<Turn>)> = vec![
            ("empty", vec![]),
            ("empty text", vec![Turn::user_text("")]),
            (
                "call after text and result in the same turn",
                vec![Turn::new(
                    Role::Model,
                    vec![
                        Part::tool_call("a", "read_file", Map::new()),
                        Part::text("reading first"),
                        result("a", "read_file", "contents"),
                        Part::tool_call("b", "list_files", Map::new()),
                    ],
                )],
            ),
            (
                "empty ids",
                vec![
                    Turn::new(Role::Model, vec![Part::tool_call("", "run_tests", Map::new())]),
                    Turn::new(Role::Tool, vec![result("", "run_tests", "")]),
                ],
            ),
            (
                "nested arguments",
                vec![
                    Turn::new(Role::Model, vec![Part::tool_call("n", "write_file", nested)]),
                    Turn::new(Role::Tool, vec![result("n", "write_file", "ok")]),
                ],
            ),
            (
                "several results in one tool turn",
                vec![
                    Turn::new(
                        Role::Model,
                        vec![
                            Part::tool_call("x", "a", Map::new()),
                            Part::tool_call("y", "b", Map::new()),
                        ],
                    ),
                    Turn::new(Role::Tool, vec![result("y", "b", "2"), result("x", "a", "1")]),
                    Turn::user_text("multi\nline\n\n"),
                ],
            ),
        ];
        for (name, turns) in cases {
            assert_round_trips(name, turns);
        }
    }

    #[test]
    fn every_part_order_round_trips() {
        let parts = [
            Part::text("narration"),
            Part::tool_call("c1", "read_file", args(json!({"filepath": "a.py"}))),
            Part::tool_call("", "list_files", Map::new()),
            Part::tool_call("c2", "write_file", args(json!({"meta": {"tags": ["t"]}}))),
        ];
        let mut orders: Vec<Vec<usize>> = vec![vec![]];
        for _ in 0..parts.len() {
            let mut longer = Vec::new();
            for order in &orders {
                for i in (0..parts.len()).filter(|i| !order.contains(i)) {
                    let mut next = order.clone();
                    next.push(i);
                    longer.push(next);
                }
            }
            orders = longer;
        }
        assert_eq!(orders.len(), 24);
        for order in orders {
            let model: Vec<Part> = order.iter().map(|&i| parts[i].clone()).collect();
            let answers: Vec<Part> = order
                .iter()
                .rev()
                .filter_map(|&i| match &parts[i] {
                    Part::ToolCall(call) => Some(result(&call.call_id, &call.name, "done")),
                    _ => None,
                })
                .collect();
            assert_round_trips(
                &format!("{order:?}"),
                vec![
                    Turn::user_text("goal"),
                    Turn::new(Role::Model, model),
                    Turn::new(Role::Tool, answers),
                ],
            );
        }
    }

    #[test]
    fn wire_shape_uses_function_call_keys() {
        let value = serde_json::to_value(sample()).expect("serialize");
        assert_eq!(value[0]["role"], "user");
        assert_eq!(value[1]["role"], "model");
        assert_eq!(value[1]["parts"][1]["functionCall"]["name"], "write_file");
        assert_eq!(
            value[1]["parts"][1]["functionCall"]["args"]["filepath"],
            "greet.py"
        );
        assert_eq!(value[2]["role"], "tool");
        assert_eq!(
            value[2]["parts"][0]["functionResponse"]["response"]["result"],
            "File written successfully."
        );
    }

    #[test]
    fn call_without_id_round_trips() {
        let mut transcript = Transcript::new();
        transcript
            .push(Turn::new(
                Role::Model,
                vec![Part::tool_call("", "list_files", args(json!({"path": "."})))],
            ))
            .expect("push");
        let value = serde_json::to_value(&transcript).expect("serialize");
        assert!(value[0]["parts"][0]["functionCall"].get("id").is_none());
        let back: Transcript = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, transcript);
    }

    #[test]
    fn result_for_unknown_call_is_rejected() {
        let mut transcript = Transcript::new();
        let err = transcript
            .push(Turn::tool_result(ToolResult {
                call_id: "ghost".to_string(),
                name: "read_file".to_string(),
                output: "x".to_string(),
            }))
            .unwrap_err();
        assert!(matches!(err, TranscriptError::UnknownCallId { .. }));
        assert!(transcript.is_empty());

        let records = serde_json::json!([
            {"role": "tool", "parts": [{"functionResponse": {
                "id": "ghost",
                "name": "x",
                "response": {"result": "y"}
            }}]}
        ]);
        assert!(serde_json::from_value::<Transcript>(records).is_err());
    }

    #[test]
    fn pending_calls_lists_unanswered() {
        let mut transcript = Transcript::new();
        transcript
            .push(Turn::new(
                Role::Model,
                vec![
                    Part::tool_call("a", "read_file", Map::new()),
                    Part::tool_call("b", "list_files", Map::new()),
                ],
            ))
            .expect("push");
        transcript
            .push(Turn::tool_result(ToolResult {
                call_id: "a".to_string(),
                name: "read_file".to_string(),
                output: "ok".to_string(),
            }))
            .expect("push");
        let pending: Vec<&str> = transcript
            .pending_calls()
            .iter()
            .map(|call| call.call_id.as_str())
            .collect();
        assert_eq!(pending, vec!["b"]);
    }
}
