//! Long-lived learnings fed back into every system prompt.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use super::{Tool, ToolDescriptor, str_arg, string_params};

pub struct RecordLearning {
    descriptor: ToolDescriptor,
    path: PathBuf,
}

impl RecordLearning {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "record_learning",
                "Record a reusable lesson in the knowledge base so future runs can \
                 benefit from it.",
                string_params(&[("learning", "One concise, self-contained lesson.")]),
            ),
            path: path.into(),
        }
    }
}

impl Tool for RecordLearning {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &Map<String, Value>) -> Result<String> {
        let learning = str_arg(args, "learning")?.trim();
        if learning.is_empty() {
            return Ok("Error: learning must not be empty.".to_string());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        let line = learning.replace('\n', " ");
        writeln!(file, "- {line}").with_context(|| format!("append {}", self.path.display()))?;
        Ok("Learning recorded.".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn appends_bullets() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".autopilot/knowledge_base.md");
        let tool = RecordLearning::new(&path);
        for text in ["pytest needs __init__.py here", "use pathlib\nnot os.path"] {
            let mut args = Map::new();
            args.insert("learning".to_string(), json!(text));
            assert_eq!(tool.invoke(&args).expect("invoke"), "Learning recorded.");
        }
        let contents = std::fs::read_to_string(&path).expect("read");
        assert_eq!(
            contents,
            "- pytest needs __init__.py here\n- use pathlib not os.path\n"
        );
    }
}
