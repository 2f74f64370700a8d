//! Web search through a Tavily-compatible endpoint.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{Tool, ToolDescriptor, str_arg, string_params};
use crate::io::config::SearchConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct WebSearch {
    descriptor: ToolDescriptor,
    config: SearchConfig,
}

impl WebSearch {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "web_search",
                "Search the web for information on a topic. Returns the raw JSON results.",
                string_params(&[("query", "Search query.")]),
            ),
            config,
        }
    }
}

impl Tool for WebSearch {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &Map<String, Value>) -> Result<String> {
        let query = str_arg(args, "query")?;
        let Ok(api_key) = std::env::var(&self.config.api_key_env) else {
            return Ok(format!("Error: {} is not set.", self.config.api_key_env));
        };
        if api_key.trim().is_empty() {
            return Ok(format!("Error: {} is not set.", self.config.api_key_env));
        }

        debug!(endpoint = %self.config.endpoint, "web search");
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build http client")?;
        let response: Value = client
            .post(&self.config.endpoint)
            .json(&json!({
                "api_key": api_key,
                "query": query,
                "search_depth": "advanced",
                "include_answer": true,
                "max_results": self.config.max_results,
            }))
            .send()
            .context("send search request")?
            .error_for_status()
            .context("search request rejected")?
            .json()
            .context("decode search response")?;
        serde_json::to_string(&response).context("encode search response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_reported_as_text() {
        let tool = WebSearch::new(SearchConfig {
            api_key_env: "AUTOPILOT_TEST_UNSET_SEARCH_KEY".to_string(),
            ..SearchConfig::default()
        });
        let mut args = Map::new();
        args.insert("query".to_string(), json!("rust condvar"));
        let out = tool.invoke(&args).expect("invoke");
        assert_eq!(out, "Error: AUTOPILOT_TEST_UNSET_SEARCH_KEY is not set.");
    }
}
