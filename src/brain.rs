use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::PlannerConfig;
use crate::error::{AgentError, Result};

/// Text-in, text-out planning boundary.
///
/// Implementations turn a task plus the serialized page findings into plan
/// text. The output is untrusted and always goes through
/// [`crate::plan::validate`].
#[async_trait]
pub trait Planner: Send + Sync {
    async fn generate_plan(&self, task: &str, elements: &str, form_data: &str) -> Result<String>;

    /// One-sentence reading of the task, logged before the browser opens.
    async fn analyze_task(&self, _task: &str) -> Result<String> {
        Ok(String::new())
    }
}

const PLAN_INSTRUCTIONS: &str = r#"Create a precise action plan in VALID JSON format. MUST be complete and well-formed JSON.

Example format:
{
  "actions": [
    {"step": 1, "action": "fill", "coordinates": {"x": 100, "y": 200}, "data": "John", "description": "Fill first name field"},
    {"step": 2, "action": "click", "coordinates": {"x": 300, "y": 400}, "data": "", "description": "Click submit button"}
  ]
}

Allowed actions: "click" (needs coordinates), "fill" (needs coordinates and data), "navigate" (data is the URL).

For signup tasks:
1. Fill first name with "John"
2. Fill last name with "Doe"
3. Fill email with "john@example.com"
4. Fill password fields if present with "SecurePass123!"
5. Click submit/create account button

Return ONLY the JSON object."#;

/// Planner backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiPlanner {
    client: Client,
    api_key: String,
    config: PlannerConfig,
}

impl OpenAiPlanner {
    pub fn new(config: PlannerConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            AgentError::Config(format!("{} not set in environment", config.api_key_env))
        })?;

        Ok(Self {
            client: Client::new(),
            api_key,
            config,
        })
    }

    async fn complete(&self, body: Value) -> Result<String> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::PlannerFailure(format!("request failed: {}", e)))?;

        let status = response.status();
        let json_resp: Value = response
            .json()
            .await
            .map_err(|e| AgentError::PlannerFailure(format!("unreadable response: {}", e)))?;

        if !status.is_success() {
            let err_msg = json_resp["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error");
            warn!(%status, "Planner API error: {}", err_msg);
            return Err(AgentError::PlannerFailure(format!(
                "API error ({}): {}",
                status, err_msg
            )));
        }

        if let Some(tokens) = json_resp["usage"]["total_tokens"].as_u64() {
            debug!(tokens_used = tokens, "Planner usage");
        }

        json_resp["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                AgentError::PlannerFailure(format!("no content in response: {}", json_resp))
            })
    }
}

#[async_trait]
impl Planner for OpenAiPlanner {
    async fn generate_plan(&self, task: &str, elements: &str, form_data: &str) -> Result<String> {
        info!(task, "Matching task with elements");
        let prompt = plan_prompt(task, elements, form_data);

        let content = self
            .complete(json!({
                "model": self.config.model,
                "messages": [{"role": "user", "content": prompt}],
                "max_completion_tokens": self.config.max_tokens,
                "response_format": {"type": "json_object"},
            }))
            .await?;

        info!(result_length = content.len(), "Generated action plan");
        debug!("Planner says: {}", content);
        Ok(content)
    }

    async fn analyze_task(&self, task: &str) -> Result<String> {
        let content = self
            .complete(json!({
                "model": self.config.model,
                "messages": [{
                    "role": "user",
                    "content": format!("Task: \"{}\". Brief analysis only (1 sentence).", task),
                }],
                "max_tokens": self.config.analysis_max_tokens,
            }))
            .await?;
        Ok(content.trim().to_string())
    }
}

pub fn plan_prompt(task: &str, elements: &str, form_data: &str) -> String {
    let form_data = if form_data.trim().is_empty() {
        "{}"
    } else {
        form_data
    };
    format!(
        "Task: \"{}\"\n\nAvailable elements: {}\nForm data: {}\n\n{}",
        task, elements, form_data, PLAN_INSTRUCTIONS
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_prompt_embeds_inputs() {
        let prompt = plan_prompt("sign up", "[]", r#"{"formsFound":0}"#);
        assert!(prompt.starts_with("Task: \"sign up\""));
        assert!(prompt.contains("Available elements: []"));
        assert!(prompt.contains(r#"Form data: {"formsFound":0}"#));
        assert!(prompt.contains("\"actions\""));
    }

    #[test]
    fn test_plan_prompt_defaults_empty_form_data() {
        let prompt = plan_prompt("search", "[]", "  ");
        assert!(prompt.contains("Form data: {}"));
    }

    #[test]
    fn test_missing_api_key() {
        let config = PlannerConfig {
            api_key_env: "AGENTIC_RPA_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..PlannerConfig::default()
        };
        assert!(matches!(OpenAiPlanner::new(config), Err(AgentError::Config(_))));
    }

    struct Silent;

    #[async_trait]
    impl Planner for Silent {
        async fn generate_plan(&self, _: &str, _: &str, _: &str) -> Result<String> {
            Ok("[]".into())
        }
    }

    #[tokio::test]
    async fn test_default_analysis_is_empty() {
        assert_eq!(Silent.analyze_task("anything").await.unwrap(), "");
    }
}
