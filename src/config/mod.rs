//! Remote prompt/deployment configuration: fetch, cache, extract, inject.
//!
//! A deployment payload is fetched once per [`ConfigCache`] instance and
//! memoized for the life of the cache. The payload carries role-tagged
//! message templates, declared variable names, and provider/model settings.
//! Template text uses `{{ name }}` placeholders filled by
//! [`inject_variables`]; placeholders without a supplied value are left
//! verbatim so missing inputs stay visible downstream.

use std::collections::HashMap;
use std::env;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use url::Url;

use crate::types::PipelineError;

/// Full remote deployment payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    pub id: String,
    pub prompt_id: String,
    pub project_id: String,
    pub deployment_environment_id: String,
    pub prompt: PromptDefinition,
}

/// Prompt body: provider settings, templates, tools, declared variables.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptDefinition {
    pub config: ModelConfig,
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
    #[serde(default)]
    pub tools: Vec<Value>,
    #[serde(default)]
    pub variables: Vec<PromptVariable>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub provider_name: String,
    pub model: String,
    #[serde(default)]
    pub settings: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContentBlock {
    pub modality: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptVariable {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// HTTP client for the configuration service.
///
/// Fetch failure is fatal to the whole pipeline: without a template there is
/// no request to build.
#[derive(Clone, Debug)]
pub struct ConfigClient {
    http: Client,
    endpoint: Url,
    api_key: String,
    prompt_id: String,
    deployment_environment_id: String,
}

impl ConfigClient {
    pub fn new(
        http: Client,
        endpoint: Url,
        api_key: impl Into<String>,
        prompt_id: impl Into<String>,
        deployment_environment_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoint,
            api_key: api_key.into(),
            prompt_id: prompt_id.into(),
            deployment_environment_id: deployment_environment_id.into(),
        }
    }

    /// Builds a client from `RAGLINE_CONFIG_URL`, `RAGLINE_API_KEY`,
    /// `RAGLINE_PROMPT_ID`, and `RAGLINE_DEPLOYMENT_ENV_ID`.
    pub fn from_env() -> Result<Self, PipelineError> {
        dotenvy::dotenv().ok();
        let endpoint = required_env("RAGLINE_CONFIG_URL")?;
        let endpoint = Url::parse(&endpoint)
            .map_err(|err| PipelineError::Config(format!("invalid RAGLINE_CONFIG_URL: {err}")))?;
        Ok(Self::new(
            Client::new(),
            endpoint,
            required_env("RAGLINE_API_KEY")?,
            required_env("RAGLINE_PROMPT_ID")?,
            required_env("RAGLINE_DEPLOYMENT_ENV_ID")?,
        ))
    }

    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    /// Fetches the latest deployment for the configured prompt/environment.
    pub async fn fetch(&self) -> Result<DeploymentConfig, PipelineError> {
        let response = self
            .http
            .get(self.endpoint.clone())
            .query(&[
                ("promptId", self.prompt_id.as_str()),
                (
                    "deploymentEnvironmentId",
                    self.deployment_environment_id.as_str(),
                ),
                ("deploymentId", "latest"),
            ])
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|err| PipelineError::Config(err.to_string()))?
            .error_for_status()
            .map_err(|err| PipelineError::Config(err.to_string()))?;

        response
            .json::<DeploymentConfig>()
            .await
            .map_err(|err| PipelineError::Config(format!("malformed deployment payload: {err}")))
    }
}

fn required_env(name: &str) -> Result<String, PipelineError> {
    env::var(name).map_err(|_| PipelineError::Config(format!("missing environment variable {name}")))
}

/// Process-lifetime cache for one deployment payload.
///
/// The payload is fetched lazily on first access and never invalidated for
/// the life of the cache; the extracted system-message text has its own cell
/// to avoid repeated extraction. Both cells tolerate concurrent first access
/// (duplicate fetches are idempotent and benign). Construct one cache per
/// run, or keep a keyed map of caches when serving several deployments.
pub struct ConfigCache {
    client: ConfigClient,
    deployment: OnceCell<DeploymentConfig>,
    system_template: OnceCell<String>,
}

impl ConfigCache {
    pub fn new(client: ConfigClient) -> Self {
        Self {
            client,
            deployment: OnceCell::new(),
            system_template: OnceCell::new(),
        }
    }

    /// Returns the cached deployment payload, fetching it on first access.
    pub async fn deployment(&self) -> Result<&DeploymentConfig, PipelineError> {
        self.deployment
            .get_or_try_init(|| async {
                let deployment = self.client.fetch().await?;
                tracing::debug!(
                    deployment_id = %deployment.id,
                    prompt_id = %deployment.prompt_id,
                    model = %deployment.prompt.config.model,
                    "cached deployment configuration"
                );
                Ok(deployment)
            })
            .await
    }

    /// Template text for `role`: the first message with that role, first
    /// text-modality block. Templates may omit a role, so absence is an
    /// empty string rather than an error.
    pub async fn template(&self, role: &str) -> Result<String, PipelineError> {
        let deployment = self.deployment().await?;
        Ok(extract_template(deployment, role))
    }

    /// System template text, extracted once and cached separately.
    pub async fn system_template(&self) -> Result<&str, PipelineError> {
        self.system_template
            .get_or_try_init(|| async {
                let deployment = self.deployment().await?;
                Ok(extract_template(deployment, "system"))
            })
            .await
            .map(String::as_str)
    }

    /// Declared variable names, in payload order.
    pub async fn variables(&self) -> Result<Vec<String>, PipelineError> {
        let deployment = self.deployment().await?;
        Ok(deployment
            .prompt
            .variables
            .iter()
            .map(|variable| variable.name.clone())
            .collect())
    }
}

fn extract_template(deployment: &DeploymentConfig, role: &str) -> String {
    deployment
        .prompt
        .messages
        .iter()
        .find(|message| message.role == role)
        .and_then(|message| message.content.iter().find(|block| block.modality == "text"))
        .and_then(|block| {
            block.text.clone().or_else(|| match &block.value {
                Some(Value::String(text)) => Some(text.clone()),
                _ => None,
            })
        })
        .unwrap_or_default()
}

/// Replaces every `{{ name }}` placeholder whose (whitespace-trimmed) name
/// has a supplied value. String values are inserted verbatim; other values
/// are JSON-encoded. Placeholders without a value stay untouched, which
/// keeps partial injection possible and missing inputs detectable.
pub fn inject_variables(template: &str, values: &HashMap<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            break;
        };
        let name = rest[open + 2..open + 2 + close].trim();
        out.push_str(&rest[..open]);
        match values.get(name) {
            Some(value) => out.push_str(&stringify(value)),
            None => out.push_str(&rest[open..open + close + 4]),
        }
        rest = &rest[open + close + 4..];
    }

    out.push_str(rest);
    out
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn sample_payload() -> Value {
        json!({
            "id": "dep-1",
            "promptId": "prompt-1",
            "projectId": "project-1",
            "deploymentEnvironmentId": "env-1",
            "prompt": {
                "config": {
                    "providerName": "openai",
                    "model": "gpt-4o-mini",
                    "settings": {"temperature": 0.2}
                },
                "messages": [
                    {
                        "role": "system",
                        "content": [{"modality": "text", "text": "You answer using {{context}}."}]
                    },
                    {
                        "role": "user",
                        "content": [{"modality": "text", "text": "Question: {{question}}"}]
                    }
                ],
                "tools": [],
                "variables": [{"name": "question"}, {"name": "context", "description": "retrieved"}]
            }
        })
    }

    #[test]
    fn inject_replaces_supplied_placeholders() {
        let mut values = HashMap::new();
        values.insert("X".to_string(), json!("run"));
        assert_eq!(inject_variables("Plan: {{X}}.", &values), "Plan: run.");
    }

    #[test]
    fn inject_leaves_missing_placeholders_verbatim() {
        let values = HashMap::new();
        assert_eq!(inject_variables("Plan: {{X}}.", &values), "Plan: {{X}}.");
    }

    #[test]
    fn inject_trims_placeholder_names_and_encodes_non_strings() {
        let mut values = HashMap::new();
        values.insert("count".to_string(), json!(3));
        values.insert("who".to_string(), json!("us"));
        assert_eq!(
            inject_variables("{{ count }} for {{who }}, not {{ other }}", &values),
            "3 for us, not {{ other }}"
        );
    }

    #[test]
    fn inject_ignores_unterminated_placeholder() {
        let mut values = HashMap::new();
        values.insert("a".to_string(), json!("x"));
        assert_eq!(inject_variables("{{a}} then {{b", &values), "x then {{b");
    }

    #[test]
    fn extraction_selects_first_text_block_by_role() {
        let deployment: DeploymentConfig = serde_json::from_value(sample_payload()).unwrap();
        assert_eq!(
            extract_template(&deployment, "system"),
            "You answer using {{context}}."
        );
        assert_eq!(
            extract_template(&deployment, "user"),
            "Question: {{question}}"
        );
        assert_eq!(extract_template(&deployment, "assistant"), "");
    }

    #[tokio::test]
    async fn cache_fetches_exactly_once() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .query_param("promptId", "prompt-1")
                    .query_param("deploymentId", "latest")
                    .header("authorization", "Bearer key-1");
                then.status(200).json_body(sample_payload());
            })
            .await;

        let client = ConfigClient::new(
            Client::new(),
            Url::parse(&server.url("/deployments")).unwrap(),
            "key-1",
            "prompt-1",
            "env-1",
        );
        let cache = ConfigCache::new(client);

        let first = cache.deployment().await.unwrap();
        assert_eq!(first.prompt.config.model, "gpt-4o-mini");
        let system = cache.system_template().await.unwrap();
        assert_eq!(system, "You answer using {{context}}.");
        let variables = cache.variables().await.unwrap();
        assert_eq!(variables, vec!["question", "context"]);

        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn unreachable_service_is_a_config_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(503);
            })
            .await;

        let client = ConfigClient::new(
            Client::new(),
            Url::parse(&server.url("/deployments")).unwrap(),
            "key-1",
            "prompt-1",
            "env-1",
        );
        let cache = ConfigCache::new(client);

        assert!(matches!(
            cache.deployment().await,
            Err(PipelineError::Config(_))
        ));
    }
}
