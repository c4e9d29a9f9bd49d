//! Hosted language-model clients used to turn questions into SQL.

use crate::config::Config;
use crate::query::{ModelProvider, QueryError, SqlGenerator};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// OpenAI-compatible `/chat/completions` endpoint (OpenAI, Groq).
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionsClient {
    pub fn new(http: Client, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    fn request_body(&self, system: &str, question: &str) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": question },
            ],
        })
    }
}

impl SqlGenerator for ChatCompletionsClient {
    async fn complete(&self, system: &str, question: &str) -> Result<String, QueryError> {
        let response: ChatResponse = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(system, question))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::ModelResponse("no choices in completion".into()))?;
        Ok(choice.message.content.unwrap_or_default())
    }
}

/// Gemini `generateContent`; the instruction and question travel as one prompt.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
    pub fn new(http: Client, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    fn prompt(system: &str, question: &str) -> String {
        format!("{system} \n\nUser Question: {question}")
    }
}

impl SqlGenerator for GeminiClient {
    async fn complete(&self, system: &str, question: &str) -> Result<String, QueryError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": Self::prompt(system, question) }] }],
        });
        let response: GeminiResponse = self
            .http
            .post(format!(
                "{}/models/{}:generateContent?key={}",
                self.base_url, self.model, self.api_key
            ))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::ModelResponse("no candidates in response".into()))?;
        Ok(candidate
            .content
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

/// The provider picked for one request.
#[derive(Debug, Clone)]
pub enum LanguageModel {
    Chat(ChatCompletionsClient),
    Gemini(GeminiClient),
}

impl LanguageModel {
    pub fn from_config(config: &Config, provider: ModelProvider) -> Result<Self, QueryError> {
        let key = config.model_key(provider)?;
        let http = Client::builder().timeout(config.request_timeout).build()?;
        let model = provider.default_model();
        Ok(match provider {
            ModelProvider::OpenAi => {
                LanguageModel::Chat(ChatCompletionsClient::new(http, OPENAI_BASE_URL, key, model))
            }
            ModelProvider::Groq => {
                LanguageModel::Chat(ChatCompletionsClient::new(http, GROQ_BASE_URL, key, model))
            }
            ModelProvider::Gemini => {
                LanguageModel::Gemini(GeminiClient::new(http, GEMINI_BASE_URL, key, model))
            }
        })
    }
}

impl SqlGenerator for LanguageModel {
    async fn complete(&self, system: &str, question: &str) -> Result<String, QueryError> {
        match self {
            LanguageModel::Chat(client) => client.complete(system, question).await,
            LanguageModel::Gemini(client) => client.complete(system, question).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_body_carries_system_then_user() {
        let client = ChatCompletionsClient::new(Client::new(), GROQ_BASE_URL, "k", "m");
        let body = client.request_body("sys", "how many claims?");
        assert_eq!(body["model"], "m");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "how many claims?");
    }

    #[test]
    fn gemini_prompt_appends_question() {
        assert_eq!(
            GeminiClient::prompt("sys", "q?"),
            "sys \n\nUser Question: q?"
        );
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let config = Config::default();
        assert!(matches!(
            LanguageModel::from_config(&config, ModelProvider::OpenAi),
            Err(QueryError::Config(_))
        ));
    }

    #[test]
    fn provider_selects_endpoint_family() {
        let config = Config {
            gemini_api_key: Some("g".into()),
            groq_api_key: Some("q".into()),
            ..Default::default()
        };
        assert!(matches!(
            LanguageModel::from_config(&config, ModelProvider::Gemini),
            Ok(LanguageModel::Gemini(_))
        ));
        assert!(matches!(
            LanguageModel::from_config(&config, ModelProvider::Groq),
            Ok(LanguageModel::Chat(_))
        ));
    }
}
