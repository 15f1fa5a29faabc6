/*!
 * Natural-language to SQL translator.
 *
 * The translator sends the question and a schema-bearing system prompt to the
 * configured provider, bounds the call with a timeout, and reduces the reply
 * to a single candidate statement plus an optional explanation. It never
 * retries on its own and never judges whether the statement is safe.
 */

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::prompts::SqlPromptBuilder;
use crate::app_config::{TranslationConfig, TranslationProvider as ConfigTranslationProvider};
use crate::database::SchemaSnapshot;
use crate::errors::{ProviderError, TranslationError};
use crate::providers::anthropic::{Anthropic, AnthropicRequest};
use crate::providers::mock::{MockProvider, MockRequest};
use crate::providers::ollama::{GenerationRequest, Ollama};
use crate::providers::openai::{OpenAI, OpenAIRequest};
use crate::providers::Provider;

/// Candidate statement produced by the translator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    pub sql: String,
    pub explanation: Option<String>,
}

/// Anything that can turn a question into SQL for a given schema
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        prompt: &str,
        schema: &SchemaSnapshot,
        timeout: Duration,
    ) -> Result<Translation, TranslationError>;
}

/// Leading keywords accepted as the start of a statement
const STATEMENT_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "REPLACE", "CREATE", "DROP", "ALTER",
    "PRAGMA", "EXPLAIN", "VALUES",
];

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n(.*?)```").expect("static regex must compile")
});

static EXPLANATION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*explanation\s*:\s*").expect("static regex must compile")
});

/// Reduce a raw model reply to a statement and explanation
pub fn clean_response(raw: &str) -> Result<Translation, TranslationError> {
    let raw = raw.trim();

    let (body, trailer) = match FENCED_BLOCK.captures(raw) {
        Some(caps) => {
            let whole = caps.get(0).map(|m| m.end()).unwrap_or(raw.len());
            let inner = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            (inner, &raw[whole..])
        }
        None => (raw, ""),
    };

    // An explanation may sit inside the statement text or after the fence
    let (sql, explanation) = match EXPLANATION_LINE.find(body) {
        Some(m) => (&body[..m.start()], Some(&body[m.end()..])),
        None => match EXPLANATION_LINE.find(trailer) {
            Some(m) => (body, Some(&trailer[m.end()..])),
            None => (body, None),
        },
    };

    let sql = sql
        .trim()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string();
    if sql.is_empty() {
        return Err(TranslationError::Invalid("empty statement".to_string()));
    }

    let leading = sql
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default()
        .to_uppercase();
    if !STATEMENT_KEYWORDS.contains(&leading.as_str()) {
        return Err(TranslationError::Invalid(format!(
            "response does not start with a SQL statement: {}",
            sql.chars().take(80).collect::<String>()
        )));
    }

    let explanation = explanation
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());

    Ok(Translation { sql, explanation })
}

/// Provider-specific client behind the translator
#[derive(Debug)]
enum TranslatorBackend {
    /// Ollama LLM service
    Ollama { client: Ollama },
    /// OpenAI-compatible API (OpenAI, OpenRouter, LM Studio)
    OpenAI { client: OpenAI, model: String },
    /// Anthropic API service
    Anthropic { client: Anthropic, model: String },
    /// Deterministic provider for tests
    Mock { client: MockProvider },
}

/// Translator backed by an LLM provider
#[derive(Debug)]
pub struct LlmTranslator {
    backend: TranslatorBackend,
    prompts: SqlPromptBuilder,
    temperature: f32,
    max_tokens: u32,
}

impl LlmTranslator {
    /// Create a translator for the configured provider
    pub fn from_config(config: &TranslationConfig) -> Result<Self> {
        let endpoint = config.get_endpoint();
        Url::parse(&endpoint).map_err(|e| anyhow!("Invalid provider endpoint '{}': {}", endpoint, e))?;
        let timeout = Duration::from_secs(config.get_timeout_secs());
        let model = config.get_model();

        let backend = match config.provider {
            ConfigTranslationProvider::Ollama => TranslatorBackend::Ollama {
                client: Ollama::from_url(endpoint, model, timeout),
            },
            ConfigTranslationProvider::OpenAI => TranslatorBackend::OpenAI {
                client: OpenAI::new(config.get_api_key(), endpoint, timeout),
                model,
            },
            ConfigTranslationProvider::OpenRouter => TranslatorBackend::OpenAI {
                client: OpenAI::new(config.get_api_key(), endpoint, timeout)
                    .with_header("X-Title", "sqlwai"),
                model,
            },
            ConfigTranslationProvider::LMStudio => {
                // LM Studio often doesn't require an API key; use a default if empty
                let api_key = {
                    let k = config.get_api_key();
                    if k.is_empty() { "lm-studio".to_string() } else { k }
                };
                TranslatorBackend::OpenAI {
                    client: OpenAI::new(api_key, endpoint, timeout),
                    model,
                }
            }
            ConfigTranslationProvider::Anthropic => TranslatorBackend::Anthropic {
                client: Anthropic::new(config.get_api_key(), endpoint, timeout),
                model,
            },
        };

        Ok(Self {
            backend,
            prompts: SqlPromptBuilder::new(config.common.system_prompt.clone()),
            temperature: config.common.temperature,
            max_tokens: config.common.max_tokens,
        })
    }

    /// Create a translator over a mock provider
    pub fn with_mock(client: MockProvider) -> Self {
        Self {
            backend: TranslatorBackend::Mock { client },
            prompts: SqlPromptBuilder::default(),
            temperature: 0.0,
            max_tokens: 256,
        }
    }

    /// Check that the provider is reachable
    pub async fn test_connection(&self) -> Result<(), ProviderError> {
        match &self.backend {
            TranslatorBackend::Ollama { client } => client.test_connection().await,
            TranslatorBackend::OpenAI { client, .. } => client.test_connection().await,
            TranslatorBackend::Anthropic { client, .. } => client.test_connection().await,
            TranslatorBackend::Mock { client } => client.test_connection().await,
        }
    }

    async fn complete(&self, system: String, prompt: &str) -> Result<String, ProviderError> {
        match &self.backend {
            TranslatorBackend::Ollama { client } => {
                let request = GenerationRequest::new(client.model(), prompt)
                    .system(system)
                    .temperature(self.temperature)
                    .max_tokens(self.max_tokens);
                let response = client.complete(request).await?;
                Ok(Ollama::extract_text(&response))
            }
            TranslatorBackend::OpenAI { client, model } => {
                let request = OpenAIRequest::new(model.as_str())
                    .add_message("system", system)
                    .add_message("user", prompt)
                    .temperature(self.temperature)
                    .max_tokens(self.max_tokens);
                let response = client.complete(request).await?;
                Ok(OpenAI::extract_text(&response))
            }
            TranslatorBackend::Anthropic { client, model } => {
                let request = AnthropicRequest::new(model.as_str(), self.max_tokens)
                    .system(system)
                    .add_message("user", prompt)
                    .temperature(self.temperature);
                let response = client.complete(request).await?;
                Ok(Anthropic::extract_text(&response))
            }
            TranslatorBackend::Mock { client } => {
                let request = MockRequest {
                    system,
                    prompt: prompt.to_string(),
                };
                let response = client.complete(request).await?;
                Ok(MockProvider::extract_text(&response))
            }
        }
    }
}

#[async_trait]
impl Translator for LlmTranslator {
    async fn translate(
        &self,
        prompt: &str,
        schema: &SchemaSnapshot,
        timeout: Duration,
    ) -> Result<Translation, TranslationError> {
        let system = self.prompts.system_prompt(schema);

        let raw = tokio::time::timeout(timeout, self.complete(system, prompt))
            .await
            .map_err(|_| TranslationError::Timeout(timeout))??;

        let translation = clean_response(&raw)?;
        debug!("Translated '{}' into: {}", prompt, translation.sql);
        Ok(translation)
    }
}
