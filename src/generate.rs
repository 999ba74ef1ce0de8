//! Answer generation from retrieved chunks.
//!
//! A [`Generator`] turns `(query, ranked chunk texts)` into free text.
//! The retrieved chunks go into the system message; the query is the
//! user message.
//!
//! - **[`OllamaGenerator`]**: `POST /api/chat` on a local Ollama.
//! - **[`OpenAIGenerator`]**: chat completions API; requires `OPENAI_API_KEY`.
//! - **[`DisabledGenerator`]**: no model; answers with the context itself.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::config::{Config, GenerationConfig};
use crate::engine::SearchEngine;
use crate::http::post_with_retry;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_OLLAMA_MODEL: &str = "mistral";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

/// System prompt carrying the retrieved context.
pub fn system_prompt(context: &[String]) -> String {
    format!(
        "You are a movie recommendation assistant.\n\
         Use the provided context to answer.\n\n\
         Context:\n{}",
        context.join("\n\n")
    )
}

pub fn build_messages(query: &str, context: &[String]) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: "system",
            content: system_prompt(context),
        },
        ChatMessage {
            role: "user",
            content: query.to_string(),
        },
    ]
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, query: &str, context: &[String]) -> Result<String>;
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _query: &str, context: &[String]) -> Result<String> {
        if context.is_empty() {
            return Ok("No matching films found.".to_string());
        }
        Ok(context.join("\n\n"))
    }
}

pub struct OllamaGenerator {
    model: String,
    url: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn name(&self) -> &str {
        &self.model
    }
    async fn generate(&self, query: &str, context: &[String]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": build_messages(query, context),
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        });
        let json = post_with_retry(
            &self.client,
            &format!("{}/api/chat", self.url.trim_end_matches('/')),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama chat response: missing message.content"))
    }
}

pub struct OpenAIGenerator {
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn name(&self) -> &str {
        &self.model
    }
    async fn generate(&self, query: &str, context: &[String]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": build_messages(query, context),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let json = post_with_retry(
            &self.client,
            "https://api.openai.com/v1/chat/completions",
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI chat response: missing choices[0]"))
    }
}

pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "ollama" => Ok(Box::new(OllamaGenerator::new(config)?)),
        "openai" => Ok(Box::new(OpenAIGenerator::new(config)?)),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}

/// Retrieve `top_k` chunks for `query` and generate an answer from them.
pub async fn answer(
    engine: &SearchEngine,
    generator: &dyn Generator,
    query: &str,
    top_k: usize,
) -> Result<String> {
    let results = engine.search(query, top_k).await?;
    let context: Vec<String> = results.into_iter().map(|r| r.chunk_text).collect();
    tracing::debug!(chunks = context.len(), generator = generator.name(), "generating answer");
    generator.generate(query, &context).await
}

/// Run `filmrag ask`.
pub async fn run_ask(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let engine = SearchEngine::from_config(config)?;
    let generator = create_generator(&config.generation)?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    let response = answer(&engine, generator.as_ref(), query, top_k).await?;
    println!("{}", response);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_layout() {
        let prompt = system_prompt(&["Heat: thieves".to_string(), "Heat (1995)".to_string()]);
        assert_eq!(
            prompt,
            "You are a movie recommendation assistant.\n\
             Use the provided context to answer.\n\n\
             Context:\nHeat: thieves\n\nHeat (1995)"
        );
    }

    #[test]
    fn test_messages_roles() {
        let messages = build_messages("a heist film?", &[]);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[1].content, "a heist film?");
    }

    #[tokio::test]
    async fn test_disabled_generator_echoes_context() {
        let out = DisabledGenerator
            .generate("q", &["one".to_string(), "two".to_string()])
            .await
            .unwrap();
        assert_eq!(out, "one\n\ntwo");
    }

    #[test]
    fn test_unknown_provider() {
        let config = GenerationConfig {
            provider: "llama".to_string(),
            ..Default::default()
        };
        assert!(create_generator(&config).is_err());
    }
}
