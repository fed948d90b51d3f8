//! Response generation providers.
//!
//! The chat path needs one capability from a provider:
//! `chat(message, history) -> text`. Both the OpenAI chat-completions API
//! and Ollama's `/api/chat` are supported, selected by `[generation]`
//! config. Retrieved passages, when present, ride along as a system
//! message built by [`build_context_prompt`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::error::PipelineError;
use crate::models::RetrievedChunk;

/// One turn of conversation history, in the shape both providers accept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Render retrieved passages into the system prompt for a RAG turn.
pub fn build_context_prompt(chunks: &[RetrievedChunk]) -> String {
    let mut prompt = String::from(
        "Use the following document passages to answer the user. \
         If the passages do not contain the answer, say so instead of guessing.\n",
    );
    for c in chunks {
        prompt.push_str(&format!(
            "\n[document {} passage {}]\n{}\n",
            c.document_id, c.chunk_index, c.text
        ));
    }
    prompt
}

/// Generate a response to `message` given prior `history` and an optional
/// system context (the rendered passages).
pub async fn chat(
    config: &GenerationConfig,
    message: &str,
    history: &[ChatMessage],
    context: Option<&str>,
) -> Result<String, PipelineError> {
    let messages = assemble_messages(message, history, context);

    match config.provider.as_str() {
        "openai" => chat_openai(config, &messages).await,
        "ollama" => chat_ollama(config, &messages).await,
        other => Err(PipelineError::Validation(format!(
            "Unknown generation provider: {}",
            other
        ))),
    }
}

fn assemble_messages(
    message: &str,
    history: &[ChatMessage],
    context: Option<&str>,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    if let Some(context) = context {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: context.to_string(),
        });
    }
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage {
        role: "user".to_string(),
        content: message.to_string(),
    });
    messages
}

async fn chat_openai(
    config: &GenerationConfig,
    messages: &[ChatMessage],
) -> Result<String, PipelineError> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| PipelineError::Generation("OPENAI_API_KEY not set".to_string()))?;

    let base = config.openai_url.as_deref().unwrap_or("https://api.openai.com");
    let client = http_client(config.timeout_secs)?;

    let body = serde_json::json!({
        "model": config.openai_model,
        "messages": messages,
    });

    let response = client
        .post(format!("{}/v1/chat/completions", base))
        .header("Authorization", format!("Bearer {}", api_key))
        .json(&body)
        .send()
        .await
        .map_err(|e| PipelineError::Generation(format!("OpenAI request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(PipelineError::Generation(format!(
            "OpenAI API error {}: {}",
            status, body_text
        )));
    }

    let json: serde_json::Value = response
        .json()
        .await
        .map_err(|e| PipelineError::Generation(format!("OpenAI response: {}", e)))?;

    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| PipelineError::Generation("malformed OpenAI chat response".to_string()))
}

async fn chat_ollama(
    config: &GenerationConfig,
    messages: &[ChatMessage],
) -> Result<String, PipelineError> {
    let client = http_client(config.timeout_secs)?;
    let url = format!("{}/api/chat", config.ollama_url);

    let body = serde_json::json!({
        "model": config.ollama_model,
        "messages": messages,
        "stream": false,
    });

    let response = client.post(&url).json(&body).send().await.map_err(|e| {
        PipelineError::Generation(format!(
            "Ollama request failed (is Ollama running at {}?): {}",
            url, e
        ))
    })?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(PipelineError::Generation(format!(
            "Ollama API error {}: {}",
            status, body_text
        )));
    }

    let json: serde_json::Value = response
        .json()
        .await
        .map_err(|e| PipelineError::Generation(format!("Ollama response: {}", e)))?;

    json.pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| PipelineError::Generation("malformed Ollama chat response".to_string()))
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, PipelineError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PipelineError::Generation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn context_prompt_carries_passages() {
        let chunks = vec![RetrievedChunk {
            document_id: 7,
            chunk_index: 2,
            text: "gradient descent minimizes loss".to_string(),
            similarity: 0.91,
        }];
        let prompt = build_context_prompt(&chunks);
        assert!(prompt.contains("gradient descent minimizes loss"));
        assert!(prompt.contains("document 7 passage 2"));
    }

    #[test]
    fn messages_order_is_system_history_user() {
        let history = vec![ChatMessage {
            role: "assistant".to_string(),
            content: "earlier answer".to_string(),
        }];
        let messages = assemble_messages("question", &history, Some("context"));
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "assistant", "user"]);
        assert_eq!(messages.last().unwrap().content, "question");
    }

    #[test]
    fn no_context_means_no_system_message() {
        let messages = assemble_messages("question", &[], None);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
    }

    #[tokio::test]
    async fn ollama_chat_parses_message_content() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(200).json_body(serde_json::json!({
                "message": { "role": "assistant", "content": "the answer" }
            }));
        });

        let mut config = GenerationConfig::default();
        config.ollama_url = server.base_url();

        let reply = chat(&config, "question", &[], None).await.unwrap();
        assert_eq!(reply, "the answer");
    }

    #[tokio::test]
    async fn ollama_error_status_surfaces_as_generation_error() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(500).body("model crashed");
        });

        let mut config = GenerationConfig::default();
        config.ollama_url = server.base_url();

        let err = chat(&config, "question", &[], None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Generation(_)));
    }
}
