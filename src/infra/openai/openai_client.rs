// OpenAI implementation of the `LanguageModelProvider` port. Calls the
// chat-completions endpoint with a strict `json_schema` response format so
// the reply is forced into the invoice shape the structurer expects; the
// structurer still re-validates on its side.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::core::structuring::{
    LanguageModelProvider, ModelReply, StructuringConfig, StructuringError, StructuringRequest,
    TokenUsage,
};

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiClient {
    http: Client,
    api_key: String,
    config: StructuringConfig,
}

impl OpenAiClient {
    pub fn new(http: Client, api_key: String, config: StructuringConfig) -> Self {
        Self {
            http,
            api_key,
            config,
        }
    }
}

#[async_trait]
impl LanguageModelProvider for OpenAiClient {
    async fn complete_structured(
        &self,
        request: &StructuringRequest,
    ) -> Result<ModelReply, StructuringError> {
        let mut payload = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "invoice_extraction",
                    "strict": true,
                    "schema": request.schema,
                }
            }
        });
        if let Some(max_tokens) = self.config.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }

        let response = self
            .http
            .post(CHAT_COMPLETIONS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| StructuringError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
            return Err(StructuringError::Provider(format!(
                "OpenAI API error {status}: {body}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| StructuringError::Provider(e.to_string()))?;

        parse_reply(&body)
    }
}

/// Extracts the message content and token usage from a chat-completions
/// response body.
fn parse_reply(body: &serde_json::Value) -> Result<ModelReply, StructuringError> {
    let content = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| {
            StructuringError::Provider("response has no message content".to_string())
        })?
        .to_string();

    let usage = &body["usage"];
    let usage = TokenUsage {
        input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
        cached_input_tokens: usage["prompt_tokens_details"]["cached_tokens"]
            .as_u64()
            .unwrap_or(0),
        output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
    };

    Ok(ModelReply { content, usage })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_and_usage() {
        let body = json!({
            "choices": [
                { "message": { "role": "assistant", "content": "{\"vendor\":\"ACME\"}" } }
            ],
            "usage": {
                "prompt_tokens": 1200,
                "completion_tokens": 150,
                "prompt_tokens_details": { "cached_tokens": 800 }
            }
        });

        let reply = parse_reply(&body).unwrap();
        assert_eq!(reply.content, "{\"vendor\":\"ACME\"}");
        assert_eq!(reply.usage.input_tokens, 1200);
        assert_eq!(reply.usage.cached_input_tokens, 800);
        assert_eq!(reply.usage.output_tokens, 150);
    }

    #[test]
    fn missing_content_is_a_provider_error() {
        let body = json!({ "choices": [] });
        assert!(matches!(
            parse_reply(&body).unwrap_err(),
            StructuringError::Provider(_)
        ));
    }

    #[test]
    fn absent_usage_defaults_to_zero() {
        let body = json!({
            "choices": [ { "message": { "content": "{}" } } ]
        });
        let reply = parse_reply(&body).unwrap();
        assert_eq!(reply.usage.input_tokens, 0);
        assert_eq!(reply.usage.output_tokens, 0);
    }
}
