use super::{AiClient, AiProvider, AiResponse};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Gemini generateContent client. Flash and Pro share this type and differ
/// only in model name and timeout.
pub struct GeminiClient {
    api_key: String,
    model: String,
    provider: AiProvider,
    client: Client,
}

impl GeminiClient {
    pub fn new(api_key: String, model: &str, timeout: Duration) -> Self {
        let provider = if model.contains("pro") {
            AiProvider::GeminiPro
        } else {
            AiProvider::GeminiFlash
        };
        Self {
            api_key,
            model: model.to_string(),
            provider,
            client: Client::builder()
                .timeout(timeout)
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl AiClient for GeminiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        prompt: &str,
        system_prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> AiResponse {
        let full_prompt = if system_prompt.is_empty() {
            prompt.to_string()
        } else {
            format!("{}\n\n{}", system_prompt, prompt)
        };

        let body = json!({
            "contents": [{ "parts": [{ "text": full_prompt }] }],
            "generationConfig": {
                "temperature": temperature,
                "maxOutputTokens": max_tokens,
            }
        });

        let url = format!("{}/{}:generateContent?key={}", API_BASE, self.model, self.api_key);

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => return AiResponse::failure(self.provider, &self.model, e.to_string()),
        };

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return AiResponse::failure(
                self.provider,
                &self.model,
                format!("http {}: {:.120}", status, detail),
            );
        }

        let payload: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return AiResponse::failure(self.provider, &self.model, e.to_string()),
        };

        // Concatenate every text part of the first candidate.
        let content = payload["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let tokens = payload["usageMetadata"]["totalTokenCount"]
            .as_u64()
            .unwrap_or(0);

        AiResponse::success(self.provider, &self.model, content, tokens)
    }
}
