use super::{AiClient, AiProvider, AiResponse};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiClient {
    api_key: String,
    model: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: &str, timeout: Duration) -> Self {
        Self {
            api_key,
            model: model.to_string(),
            client: Client::builder()
                .timeout(timeout)
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl AiClient for OpenAiClient {
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
        let mut messages = Vec::new();
        if !system_prompt.is_empty() {
            messages.push(json!({ "role": "system", "content": system_prompt }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "max_completion_tokens": max_tokens,
        });

        let response = match self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return AiResponse::failure(AiProvider::OpenAi, &self.model, e.to_string()),
        };

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return AiResponse::failure(
                AiProvider::OpenAi,
                &self.model,
                format!("http {}: {:.120}", status, detail),
            );
        }

        let payload: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return AiResponse::failure(AiProvider::OpenAi, &self.model, e.to_string()),
        };

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let tokens = payload["usage"]["total_tokens"].as_u64().unwrap_or(0);

        AiResponse::success(AiProvider::OpenAi, &self.model, content, tokens)
    }
}
