use super::{AiClient, AiProvider, AiResponse};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    api_key: String,
    model: String,
    client: Client,
}

impl AnthropicClient {
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
impl AiClient for AnthropicClient {
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
        let mut body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        if !system_prompt.is_empty() {
            body["system"] = json!(system_prompt);
        }

        let response = match self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return AiResponse::failure(AiProvider::Anthropic, &self.model, e.to_string()),
        };

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return AiResponse::failure(
                AiProvider::Anthropic,
                &self.model,
                format!("http {}: {:.120}", status, detail),
            );
        }

        let payload: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return AiResponse::failure(AiProvider::Anthropic, &self.model, e.to_string()),
        };

        let content = payload["content"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let tokens = payload["usage"]["input_tokens"].as_u64().unwrap_or(0)
            + payload["usage"]["output_tokens"].as_u64().unwrap_or(0);

        AiResponse::success(AiProvider::Anthropic, &self.model, content, tokens)
    }
}
