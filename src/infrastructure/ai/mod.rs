//! Unified AI gateway over multiple completion providers.
//!
//! One `complete` entry point with an ordered fallback chain. Each provider
//! carries its own hard timeout; the gateway itself never retries — the next
//! provider in the chain is the retry.

mod anthropic;
mod extract;
mod gemini;
mod openai;

pub use extract::try_parse_json;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AiProvider {
    GeminiFlash,
    GeminiPro,
    OpenAi,
    Anthropic,
}

impl fmt::Display for AiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AiProvider::GeminiFlash => write!(f, "gemini_flash"),
            AiProvider::GeminiPro => write!(f, "gemini_pro"),
            AiProvider::OpenAi => write!(f, "openai"),
            AiProvider::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// Fallback order appended after the preferred provider.
const FALLBACK_ORDER: [AiProvider; 4] = [
    AiProvider::GeminiPro,
    AiProvider::GeminiFlash,
    AiProvider::OpenAi,
    AiProvider::Anthropic,
];

/// Standardized completion response.
#[derive(Debug, Clone)]
pub struct AiResponse {
    pub provider: AiProvider,
    pub model: String,
    pub content: String,
    pub parsed_json: Option<Value>,
    pub tokens_used: u64,
    pub success: bool,
    pub error: Option<String>,
}

impl AiResponse {
    pub fn failure(provider: AiProvider, model: &str, error: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.to_string(),
            content: String::new(),
            parsed_json: None,
            tokens_used: 0,
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn success(provider: AiProvider, model: &str, content: String, tokens_used: u64) -> Self {
        let parsed_json = try_parse_json(&content);
        Self {
            provider,
            model: model.to_string(),
            content,
            parsed_json,
            tokens_used,
            success: true,
            error: None,
        }
    }
}

/// One provider client. Implementations own transport and timeout and report
/// failure through the response rather than an error type.
#[async_trait]
pub trait AiClient: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(
        &self,
        prompt: &str,
        system_prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> AiResponse;
}

pub struct AiGateway {
    clients: HashMap<AiProvider, Arc<dyn AiClient>>,
}

impl AiGateway {
    /// Discover providers from the environment. A missing key simply leaves
    /// that provider out of the chain.
    pub fn from_env() -> Self {
        let mut clients: HashMap<AiProvider, Arc<dyn AiClient>> = HashMap::new();

        if let Ok(key) = env::var("GEMINI_API_KEY") {
            clients.insert(
                AiProvider::GeminiFlash,
                Arc::new(gemini::GeminiClient::new(
                    key.clone(),
                    "gemini-2.5-flash",
                    Duration::from_secs(30),
                )),
            );
            clients.insert(
                AiProvider::GeminiPro,
                Arc::new(gemini::GeminiClient::new(
                    key,
                    "gemini-2.5-pro",
                    Duration::from_secs(90),
                )),
            );
            info!("[ai-gateway] gemini flash + pro initialized");
        }

        if let Ok(key) = env::var("OPENAI_API_KEY") {
            clients.insert(
                AiProvider::OpenAi,
                Arc::new(openai::OpenAiClient::new(key, "gpt-4o", Duration::from_secs(30))),
            );
            info!("[ai-gateway] openai client initialized");
        }

        if let Ok(key) = env::var("ANTHROPIC_API_KEY") {
            clients.insert(
                AiProvider::Anthropic,
                Arc::new(anthropic::AnthropicClient::new(
                    key,
                    "claude-sonnet-4-5",
                    Duration::from_secs(30),
                )),
            );
            info!("[ai-gateway] anthropic client initialized");
        }

        let available: Vec<String> = clients.keys().map(|p| p.to_string()).collect();
        info!("[ai-gateway] {} providers ready: {}", clients.len(), available.join(", "));

        Self { clients }
    }

    /// Explicit client set; used by tests and by callers that need custom
    /// transports.
    pub fn with_clients(clients: Vec<(AiProvider, Arc<dyn AiClient>)>) -> Self {
        Self {
            clients: clients.into_iter().collect(),
        }
    }

    pub fn available_providers(&self) -> Vec<AiProvider> {
        self.clients.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Run the fallback chain: preferred provider first, then the standard
    /// order, skipping duplicates and unconfigured providers. First success
    /// wins; if everything fails the response is a failure with empty content.
    pub async fn complete(
        &self,
        prompt: &str,
        system_prompt: &str,
        preferred: AiProvider,
        temperature: f64,
        max_tokens: u32,
    ) -> AiResponse {
        let mut chain: Vec<AiProvider> = vec![preferred];
        for provider in FALLBACK_ORDER {
            if !chain.contains(&provider) && self.clients.contains_key(&provider) {
                chain.push(provider);
            }
        }

        debug!(
            "[ai-gateway] fallback chain: {} (temp={})",
            chain
                .iter()
                .filter(|p| self.clients.contains_key(p))
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(" -> "),
            temperature
        );

        for (attempt, provider) in chain.iter().enumerate() {
            let Some(client) = self.clients.get(provider) else {
                continue;
            };

            let label = if attempt == 0 { "primary" } else { "fallback" };
            info!(
                "[ai-gateway] {}: calling {} (max_tokens={})",
                label, provider, max_tokens
            );

            let started = Instant::now();
            let mut response = client
                .complete(prompt, system_prompt, temperature, max_tokens)
                .await;
            let elapsed = started.elapsed().as_millis();

            if response.success && response.content.trim().is_empty() {
                response = AiResponse::failure(*provider, client.model(), "empty content");
            }

            if response.success {
                let json_status = if response.parsed_json.is_some() {
                    "json parsed"
                } else {
                    "plain text"
                };
                info!(
                    "[ai-gateway] {} ok ({}ms, {} tokens, {})",
                    provider, elapsed, response.tokens_used, json_status
                );
                return response;
            }

            warn!(
                "[ai-gateway] {} failed ({}ms): {}",
                provider,
                elapsed,
                response.error.as_deref().unwrap_or("unknown error")
            );
        }

        error!("[ai-gateway] all providers failed");
        AiResponse::failure(preferred, "none", "all providers failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedClient {
        model: String,
        response: AiResponse,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AiClient for ScriptedClient {
        fn model(&self) -> &str {
            &self.model
        }

        async fn complete(&self, _: &str, _: &str, _: f64, _: u32) -> AiResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone()
        }
    }

    fn scripted(
        provider: AiProvider,
        response: AiResponse,
    ) -> (Arc<AtomicUsize>, (AiProvider, Arc<dyn AiClient>)) {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = Arc::new(ScriptedClient {
            model: "test-model".to_string(),
            response,
            calls: calls.clone(),
        });
        (calls, (provider, client))
    }

    #[tokio::test]
    async fn preferred_provider_wins_when_healthy() {
        let (flash_calls, flash) = scripted(
            AiProvider::GeminiFlash,
            AiResponse::success(AiProvider::GeminiFlash, "test-model", "{\"nota\": 8}".into(), 10),
        );
        let (pro_calls, pro) = scripted(
            AiProvider::GeminiPro,
            AiResponse::success(AiProvider::GeminiPro, "test-model", "{}".into(), 10),
        );
        let gateway = AiGateway::with_clients(vec![flash, pro]);

        let response = gateway
            .complete("p", "", AiProvider::GeminiFlash, 0.3, 500)
            .await;
        assert!(response.success);
        assert_eq!(response.provider, AiProvider::GeminiFlash);
        assert_eq!(response.parsed_json.unwrap()["nota"], 8);
        assert_eq!(flash_calls.load(Ordering::SeqCst), 1);
        assert_eq!(pro_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_back_past_failures_and_empty_content() {
        let (_, failing) = scripted(
            AiProvider::GeminiPro,
            AiResponse::failure(AiProvider::GeminiPro, "test-model", "timeout"),
        );
        let (_, empty) = scripted(
            AiProvider::GeminiFlash,
            AiResponse::success(AiProvider::GeminiFlash, "test-model", "   ".into(), 3),
        );
        let (openai_calls, good) = scripted(
            AiProvider::OpenAi,
            AiResponse::success(AiProvider::OpenAi, "test-model", "fine".into(), 5),
        );
        let gateway = AiGateway::with_clients(vec![failing, empty, good]);

        let response = gateway
            .complete("p", "s", AiProvider::GeminiPro, 0.2, 2500)
            .await;
        assert!(response.success);
        assert_eq!(response.provider, AiProvider::OpenAi);
        assert_eq!(openai_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_failures_yield_failed_response() {
        let (_, failing) = scripted(
            AiProvider::Anthropic,
            AiResponse::failure(AiProvider::Anthropic, "test-model", "500"),
        );
        let gateway = AiGateway::with_clients(vec![failing]);

        let response = gateway
            .complete("p", "", AiProvider::Anthropic, 0.7, 100)
            .await;
        assert!(!response.success);
        assert!(response.content.is_empty());
    }

    #[tokio::test]
    async fn unconfigured_preferred_provider_is_skipped() {
        let (_, only) = scripted(
            AiProvider::Anthropic,
            AiResponse::success(AiProvider::Anthropic, "test-model", "ok".into(), 2),
        );
        let gateway = AiGateway::with_clients(vec![only]);

        let response = gateway
            .complete("p", "", AiProvider::GeminiFlash, 0.3, 100)
            .await;
        assert!(response.success);
        assert_eq!(response.provider, AiProvider::Anthropic);
    }
}
