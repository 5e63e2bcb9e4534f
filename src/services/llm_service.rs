use reqwest::header::RETRY_AFTER;
use reqwest::{Client as HttpClient, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::EnrichmentError;
use crate::services::summarizer::SemanticEnricher;

/// LLM gateway client producing schema summaries and example questions
pub struct LlmService {
    gateway_url: String,
    api_key: Option<String>,
    http_client: HttpClient,
    timeout_ms: u64,
}

impl LlmService {
    pub fn new(config: &LlmConfig) -> Result<Self, EnrichmentError> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EnrichmentError::Provider(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            gateway_url: config.gateway_url.clone(),
            api_key: config.api_key.clone(),
            http_client,
            timeout_ms: config.timeout_secs * 1000,
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.gateway_url.trim().is_empty()
    }

    /// Prompt asking for a summary paragraph and a few example questions
    pub fn build_prompt(facts_text: &str) -> String {
        format!(
            r#"You are a graph database expert. Below is the structure of a property graph: node labels with approximate counts and properties, relationship types with the label patterns they connect, and a few sampled values.

{facts_text}
Instructions:
1. Describe in 2-4 sentences what domain this graph models and how the main entities relate
2. Suggest up to 3 natural-language questions a user could answer with this graph
3. Only mention labels, relationship types and properties listed above
4. Do not include markdown formatting

Answer in exactly this format:
SUMMARY: <description>
QUESTIONS:
- <question>
- <question>
- <question>"#,
            facts_text = facts_text
        )
    }

    /// Pull the generated text out of a gateway response
    fn extract_text(body: &Value) -> Option<&str> {
        body["text"]
            .as_str()
            .or_else(|| body["content"].as_str())
            .or_else(|| body["response"].as_str())
            .or_else(|| body["choices"][0]["text"].as_str())
            .or_else(|| body["choices"][0]["message"]["content"].as_str())
    }

    fn parse_retry_after(value: Option<&str>) -> Option<u64> {
        value.and_then(|v| v.trim().parse::<u64>().ok())
    }

    async fn call_llm_api(&self, prompt: &str) -> Result<String, EnrichmentError> {
        if !self.is_configured() {
            return Err(EnrichmentError::NotConfigured(
                "LLM_GATEWAY_URL is not set".to_string(),
            ));
        }

        let mut request = self.http_client.post(&self.gateway_url).json(&json!({
            "prompt": prompt,
            "max_tokens": 400,
            "temperature": 0.0,
        }));

        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EnrichmentError::Timeout(self.timeout_ms)
            } else {
                EnrichmentError::Provider(format!("Failed to call LLM service: {}", e))
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = Self::parse_retry_after(
                response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            return Err(EnrichmentError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EnrichmentError::Provider(format!(
                "LLM service returned error {}: {}",
                status, error_text
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| {
                EnrichmentError::Provider(format!("Failed to parse LLM response: {}", e))
            })?;

        Self::extract_text(&body)
            .map(|text| text.trim().to_string())
            .ok_or_else(|| {
                EnrichmentError::Provider("LLM response does not contain text".to_string())
            })
    }
}

#[async_trait::async_trait]
impl SemanticEnricher for LlmService {
    async fn summarize_facts(&self, facts_text: &str) -> Result<String, EnrichmentError> {
        let prompt = Self::build_prompt(facts_text);
        self.call_llm_api(&prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(gateway_url: &str) -> LlmConfig {
        LlmConfig {
            enabled: true,
            gateway_url: gateway_url.to_string(),
            api_key: None,
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_prompt_contains_facts() {
        let prompt =
            LlmService::build_prompt("## Node Labels (approximate counts)\n- User (~120 nodes)\n");
        assert!(prompt.contains("- User (~120 nodes)"));
        assert!(prompt.contains("SUMMARY:"));
        assert!(prompt.contains("QUESTIONS:"));
    }

    #[test]
    fn test_extract_text_variants() {
        assert_eq!(LlmService::extract_text(&json!({"text": "a"})), Some("a"));
        assert_eq!(LlmService::extract_text(&json!({"content": "b"})), Some("b"));
        assert_eq!(
            LlmService::extract_text(&json!({"choices": [{"message": {"content": "c"}}]})),
            Some("c")
        );
        assert_eq!(LlmService::extract_text(&json!({"other": 1})), None);
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(LlmService::parse_retry_after(Some("30")), Some(30));
        assert_eq!(LlmService::parse_retry_after(Some("soon")), None);
        assert_eq!(LlmService::parse_retry_after(None), None);
    }

    #[tokio::test]
    async fn test_unconfigured_gateway() {
        let service = LlmService::new(&config("")).unwrap();
        assert!(!service.is_configured());
        let result = service.summarize_facts("facts").await;
        assert!(matches!(result, Err(EnrichmentError::NotConfigured(_))));
    }
}
