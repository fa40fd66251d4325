use super::config::ProviderConfig;
use super::interface::{SpeechProvider, TtsError, TtsParams};
use crate::utils::http::{request_with_retry, RetryPolicy};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

#[derive(Serialize, Clone)]
struct TtsRequest {
    model: String,
    input: String,
    voice: String,
    response_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
}

/// OpenAI-compatible `/audio/speech` provider. Always asks for WAV.
pub struct OpenAITtsProvider {
    id: String,
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    default_voice: String,
    retry: RetryPolicy,
}

impl OpenAITtsProvider {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        voice: Option<String>,
    ) -> Self {
        Self {
            id: "openai".to_string(),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| "tts-1".to_string()),
            default_voice: voice.unwrap_or_else(|| "alloy".to_string()),
            retry: RetryPolicy::default(),
        }
    }

    /// Construct from a ProviderConfig entry.
    pub fn from_config(config: &ProviderConfig) -> Option<Self> {
        let api_key = config.resolve_api_key()?;
        let mut provider = Self::new(
            api_key,
            config.base_url.clone(),
            config.model.clone(),
            config.default_voice.clone(),
        );
        provider.id = config.id.clone();
        provider.retry = config.retry_policy();
        match Client::builder().timeout(config.timeout()).build() {
            Ok(client) => provider.client = client,
            Err(e) => tracing::warn!(
                provider = %config.id,
                timeout_secs = config.timeout_secs,
                error = %e,
                "could not apply configured timeout, using the default client"
            ),
        }
        Some(provider)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn voice_for(&self, params: &TtsParams) -> String {
        params
            .voice
            .as_deref()
            .map(|v| v.strip_prefix("openai_").unwrap_or(v))
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.default_voice)
            .to_string()
    }
}

#[async_trait]
impl SpeechProvider for OpenAITtsProvider {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn synthesize(&self, text: &str, params: &TtsParams) -> Result<Vec<u8>, TtsError> {
        let url = format!("{}/audio/speech", self.base_url);
        let body = TtsRequest {
            model: self.model.clone(),
            input: text.to_string(),
            voice: self.voice_for(params),
            response_format: "wav".to_string(),
            speed: params.speed,
        };

        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let response = request_with_retry(
            move || {
                let request = client
                    .post(&url)
                    .header("Authorization", format!("Bearer {}", api_key))
                    .json(&body);
                async move { request.send().await }
            },
            self.retry,
        )
        .await
        .map_err(|e| TtsError::SynthesisFailed(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(TtsError::SynthesisFailed(format!(
                "speech API error {}: {}",
                status, error_text
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TtsError::SynthesisFailed(format!("Bytes error: {}", e)))?;
        tracing::debug!(provider = %self.id, bytes = bytes.len(), "speech synthesized");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> OpenAITtsProvider {
        OpenAITtsProvider::new(
            "sk-test".into(),
            Some(format!("{}/v1", server.uri())),
            None,
            Some("nova".into()),
        )
        .with_retry(RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        })
    }

    #[tokio::test]
    async fn posts_wav_request_and_returns_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "input": "hello",
                "voice": "shimmer",
                "response_format": "wav"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let params = TtsParams {
            voice: Some("openai_shimmer".into()),
            speed: None,
        };
        let audio = provider.synthesize("hello", &params).await.unwrap();
        assert_eq!(audio, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8]))
            .mount(&server)
            .await;

        let audio = provider_for(&server)
            .synthesize("hi", &TtsParams::default())
            .await
            .unwrap();
        assert_eq!(audio, vec![9]);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .synthesize("hi", &TtsParams::default())
            .await
            .unwrap_err();
        match err {
            TtsError::SynthesisFailed(msg) => assert!(msg.contains("bad key")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn configured_timeout_and_retries_apply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![1u8])
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let config: ProviderConfig = serde_json::from_value(serde_json::json!({
            "id": "slow",
            "type": "openai",
            "api_key": "sk-test",
            "base_url": format!("{}/v1", server.uri()),
            "timeout_secs": 1,
            "max_retries": 0
        }))
        .unwrap();
        let provider = OpenAITtsProvider::from_config(&config).unwrap();
        assert_eq!(provider.id(), "slow");

        let started = std::time::Instant::now();
        let err = provider
            .synthesize("hi", &TtsParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TtsError::SynthesisFailed(_)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
