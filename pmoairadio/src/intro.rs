//! Spoken intro production: a short text from an LLM, then speech synthesis.
//!
//! The text step is optional. When it is disabled or fails, the display
//! label itself is spoken. The synthesis step writes the audio to the
//! staging path handed over by [`crate::IntroHandoff`]; the producer never
//! touches the handoff path.

use crate::config::IntroConfig;
use crate::error::IntroError;
use crate::transliterate::transliterate;
use async_trait::async_trait;
use futures::StreamExt;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Produces an intro audio file for a display label
#[async_trait]
pub trait IntroProducer: Send + Sync {
    /// Writes a complete audio file at `staging`
    async fn produce(&self, label: &str, staging: &Path) -> Result<(), IntroError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Inserts the label into a prompt template (`{track}` placeholder)
pub fn fill_prompt(template: &str, label: &str) -> String {
    if template.contains("{track}") {
        template.replace("{track}", label)
    } else {
        format!("{} {}", template.trim_end(), label)
    }
}

/// LLM + TTS producer talking to HTTP services
pub struct SpeechIntroProducer {
    client: Client,
    config: IntroConfig,
}

impl SpeechIntroProducer {
    pub fn new(config: IntroConfig) -> Result<Self, IntroError> {
        let client = Client::builder()
            .user_agent(concat!("pmoairadio/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout())
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Create a producer with a custom reqwest::Client
    pub fn with_client(client: Client, config: IntroConfig) -> Self {
        Self { client, config }
    }

    fn pick_temperature(&self) -> f32 {
        let (min, max) = (self.config.llm.temperature_min, self.config.llm.temperature_max);
        if min < max {
            rand::rng().random_range(min..max)
        } else {
            min
        }
    }

    /// Text to speak for `label`. Falls back to the label on any failure.
    pub async fn compose_text(&self, label: &str) -> String {
        let llm = &self.config.llm;
        if !llm.enabled {
            return label.to_string();
        }

        let request = GenerateRequest {
            model: &llm.model,
            prompt: fill_prompt(&llm.prompt_template, label),
            stream: false,
            options: GenerateOptions {
                temperature: self.pick_temperature(),
            },
        };

        match self.generate(&request).await {
            Ok(text) if !text.is_empty() => {
                debug!(label, text = %text, "Intro text generated");
                text
            }
            Ok(_) => {
                warn!(label, "LLM returned an empty text, speaking the label");
                label.to_string()
            }
            Err(e) => {
                warn!(label, "LLM request failed, speaking the label: {}", e);
                label.to_string()
            }
        }
    }

    async fn generate(&self, request: &GenerateRequest<'_>) -> Result<String, IntroError> {
        let response = self
            .client
            .post(&self.config.llm.url)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IntroError::Status(response.status().as_u16()));
        }

        let body: GenerateResponse = response.json().await?;
        Ok(body.response.trim().trim_matches('"').trim().to_string())
    }

    /// Synthesizes `text` into `staging`
    pub async fn synthesize(&self, text: &str, staging: &Path) -> Result<(), IntroError> {
        let tts = &self.config.tts;
        let spoken = if tts.transliterate {
            transliterate(text)
        } else {
            text.to_string()
        };

        let mut query: Vec<(&str, &str)> = tts
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        query.push(("text", spoken.as_str()));

        let response = self.client.get(&tts.url).query(&query).send().await?;
        if !response.status().is_success() {
            return Err(IntroError::Status(response.status().as_u16()));
        }

        let mut file = tokio::fs::File::create(staging).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len();
        }

        if written == 0 {
            return Err(IntroError::EmptyAudio);
        }

        file.flush().await?;
        file.sync_all().await?;
        debug!(bytes = written, path = %staging.display(), "Intro audio written");
        Ok(())
    }
}

#[async_trait]
impl IntroProducer for SpeechIntroProducer {
    async fn produce(&self, label: &str, staging: &Path) -> Result<(), IntroError> {
        let text = self.compose_text(label).await;
        self.synthesize(&text, staging).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmConfig, TtsConfig};
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, llm_enabled: bool) -> IntroConfig {
        IntroConfig {
            enabled: true,
            timeout_seconds: 5,
            llm: LlmConfig {
                enabled: llm_enabled,
                url: format!("{}/api/generate", server.uri()),
                model: "test-model".to_string(),
                prompt_template: "Introduce {track}".to_string(),
                temperature_min: 0.5,
                temperature_max: 0.5,
            },
            tts: TtsConfig {
                url: format!("{}/synthesize", server.uri()),
                transliterate: false,
                ..TtsConfig::default()
            },
        }
    }

    #[test]
    fn prompt_template_placeholder() {
        assert_eq!(fill_prompt("Say {track}!", "Nina - Feeling Good"), "Say Nina - Feeling Good!");
        assert_eq!(fill_prompt("Introduce: ", "X"), "Introduce: X");
    }

    #[tokio::test]
    async fn generated_text_is_synthesized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "test-model",
                "prompt": "Introduce Artist - Song",
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "test-model",
                "response": " \"Here is Artist with Song.\" ",
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/synthesize"))
            .and(query_param("speaker", "baya"))
            .and(query_param("sample_rate", "48000"))
            .and(query_param("text", "Here is Artist with Song."))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"RIFF....WAVE".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("intro.part");
        let producer = SpeechIntroProducer::new(config(&server, true)).unwrap();
        producer.produce("Artist - Song", &staging).await.unwrap();

        assert_eq!(std::fs::read(&staging).unwrap(), b"RIFF....WAVE");
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_label() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/synthesize"))
            .and(query_param("text", "Artist - Song"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"wav".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let producer = SpeechIntroProducer::new(config(&server, true)).unwrap();
        producer
            .produce("Artist - Song", &dir.path().join("intro.part"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn disabled_llm_is_never_called() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let producer = SpeechIntroProducer::new(config(&server, false)).unwrap();
        assert_eq!(producer.compose_text("Label").await, "Label");
    }

    #[tokio::test]
    async fn latin_text_is_respelled_for_the_voice() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/synthesize"))
            .and(query_param("text", "шакира - вака вака"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"wav".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = config(&server, false);
        config.tts.transliterate = true;
        let dir = tempfile::tempdir().unwrap();
        let producer = SpeechIntroProducer::new(config).unwrap();
        producer
            .produce("Shakira - Waka Waka", &dir.path().join("intro.part"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn tts_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/synthesize"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let producer = SpeechIntroProducer::new(config(&server, false)).unwrap();
        let err = producer
            .produce("Label", &dir.path().join("intro.part"))
            .await
            .unwrap_err();
        assert!(matches!(err, IntroError::Status(503)));
    }

    #[tokio::test]
    async fn empty_audio_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/synthesize"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let producer = SpeechIntroProducer::new(config(&server, false)).unwrap();
        let err = producer
            .produce("Label", &dir.path().join("intro.part"))
            .await
            .unwrap_err();
        assert!(matches!(err, IntroError::EmptyAudio));
    }
}
