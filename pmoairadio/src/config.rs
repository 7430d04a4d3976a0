//! Typed view of the `radio` configuration subtree.
//!
//! Every field carries a serde default so a partial (or absent) YAML section
//! still yields a usable configuration. Directory keys (`music_dir`,
//! `segments_dir`, `work_dir`) are not part of these structs: they are
//! managed directories resolved through [`crate::AiRadioConfigExt`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Top-level `radio` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    #[serde(default = "RadioConfig::default_idle_poll_seconds")]
    pub idle_poll_seconds: u64,
    #[serde(default = "RadioConfig::default_recent_tracks")]
    pub recent_tracks: usize,
    #[serde(default = "RadioConfig::default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub intro: IntroConfig,
}

impl RadioConfig {
    const fn default_idle_poll_seconds() -> u64 {
        5
    }

    const fn default_recent_tracks() -> usize {
        20
    }

    fn default_extensions() -> Vec<String> {
        ["mp3", "m4a", "flac", "ogg", "wav"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_secs(self.idle_poll_seconds.max(1))
    }

    pub fn load_from_pmoconfig() -> anyhow::Result<Self> {
        let cfg = pmoconfig::get_config();
        Ok(cfg.get_section(&["radio"]))
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            idle_poll_seconds: Self::default_idle_poll_seconds(),
            recent_tracks: Self::default_recent_tracks(),
            extensions: Self::default_extensions(),
            transcoder: TranscoderConfig::default(),
            intro: IntroConfig::default(),
        }
    }
}

/// ffmpeg / ffprobe invocation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    #[serde(default = "TranscoderConfig::default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "TranscoderConfig::default_ffprobe_path")]
    pub ffprobe_path: String,
    #[serde(default = "TranscoderConfig::default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "TranscoderConfig::default_bitrate")]
    pub bitrate: String,
    #[serde(default = "TranscoderConfig::default_segment_seconds")]
    pub segment_seconds: u32,
    #[serde(default = "TranscoderConfig::default_playlist_size")]
    pub playlist_size: u32,
    /// Read input at native frame rate (`-re`), required for live output
    #[serde(default = "TranscoderConfig::default_realtime")]
    pub realtime: bool,
    #[serde(default = "TranscoderConfig::default_intro_gain")]
    pub intro_gain: f32,
    #[serde(default = "TranscoderConfig::default_intro_delay_ms")]
    pub intro_delay_ms: u64,
}

impl TranscoderConfig {
    fn default_ffmpeg_path() -> String {
        "ffmpeg".to_string()
    }

    fn default_ffprobe_path() -> String {
        "ffprobe".to_string()
    }

    fn default_audio_codec() -> String {
        "aac".to_string()
    }

    fn default_bitrate() -> String {
        "128k".to_string()
    }

    const fn default_segment_seconds() -> u32 {
        2
    }

    const fn default_playlist_size() -> u32 {
        5
    }

    const fn default_realtime() -> bool {
        true
    }

    const fn default_intro_gain() -> f32 {
        5.0
    }

    const fn default_intro_delay_ms() -> u64 {
        1000
    }
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: Self::default_ffmpeg_path(),
            ffprobe_path: Self::default_ffprobe_path(),
            audio_codec: Self::default_audio_codec(),
            bitrate: Self::default_bitrate(),
            segment_seconds: Self::default_segment_seconds(),
            playlist_size: Self::default_playlist_size(),
            realtime: Self::default_realtime(),
            intro_gain: Self::default_intro_gain(),
            intro_delay_ms: Self::default_intro_delay_ms(),
        }
    }
}

/// Spoken intro production.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntroConfig {
    #[serde(default = "IntroConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "IntroConfig::default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tts: TtsConfig,
}

impl IntroConfig {
    const fn default_enabled() -> bool {
        true
    }

    const fn default_timeout_seconds() -> u64 {
        90
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for IntroConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            timeout_seconds: Self::default_timeout_seconds(),
            llm: LlmConfig::default(),
            tts: TtsConfig::default(),
        }
    }
}

/// Text generation (Ollama-compatible `/api/generate`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "LlmConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "LlmConfig::default_url")]
    pub url: String,
    #[serde(default = "LlmConfig::default_model")]
    pub model: String,
    /// `{track}` is replaced by the display label
    #[serde(default = "LlmConfig::default_prompt_template")]
    pub prompt_template: String,
    #[serde(default = "LlmConfig::default_temperature_min")]
    pub temperature_min: f32,
    #[serde(default = "LlmConfig::default_temperature_max")]
    pub temperature_max: f32,
}

impl LlmConfig {
    const fn default_enabled() -> bool {
        true
    }

    fn default_url() -> String {
        "http://localhost:11434/api/generate".to_string()
    }

    fn default_model() -> String {
        "llama3".to_string()
    }

    fn default_prompt_template() -> String {
        "You are a radio host. In one or two short sentences, introduce the next song \
         without any preamble or quotes: {track}"
            .to_string()
    }

    const fn default_temperature_min() -> f32 {
        0.2
    }

    const fn default_temperature_max() -> f32 {
        1.0
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            url: Self::default_url(),
            model: Self::default_model(),
            prompt_template: Self::default_prompt_template(),
            temperature_min: Self::default_temperature_min(),
            temperature_max: Self::default_temperature_max(),
        }
    }
}

/// Speech synthesis service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "TtsConfig::default_url")]
    pub url: String,
    /// Extra query parameters sent with every request
    #[serde(
        default = "TtsConfig::default_params",
        deserialize_with = "scalar_map"
    )]
    pub params: BTreeMap<String, String>,
    /// Latin words are respelled in Cyrillic before synthesis
    #[serde(default = "TtsConfig::default_transliterate")]
    pub transliterate: bool,
}

impl TtsConfig {
    const fn default_transliterate() -> bool {
        true
    }

    fn default_url() -> String {
        "http://localhost:8000/synthesize".to_string()
    }

    fn default_params() -> BTreeMap<String, String> {
        [
            ("speaker", "baya"),
            ("sample_rate", "48000"),
            ("pitch", "50"),
            ("rate", "50"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            params: Self::default_params(),
            transliterate: Self::default_transliterate(),
        }
    }
}

/// Accepts numbers and booleans as query values (`pitch: 50` as well as `"50"`)
fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(D::Error::custom(format!(
                        "tts.params.{k}: expected a scalar, got {other:?}"
                    )))
                }
            };
            Ok((k, v))
        })
        .collect()
}
