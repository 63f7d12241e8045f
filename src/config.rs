//! # Configuration Management
//!
//! Loads the server configuration from layered sources:
//! - Default values (built into the code)
//! - An optional `config.toml` / `config.yml` / `config.json` next to the binary
//! - Environment variables with the `APP_` prefix
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_ASR__VAD__THRESHOLD`, ...)
//! 3. Configuration file
//! 4. Default values (defined in the Default impls)
//!
//! The configuration is loaded once at startup and is immutable afterwards.
//! Nested keys are separated by a double underscore in environment variables
//! because the keys themselves contain single underscores.

use crate::provider::ComputeProvider;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Sections:
/// - `server`: where to listen and how large a websocket frame may be
/// - `provider`: compute provider handed to every engine
/// - `asr`: audio ingestion, segmentation and recognition
/// - `tts`: synthesis and the transport sample rate
/// - `performance`: session limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub provider: ComputeProvider,
    pub asr: AsrConfig,
    pub tts: TtsConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address or hostname to bind the server to
/// - `port`: TCP port number to listen on
/// - `max_frame_bytes`: largest websocket frame, and largest reassembled
///   fragmented message, accepted from a client
/// - `workers`: number of actix workers (0 keeps the actix default)
/// - `heartbeat_interval_ms`: how often the server pings each session
/// - `client_timeout_ms`: silence after which a session is considered dead
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_frame_bytes: usize,
    pub workers: usize,
    pub heartbeat_interval_ms: u64,
    pub client_timeout_ms: u64,
}

/// Speech recognition pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    /// Sample rate of the PCM the clients stream (and of every segment).
    pub sample_rate: u32,

    /// Samples per frame handed to the segmentation engine.
    pub frame_size: usize,

    /// Idle backoff of the decode loop when no segment is pending.
    pub poll_interval_ms: u64,

    /// Wrap the recognizer in a process-wide lock (non-reentrant engines).
    pub serialize_decodes: bool,

    pub vad: VadConfig,
    pub engine: EngineEndpoint,
}

/// Voice activity detection knobs, passed through unchanged to the
/// segmentation engine at construction.
///
/// Durations are in seconds, `window_size` is in samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    pub threshold: f32,
    pub min_silence_duration: f32,
    pub min_speech_duration: f32,
    pub max_speech_duration: f32,
    pub window_size: usize,
    pub buffer_size_in_seconds: f32,
}

/// Speech synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Speaker / voice id.
    pub sid: i32,

    /// Speaking rate multiplier (1.0 = engine default).
    pub speed: f32,

    /// Every synthesized reply is resampled to this rate before framing.
    pub transport_sample_rate: u32,

    /// Wrap the synthesizer in a process-wide lock (non-reentrant engines).
    pub serialize_synthesis: bool,

    /// Synthesis sidecar. When absent, synthesis is unavailable and every
    /// request fails at the message boundary.
    pub engine: Option<EngineEndpoint>,
}

/// Location of a model-serving sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEndpoint {
    pub url: String,
    pub timeout_ms: u64,
}

impl EngineEndpoint {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Performance tuning configuration.
///
/// ## Fields:
/// - `max_concurrent_sessions`: upgrades beyond this many live sessions
///   (ASR and TTS combined) are refused with 503
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// The server can start without any configuration file; the defaults match a
/// 16 kHz mono client with 10 ms frames.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                max_frame_bytes: 1024 * 1024,
                workers: 0,
                heartbeat_interval_ms: 30_000,
                client_timeout_ms: 60_000,
            },
            provider: ComputeProvider::Cpu,
            asr: AsrConfig {
                sample_rate: 16000,
                frame_size: 160, // 10ms at 16kHz
                poll_interval_ms: 10,
                serialize_decodes: false,
                vad: VadConfig {
                    threshold: 0.5,
                    min_silence_duration: 0.5,
                    min_speech_duration: 0.25,
                    max_speech_duration: 20.0,
                    window_size: 512,
                    buffer_size_in_seconds: 30.0,
                },
                engine: EngineEndpoint {
                    url: "http://127.0.0.1:9000/asr/decode".to_string(),
                    timeout_ms: 30_000,
                },
            },
            tts: TtsConfig {
                sid: 0,
                speed: 1.0,
                transport_sample_rate: 16000,
                serialize_synthesis: false,
                engine: None,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 64,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_ASR__VAD__THRESHOLD=0.4`: Override the detection threshold
    /// - `APP_TTS__ENGINE__URL=http://tts:9001/generate`: Enable synthesis
    /// - `APP_PROVIDER=cuda`: Select the compute provider
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## Why validate:
    /// A zero frame size or an inverted speech-duration range would only show
    /// up once the first client connects; failing at startup is clearer.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.server.max_frame_bytes == 0 {
            return Err(anyhow::anyhow!("Max frame bytes must be greater than 0"));
        }

        if self.asr.sample_rate == 0 {
            return Err(anyhow::anyhow!("ASR sample rate must be greater than 0"));
        }

        if self.asr.frame_size == 0 {
            return Err(anyhow::anyhow!("ASR frame size must be greater than 0"));
        }

        if self.server.heartbeat_interval_ms == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval must be greater than 0"));
        }

        if self.server.client_timeout_ms <= self.server.heartbeat_interval_ms {
            return Err(anyhow::anyhow!(
                "Client timeout ({}ms) must exceed the heartbeat interval ({}ms)",
                self.server.client_timeout_ms,
                self.server.heartbeat_interval_ms
            ));
        }

        self.asr.vad.validate()?;

        if self.tts.transport_sample_rate == 0 {
            return Err(anyhow::anyhow!("TTS transport sample rate must be greater than 0"));
        }

        if !(self.tts.speed > 0.0) {
            return Err(anyhow::anyhow!("TTS speed must be greater than 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        Ok(())
    }

    /// Idle backoff of the ASR decode loop.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.asr.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.server.heartbeat_interval_ms)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.server.client_timeout_ms)
    }
}

impl VadConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(anyhow::anyhow!("VAD threshold must be within [0, 1]"));
        }

        if self.window_size == 0 {
            return Err(anyhow::anyhow!("VAD window size must be greater than 0"));
        }

        if self.min_silence_duration < 0.0 || self.min_speech_duration < 0.0 {
            return Err(anyhow::anyhow!("VAD durations cannot be negative"));
        }

        if self.max_speech_duration <= 0.0 {
            return Err(anyhow::anyhow!("VAD max speech duration must be greater than 0"));
        }

        if self.min_speech_duration > self.max_speech_duration {
            return Err(anyhow::anyhow!(
                "VAD min speech duration ({}) exceeds max speech duration ({})",
                self.min_speech_duration,
                self.max_speech_duration
            ));
        }

        if self.buffer_size_in_seconds <= 0.0 {
            return Err(anyhow::anyhow!("VAD buffer size must be greater than 0 seconds"));
        }

        // The buffer must hold a whole utterance before it is force-split
        if self.buffer_size_in_seconds < self.max_speech_duration {
            return Err(anyhow::anyhow!(
                "VAD buffer ({}s) is shorter than max speech duration ({}s)",
                self.buffer_size_in_seconds,
                self.max_speech_duration
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.asr.frame_size, 160);
        assert_eq!(config.tts.transport_sample_rate, 16000);
        assert!(config.tts.engine.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.asr.frame_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.tts.speed = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbeat_validation() {
        let config = AppConfig::default();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.client_timeout(), Duration::from_secs(60));

        let mut config = AppConfig::default();
        config.server.heartbeat_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.client_timeout_ms = config.server.heartbeat_interval_ms;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_vad_validation() {
        let mut config = AppConfig::default();
        config.asr.vad.threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.asr.vad.min_speech_duration = 30.0;
        config.asr.vad.max_speech_duration = 10.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.asr.vad.buffer_size_in_seconds = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.asr.vad.max_speech_duration = 20.0;
        config.asr.vad.buffer_size_in_seconds = 10.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("shorter than max speech duration"));

        // A buffer exactly as long as the longest utterance is enough
        config.asr.vad.buffer_size_in_seconds = 20.0;
        assert!(config.validate().is_ok());
    }

    /// A yaml file overrides only the keys it names.
    #[test]
    fn test_layered_file_source() {
        let yaml = r#"
server:
  port: 9090
provider: cuda
asr:
  vad:
    threshold: 0.3
tts:
  sid: 4
  engine:
    url: "http://tts:9001/generate"
    timeout_ms: 5000
"#;
        let config: AppConfig = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.provider, ComputeProvider::Cuda);
        assert!((config.asr.vad.threshold - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.asr.vad.window_size, 512);
        assert_eq!(config.tts.sid, 4);
        assert_eq!(config.tts.engine.unwrap().url, "http://tts:9001/generate");
    }
}
