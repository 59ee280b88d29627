use std::{env, net::SocketAddr, num::NonZeroUsize, time::Duration};

use thiserror::Error;

use crate::clients::generation::GeminiConfig;
use crate::pipeline::PipelineSettings;
use crate::util::retry::RetryConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    http_bind: SocketAddr,
    generation_api_key: String,
    generation_base_url: String,
    generation_model: String,
    generation_connect_timeout: Duration,
    generation_timeout: Duration,
    generation_temperature: f64,
    generation_max_attempts: usize,
    generation_backoff_base_ms: u64,
    generation_backoff_cap_ms: u64,
    batch_size: NonZeroUsize,
    tight_budget_usd: u32,
    otel_exporter_endpoint: Option<String>,
    otel_sampling_ratio: f64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数から Discovery Worker の設定値を読み込み、検証する。
    ///
    /// # Errors
    /// `GENERATION_API_KEY` が未設定、もしくは各種値のパースに失敗した場合は [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        let generation_api_key = env_var("GENERATION_API_KEY")?;
        let http_bind = parse_socket_addr("DISCOVERY_HTTP_BIND", "0.0.0.0:9010")?;
        let generation_base_url = env::var("GENERATION_BASE_URL")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/".to_string());
        let generation_model =
            env::var("GENERATION_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string());

        // Generation call settings
        let generation_connect_timeout = parse_duration_ms("GENERATION_CONNECT_TIMEOUT_MS", 3000)?;
        let generation_timeout = parse_duration_secs("GENERATION_TIMEOUT_SECS", 60)?;
        let generation_temperature = parse_f64("GENERATION_TEMPERATURE", 0.7)?;

        // Retry settings (exponential backoff + jitter, disabled by default)
        let generation_max_attempts = parse_non_zero_usize("GENERATION_MAX_ATTEMPTS", 1)?.get();
        let generation_backoff_base_ms = parse_u64("GENERATION_BACKOFF_BASE_MS", 250)?;
        let generation_backoff_cap_ms = parse_u64("GENERATION_BACKOFF_CAP_MS", 10000)?;

        // Pipeline settings
        let batch_size = parse_non_zero_usize("DISCOVERY_BATCH_SIZE", 5)?;
        let tight_budget_usd = parse_u32("DISCOVERY_TIGHT_BUDGET_USD", 2000)?;

        // OpenTelemetry settings
        let otel_exporter_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();
        let otel_sampling_ratio = parse_ratio("OTEL_SAMPLING_RATIO", 1.0)?;

        Ok(Self {
            http_bind,
            generation_api_key,
            generation_base_url,
            generation_model,
            generation_connect_timeout,
            generation_timeout,
            generation_temperature,
            generation_max_attempts,
            generation_backoff_base_ms,
            generation_backoff_cap_ms,
            batch_size,
            tight_budget_usd,
            otel_exporter_endpoint,
            otel_sampling_ratio,
        })
    }

    #[must_use]
    pub fn http_bind(&self) -> SocketAddr {
        self.http_bind
    }

    #[must_use]
    pub fn generation_base_url(&self) -> &str {
        &self.generation_base_url
    }

    #[must_use]
    pub fn generation_model(&self) -> &str {
        &self.generation_model
    }

    #[must_use]
    pub fn generation_timeout(&self) -> Duration {
        self.generation_timeout
    }

    #[must_use]
    pub fn batch_size(&self) -> NonZeroUsize {
        self.batch_size
    }

    #[must_use]
    pub fn tight_budget_usd(&self) -> u32 {
        self.tight_budget_usd
    }

    #[must_use]
    pub fn otel_exporter_endpoint(&self) -> Option<&str> {
        self.otel_exporter_endpoint.as_deref()
    }

    #[must_use]
    pub fn otel_sampling_ratio(&self) -> f64 {
        self.otel_sampling_ratio
    }

    /// Gemini クライアント用の設定を組み立てる。
    #[must_use]
    pub fn gemini(&self) -> GeminiConfig {
        GeminiConfig {
            base_url: self.generation_base_url.clone(),
            api_key: self.generation_api_key.clone(),
            model: self.generation_model.clone(),
            connect_timeout: self.generation_connect_timeout,
            request_timeout: self.generation_timeout,
            temperature: self.generation_temperature,
        }
    }

    #[must_use]
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(
            self.generation_max_attempts,
            self.generation_backoff_base_ms,
            self.generation_backoff_cap_ms,
        )
    }

    /// パイプライン設定を組み立てる。
    ///
    /// 呼び出し全体の上限は、再試行を含めた最悪所要時間（試行回数 × 1試行の上限 + バックオフ上限）。
    #[must_use]
    pub fn pipeline(&self) -> PipelineSettings {
        PipelineSettings {
            batch_size: self.batch_size,
            tight_budget_usd: self.tight_budget_usd,
            call_timeout: self.retry().total_budget(self.generation_timeout),
        }
    }
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parse_socket_addr(name: &'static str, default: &str) -> Result<SocketAddr, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());

    raw.parse().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_non_zero_usize(name: &'static str, default: usize) -> Result<NonZeroUsize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    NonZeroUsize::new(parsed).ok_or_else(|| ConfigError::Invalid {
        name,
        source: anyhow::anyhow!("must be greater than zero"),
    })
}

fn parse_duration_secs(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    let value = parse_u64(name, default_secs)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("must be greater than zero"),
        });
    }
    Ok(Duration::from_secs(value))
}

fn parse_duration_ms(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let ms = parse_u64(name, default_ms)?;
    Ok(Duration::from_millis(ms))
}

fn parse_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u32>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<f64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_ratio(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let value = parse_f64(name, default)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("value must be between 0.0 and 1.0"),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: [&str; 15] = [
        "GENERATION_API_KEY",
        "DISCOVERY_HTTP_BIND",
        "GENERATION_BASE_URL",
        "GENERATION_MODEL",
        "GENERATION_CONNECT_TIMEOUT_MS",
        "GENERATION_TIMEOUT_SECS",
        "GENERATION_TEMPERATURE",
        "GENERATION_MAX_ATTEMPTS",
        "GENERATION_BACKOFF_BASE_MS",
        "GENERATION_BACKOFF_CAP_MS",
        "DISCOVERY_BATCH_SIZE",
        "DISCOVERY_TIGHT_BUDGET_USD",
        "OTEL_EXPORTER_OTLP_ENDPOINT",
        "OTEL_SAMPLING_RATIO",
        "RUST_LOG",
    ];

    /// 指定した値以外の既知のキーをすべて未設定にして `check` を実行する。
    fn with_env<R>(overrides: &[(&str, &str)], check: impl FnOnce() -> R) -> R {
        let vars: Vec<(&str, Option<&str>)> = KEYS
            .iter()
            .map(|key| {
                let value = overrides
                    .iter()
                    .find(|(name, _)| name == key)
                    .map(|(_, value)| *value);
                (*key, value)
            })
            .collect();
        temp_env::with_vars(vars, check)
    }

    #[test]
    fn from_env_uses_defaults_when_optional_missing() {
        let config = with_env(&[("GENERATION_API_KEY", "test-key")], Config::from_env)
            .expect("config should load");

        assert_eq!(config.http_bind(), "0.0.0.0:9010".parse().unwrap());
        assert_eq!(
            config.generation_base_url(),
            "https://generativelanguage.googleapis.com/"
        );
        assert_eq!(config.generation_model(), "gemini-2.5-flash");
        assert_eq!(config.generation_timeout(), Duration::from_secs(60));
        assert_eq!(config.batch_size().get(), 5);
        assert_eq!(config.tight_budget_usd(), 2000);
        assert!(config.otel_exporter_endpoint().is_none());
        assert!((config.otel_sampling_ratio() - 1.0).abs() < f64::EPSILON);

        let gemini = config.gemini();
        assert_eq!(gemini.api_key, "test-key");
        assert_eq!(gemini.connect_timeout, Duration::from_millis(3000));
        assert!((gemini.temperature - 0.7).abs() < f64::EPSILON);

        assert_eq!(config.retry(), RetryConfig::new(1, 250, 10_000));
        assert!(!config.retry().is_enabled());

        let pipeline = config.pipeline();
        assert_eq!(pipeline.call_timeout, Duration::from_secs(60));
        assert_eq!(pipeline.batch_size.get(), 5);
    }

    #[test]
    fn from_env_overrides_values() {
        let config = with_env(
            &[
                ("GENERATION_API_KEY", "other-key"),
                ("DISCOVERY_HTTP_BIND", "127.0.0.1:8088"),
                ("GENERATION_BASE_URL", "http://localhost:9999/"),
                ("GENERATION_MODEL", "gemini-2.5-pro"),
                ("GENERATION_TIMEOUT_SECS", "15"),
                ("GENERATION_MAX_ATTEMPTS", "3"),
                ("GENERATION_BACKOFF_BASE_MS", "100"),
                ("DISCOVERY_BATCH_SIZE", "3"),
                ("DISCOVERY_TIGHT_BUDGET_USD", "1500"),
                ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://otel:4317"),
                ("OTEL_SAMPLING_RATIO", "0.25"),
            ],
            Config::from_env,
        )
        .expect("config should load");

        assert_eq!(config.http_bind(), "127.0.0.1:8088".parse().unwrap());
        assert_eq!(config.generation_base_url(), "http://localhost:9999/");
        assert_eq!(config.generation_model(), "gemini-2.5-pro");
        assert_eq!(config.generation_timeout(), Duration::from_secs(15));
        assert_eq!(config.gemini().request_timeout, Duration::from_secs(15));
        assert_eq!(config.retry(), RetryConfig::new(3, 100, 10_000));
        assert_eq!(config.pipeline().call_timeout, Duration::from_millis(45_300));
        assert_eq!(config.batch_size().get(), 3);
        assert_eq!(config.pipeline().tight_budget_usd, 1500);
        assert_eq!(config.otel_exporter_endpoint(), Some("http://otel:4317"));
        assert!((config.otel_sampling_ratio() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn from_env_errors_when_api_key_missing() {
        let error = with_env(&[], Config::from_env).expect_err("missing key should fail");

        assert!(matches!(error, ConfigError::Missing("GENERATION_API_KEY")));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let error = with_env(&[("GENERATION_API_KEY", "  ")], Config::from_env)
            .expect_err("blank key should fail");

        assert!(matches!(error, ConfigError::Missing("GENERATION_API_KEY")));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let error = with_env(
            &[("GENERATION_API_KEY", "k"), ("DISCOVERY_BATCH_SIZE", "0")],
            Config::from_env,
        )
        .expect_err("zero batch size should fail");

        assert!(matches!(
            error,
            ConfigError::Invalid {
                name: "DISCOVERY_BATCH_SIZE",
                ..
            }
        ));
    }

    #[test]
    fn sampling_ratio_out_of_range_is_rejected() {
        let error = with_env(
            &[("GENERATION_API_KEY", "k"), ("OTEL_SAMPLING_RATIO", "1.5")],
            Config::from_env,
        )
        .expect_err("ratio above one should fail");

        assert!(matches!(
            error,
            ConfigError::Invalid {
                name: "OTEL_SAMPLING_RATIO",
                ..
            }
        ));
    }
}
