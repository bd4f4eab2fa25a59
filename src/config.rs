use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::chatbase::DEFAULT_BASE_URL;
use crate::forwarder::{ForwardMode, RetryPolicy};

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_bytes: Option<u64>,
    pub keep: usize,
    pub compress: bool,
}

#[derive(Debug, Clone)]
pub struct ChatbaseConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub chatbase: ChatbaseConfig,
    pub forward_mode: ForwardMode,
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
    pub strict_schema: bool,
    pub max_request_bytes: Option<usize>,
    pub log_file: Option<String>,
    pub rotation: RotationConfig,
    pub log_stdout: bool,
    pub log_sample_n: Option<u64>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("CHATBASE_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        let base_url = env::var("CHATBASE_BASE_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        url::Url::parse(&base_url)
            .with_context(|| format!("CHATBASE_BASE_URL '{}' is not a valid URL", base_url))?;
        let timeout = Duration::from_millis(parse_optional_u64("CHATBASE_TIMEOUT_MS")?.unwrap_or(3000));

        let forward_mode = match env::var("FIELDRELAY_FORWARD_MODE") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .parse::<ForwardMode>()
                .map_err(|e| anyhow!("FIELDRELAY_FORWARD_MODE: {} (expected queue, inline or off)", e))?,
            _ => ForwardMode::Queue,
        };
        let forward_mode = if api_key.is_none() && forward_mode != ForwardMode::Off {
            tracing::warn!("CHATBASE_API_KEY not set; analytics forwarding disabled");
            ForwardMode::Off
        } else {
            forward_mode
        };

        let queue_capacity = parse_optional_u64("FIELDRELAY_QUEUE_CAPACITY")?.unwrap_or(256) as usize;
        if queue_capacity == 0 {
            return Err(anyhow!("FIELDRELAY_QUEUE_CAPACITY must be greater than zero"));
        }
        let retry = RetryPolicy {
            retries: parse_optional_u64("FIELDRELAY_FORWARD_RETRIES")?.unwrap_or(2) as u32,
            backoff: Duration::from_millis(
                parse_optional_u64("FIELDRELAY_RETRY_BACKOFF_MS")?.unwrap_or(200),
            ),
        };

        let strict_schema = parse_bool_env("FIELDRELAY_STRICT_SCHEMA")?.unwrap_or(false);
        let max_request_bytes =
            parse_optional_u64("FIELDRELAY_MAX_REQUEST_BYTES")?.map(|v| v as usize);

        let log_file = env::var("LOG_FILE").ok().filter(|p| !p.trim().is_empty());
        let rotation = RotationConfig {
            max_bytes: parse_optional_u64("LOG_MAX_BYTES")?,
            keep: parse_optional_u64("LOG_ROTATE_KEEP")?.unwrap_or(1) as usize,
            compress: parse_bool_env("LOG_ROTATE_COMPRESS")?.unwrap_or(false),
        };
        let log_stdout = parse_bool_env("FIELDRELAY_LOG_STDOUT")?.unwrap_or(false);
        let log_sample_n = parse_optional_u64("FIELDRELAY_LOG_SAMPLE_N")?.filter(|n| *n > 1);

        Ok(Self {
            chatbase: ChatbaseConfig {
                api_key,
                base_url,
                timeout,
            },
            forward_mode,
            queue_capacity,
            retry,
            strict_schema,
            max_request_bytes,
            log_file,
            rotation,
            log_stdout,
            log_sample_n,
        })
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
