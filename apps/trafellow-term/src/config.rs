//! Environment-backed runtime configuration for `trafellow-term`.

use std::{env, error::Error, fmt, path::PathBuf};

use chat_client::push_url_for;
use chat_core::{RetryPolicy, SyncConfig};
use url::Url;

const DEFAULT_SERVER_URL: &str = "http://localhost:5000";
const DEFAULT_DATA_DIR: &str = "./.trafellow-term-store";
const DEFAULT_RECONNECT_BASE_MS: u64 = 500;
const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;

/// Where the session vault keeps the saved credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStoreKind {
    /// JSON files under the data directory.
    #[default]
    File,
    /// The operating system credential store.
    Keyring,
}

/// Runtime configuration used by the terminal app.
#[derive(Debug, Clone, PartialEq)]
pub struct TermConfig {
    /// REST base URL.
    pub server_url: Url,
    /// WebSocket push endpoint.
    pub push_url: Url,
    /// Directory holding the session vault.
    pub data_dir: PathBuf,
    /// Backend for the saved session.
    pub session_store: SessionStoreKind,
    /// Core tuning forwarded to the runtime.
    pub sync: SyncConfig,
    /// Reconnect backoff for the push channel.
    pub reconnect: RetryPolicy,
    /// Optional username used when no saved session exists.
    pub prefill_user: Option<String>,
    /// Optional password used when no saved session exists.
    pub prefill_password: Option<String>,
}

impl TermConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let server_url = parse_url(
            "TRAFELLOW_SERVER_URL",
            optional_trimmed_env("TRAFELLOW_SERVER_URL", &mut lookup)
                .unwrap_or_else(|| DEFAULT_SERVER_URL.to_owned()),
        )?;
        let push_url = match optional_trimmed_env("TRAFELLOW_PUSH_URL", &mut lookup) {
            Some(value) => parse_url("TRAFELLOW_PUSH_URL", value)?,
            None => push_url_for(&server_url).map_err(|err| ConfigError::InvalidValue {
                key: "TRAFELLOW_SERVER_URL",
                value: server_url.to_string(),
                reason: err.message,
            })?,
        };
        let data_dir = optional_trimmed_env("TRAFELLOW_DATA_DIR", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let session_store = parse_session_store(&mut lookup)?;

        let defaults = SyncConfig::default();
        let sync = SyncConfig {
            typing_grace_ms: parse_positive_u64(
                "TRAFELLOW_TYPING_GRACE_MS",
                defaults.typing_grace_ms,
                &mut lookup,
            )?,
            typing_idle_ms: parse_positive_u64(
                "TRAFELLOW_TYPING_IDLE_MS",
                defaults.typing_idle_ms,
                &mut lookup,
            )?,
            conversation_max_items: parse_positive_u64(
                "TRAFELLOW_CONVERSATION_MAX_ITEMS",
                defaults.conversation_max_items as u64,
                &mut lookup,
            )? as usize,
            ..defaults
        };

        let reconnect_base_ms = parse_positive_u64(
            "TRAFELLOW_RECONNECT_BASE_MS",
            DEFAULT_RECONNECT_BASE_MS,
            &mut lookup,
        )?;
        let reconnect_max_ms = parse_positive_u64(
            "TRAFELLOW_RECONNECT_MAX_MS",
            DEFAULT_RECONNECT_MAX_MS,
            &mut lookup,
        )?;
        if reconnect_max_ms < reconnect_base_ms {
            return Err(ConfigError::InvalidValue {
                key: "TRAFELLOW_RECONNECT_MAX_MS",
                value: reconnect_max_ms.to_string(),
                reason: format!("must be at least TRAFELLOW_RECONNECT_BASE_MS ({reconnect_base_ms})"),
            });
        }

        Ok(Self {
            server_url,
            push_url,
            data_dir,
            session_store,
            sync,
            reconnect: RetryPolicy::new(reconnect_base_ms, reconnect_max_ms),
            prefill_user: optional_trimmed_env("TRAFELLOW_USER", &mut lookup),
            prefill_password: optional_trimmed_env("TRAFELLOW_PASSWORD", &mut lookup),
        })
    }

    /// Username and password pair, when both are configured.
    pub fn prefill_credentials(&self) -> Option<(String, String)> {
        Some((self.prefill_user.clone()?, self.prefill_password.clone()?))
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_url(key: &'static str, value: String) -> Result<Url, ConfigError> {
    Url::parse(&value).map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}

fn parse_session_store<F>(lookup: &mut F) -> Result<SessionStoreKind, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env("TRAFELLOW_SESSION_STORE", lookup) else {
        return Ok(SessionStoreKind::default());
    };
    match value.to_ascii_lowercase().as_str() {
        "file" => Ok(SessionStoreKind::File),
        "keyring" => Ok(SessionStoreKind::Keyring),
        _ => Err(ConfigError::InvalidValue {
            key: "TRAFELLOW_SESSION_STORE",
            value,
            reason: "expected 'file' or 'keyring'".to_owned(),
        }),
    }
}

fn parse_positive_u64<F>(key: &'static str, default: u64, lookup: &mut F) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    let parsed = value
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value: value.clone(),
            reason: err.to_string(),
        })?;
    if parsed == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "must be at least 1".to_owned(),
        });
    }
    Ok(parsed)
}
