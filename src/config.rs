use crate::connections::{normalize_base_url, ProviderKind};
use crate::secrets::EncryptionMode;

/// Process configuration, resolved once at startup and passed by
/// value. Nothing re-reads the environment after `load()`.
#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub redis_url: Option<String>,
    /// Operator key material for secret encryption and fingerprinting.
    /// Redacted from the `Debug` output.
    pub encryption_key: Option<String>,
    pub secrets_at_rest: SecretsAtRest,
    /// Normalized allow-lists per provider. An empty list disables
    /// allow-listing for that provider.
    pub allowed_openai_urls: Vec<String>,
    pub allowed_ollama_urls: Vec<String>,
    pub probe_timeout_secs: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("redis_url", &self.redis_url)
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .field("secrets_at_rest", &self.secrets_at_rest)
            .field("allowed_openai_urls", &self.allowed_openai_urls)
            .field("allowed_ollama_urls", &self.allowed_ollama_urls)
            .field("probe_timeout_secs", &self.probe_timeout_secs)
            .finish()
    }
}

/// Operator opt-in for how secrets are stored, before key presence is
/// taken into account. Set via SECRETS_AT_REST. Default: plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretsAtRest {
    Off,
    Plaintext,
    Encrypted,
}

impl Config {
    /// Resolve the process-wide encryption mode from the opt-in and
    /// the presence of key material. Asking for encryption without a
    /// key degrades to `Disabled`, never to silent plaintext
    /// persistence.
    pub fn encryption_mode(&self) -> EncryptionMode {
        match self.secrets_at_rest {
            SecretsAtRest::Off => EncryptionMode::Disabled,
            SecretsAtRest::Plaintext => EncryptionMode::PlaintextAtRest,
            SecretsAtRest::Encrypted => {
                if self.encryption_key.as_deref().is_some_and(|k| !k.trim().is_empty()) {
                    EncryptionMode::EncryptedAtRest
                } else {
                    tracing::warn!(
                        "SECRETS_AT_REST=encrypted but CONFIG_ENCRYPTION_KEY is not set; \
                         provider keys will be kept in memory only and lost on restart"
                    );
                    EncryptionMode::Disabled
                }
            }
        }
    }

    pub fn allowed_urls(&self, provider: ProviderKind) -> &[String] {
        match provider {
            ProviderKind::Openai => &self.allowed_openai_urls,
            ProviderKind::Ollama => &self.allowed_ollama_urls,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let secrets_at_rest = match std::env::var("SECRETS_AT_REST")
        .unwrap_or_else(|_| "plaintext".into())
        .to_lowercase()
        .as_str()
    {
        "off" => SecretsAtRest::Off,
        "plaintext" => SecretsAtRest::Plaintext,
        "encrypted" => SecretsAtRest::Encrypted,
        other => anyhow::bail!(
            "SECRETS_AT_REST must be one of off|plaintext|encrypted, got '{}'",
            other
        ),
    };

    Ok(Config {
        port: std::env::var("CHATHUB_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .unwrap_or(8080),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/chathub".into()),
        redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
        encryption_key: std::env::var("CONFIG_ENCRYPTION_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty()),
        secrets_at_rest,
        allowed_openai_urls: allow_list_from_env(
            "OPENAI_ALLOWED_BASE_URLS",
            "https://api.openai.com/v1",
        )?,
        allowed_ollama_urls: allow_list_from_env(
            "OLLAMA_ALLOWED_BASE_URLS",
            "http://localhost:11434",
        )?,
        probe_timeout_secs: std::env::var("PROBE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5),
    })
}

/// Parse a comma-separated allow-list, normalizing each entry. Unset
/// falls back to the single default entry; an explicitly empty value
/// disables allow-listing.
fn allow_list_from_env(var: &str, default_entry: &str) -> anyhow::Result<Vec<String>> {
    let raw = match std::env::var(var) {
        Ok(v) => v,
        Err(_) => return Ok(vec![default_entry.to_string()]),
    };

    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            normalize_base_url(s)
                .map_err(|_| anyhow::anyhow!("{} contains an invalid base URL: '{}'", var, s))
        })
        .collect()
}
