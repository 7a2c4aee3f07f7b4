//! Provider connection registry: records, edit intents and the
//! boundary types shared by the store, service and replication filter.

pub mod replication;
pub mod service;
pub mod store;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::errors::AppError;
use crate::secrets::{KeyDescriptor, SecretSlot};

/// The two provider families with independently-editable connection
/// lists: OpenAI-compatible APIs and local-inference daemons (Ollama).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Openai,
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Openai, ProviderKind::Ollama];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Openai => "openai",
            ProviderKind::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(ProviderKind::Openai),
            "ollama" => Ok(ProviderKind::Ollama),
            _ => Err(()),
        }
    }
}

/// One configured endpoint + credential pair for an upstream provider.
///
/// The record owns everything positional siblings used to carry in the
/// original parallel-list layout, so add/remove keeps URL, secret and
/// provider config together by construction. `id` is a stable opaque
/// identity assigned at creation; the external API stays positional.
#[derive(Clone, Debug)]
pub struct ConnectionRecord {
    pub id: Uuid,
    pub base_url: String,
    pub secret: SecretSlot,
    pub config: serde_json::Value,
}

impl ConnectionRecord {
    pub fn new(base_url: String, secret: SecretSlot, config: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            base_url,
            secret,
            config,
        }
    }
}

/// How an edit treats the stored credential. `keep` is the default:
/// the secret stays untouched and no material crosses the boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyEditMode {
    #[default]
    Keep,
    Replace,
    Clear,
}

/// One positional connection edit as submitted by the admin surface.
/// No `Debug` impl: `key_value` may carry raw secret material.
#[derive(Deserialize)]
pub struct ConnectionEdit {
    pub url: String,
    #[serde(default)]
    pub key_edit: KeyEditMode,
    #[serde(default)]
    pub key_value: Option<String>,
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
}

/// Request body for adding a single brand-new connection.
/// No `Debug` impl: `key` may carry raw secret material.
#[derive(Deserialize)]
pub struct NewConnection {
    pub url: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
}

fn empty_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Resolved key-edit intent. Decided exactly once at the boundary and
/// never re-inferred downstream.
pub enum KeyEdit {
    Keep,
    Replace(Zeroizing<String>),
    Clear,
}

impl std::fmt::Debug for KeyEdit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyEdit::Keep => f.write_str("KeyEdit::Keep"),
            KeyEdit::Replace(_) => f.write_str("KeyEdit::Replace(<redacted>)"),
            KeyEdit::Clear => f.write_str("KeyEdit::Clear"),
        }
    }
}

/// Resolve the `(mode, value)` pair of an edit into a [`KeyEdit`].
/// Every ambiguous combination fails before any state changes.
pub fn resolve_key_edit(
    index: usize,
    mode: KeyEditMode,
    value: Option<String>,
) -> Result<KeyEdit, AppError> {
    let value = value.filter(|v| !v.is_empty());
    match (mode, value) {
        (KeyEditMode::Keep, None) => Ok(KeyEdit::Keep),
        (KeyEditMode::Keep, Some(_)) => Err(AppError::InvalidKeyEdit {
            index,
            reason: "'keep' conflicts with a supplied key value",
        }),
        (KeyEditMode::Replace, Some(v)) => Ok(KeyEdit::Replace(Zeroizing::new(v))),
        (KeyEditMode::Replace, None) => Err(AppError::InvalidKeyEdit {
            index,
            reason: "'replace' requires a non-empty key value",
        }),
        (KeyEditMode::Clear, None) => Ok(KeyEdit::Clear),
        (KeyEditMode::Clear, Some(_)) => Err(AppError::InvalidKeyEdit {
            index,
            reason: "'clear' conflicts with a supplied key value",
        }),
    }
}

/// Normalize a base URL: must parse as an absolute http(s) URL,
/// trailing slashes are stripped.
pub fn normalize_base_url(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    let parsed = url::Url::parse(trimmed).map_err(|_| AppError::UrlNotAllowed {
        url: trimmed.to_string(),
    })?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(AppError::UrlNotAllowed {
            url: trimmed.to_string(),
        });
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

/// The complete outward view of one provider's connection list, plus
/// the trust-relevant process-wide flags. Secrets appear only as
/// [`KeyDescriptor`]s.
#[derive(Debug, Serialize)]
pub struct ProviderConnections {
    pub urls: Vec<String>,
    pub configs: Vec<serde_json::Value>,
    pub key_descriptors: Vec<KeyDescriptor>,
    pub persistence_enabled: bool,
    pub encryption_enabled: bool,
    pub allowed_base_urls: Vec<String>,
}
