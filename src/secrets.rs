//! Secret handling for provider connections: encryption at rest,
//! masking for display, and fingerprinting for change detection.
//!
//! The codec is built once at startup from the operator-supplied key
//! material and the resolved [`EncryptionMode`]. All mode dispatch
//! lives here; callers never inspect key material themselves.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::errors::AppError;

/// Process-wide policy governing whether and how secrets persist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptionMode {
    /// Secrets live only in process memory; nothing is written at rest
    /// and every slot resets to unset on restart.
    Disabled,
    /// Secrets persist in clear storage. Explicit operator opt-out of
    /// encryption, still durable.
    PlaintextAtRest,
    /// Secrets persist only as ciphertext; key material is required to
    /// read them back.
    EncryptedAtRest,
}

impl EncryptionMode {
    pub fn persistence_enabled(self) -> bool {
        self != EncryptionMode::Disabled
    }

    pub fn encryption_enabled(self) -> bool {
        self == EncryptionMode::EncryptedAtRest
    }
}

/// The state of one connection's credential slot.
#[derive(Clone)]
pub enum SecretSlot {
    Unset,
    Plaintext(Zeroizing<String>),
    Encrypted { ciphertext: String, fingerprint: String },
}

impl SecretSlot {
    pub fn has_value(&self) -> bool {
        !matches!(self, SecretSlot::Unset)
    }
}

// Never print secret material, not even from debug logs.
impl std::fmt::Debug for SecretSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretSlot::Unset => f.write_str("SecretSlot::Unset"),
            SecretSlot::Plaintext(_) => f.write_str("SecretSlot::Plaintext(<redacted>)"),
            SecretSlot::Encrypted { .. } => f.write_str("SecretSlot::Encrypted(..)"),
        }
    }
}

/// The only representation of a stored credential that ever leaves the
/// subsystem: masked display string plus a one-way fingerprint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDescriptor {
    pub has_value: bool,
    pub masked: String,
    pub fingerprint: Option<String>,
}

impl KeyDescriptor {
    pub fn empty() -> Self {
        Self {
            has_value: false,
            masked: String::new(),
            fingerprint: None,
        }
    }
}

/// Columns the persistence layer is allowed to write for one slot.
/// At most one representation exists per record.
#[derive(Debug)]
pub enum StoredSecret {
    Plaintext(String),
    Ciphertext { token: String, fingerprint: String },
}

const TOKEN_PREFIX: &str = "v1:";
const MASK_CHAR: char = '*';

type HmacSha256 = Hmac<Sha256>;

pub struct SecretCodec {
    mode: EncryptionMode,
    cipher: Option<Aes256Gcm>,
    mac_key: [u8; 32],
}

impl SecretCodec {
    /// Build the codec for the resolved mode. `EncryptedAtRest` requires
    /// non-empty key material; the other modes ignore the cipher and,
    /// when no key is configured, fingerprint with random per-process
    /// material so fingerprints never compare across key material.
    pub fn new(mode: EncryptionMode, key_material: Option<&str>) -> anyhow::Result<Self> {
        let key_material = key_material.map(str::trim).filter(|k| !k.is_empty());

        let cipher = match (mode, key_material) {
            (EncryptionMode::EncryptedAtRest, Some(material)) => {
                let key = derive_key(material, b"chathub.secret.aes.v1");
                let cipher = Aes256Gcm::new_from_slice(&key)
                    .map_err(|e| anyhow::anyhow!("invalid derived key length: {:?}", e))?;
                Some(cipher)
            }
            (EncryptionMode::EncryptedAtRest, None) => {
                anyhow::bail!("encrypted-at-rest mode requires CONFIG_ENCRYPTION_KEY to be set")
            }
            _ => None,
        };

        let mac_key = match key_material {
            Some(material) => derive_key(material, b"chathub.secret.mac.v1"),
            None => {
                let mut key = [0u8; 32];
                OsRng.fill_bytes(&mut key);
                key
            }
        };

        Ok(Self {
            mode,
            cipher,
            mac_key,
        })
    }

    pub fn mode(&self) -> EncryptionMode {
        self.mode
    }

    /// Encrypt a secret value into a versioned token `v1:<b64(nonce||ct)>`.
    pub fn encrypt(&self, value: &str) -> Result<String, AppError> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("encrypt called without encryption enabled"))?;

        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, value.as_bytes())
            .map_err(|e| anyhow::anyhow!("secret encryption failed: {}", e))?;

        let mut blob = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        Ok(format!(
            "{}{}",
            TOKEN_PREFIX,
            base64::engine::general_purpose::STANDARD.encode(blob)
        ))
    }

    /// Decrypt a token produced by [`encrypt`](Self::encrypt). Any
    /// failure (wrong key material, tampered token) is `Decryption`:
    /// unrecoverable data loss for that record, never retried.
    pub fn decrypt(&self, token: &str) -> Result<Zeroizing<String>, AppError> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("decrypt called without encryption enabled"))?;

        let encoded = token.strip_prefix(TOKEN_PREFIX).ok_or(AppError::Decryption)?;
        let blob = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| AppError::Decryption)?;
        if blob.len() <= 12 {
            return Err(AppError::Decryption);
        }

        let (nonce_bytes, ciphertext) = blob.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| AppError::Decryption)?;

        String::from_utf8(plaintext)
            .map(Zeroizing::new)
            .map_err(|_| AppError::Decryption)
    }

    /// One-way keyed fingerprint used to detect secret changes without
    /// ever exposing the value.
    pub fn fingerprint(&self, value: &str) -> String {
        let mut mac =
            <HmacSha256 as Mac>::new_from_slice(&self.mac_key).expect("HMAC accepts any key length");
        mac.update(value.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time fingerprint comparison for change detection.
    pub fn fingerprints_match(&self, a: &str, b: &str) -> bool {
        a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
    }

    /// Transform an incoming secret value into the slot shape the
    /// active mode calls for.
    pub fn seal(&self, value: &str) -> Result<SecretSlot, AppError> {
        match self.mode {
            EncryptionMode::Disabled | EncryptionMode::PlaintextAtRest => {
                Ok(SecretSlot::Plaintext(Zeroizing::new(value.to_owned())))
            }
            EncryptionMode::EncryptedAtRest => Ok(SecretSlot::Encrypted {
                ciphertext: self.encrypt(value)?,
                fingerprint: self.fingerprint(value),
            }),
        }
    }

    /// Build the outward-facing descriptor for a slot. Encrypted slots
    /// are decrypted transiently to derive the mask; the plaintext is
    /// zeroized as soon as the mask is taken.
    pub fn descriptor(&self, slot: &SecretSlot) -> Result<KeyDescriptor, AppError> {
        match slot {
            SecretSlot::Unset => Ok(KeyDescriptor::empty()),
            SecretSlot::Plaintext(value) => Ok(KeyDescriptor {
                has_value: true,
                masked: mask(value),
                fingerprint: Some(self.fingerprint(value)),
            }),
            SecretSlot::Encrypted {
                ciphertext,
                fingerprint,
            } => {
                let plaintext = self.decrypt(ciphertext)?;
                Ok(KeyDescriptor {
                    has_value: true,
                    masked: mask(&plaintext),
                    fingerprint: Some(fingerprint.clone()),
                })
            }
        }
    }

    /// What the persistence collaborator may write for this slot.
    /// With `Disabled` mode this is always `None`: secret values never
    /// reach storage, whatever shape the slot has.
    pub fn storable(&self, slot: &SecretSlot) -> Result<Option<StoredSecret>, AppError> {
        if self.mode == EncryptionMode::Disabled {
            return Ok(None);
        }
        match slot {
            SecretSlot::Unset => Ok(None),
            SecretSlot::Plaintext(value) => match self.mode {
                EncryptionMode::PlaintextAtRest => {
                    Ok(Some(StoredSecret::Plaintext(value.to_string())))
                }
                // A plaintext slot under encrypted-at-rest means the
                // slot predates the key; seal it on the way out.
                EncryptionMode::EncryptedAtRest => Ok(Some(StoredSecret::Ciphertext {
                    token: self.encrypt(value)?,
                    fingerprint: self.fingerprint(value),
                })),
                EncryptionMode::Disabled => unreachable!(),
            },
            SecretSlot::Encrypted {
                ciphertext,
                fingerprint,
            } => Ok(Some(StoredSecret::Ciphertext {
                token: ciphertext.clone(),
                fingerprint: fingerprint.clone(),
            })),
        }
    }
}

/// Mask a secret for display: keep the trailing 4 characters, replace
/// the rest with at least 4 masking characters. Empty stays empty.
pub fn mask(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }

    let chars: Vec<char> = value.chars().collect();
    let tail_start = chars.len().saturating_sub(4);
    let tail: String = chars[tail_start..].iter().collect();
    // One star per hidden character, minimum 4 regardless of length.
    let stars = std::cmp::max(tail_start, 4);
    format!("{}{}", MASK_CHAR.to_string().repeat(stars), tail)
}

fn derive_key(material: &str, label: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(label);
    hasher.update(material.as_bytes());
    hasher.finalize().into()
}
