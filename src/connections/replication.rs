//! Secret-stripping projection applied before any cache or replica
//! fan-out.
//!
//! Allow-list by construction: the replicated shape is built field by
//! field from known-safe data, so a new field on [`ConnectionRecord`]
//! stays out of the replication path until it is added here
//! deliberately.

use serde::{Deserialize, Serialize};

use super::ConnectionRecord;
use crate::secrets::KeyDescriptor;

/// The only connection shape that may leave the process towards a
/// shared cache or secondary replica.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedConnection {
    pub url: String,
    pub config: serde_json::Value,
    pub key_descriptor: KeyDescriptor,
}

/// Project one provider's records into their replicable form. The
/// descriptors are computed by the caller (they require the codec);
/// `records` and `descriptors` are index-aligned.
pub fn replicated_view(
    records: &[ConnectionRecord],
    descriptors: &[KeyDescriptor],
) -> Vec<ReplicatedConnection> {
    debug_assert_eq!(records.len(), descriptors.len());
    records
        .iter()
        .zip(descriptors.iter())
        .map(|(record, descriptor)| ReplicatedConnection {
            url: record.base_url.clone(),
            config: record.config.clone(),
            key_descriptor: descriptor.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::ConnectionRecord;
    use crate::secrets::{EncryptionMode, SecretCodec};
    use serde_json::json;

    #[test]
    fn replicated_payload_carries_no_secret_material() {
        let codec = SecretCodec::new(EncryptionMode::PlaintextAtRest, None).unwrap();
        let secret = "sk-live-abcdef-XYZ1";
        let record = ConnectionRecord::new(
            "https://api.openai.com/v1".into(),
            codec.seal(secret).unwrap(),
            json!({ "enable": true }),
        );
        let descriptor = codec.descriptor(&record.secret).unwrap();

        let view = replicated_view(std::slice::from_ref(&record), &[descriptor]);
        let wire = serde_json::to_string(&view).unwrap();

        assert!(!wire.contains(secret));
        assert!(!wire.contains("sk-live-abcdef"));
        // The safe fields do pass through.
        assert!(wire.contains("https://api.openai.com/v1"));
        assert!(wire.contains("XYZ1"));
        assert!(wire.contains("has_value"));
    }

    #[test]
    fn unset_slot_replicates_as_empty_descriptor() {
        let codec = SecretCodec::new(EncryptionMode::Disabled, None).unwrap();
        let record = ConnectionRecord::new(
            "http://localhost:11434".into(),
            crate::secrets::SecretSlot::Unset,
            json!({}),
        );
        let descriptor = codec.descriptor(&record.secret).unwrap();
        let view = replicated_view(std::slice::from_ref(&record), &[descriptor]);
        assert!(!view[0].key_descriptor.has_value);
        assert!(view[0].key_descriptor.fingerprint.is_none());
    }
}
