//! Integration tests for the connection configuration core, run over
//! the in-memory store. Restart semantics are simulated by building a
//! fresh registry over the same `MemStore`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use chathub::cache::ReplicaCache;
use chathub::connections::service::ConnectionConfigService;
use chathub::connections::store::ConnectionStore;
use chathub::connections::{ConnectionEdit, KeyEditMode, NewConnection, ProviderKind};
use chathub::errors::AppError;
use chathub::probe::Prober;
use chathub::secrets::{EncryptionMode, SecretCodec};
use chathub::store::memory::MemStore;
use chathub::store::ConfigStore;

const OPENAI_DEFAULT: &str = "https://api.openai.com/v1";

async fn service_over(
    mem: Arc<MemStore>,
    mode: EncryptionMode,
    key: Option<&str>,
    allowed_openai: Vec<String>,
) -> ConnectionConfigService {
    let codec = Arc::new(SecretCodec::new(mode, key).unwrap());
    let registry = Arc::new(ConnectionStore::new(mem, codec.clone()));
    registry.hydrate().await.unwrap();
    let cache = ReplicaCache::new(None);
    let prober = Prober::new(cache.clone(), Duration::from_millis(200));
    ConnectionConfigService::new(registry, codec, cache, prober, allowed_openai, Vec::new())
}

async fn open_service(mode: EncryptionMode, key: Option<&str>) -> ConnectionConfigService {
    // Empty allow-list: allow-listing inactive.
    service_over(Arc::new(MemStore::new()), mode, key, Vec::new()).await
}

fn edit(url: &str, key_edit: KeyEditMode, key_value: Option<&str>) -> ConnectionEdit {
    ConnectionEdit {
        url: url.to_string(),
        key_edit,
        key_value: key_value.map(String::from),
        config: json!({}),
    }
}

fn edit_with_config(url: &str, config: serde_json::Value) -> ConnectionEdit {
    ConnectionEdit {
        url: url.to_string(),
        key_edit: KeyEditMode::Keep,
        key_value: None,
        config,
    }
}

// ── Alignment invariant ───────────────────────────────────────

#[tokio::test]
async fn sibling_lists_stay_aligned_through_every_operation() {
    let svc = open_service(EncryptionMode::PlaintextAtRest, None).await;
    let p = ProviderKind::Openai;

    let assert_aligned = |out: &chathub::connections::ProviderConnections, len: usize| {
        assert_eq!(out.urls.len(), len);
        assert_eq!(out.configs.len(), len);
        assert_eq!(out.key_descriptors.len(), len);
    };

    let out = svc
        .upsert_connections(
            p,
            vec![
                edit("https://one.example.com", KeyEditMode::Replace, Some("sk-one")),
                edit("https://two.example.com", KeyEditMode::Keep, None),
            ],
        )
        .await
        .unwrap();
    assert_aligned(&out, 2);

    svc.add_connection(
        p,
        NewConnection {
            url: "https://three.example.com".into(),
            key: Some("sk-three".into()),
            config: json!({ "enable": true }),
        },
    )
    .await
    .unwrap();
    assert_aligned(&svc.list_connections(p).unwrap(), 3);

    svc.delete_connection(p, 0).await.unwrap();
    assert_aligned(&svc.list_connections(p).unwrap(), 2);

    // Shrink through upsert.
    let out = svc
        .upsert_connections(p, vec![edit("https://solo.example.com", KeyEditMode::Keep, None)])
        .await
        .unwrap();
    assert_aligned(&out, 1);
}

// ── Allow-list ────────────────────────────────────────────────

#[tokio::test]
async fn allow_list_rejects_unknown_hosts_and_normalizes_trailing_slash() {
    let svc = service_over(
        Arc::new(MemStore::new()),
        EncryptionMode::PlaintextAtRest,
        None,
        vec![OPENAI_DEFAULT.to_string()],
    )
    .await;

    let err = svc
        .add_connection(
            ProviderKind::Openai,
            NewConnection {
                url: "https://evil.example.com".into(),
                key: None,
                config: json!({}),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UrlNotAllowed { url } if url == "https://evil.example.com"));

    // Trailing slash normalizes onto the allow-list entry.
    let descriptor = svc
        .add_connection(
            ProviderKind::Openai,
            NewConnection {
                url: format!("{}/", OPENAI_DEFAULT),
                key: None,
                config: json!({}),
            },
        )
        .await
        .unwrap();
    assert_eq!(descriptor.url, OPENAI_DEFAULT);
    assert_eq!(descriptor.index, 0);

    let out = svc.list_connections(ProviderKind::Openai).unwrap();
    assert_eq!(out.urls, vec![OPENAI_DEFAULT.to_string()]);
    assert_eq!(out.allowed_base_urls, vec![OPENAI_DEFAULT.to_string()]);
}

#[tokio::test]
async fn upsert_validates_before_mutating_anything() {
    let svc = service_over(
        Arc::new(MemStore::new()),
        EncryptionMode::PlaintextAtRest,
        None,
        vec![OPENAI_DEFAULT.to_string()],
    )
    .await;
    svc.upsert_connections(
        ProviderKind::Openai,
        vec![edit(OPENAI_DEFAULT, KeyEditMode::Replace, Some("sk-orig"))],
    )
    .await
    .unwrap();

    // Second edit in the batch is off-list: the whole batch fails and
    // the first edit must not have been applied either.
    let err = svc
        .upsert_connections(
            ProviderKind::Openai,
            vec![
                edit(OPENAI_DEFAULT, KeyEditMode::Clear, None),
                edit("https://evil.example.com", KeyEditMode::Keep, None),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UrlNotAllowed { .. }));

    let out = svc.list_connections(ProviderKind::Openai).unwrap();
    assert_eq!(out.urls.len(), 1);
    assert!(out.key_descriptors[0].has_value, "clear must not have been applied");
}

// ── Key-edit intent ───────────────────────────────────────────

#[tokio::test]
async fn ambiguous_key_edits_are_rejected() {
    let svc = open_service(EncryptionMode::PlaintextAtRest, None).await;
    let p = ProviderKind::Openai;

    // keep + supplied value
    let err = svc
        .upsert_connections(p, vec![edit("https://a.example.com", KeyEditMode::Keep, Some("sk-x"))])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidKeyEdit { index: 0, .. }));

    // clear + supplied value
    let err = svc
        .upsert_connections(p, vec![edit("https://a.example.com", KeyEditMode::Clear, Some("sk-x"))])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidKeyEdit { index: 0, .. }));

    // replace without value
    let err = svc
        .upsert_connections(p, vec![edit("https://a.example.com", KeyEditMode::Replace, None)])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidKeyEdit { index: 0, .. }));

    assert!(svc.list_connections(p).unwrap().urls.is_empty());
}

#[tokio::test]
async fn keep_replace_clear_lifecycle() {
    let svc = open_service(EncryptionMode::PlaintextAtRest, None).await;
    let p = ProviderKind::Openai;
    let url = "https://a.example.com";

    let out = svc
        .upsert_connections(p, vec![edit(url, KeyEditMode::Replace, Some("sk-first"))])
        .await
        .unwrap();
    assert!(out.key_descriptors[0].has_value);
    let first_fp = out.key_descriptors[0].fingerprint.clone().unwrap();

    // keep: descriptor unchanged, no material crossed the boundary
    let out = svc
        .upsert_connections(p, vec![edit(url, KeyEditMode::Keep, None)])
        .await
        .unwrap();
    assert!(out.key_descriptors[0].has_value);
    assert_eq!(out.key_descriptors[0].fingerprint.as_deref(), Some(first_fp.as_str()));

    // replace with a different value: fingerprint changes
    let out = svc
        .upsert_connections(p, vec![edit(url, KeyEditMode::Replace, Some("sk-second"))])
        .await
        .unwrap();
    assert_ne!(out.key_descriptors[0].fingerprint.as_deref(), Some(first_fp.as_str()));

    // an unrelated config-only edit must not clear the key (keep default)
    let out = svc
        .upsert_connections(p, vec![edit_with_config(url, json!({ "enable": false }))])
        .await
        .unwrap();
    assert!(out.key_descriptors[0].has_value);
    assert_eq!(out.configs[0], json!({ "enable": false }));

    // only an explicit clear unsets it
    let out = svc
        .upsert_connections(p, vec![edit(url, KeyEditMode::Clear, None)])
        .await
        .unwrap();
    assert!(!out.key_descriptors[0].has_value);
    assert!(out.key_descriptors[0].fingerprint.is_none());
}

// ── Masking ───────────────────────────────────────────────────

#[tokio::test]
async fn descriptors_reveal_only_the_last_four_characters() {
    let svc = open_service(EncryptionMode::PlaintextAtRest, None).await;
    let secret = "sk-abcdefgh-1234";
    let out = svc
        .upsert_connections(
            ProviderKind::Openai,
            vec![edit("https://a.example.com", KeyEditMode::Replace, Some(secret))],
        )
        .await
        .unwrap();

    let masked = &out.key_descriptors[0].masked;
    assert!(masked.ends_with("1234"));
    assert!(masked[..masked.len() - 4].chars().all(|c| c == '*'));
    assert_ne!(masked, secret);
    // Serialized output carries no secret material anywhere.
    let wire = serde_json::to_string(&out).unwrap();
    assert!(!wire.contains("sk-abcdefgh"));
}

// ── Delete re-indexing ────────────────────────────────────────

#[tokio::test]
async fn delete_shifts_configs_down_with_their_connections() {
    let svc = open_service(EncryptionMode::PlaintextAtRest, None).await;
    let p = ProviderKind::Ollama;

    svc.upsert_connections(
        p,
        vec![
            edit_with_config("http://host0:11434", json!({ "n": 0 })),
            edit_with_config("http://host1:11434", json!({ "n": 1 })),
            edit_with_config("http://host2:11434", json!({ "n": 2 })),
        ],
    )
    .await
    .unwrap();

    svc.delete_connection(p, 1).await.unwrap();

    let out = svc.list_connections(p).unwrap();
    assert_eq!(out.urls, vec!["http://host0:11434", "http://host2:11434"]);
    assert_eq!(out.configs, vec![json!({ "n": 0 }), json!({ "n": 2 })]);
}

#[tokio::test]
async fn stale_index_surfaces_as_conflict() {
    let svc = open_service(EncryptionMode::PlaintextAtRest, None).await;
    let err = svc
        .delete_connection(ProviderKind::Openai, 5)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::IndexOutOfRange { index: 5, len: 0 }));
}

// ── Encryption modes across restarts ──────────────────────────

#[tokio::test]
async fn disabled_mode_loses_secrets_on_restart_but_keeps_connections() {
    let mem = Arc::new(MemStore::new());
    {
        let svc = service_over(mem.clone(), EncryptionMode::Disabled, None, Vec::new()).await;
        let out = svc
            .upsert_connections(
                ProviderKind::Openai,
                vec![edit("https://a.example.com", KeyEditMode::Replace, Some("sk-volatile"))],
            )
            .await
            .unwrap();
        assert!(out.key_descriptors[0].has_value);
        assert!(!out.persistence_enabled);
        assert!(!out.encryption_enabled);
    }

    // Simulated restart: new registry over the same storage.
    let svc = service_over(mem.clone(), EncryptionMode::Disabled, None, Vec::new()).await;
    let out = svc.list_connections(ProviderKind::Openai).unwrap();
    assert_eq!(out.urls, vec!["https://a.example.com"]);
    assert!(!out.key_descriptors[0].has_value);

    // Nothing secret ever reached the rows either.
    let rows = mem.load(ProviderKind::Openai).await.unwrap();
    assert!(rows[0].secret_plaintext.is_none());
    assert!(rows[0].secret_ciphertext.is_none());
}

#[tokio::test]
async fn encrypted_mode_persists_ciphertext_only_and_survives_restart() {
    let mem = Arc::new(MemStore::new());
    {
        let svc = service_over(
            mem.clone(),
            EncryptionMode::EncryptedAtRest,
            Some("operator-key"),
            Vec::new(),
        )
        .await;
        let out = svc
            .upsert_connections(
                ProviderKind::Openai,
                vec![edit("https://a.example.com", KeyEditMode::Replace, Some("sk-durable-9876"))],
            )
            .await
            .unwrap();
        assert!(out.persistence_enabled);
        assert!(out.encryption_enabled);
    }

    let rows = mem.load(ProviderKind::Openai).await.unwrap();
    assert!(rows[0].secret_plaintext.is_none());
    let token = rows[0].secret_ciphertext.clone().unwrap();
    assert!(token.starts_with("v1:"));
    assert!(!token.contains("sk-durable"));

    // Restart with the same key: descriptor comes back masked.
    let svc = service_over(
        mem.clone(),
        EncryptionMode::EncryptedAtRest,
        Some("operator-key"),
        Vec::new(),
    )
    .await;
    let out = svc.list_connections(ProviderKind::Openai).unwrap();
    assert!(out.key_descriptors[0].has_value);
    assert!(out.key_descriptors[0].masked.ends_with("9876"));
}

#[tokio::test]
async fn restart_with_rotated_key_surfaces_decryption_error() {
    let mem = Arc::new(MemStore::new());
    {
        let svc = service_over(
            mem.clone(),
            EncryptionMode::EncryptedAtRest,
            Some("old-key"),
            Vec::new(),
        )
        .await;
        svc.upsert_connections(
            ProviderKind::Openai,
            vec![edit("https://a.example.com", KeyEditMode::Replace, Some("sk-lost"))],
        )
        .await
        .unwrap();
    }

    let svc = service_over(
        mem,
        EncryptionMode::EncryptedAtRest,
        Some("new-key"),
        Vec::new(),
    )
    .await;
    let err = svc.list_connections(ProviderKind::Openai).unwrap_err();
    assert!(matches!(err, AppError::Decryption));
}

#[tokio::test]
async fn plaintext_mode_reports_durable_but_unencrypted() {
    let svc = open_service(EncryptionMode::PlaintextAtRest, None).await;
    let out = svc.list_connections(ProviderKind::Openai).unwrap();
    assert!(out.persistence_enabled);
    assert!(!out.encryption_enabled);
}

// ── Provider isolation ────────────────────────────────────────

#[tokio::test]
async fn provider_lists_are_independent() {
    let svc = open_service(EncryptionMode::PlaintextAtRest, None).await;
    svc.upsert_connections(
        ProviderKind::Openai,
        vec![edit("https://a.example.com", KeyEditMode::Keep, None)],
    )
    .await
    .unwrap();

    assert_eq!(svc.list_connections(ProviderKind::Openai).unwrap().urls.len(), 1);
    assert!(svc.list_connections(ProviderKind::Ollama).unwrap().urls.is_empty());
}
