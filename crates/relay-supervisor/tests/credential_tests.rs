//! Credential resolution against a fake dashboard and a temp session dir.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use pretty_assertions::assert_eq;
use relay_core::{CredentialsUpdate, KeyWrite, Settings};
use relay_supervisor::{CredentialError, CredentialSource, CredentialStore, SupervisorConfig};
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(session_id: &str) -> Settings {
    Settings {
        owner_name: "kord".into(),
        owner_numbers: "2348000000000".into(),
        session_id: session_id.into(),
        ..Settings::default()
    }
}

fn store_for(dir: &TempDir, dashboard: &str) -> (CredentialStore, SupervisorConfig) {
    let config = SupervisorConfig::default()
        .with_data_dir(dir.path())
        .with_dashboard_url(dashboard);
    let store = CredentialStore::new(&config).expect("credential store");
    (store, config)
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).expect("read file")).expect("json")
}

#[tokio::test]
async fn remote_reference_is_fetched_and_persisted() {
    let server = MockServer::start().await;
    let data = json!({ "registered": true, "me": { "id": "234@s.whatsapp.net" }, "noiseKey": "n" });
    Mock::given(method("GET"))
        .and(path("/api/files/fetch/abc123"))
        .and(query_param("apikey", "kordAi.key"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "status": "success", "data": data })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (store, config) = store_for(&dir, &server.uri());

    let resolved = store.resolve(&settings("kord_ai-abc123")).await.unwrap();

    assert_eq!(
        resolved.source,
        CredentialSource::Remote {
            reference: "abc123".into()
        }
    );
    assert!(resolved.credentials.registered);
    assert_eq!(read_json(&config.creds_path()), data);
}

#[tokio::test]
async fn remote_reference_with_reserved_characters_stays_one_segment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files/fetch/abc%23x%3Fy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": { "registered": false }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (store, _config) = store_for(&dir, &server.uri());

    let resolved = store.resolve(&settings("kord_ai-abc#x?y")).await.unwrap();
    assert_eq!(
        resolved.source,
        CredentialSource::Remote {
            reference: "abc#x?y".into()
        }
    );
}

#[tokio::test]
async fn remote_error_status_fails_without_fallthrough() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files/fetch/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (store, config) = store_for(&dir, &server.uri());
    std::fs::create_dir_all(&config.session_dir).unwrap();
    std::fs::write(config.creds_path(), r#"{"registered":true}"#).unwrap();

    let err = store.resolve(&settings("kord_ai-gone")).await.unwrap_err();

    assert!(
        matches!(&err, CredentialError::FetchStatus { status: 404, body } if body == "not found"),
        "unexpected error: {err:?}"
    );
    assert_eq!(read_json(&config.creds_path()), json!({ "registered": true }));
}

#[tokio::test]
async fn remote_body_without_success_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files/fetch/x"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "error" })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (store, config) = store_for(&dir, &server.uri());

    let err = store.resolve(&settings("kord_ai-x")).await.unwrap_err();
    assert!(matches!(err, CredentialError::InvalidResponse));
    assert!(!config.creds_path().exists());
}

#[tokio::test]
async fn unreachable_dashboard_is_a_fetch_error() {
    let dir = tempfile::tempdir().unwrap();
    // Nothing listens on port 9 (discard); the connect fails fast.
    let (store, _) = store_for(&dir, "http://127.0.0.1:9");

    let err = store.resolve(&settings("kord_ai-abc")).await.unwrap_err();
    assert!(matches!(err, CredentialError::Fetch(_)), "unexpected error: {err:?}");
}

#[tokio::test]
async fn inline_blob_overwrites_local_file() {
    let dir = tempfile::tempdir().unwrap();
    let (store, config) = store_for(&dir, "http://127.0.0.1:9");
    std::fs::create_dir_all(&config.session_dir).unwrap();
    std::fs::write(config.creds_path(), r#"{"registered":false}"#).unwrap();

    let raw = r#"{"registered":true,"advSecretKey":"s"}"#;
    let resolved = store
        .resolve(&settings(&STANDARD.encode(raw)))
        .await
        .unwrap();

    assert_eq!(resolved.source, CredentialSource::InlineBlob);
    assert!(resolved.credentials.registered);
    assert_eq!(std::fs::read_to_string(config.creds_path()).unwrap(), raw);
}

#[tokio::test]
async fn invalid_inline_blob_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = store_for(&dir, "http://127.0.0.1:9");

    let err = store
        .resolve(&settings(&STANDARD.encode("definitely not json")))
        .await
        .unwrap_err();
    assert!(matches!(err, CredentialError::InvalidBlob(_)));
}

#[tokio::test]
async fn empty_reference_loads_local_file_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let (store, config) = store_for(&dir, "http://127.0.0.1:9");
    std::fs::create_dir_all(&config.session_dir).unwrap();
    let original = "{\n  \"registered\": true,\n  \"custom\": 1\n}";
    std::fs::write(config.creds_path(), original).unwrap();

    let resolved = store.resolve(&settings("   ")).await.unwrap();

    assert_eq!(resolved.source, CredentialSource::LocalFile);
    assert!(resolved.credentials.registered);
    assert_eq!(std::fs::read_to_string(config.creds_path()).unwrap(), original);
}

#[tokio::test]
async fn nothing_configured_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let (store, config) = store_for(&dir, "http://127.0.0.1:9");

    let resolved = store.resolve(&settings("")).await.unwrap();

    assert_eq!(resolved.source, CredentialSource::Fresh);
    assert!(!resolved.credentials.registered);
    assert!(config.session_dir.is_dir());
}

#[tokio::test]
async fn corrupt_local_file_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let (store, config) = store_for(&dir, "http://127.0.0.1:9");
    std::fs::create_dir_all(&config.session_dir).unwrap();
    std::fs::write(config.creds_path(), "{ truncated").unwrap();

    let resolved = store.resolve(&settings("")).await.unwrap();
    assert_eq!(resolved.source, CredentialSource::Fresh);
}

#[tokio::test]
async fn updates_are_persisted_and_reloadable() {
    let dir = tempfile::tempdir().unwrap();
    let (store, config) = store_for(&dir, "http://127.0.0.1:9");
    store.resolve(&settings("")).await.unwrap();

    let mut fields = serde_json::Map::new();
    fields.insert("registered".into(), json!(true));
    fields.insert("me".into(), json!({ "id": "234@s.whatsapp.net" }));
    let update = CredentialsUpdate {
        creds: fields,
        keys: vec![KeyWrite::set("pre-key", "7", json!({ "public": "p" }))],
    };
    store.update(&update).await.unwrap();

    assert_eq!(read_json(&config.creds_path())["registered"], json!(true));
    assert!(config.session_dir.join("pre-key-7.json").exists());

    let reopened = CredentialStore::new(&config).unwrap();
    let loaded = reopened.load_local().await.unwrap().expect("persisted creds");
    assert!(loaded.registered);
    assert_eq!(loaded.me, Some(json!({ "id": "234@s.whatsapp.net" })));
    assert_eq!(reopened.current().await, loaded);
}

#[tokio::test]
async fn rejected_update_leaves_active_copy_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = store_for(&dir, "http://127.0.0.1:9");
    store.resolve(&settings("")).await.unwrap();

    let mut fields = serde_json::Map::new();
    fields.insert("registered".into(), json!("not a bool"));
    let err = store.update(&CredentialsUpdate::creds(fields)).await.unwrap_err();

    assert!(matches!(err, CredentialError::InvalidUpdate(_)));
    assert!(!store.current().await.registered);
}

#[tokio::test]
async fn prune_keeps_session_json() {
    let dir = tempfile::tempdir().unwrap();
    let (store, config) = store_for(&dir, "http://127.0.0.1:9");
    let session = &config.session_dir;
    std::fs::create_dir_all(session).unwrap();
    for name in [
        "pre-key-1.json",
        "pre-key-2.json",
        "session-123.json",
        "session.json",
        "creds.json",
        "sender-key-g.json",
    ] {
        std::fs::write(session.join(name), "{}").unwrap();
    }

    let removed = store.prune_stale_key_files().await;

    assert_eq!(removed, 3);
    let mut left: Vec<String> = std::fs::read_dir(session)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    left.sort();
    assert_eq!(left, vec!["creds.json", "sender-key-g.json", "session.json"]);
}
