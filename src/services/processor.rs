use anyhow::anyhow;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::UploadError;
use crate::models::ExpenseRecord;
use crate::services::normalize::normalize_webhook_payload;
use crate::services::quota::fetch_or_create_profile;
use crate::services::state::AppState;
use crate::services::validation::{check_upload, is_supported};
use crate::services::webhook::{archive_file_name, UploadFile};
use crate::utils::{now_millis, sha256_bytes};

/// Upload a receipt or invoice, persist what the workflow extracted, and count it against the quota.
pub async fn process_receipt(state: &AppState, path: &Path) -> Result<ExpenseRecord, UploadError> {
    let file = read_upload(path)?;
    let hash = sha256_bytes(&file.bytes);
    let outcome = upload_receipt(state, &file).await;
    record_outcome(state, &file.name, &hash, "receipt", outcome.as_ref().err());
    outcome
}

async fn upload_receipt(state: &AppState, file: &UploadFile) -> Result<ExpenseRecord, UploadError> {
    let user = state.require_user()?;
    let profiles = state.profile_store()?;
    let profile = fetch_or_create_profile(profiles.as_ref(), &user).await?;
    if !state.quota.can_upload(Some(&profile)) {
        return Err(UploadError::QuotaExhausted {
            count: profile.upload_count,
            limit: state.quota.limit(),
        });
    }

    let url = state
        .settings
        .receipt_webhook_url
        .as_deref()
        .ok_or(UploadError::WebhookMissing("Receipt"))?;
    let payload = state.webhook.upload_expense_document(url, file).await?;
    let expense = normalize_webhook_payload(&payload, &user.id)
        .map_err(|e| UploadError::ProcessingFailed(e.to_string()))?;

    let store = state.receipt_store()?;
    let record = match store.insert(expense.clone()).await {
        Ok(record) => record,
        Err(err) => {
            warn!(error = %err, unsaved = ?expense, "processed document could not be saved");
            return Err(UploadError::SaveFailed);
        }
    };

    match state.quota.increment_upload_count(profiles.as_ref(), &profile).await {
        Ok(Some(updated)) => info!(
            remaining = ?state.quota.remaining_uploads(Some(&updated)),
            "receipt saved"
        ),
        Ok(None) => {}
        Err(err) => warn!(error = %err, "failed to update upload count"),
    }

    Ok(record)
}

/// Send an image through the resize workflow and save the returned archive into `out_dir`.
pub async fn process_resize(
    state: &AppState,
    path: &Path,
    preset: &str,
    output_format: &str,
    out_dir: &Path,
) -> Result<PathBuf, UploadError> {
    let file = read_upload(path)?;
    let hash = sha256_bytes(&file.bytes);
    let outcome = resize(state, &file, preset, output_format, out_dir).await;
    record_outcome(state, &file.name, &hash, "resize", outcome.as_ref().err());
    outcome
}

async fn resize(
    state: &AppState,
    file: &UploadFile,
    preset: &str,
    output_format: &str,
    out_dir: &Path,
) -> Result<PathBuf, UploadError> {
    if preset.trim().is_empty() || output_format.trim().is_empty() {
        return Err(UploadError::Other(anyhow!("Preset and output format are required")));
    }
    let url = state
        .settings
        .resize_webhook_url
        .as_deref()
        .ok_or(UploadError::WebhookMissing("Resize"))?;

    let archive = state
        .webhook
        .resize_images(url, file, preset, output_format)
        .await?;

    std::fs::create_dir_all(out_dir)
        .map_err(|e| anyhow!("Create {}: {}", out_dir.display(), e))?;
    let target = out_dir.join(archive_file_name(preset, output_format, now_millis()));
    std::fs::write(&target, &archive.bytes)
        .map_err(|e| anyhow!("Write {}: {}", target.display(), e))?;
    info!(
        path = %target.display(),
        bytes = archive.bytes.len(),
        content_type = ?archive.content_type,
        "archive saved"
    );
    Ok(target)
}

/// Expands directories one level deep to the supported documents they contain.
pub fn collect_upload_paths(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found = walkdir::WalkDir::new(input)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .filter(|e| is_supported(e.path()))
                .map(|e| e.path().to_path_buf())
                .collect::<Vec<_>>();
            found.sort();
            paths.extend(found);
        } else {
            paths.push(input.clone());
        }
    }
    paths
}

fn read_upload(path: &Path) -> Result<UploadFile, UploadError> {
    let metadata =
        std::fs::metadata(path).map_err(|e| anyhow!("Read {}: {}", path.display(), e))?;
    let kind = check_upload(path, metadata.len())?;
    let bytes = std::fs::read(path).map_err(|e| anyhow!("Read {}: {}", path.display(), e))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string());
    Ok(UploadFile { name, kind, bytes })
}

fn record_outcome(state: &AppState, name: &str, hash: &str, kind: &str, error: Option<&UploadError>) {
    let (status, message) = match error {
        None => ("success", None),
        Some(err) => ("failed", Some(err.to_string())),
    };
    let logged = state
        .db
        .lock()
        .map_err(|_| anyhow!("DB lock poisoned"))
        .and_then(|db| Ok(db.log_upload(name, hash, kind, status, message.as_deref())?));
    if let Err(err) = logged {
        warn!(error = %err, "failed to write upload log");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, StorageBackend};
    use crate::services::state::tests::{alice_session, local_state};
    use crate::services::webhook::WebhookClient;
    use crate::test_support::{StubResponse, StubServer};
    use serde_json::json;
    use std::time::Duration;

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[tokio::test]
    async fn receipt_is_saved_and_counted() {
        let server = StubServer::start(|_| {
            StubResponse::json(
                200,
                json!([{"category": "GROCERY", "store_name": "Corner Shop", "subtotal": 3, "tax": 0.5}]),
            )
        })
        .await;
        let (dir, mut state) = local_state();
        state.settings.receipt_webhook_url = Some(server.url.clone());
        state.adopt_session(alice_session()).await.unwrap();
        let path = write(dir.path(), "receipt.png", b"\x89PNG fake");

        let record = process_receipt(&state, &path).await.unwrap();
        assert_eq!(record.expense.category, Category::Grocery);
        assert_eq!(record.expense.vendor_name.as_deref(), Some("Corner Shop"));
        assert_eq!(record.expense.total_amount, Some(3.5));
        assert_eq!(record.expense.user_id, "alice");

        let listed = state.receipt_store().unwrap().list("alice").await.unwrap();
        assert_eq!(listed.len(), 1);
        let profile = state.profile_store().unwrap().get("alice").await.unwrap().unwrap();
        assert_eq!(profile.upload_count, 1);

        let logs = state.db.lock().unwrap().recent_upload_logs(5).unwrap();
        assert_eq!(logs[0].status, "success");
        assert_eq!(logs[0].kind, "receipt");
    }

    #[tokio::test]
    async fn exhausted_quota_blocks_before_upload() {
        let server = StubServer::start(|_| StubResponse::json(200, json!({}))).await;
        let (dir, mut state) = local_state();
        state.settings.receipt_webhook_url = Some(server.url.clone());
        state.adopt_session(alice_session()).await.unwrap();
        state
            .profile_store()
            .unwrap()
            .set_upload_count("alice", 5, "2025-01-01T00:00:00Z")
            .await
            .unwrap();
        let path = write(dir.path(), "receipt.pdf", b"%PDF");

        let err = process_receipt(&state, &path).await.unwrap_err();
        assert!(matches!(err, UploadError::QuotaExhausted { count: 5, limit: 5 }));
        assert!(server.requests().is_empty());
        let logs = state.db.lock().unwrap().recent_upload_logs(5).unwrap();
        assert_eq!(logs[0].status, "failed");
    }

    #[tokio::test]
    async fn paid_profiles_skip_the_limit() {
        let server = StubServer::start(|_| StubResponse::json(200, json!({"total": 1}))).await;
        let (dir, mut state) = local_state();
        state.settings.receipt_webhook_url = Some(server.url.clone());
        let (_, mut profile) = state.adopt_session(alice_session()).await.unwrap();
        profile.upload_count = 50;
        profile.has_paid = true;
        state.profile_store().unwrap().create(&profile).await.unwrap();
        let path = write(dir.path(), "receipt.pdf", b"%PDF");

        assert!(process_receipt(&state, &path).await.is_ok());
    }

    #[tokio::test]
    async fn signed_out_users_cannot_upload() {
        let (dir, state) = local_state();
        let path = write(dir.path(), "receipt.pdf", b"%PDF");
        let err = process_receipt(&state, &path).await.unwrap_err();
        assert!(matches!(err, UploadError::NotSignedIn));
    }

    #[tokio::test]
    async fn rejected_type_never_reaches_webhook() {
        let server = StubServer::start(|_| StubResponse::json(200, json!({}))).await;
        let (dir, mut state) = local_state();
        state.settings.receipt_webhook_url = Some(server.url.clone());
        state.adopt_session(alice_session()).await.unwrap();
        let path = write(dir.path(), "notes.txt", b"hello");

        let err = process_receipt(&state, &path).await.unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedFileType));
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn save_failure_keeps_quota_untouched() {
        let webhook = StubServer::start(|_| StubResponse::json(200, json!({"total": 9}))).await;
        let hosted = StubServer::start(|req| {
            if req.path.starts_with("/rest/v1/profiles") && req.method == "GET" {
                StubResponse::json(
                    200,
                    json!([{
                        "uid": "alice", "email": "", "display_name": "", "photo_url": null,
                        "upload_count": 1, "has_paid": false,
                        "created_at": "2025-01-01T00:00:00Z", "updated_at": "2025-01-01T00:00:00Z"
                    }]),
                )
            } else {
                StubResponse::json(500, json!({"message": "boom"}))
            }
        })
        .await;

        let dir = tempfile::tempdir().unwrap();
        let db = crate::db::Database::new(dir.path().join("h.sqlite")).unwrap();
        let mut settings = crate::services::settings::load_settings_with(&db, |_| None).unwrap();
        settings.storage_backend = StorageBackend::Hosted;
        settings.hosted_url = Some(hosted.url.clone());
        settings.hosted_anon_key = Some("anon".to_string());
        settings.receipt_webhook_url = Some(webhook.url.clone());
        let db = std::sync::Arc::new(std::sync::Mutex::new(db));
        let vault = crate::services::auth::SessionVault::new(db.clone(), false);
        let state = AppState::new(db, settings, vault);
        state.adopt_session(alice_session()).await.unwrap();
        let path = write(dir.path(), "invoice.pdf", b"%PDF");

        let err = process_receipt(&state, &path).await.unwrap_err();
        assert!(matches!(err, UploadError::SaveFailed));
        assert!(!hosted.requests().iter().any(|r| r.method == "PATCH"));
    }

    #[tokio::test]
    async fn webhook_timeout_is_reported() {
        let server = StubServer::start(|_| {
            StubResponse::json(200, json!({})).delayed(Duration::from_secs(3))
        })
        .await;
        let (dir, state) = local_state();
        let mut state = state.with_webhook(WebhookClient::with_timeout(Duration::from_millis(200)));
        state.settings.receipt_webhook_url = Some(server.url.clone());
        state.adopt_session(alice_session()).await.unwrap();
        let path = write(dir.path(), "receipt.jpg", b"\xFF\xD8");

        let err = process_receipt(&state, &path).await.unwrap_err();
        assert!(matches!(err, UploadError::Timeout));
        let profile = state.profile_store().unwrap().get("alice").await.unwrap().unwrap();
        assert_eq!(profile.upload_count, 0);
    }

    #[tokio::test]
    async fn resize_writes_named_archive() {
        let server = StubServer::start(|_| {
            StubResponse::bytes(200, "application/zip", b"PK\x03\x04data")
        })
        .await;
        let (dir, mut state) = local_state();
        state.settings.resize_webhook_url = Some(server.url.clone());
        let path = write(dir.path(), "photo.jpg", b"\xFF\xD8");
        let out_dir = dir.path().join("out");

        let written = process_resize(&state, &path, "story", "png", &out_dir).await.unwrap();
        let name = written.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("resized_images_story_png_"));
        assert!(name.ends_with(".zip"));
        assert_eq!(std::fs::read(&written).unwrap(), b"PK\x03\x04data".to_vec());
    }

    #[tokio::test]
    async fn resize_without_webhook_is_an_error() {
        let (dir, state) = local_state();
        let path = write(dir.path(), "photo.png", b"png");
        let err = process_resize(&state, &path, "story", "png", dir.path())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Resize webhook URL missing");
    }

    #[test]
    fn directories_expand_to_supported_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.pdf", b"");
        write(dir.path(), "a.JPG", b"");
        write(dir.path(), "skip.txt", b"");
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        write(&dir.path().join("nested"), "deep.pdf", b"");
        let single = dir.path().join("explicit.txt");

        let paths = collect_upload_paths(&[dir.path().to_path_buf(), single.clone()]);
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.pdf", "explicit.txt"]);
    }
}
