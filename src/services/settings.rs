use anyhow::{anyhow, Result};

use crate::db::Database;
use crate::models::{Settings, StorageBackend};
use crate::services::crypto::CryptoService;
use crate::services::quota::FREE_UPLOAD_LIMIT;

pub const SETTING_KEYS: &[&str] = &[
    "receipt_webhook_url",
    "resize_webhook_url",
    "hosted_url",
    "hosted_anon_key",
    "storage_backend",
    "free_upload_limit",
    "receipts_table",
];

/// Sealed through the crypto service before they reach the settings table.
const SECRET_KEYS: &[&str] = &["hosted_anon_key"];

const DEFAULT_RECEIPTS_TABLE: &str = "receipts";

pub fn load_settings(db: &Database) -> Result<Settings> {
    load_settings_with(db, |name| std::env::var(name).ok())
}

/// Stored values win over `LEDGERDROP_<KEY>` environment variables, which win over defaults.
pub fn load_settings_with<F>(db: &Database, env: F) -> Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| -> Result<Option<String>> {
        let stored = db.get_setting(key)?.map(|v| open_stored(&v)).transpose()?;
        let value = stored.or_else(|| env(&env_name(key)));
        Ok(value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
    };

    let hosted_url = get("hosted_url")?;
    let storage_backend = match get("storage_backend")? {
        Some(value) => value.parse::<StorageBackend>().map_err(|e| anyhow!(e))?,
        None if hosted_url.is_some() => StorageBackend::Hosted,
        None => StorageBackend::Local,
    };
    let free_upload_limit = match get("free_upload_limit")? {
        Some(value) => value
            .parse::<u32>()
            .map_err(|e| anyhow!("Invalid free_upload_limit '{}': {}", value, e))?,
        None => FREE_UPLOAD_LIMIT,
    };

    Ok(Settings {
        receipt_webhook_url: get("receipt_webhook_url")?,
        resize_webhook_url: get("resize_webhook_url")?,
        hosted_url,
        hosted_anon_key: get("hosted_anon_key")?,
        storage_backend,
        free_upload_limit,
        receipts_table: get("receipts_table")?
            .unwrap_or_else(|| DEFAULT_RECEIPTS_TABLE.to_string()),
    })
}

/// Checks a value before it is stored so a bad entry cannot break startup.
pub fn validate_setting(key: &str, value: &str) -> Result<()> {
    if !SETTING_KEYS.contains(&key) {
        return Err(anyhow!(
            "Unknown setting '{}'; expected one of: {}",
            key,
            SETTING_KEYS.join(", ")
        ));
    }
    match key {
        "storage_backend" => {
            value.parse::<StorageBackend>().map_err(|e| anyhow!(e))?;
        }
        "free_upload_limit" => {
            value
                .parse::<u32>()
                .map_err(|e| anyhow!("Invalid free_upload_limit '{}': {}", value, e))?;
        }
        "receipt_webhook_url" | "resize_webhook_url" | "hosted_url" => {
            if !(value.starts_with("http://") || value.starts_with("https://")) {
                return Err(anyhow!("{} must be an http(s) URL", key));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Validates and stores one value, sealing secrets first.
pub fn store_setting(db: &Database, key: &str, value: &str, use_keychain: bool) -> Result<()> {
    let value = value.trim();
    validate_setting(key, value)?;
    if !SECRET_KEYS.contains(&key) {
        db.set_setting(key, value)?;
        return Ok(());
    }

    let sealed = if use_keychain {
        CryptoService::seal_secret(key, value)?
    } else {
        CryptoService::seal_secret_local(value)?
    };
    if let Some(previous) = db.get_setting(key)? {
        if previous != sealed {
            CryptoService::forget_secret(&previous);
        }
    }
    db.set_setting(key, &sealed)?;
    Ok(())
}

/// Values written before sealing existed are read back as plain text.
fn open_stored(value: &str) -> Result<String> {
    if value.starts_with("enc:") || value.starts_with("keychain:") {
        return CryptoService::open_secret(value);
    }
    Ok(value.to_string())
}

fn env_name(key: &str) -> String {
    format!("LEDGERDROP_{}", key.to_ascii_uppercase())
}
