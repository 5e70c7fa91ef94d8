use crate::db::Database;
use crate::services::settings::{load_settings, store_setting};
use crate::utils::redact;

pub fn show_settings(db: &Database) -> Result<(), String> {
    let settings = load_settings(db).map_err(|e| e.to_string())?;
    let show = |value: Option<&str>| value.unwrap_or("(not set)").to_string();

    println!("receipt_webhook_url  {}", show(settings.receipt_webhook_url.as_deref()));
    println!("resize_webhook_url   {}", show(settings.resize_webhook_url.as_deref()));
    println!("hosted_url           {}", show(settings.hosted_url.as_deref()));
    println!(
        "hosted_anon_key      {}",
        settings
            .hosted_anon_key
            .as_deref()
            .map(redact)
            .unwrap_or_else(|| "(not set)".to_string())
    );
    println!("storage_backend      {}", settings.storage_backend);
    println!("free_upload_limit    {}", settings.free_upload_limit);
    println!("receipts_table       {}", settings.receipts_table);
    Ok(())
}

/// Takes effect on the next run.
pub fn set_setting(db: &Database, key: &str, value: &str) -> Result<(), String> {
    store_setting(db, key, value, true).map_err(|e| e.to_string())?;
    println!("{} updated", key);
    Ok(())
}
