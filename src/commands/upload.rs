use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::error::UploadError;
use crate::services::processor::{collect_upload_paths, process_receipt, process_resize};
use crate::services::render::{display_total, render_card};
use crate::services::state::AppState;
use crate::utils::format_money;

/// Uploads every file in turn; one failure does not stop the batch.
pub async fn upload_receipts(state: &AppState, inputs: &[PathBuf]) -> Result<(), String> {
    let paths = collect_upload_paths(inputs);
    if paths.is_empty() {
        return Err("No PDF, PNG, JPG, or JPEG files found".to_string());
    }

    let mut failed = 0;
    for path in &paths {
        info!(file = %path.display(), "uploading receipt");
        match process_receipt(state, path).await {
            Ok(record) => {
                println!(
                    "Saved {} ({})",
                    record.id,
                    format_money(&record.expense.currency, display_total(&record.expense))
                );
                println!("{}", render_card(&record));
            }
            Err(err @ UploadError::QuotaExhausted { .. }) => {
                return Err(format!("{}. Upgrade to keep uploading.", err));
            }
            Err(UploadError::NotSignedIn) => return Err(UploadError::NotSignedIn.to_string()),
            Err(err) => {
                error!(file = %path.display(), error = %err, "upload failed");
                eprintln!("{}: {}", path.display(), err);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(format!("{} of {} uploads failed", failed, paths.len()));
    }
    Ok(())
}

pub async fn resize_image(
    state: &AppState,
    path: &Path,
    preset: &str,
    output_format: &str,
    out_dir: &Path,
) -> Result<(), String> {
    let written = process_resize(state, path, preset, output_format, out_dir)
        .await
        .map_err(|e| e.to_string())?;
    println!("Saved {}", written.display());
    Ok(())
}
