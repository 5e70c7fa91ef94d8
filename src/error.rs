use thiserror::Error;

/// Everything that can go wrong between picking a file and having a result.
///
/// The `Display` text is the message shown to the user.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Please upload a PDF, PNG, JPG, or JPEG file")]
    UnsupportedFileType,
    #[error("File is too large ({size} bytes); the limit is {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },
    #[error("Upload limit reached: {count} of {limit} free uploads used")]
    QuotaExhausted { count: u32, limit: u32 },
    #[error("Please sign in to upload documents")]
    NotSignedIn,
    #[error("{0} webhook URL missing")]
    WebhookMissing(&'static str),
    #[error("Request timed out after 2 minutes. Please try again or check if your workflow is taking too long to process.")]
    Timeout,
    #[error("{0}")]
    ProcessingFailed(String),
    #[error("Received empty file from server. The workflow may have failed.")]
    EmptyArchive,
    #[error("Invalid ZIP file received. The workflow may have encountered an error.")]
    InvalidArchive,
    #[error("Failed to save expense to database")]
    SaveFailed,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
