use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Document category reported by the extraction workflow.
///
/// The workflow is not consistent about casing or naming, so parsing is
/// lenient while the original tag is kept for display and storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Invoice,
    Restaurant(String),
    Grocery,
    Other(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::Invoice => "INVOICE",
            Category::Restaurant(tag) => tag,
            Category::Grocery => "GROCERY",
            Category::Other(tag) => tag,
        }
    }
}

impl From<String> for Category {
    fn from(tag: String) -> Self {
        match tag.trim().to_ascii_uppercase().as_str() {
            "INVOICE" => Category::Invoice,
            "RESTAURANT" => Category::Restaurant("RESTAURANT".to_string()),
            "RESTAURANT_RECEIPT" => Category::Restaurant("RESTAURANT_RECEIPT".to_string()),
            "GROCERY" => Category::Grocery,
            _ => Category::Other(tag),
        }
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.as_str().to_string()
    }
}

impl Default for Category {
    fn default() -> Self {
        Category::Other(String::new())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line items come back either as a structured list or as free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Items {
    List(Vec<Value>),
    Text(String),
}

impl Items {
    pub fn is_empty(&self) -> bool {
        match self {
            Items::List(items) => items.is_empty(),
            Items::Text(text) => text.trim().is_empty(),
        }
    }
}

/// Rows written by other clients may carry `null` where this side expects a value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// An expense record before the store has assigned an id and timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewExpense {
    pub user_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub category: Category,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    pub vendor_name: Option<String>,
    pub date: Option<String>,
    pub due_date: Option<String>,
    pub receipt_time: Option<String>,
    pub order_number: Option<String>,
    pub server_name: Option<String>,
    pub image_url: Option<String>,
    pub items: Option<Items>,
    pub subtotal: Option<f64>,
    pub tax_amount: Option<f64>,
    pub tip_amount: Option<f64>,
    pub total_amount: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub currency: String,
    pub payment_terms: Option<String>,
    pub tags: Option<String>,
    #[serde(default)]
    pub raw_data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub id: String,
    pub created_at: String,
    #[serde(flatten)]
    pub expense: NewExpense,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub upload_count: u32,
    pub has_paid: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds.
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

impl Session {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Hosted,
    Local,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hosted" => Ok(StorageBackend::Hosted),
            "local" => Ok(StorageBackend::Local),
            other => Err(format!("Unknown storage backend '{}'", other)),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Hosted => f.write_str("hosted"),
            StorageBackend::Local => f.write_str("local"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub receipt_webhook_url: Option<String>,
    pub resize_webhook_url: Option<String>,
    pub hosted_url: Option<String>,
    pub hosted_anon_key: Option<String>,
    pub storage_backend: StorageBackend,
    pub free_upload_limit: u32,
    pub receipts_table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadLogEntry {
    pub id: String,
    pub file_name: String,
    pub file_hash: String,
    pub kind: String,
    pub status: String,
    pub message: Option<String>,
    pub created_at: String,
}
