use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::db::Database;
use crate::models::{ExpenseRecord, NewExpense, UserProfile};
use crate::utils::now_rfc3339;

/// Persistence for parsed expense records, always scoped to the owning user.
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    async fn insert(&self, expense: NewExpense) -> Result<ExpenseRecord>;

    /// Newest first.
    async fn list(&self, user_id: &str) -> Result<Vec<ExpenseRecord>>;

    async fn get(&self, id: &str, user_id: &str) -> Result<Option<ExpenseRecord>>;

    /// Removes the record only when both `id` and `user_id` match.
    async fn delete(&self, id: &str, user_id: &str) -> Result<bool>;
}

/// Per-user upload counters and paid flags.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, uid: &str) -> Result<Option<UserProfile>>;

    async fn create(&self, profile: &UserProfile) -> Result<()>;

    async fn set_upload_count(&self, uid: &str, count: u32, updated_at: &str) -> Result<()>;
}

pub struct LocalReceiptStore {
    db: Arc<Mutex<Database>>,
}

impl LocalReceiptStore {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        LocalReceiptStore { db }
    }
}

#[async_trait]
impl ReceiptStore for LocalReceiptStore {
    async fn insert(&self, expense: NewExpense) -> Result<ExpenseRecord> {
        let record = ExpenseRecord {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now_rfc3339(),
            expense,
        };
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        db.insert_receipt(&record)?;
        Ok(record)
    }

    async fn list(&self, user_id: &str) -> Result<Vec<ExpenseRecord>> {
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        Ok(db.list_receipts(user_id)?)
    }

    async fn get(&self, id: &str, user_id: &str) -> Result<Option<ExpenseRecord>> {
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        Ok(db.get_receipt(id, user_id)?)
    }

    async fn delete(&self, id: &str, user_id: &str) -> Result<bool> {
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        Ok(db.delete_receipt(id, user_id)? > 0)
    }
}

pub struct LocalProfileStore {
    db: Arc<Mutex<Database>>,
}

impl LocalProfileStore {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        LocalProfileStore { db }
    }
}

#[async_trait]
impl ProfileStore for LocalProfileStore {
    async fn get(&self, uid: &str) -> Result<Option<UserProfile>> {
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        Ok(db.get_profile(uid)?)
    }

    async fn create(&self, profile: &UserProfile) -> Result<()> {
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        db.insert_profile(profile)?;
        Ok(())
    }

    async fn set_upload_count(&self, uid: &str, count: u32, updated_at: &str) -> Result<()> {
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        if db.set_upload_count(uid, count, updated_at)? == 0 {
            return Err(anyhow!("Profile {} not found", uid));
        }
        Ok(())
    }
}
