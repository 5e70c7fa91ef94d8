use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::PathBuf;

use crate::models::{ExpenseRecord, Items, NewExpense, UploadLogEntry, UserProfile};

const RECEIPT_COLUMNS: &str = "id, created_at, user_id, category, source, status, vendor_name, date,
    due_date, receipt_time, order_number, server_name, image_url, items, subtotal, tax_amount,
    tip_amount, total_amount, currency, payment_terms, tags, raw_data";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new(db_path: PathBuf) -> SqlResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let mut db = Database { conn };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&mut self) -> SqlResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )?;

        let migrations = vec![
            (
                "001_create_settings_and_upload_logs.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/001_create_settings_and_upload_logs.sql"
                )),
            ),
            (
                "002_create_receipts.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/002_create_receipts.sql"
                )),
            ),
            (
                "003_create_profiles.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/003_create_profiles.sql"
                )),
            ),
        ];

        for (name, sql) in migrations {
            let applied: Option<String> = self
                .conn
                .query_row(
                    "SELECT name FROM schema_migrations WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;

            if applied.is_none() {
                let tx = self.conn.transaction()?;
                tx.execute_batch(sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, datetime('now'))",
                    params![name],
                )?;
                tx.commit()?;
            }
        }

        Ok(())
    }

    pub fn insert_receipt(&self, record: &ExpenseRecord) -> SqlResult<()> {
        let expense = &record.expense;
        let items = expense
            .items
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let raw_data = serde_json::to_string(&expense.raw_data)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        self.conn.execute(
            &format!(
                "INSERT INTO receipts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                 ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
                RECEIPT_COLUMNS
            ),
            params![
                record.id,
                record.created_at,
                expense.user_id,
                expense.category.as_str(),
                expense.source,
                expense.status,
                expense.vendor_name,
                expense.date,
                expense.due_date,
                expense.receipt_time,
                expense.order_number,
                expense.server_name,
                expense.image_url,
                items,
                expense.subtotal,
                expense.tax_amount,
                expense.tip_amount,
                expense.total_amount,
                expense.currency,
                expense.payment_terms,
                expense.tags,
                raw_data
            ],
        )?;
        Ok(())
    }

    pub fn list_receipts(&self, user_id: &str) -> SqlResult<Vec<ExpenseRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM receipts WHERE user_id = ?1 ORDER BY created_at DESC",
            RECEIPT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id], receipt_from_row)?;
        rows.collect()
    }

    pub fn get_receipt(&self, id: &str, user_id: &str) -> SqlResult<Option<ExpenseRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM receipts WHERE id = ?1 AND user_id = ?2",
            RECEIPT_COLUMNS
        ))?;
        stmt.query_row(params![id, user_id], receipt_from_row)
            .optional()
    }

    /// Returns the number of removed rows; a row owned by another user is never touched.
    pub fn delete_receipt(&self, id: &str, user_id: &str) -> SqlResult<usize> {
        self.conn.execute(
            "DELETE FROM receipts WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )
    }

    pub fn get_profile(&self, uid: &str) -> SqlResult<Option<UserProfile>> {
        let mut stmt = self.conn.prepare(
            "SELECT uid, email, display_name, photo_url, upload_count, has_paid, created_at, updated_at
             FROM profiles WHERE uid = ?1",
        )?;
        stmt.query_row(params![uid], |row| {
            Ok(UserProfile {
                uid: row.get(0)?,
                email: row.get(1)?,
                display_name: row.get(2)?,
                photo_url: row.get(3)?,
                upload_count: row.get(4)?,
                has_paid: row.get(5)?,
                created_at: row.get(6)?,
                updated_at: row.get(7)?,
            })
        })
        .optional()
    }

    pub fn insert_profile(&self, profile: &UserProfile) -> SqlResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO profiles (
                uid, email, display_name, photo_url, upload_count, has_paid, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                profile.uid,
                profile.email,
                profile.display_name,
                profile.photo_url,
                profile.upload_count,
                profile.has_paid,
                profile.created_at,
                profile.updated_at
            ],
        )?;
        Ok(())
    }

    pub fn set_upload_count(&self, uid: &str, count: u32, updated_at: &str) -> SqlResult<usize> {
        self.conn.execute(
            "UPDATE profiles SET upload_count = ?2, updated_at = ?3 WHERE uid = ?1",
            params![uid, count, updated_at],
        )
    }

    pub fn set_setting(&self, key: &str, value: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> SqlResult<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        stmt.query_row(params![key], |row| row.get(0)).optional()
    }

    pub fn delete_setting(&self, key: &str) -> SqlResult<()> {
        self.conn
            .execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }

    pub fn log_upload(
        &self,
        file_name: &str,
        file_hash: &str,
        kind: &str,
        status: &str,
        message: Option<&str>,
    ) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO upload_logs (id, file_name, file_hash, kind, status, message, created_at)
             VALUES (hex(randomblob(16)), ?1, ?2, ?3, ?4, ?5, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))",
            params![file_name, file_hash, kind, status, message],
        )?;
        Ok(())
    }

    pub fn recent_upload_logs(&self, limit: usize) -> SqlResult<Vec<UploadLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, file_name, file_hash, kind, status, message, created_at
             FROM upload_logs
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(UploadLogEntry {
                id: row.get(0)?,
                file_name: row.get(1)?,
                file_hash: row.get(2)?,
                kind: row.get(3)?,
                status: row.get(4)?,
                message: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;

        rows.collect()
    }
}

fn receipt_from_row(row: &Row<'_>) -> SqlResult<ExpenseRecord> {
    let items: Option<String> = row.get(13)?;
    let items = items
        .map(|text| serde_json::from_str::<Items>(&text))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(13, Type::Text, Box::new(e)))?;
    let raw_data: String = row.get(21)?;
    let raw_data = serde_json::from_str(&raw_data)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(21, Type::Text, Box::new(e)))?;
    let category: String = row.get(3)?;

    Ok(ExpenseRecord {
        id: row.get(0)?,
        created_at: row.get(1)?,
        expense: NewExpense {
            user_id: row.get(2)?,
            category: category.into(),
            source: row.get(4)?,
            status: row.get(5)?,
            vendor_name: row.get(6)?,
            date: row.get(7)?,
            due_date: row.get(8)?,
            receipt_time: row.get(9)?,
            order_number: row.get(10)?,
            server_name: row.get(11)?,
            image_url: row.get(12)?,
            items,
            subtotal: row.get(14)?,
            tax_amount: row.get(15)?,
            tip_amount: row.get(16)?,
            total_amount: row.get(17)?,
            currency: row.get(18)?,
            payment_terms: row.get(19)?,
            tags: row.get(20)?,
            raw_data,
        },
    })
}
