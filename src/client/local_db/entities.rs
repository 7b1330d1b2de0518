//! # Local Entity Operations
//!
//! CRUD for every family table. The `data` column holds the domain fields as
//! a JSON object; `id`, `created_at` and `updated_at` live in their own
//! columns and are folded back into the record on read.

use super::schema::json_path;
use super::LocalDatabase;
use crate::client::backend::{Backend, BackendKind};
use crate::shared::entity::{EntityFamily, EntityId, Record};
use crate::shared::error::{DataError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};

/// Columns kept outside the JSON payload
const BOOKKEEPING: [&str; 3] = ["id", "created_at", "updated_at"];

fn row_to_record(row: &SqliteRow) -> Result<Record> {
    let id: i64 = row.try_get("id")?;
    let data: String = row.try_get("data")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    let mut record = match serde_json::from_str::<Value>(&data) {
        Ok(Value::Object(map)) => map,
        _ => {
            tracing::warn!("[LocalDb] Row {} has a malformed payload", id);
            Record::new()
        }
    };
    record.insert("id".to_string(), Value::from(id));
    record.insert("created_at".to_string(), Value::String(created_at));
    record.insert("updated_at".to_string(), Value::String(updated_at));
    Ok(record)
}

/// Split a record into its JSON payload and creation timestamp
fn payload(mut record: Record) -> Result<(String, Option<String>)> {
    let created_at = match record.remove("created_at") {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    };
    for key in BOOKKEEPING {
        record.remove(key);
    }
    Ok((serde_json::to_string(&record)?, created_at))
}

fn not_found(family: EntityFamily, id: &EntityId) -> DataError {
    DataError::NotFound {
        family,
        id: id.clone(),
    }
}

impl LocalDatabase {
    async fn insert_in(
        tx: &mut Transaction<'_, Sqlite>,
        family: EntityFamily,
        record: Record,
    ) -> Result<Record> {
        let now = Utc::now().to_rfc3339();
        let (data, created_at) = payload(record)?;
        let created_at = created_at.unwrap_or_else(|| now.clone());

        let result = sqlx::query(&format!(
            "INSERT INTO {} (data, created_at, updated_at) VALUES (?, ?, ?)",
            family.collection()
        ))
        .bind(&data)
        .bind(&created_at)
        .bind(&now)
        .execute(&mut **tx)
        .await?;

        let id = result.last_insert_rowid();
        let row = sqlx::query(&format!(
            "SELECT id, data, created_at, updated_at FROM {} WHERE id = ?",
            family.collection()
        ))
        .bind(id)
        .fetch_one(&mut **tx)
        .await?;
        row_to_record(&row)
    }
}

#[async_trait]
impl Backend for LocalDatabase {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn get_all(&self, family: EntityFamily) -> Result<Vec<Record>> {
        let rows = sqlx::query(&format!(
            "SELECT id, data, created_at, updated_at FROM {} ORDER BY id ASC",
            family.collection()
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn get_by_id(&self, family: EntityFamily, id: &EntityId) -> Result<Option<Record>> {
        let Some(rowid) = id.as_local() else {
            return Ok(None);
        };
        let row = sqlx::query(&format!(
            "SELECT id, data, created_at, updated_at FROM {} WHERE id = ?",
            family.collection()
        ))
        .bind(rowid)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn find_by(&self, family: EntityFamily, field: &str, value: &Value) -> Result<Vec<Record>> {
        if field == "id" {
            let id = match value {
                Value::String(s) => EntityId::new(s.as_str()),
                other => EntityId::new(other.to_string()),
            };
            return Ok(self.get_by_id(family, &id).await?.into_iter().collect());
        }

        let column = format!("json_extract(data, '{}')", json_path(field));
        let select = format!(
            "SELECT id, data, created_at, updated_at FROM {} WHERE {}",
            family.collection(),
            column
        );
        let rows = match value {
            Value::Null => {
                sqlx::query(&format!("{} IS NULL ORDER BY id ASC", select))
                    .fetch_all(&self.pool)
                    .await?
            }
            Value::Bool(b) => {
                sqlx::query(&format!("{} = ? ORDER BY id ASC", select))
                    .bind(i64::from(*b))
                    .fetch_all(&self.pool)
                    .await?
            }
            Value::Number(n) => {
                let query_sql = format!("{} = ? ORDER BY id ASC", select);
                let query = sqlx::query(&query_sql);
                let query = match n.as_i64() {
                    Some(i) => query.bind(i),
                    None => query.bind(n.as_f64().unwrap_or_default()),
                };
                query.fetch_all(&self.pool).await?
            }
            Value::String(s) => {
                sqlx::query(&format!("{} = ? ORDER BY id ASC", select))
                    .bind(s.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            // Structured values compare by their minified JSON text.
            other => {
                sqlx::query(&format!("{} = ? ORDER BY id ASC", select))
                    .bind(other.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(row_to_record).collect()
    }

    async fn add(&self, family: EntityFamily, record: Record) -> Result<Record> {
        let mut tx = self.pool.begin().await?;
        let stored = Self::insert_in(&mut tx, family, record).await?;
        tx.commit().await?;
        tracing::debug!("[LocalDb] Inserted into {}", family);
        Ok(stored)
    }

    async fn update(&self, family: EntityFamily, id: &EntityId, changes: Record) -> Result<Record> {
        let rowid = id.as_local().ok_or_else(|| not_found(family, id))?;
        let table = family.collection();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT id, data, created_at, updated_at FROM {} WHERE id = ?",
            table
        ))
        .bind(rowid)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| not_found(family, id))?;

        let mut merged = row_to_record(&row)?;
        for (field, value) in changes {
            if !BOOKKEEPING.contains(&field.as_str()) {
                merged.insert(field, value);
            }
        }
        let (data, _) = payload(merged)?;

        sqlx::query(&format!(
            "UPDATE {} SET data = ?, updated_at = ? WHERE id = ?",
            table
        ))
        .bind(&data)
        .bind(Utc::now().to_rfc3339())
        .bind(rowid)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT id, data, created_at, updated_at FROM {} WHERE id = ?",
            table
        ))
        .bind(rowid)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        row_to_record(&row)
    }

    async fn delete(&self, family: EntityFamily, id: &EntityId) -> Result<()> {
        let rowid = id.as_local().ok_or_else(|| not_found(family, id))?;
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", family.collection()))
            .bind(rowid)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(family, id));
        }
        Ok(())
    }

    async fn bulk_add(&self, family: EntityFamily, records: Vec<Record>) -> Result<Vec<Record>> {
        let count = records.len();
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(count);
        for record in records {
            stored.push(Self::insert_in(&mut tx, family, record).await?);
        }
        tx.commit().await?;
        tracing::info!("[LocalDb] Bulk inserted {} {}", count, family);
        Ok(stored)
    }

    async fn bulk_delete(&self, family: EntityFamily, ids: &[EntityId]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;
        for rowid in ids.iter().filter_map(EntityId::as_local) {
            let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", family.collection()))
                .bind(rowid)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(deleted)
    }

    async fn clear(&self, family: EntityFamily) -> Result<usize> {
        let result = sqlx::query(&format!("DELETE FROM {}", family.collection()))
            .execute(&self.pool)
            .await?;
        tracing::info!("[LocalDb] Cleared {} {}", result.rows_affected(), family);
        Ok(result.rows_affected() as usize)
    }
}
