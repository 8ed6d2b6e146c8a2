use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::AppError;

pub type DocumentBody = Map<String, Value>;

/// A document as returned by the store. Timestamps are owned by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub data: DocumentBody,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        Ok(serde_json::from_value(Value::Object(self.data.clone()))?)
    }
}

/// Exact-match condition on a top-level document field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            value: value.into(),
        }
    }
}

pub fn to_body<T: Serialize>(value: &T) -> Result<DocumentBody, AppError> {
    match serde_json::to_value(value)? {
        Value::Object(body) => Ok(body),
        other => Err(AppError::Internal(format!(
            "Documents must be JSON objects, got {}",
            other
        ))),
    }
}

#[rocket::async_trait]
pub trait RecordStore: Send + Sync {
    /// Writes a new document under a store-assigned id.
    async fn insert(&self, collection: &str, body: DocumentBody) -> Result<Document, AppError>;

    /// Writes (or overwrites) a document under a caller-chosen id.
    async fn put(&self, collection: &str, id: &str, body: DocumentBody)
    -> Result<Document, AppError>;

    /// All documents matching every filter, in insertion order.
    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Document>, AppError>;

    /// Merges `partial` into the stored document and refreshes `updated_at`.
    async fn update_by_id(
        &self,
        collection: &str,
        id: &str,
        partial: DocumentBody,
    ) -> Result<Document, AppError>;

    async fn delete_by_id(&self, collection: &str, id: &str) -> Result<(), AppError>;

    async fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>, AppError>;
}

#[derive(sqlx::FromRow, Clone)]
struct DbDocument {
    id: String,
    body: String,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbDocument> for Document {
    type Error = AppError;

    fn try_from(row: DbDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            data: serde_json::from_str(&row.body)?,
            id: row.id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone, Debug)]
pub struct SqliteRecordStore {
    pool: Pool<Sqlite>,
}

impl SqliteRecordStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[rocket::async_trait]
impl RecordStore for SqliteRecordStore {
    #[instrument(skip(self, body))]
    async fn insert(&self, collection: &str, body: DocumentBody) -> Result<Document, AppError> {
        let id = Uuid::new_v4().to_string();
        self.put(collection, &id, body).await
    }

    #[instrument(skip(self, body))]
    async fn put(
        &self,
        collection: &str,
        id: &str,
        body: DocumentBody,
    ) -> Result<Document, AppError> {
        info!("Writing document");
        let now = Utc::now();
        let serialized = serde_json::to_string(&body)?;

        sqlx::query(
            "INSERT INTO documents (collection, id, body, created_at, updated_at)
             VALUES (?, ?, ?, ?, NULL)
             ON CONFLICT (collection, id)
             DO UPDATE SET body = excluded.body, created_at = excluded.created_at, updated_at = NULL",
        )
        .bind(collection)
        .bind(id)
        .bind(serialized)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Document {
            id: id.to_string(),
            data: body,
            created_at: now,
            updated_at: None,
        })
    }

    #[instrument(skip(self))]
    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Document>, AppError> {
        info!("Querying documents");
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, body, created_at, updated_at FROM documents WHERE collection = ",
        );
        builder.push_bind(collection.to_string());

        for filter in filters {
            let path = format!("$.\"{}\"", filter.field);
            builder.push(" AND json_extract(body, ");
            builder.push_bind(path);

            match &filter.value {
                Value::Null => {
                    builder.push(") IS NULL");
                }
                Value::Bool(flag) => {
                    builder.push(") = ");
                    builder.push_bind(*flag);
                }
                Value::Number(number) => {
                    builder.push(") = ");
                    match number.as_i64() {
                        Some(integer) => builder.push_bind(integer),
                        None => builder.push_bind(number.as_f64().unwrap_or_default()),
                    };
                }
                Value::String(text) => {
                    builder.push(") = ");
                    builder.push_bind(text.clone());
                }
                nested => {
                    builder.push(") = ");
                    builder.push_bind(nested.to_string());
                }
            }
        }

        builder.push(" ORDER BY rowid");

        let rows = builder
            .build_query_as::<DbDocument>()
            .fetch_all(&self.pool)
            .await?;

        debug!(count = rows.len(), "Query matched documents");

        // No error if nothing matches
        rows.into_iter().map(Document::try_from).collect()
    }

    #[instrument(skip(self, partial))]
    async fn update_by_id(
        &self,
        collection: &str,
        id: &str,
        partial: DocumentBody,
    ) -> Result<Document, AppError> {
        info!("Updating document");
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, DbDocument>(
            "SELECT id, body, created_at, updated_at FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let mut document = match existing {
            Some(row) => Document::try_from(row)?,
            None => {
                return Err(AppError::NotFound(format!(
                    "No document to update: {}/{}",
                    collection, id
                )));
            }
        };

        document.data.extend(partial);
        let now = Utc::now();

        sqlx::query("UPDATE documents SET body = ?, updated_at = ? WHERE collection = ? AND id = ?")
            .bind(serde_json::to_string(&document.data)?)
            .bind(now)
            .bind(collection)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        document.updated_at = Some(now);
        Ok(document)
    }

    #[instrument(skip(self))]
    async fn delete_by_id(&self, collection: &str, id: &str) -> Result<(), AppError> {
        info!("Deleting document");
        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            debug!("Delete matched no document");
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>, AppError> {
        info!("Fetching document by id");
        let row = sqlx::query_as::<_, DbDocument>(
            "SELECT id, body, created_at, updated_at FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Document::try_from).transpose()
    }
}
