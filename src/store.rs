//! SQLite metadata store.
//!
//! Two tables, written together in one transaction per upload:
//!
//! ```text
//! documents(id, filename, size, mime, text_path, token_count, tier,
//!           page_count, row_count, status, created_at)
//! chunks(doc_id, chunk_index, tokens, text, section)
//!        PRIMARY KEY (doc_id, chunk_index)
//! ```
//!
//! Chunk rows exist only for tier ≥ 3 documents and are the durable source
//! for index rebuilds. Deletion cascades document → chunks in the same
//! transaction; the cached artifact and text file are cleaned up by the
//! engine.

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ChunkRecord, Document, DocumentStatus};
use crate::tier::Tier;

/// Open the pool, creating the database file (and parent directory) on
/// first use. WAL mode keeps concurrent readers cheap.
pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    if let Some(path) = database_url.strip_prefix("sqlite:") {
        let path = std::path::Path::new(path.trim_start_matches("//"));
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create database directory {}", parent.display()))?;
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Create tables and indexes. Idempotent; safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            size INTEGER NOT NULL,
            mime TEXT NOT NULL,
            text_path TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            tier INTEGER NOT NULL,
            page_count INTEGER,
            row_count INTEGER,
            status TEXT NOT NULL DEFAULT 'ready',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            doc_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            tokens INTEGER NOT NULL,
            text TEXT NOT NULL,
            section TEXT,
            PRIMARY KEY (doc_id, chunk_index),
            FOREIGN KEY (doc_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist a document and its chunks atomically.
pub async fn insert_document(
    pool: &SqlitePool,
    doc: &Document,
    chunks: &[ChunkRecord],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO documents
            (id, filename, size, mime, text_path, token_count, tier,
             page_count, row_count, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(doc.id.to_string())
    .bind(&doc.filename)
    .bind(doc.file_size)
    .bind(&doc.mime_type)
    .bind(&doc.text_path)
    .bind(doc.token_count)
    .bind(doc.tier.as_u8() as i64)
    .bind(doc.page_count)
    .bind(doc.row_count)
    .bind(doc.status.as_str())
    .bind(doc.created_at.timestamp())
    .execute(&mut *tx)
    .await?;

    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (doc_id, chunk_index, tokens, text, section) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(doc.id.to_string())
        .bind(chunk.index as i64)
        .bind(chunk.tokens as i64)
        .bind(&chunk.text)
        .bind(&chunk.section)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn get_document(pool: &SqlitePool, id: Uuid) -> Result<Option<Document>> {
    let row = sqlx::query(
        r#"
        SELECT id, filename, size, mime, text_path, token_count, tier,
               page_count, row_count, status, created_at
        FROM documents WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| row_to_document(&r)))
}

/// Most recent documents first.
pub async fn list_documents(pool: &SqlitePool, limit: i64) -> Result<Vec<Document>> {
    let rows = sqlx::query(
        r#"
        SELECT id, filename, size, mime, text_path, token_count, tier,
               page_count, row_count, status, created_at
        FROM documents ORDER BY created_at DESC, id DESC LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_document).collect())
}

/// All chunks for a document in reading order.
pub async fn get_chunks(pool: &SqlitePool, doc_id: Uuid) -> Result<Vec<ChunkRecord>> {
    let rows = sqlx::query(
        "SELECT chunk_index, tokens, text, section FROM chunks WHERE doc_id = ? ORDER BY chunk_index ASC",
    )
    .bind(doc_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| ChunkRecord {
            index: r.get::<i64, _>("chunk_index") as usize,
            tokens: r.get::<i64, _>("tokens") as usize,
            text: r.get("text"),
            section: r.get("section"),
        })
        .collect())
}

/// Delete a document and its chunks. Returns false when it did not exist.
pub async fn delete_document(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunks WHERE doc_id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
    let deleted = sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

    tx.commit().await?;
    Ok(deleted > 0)
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Document {
    let id: String = row.get("id");
    let tier: i64 = row.get("tier");
    let status: String = row.get("status");
    let created_at: i64 = row.get("created_at");

    Document {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        filename: row.get("filename"),
        file_size: row.get("size"),
        mime_type: row.get("mime"),
        text_path: row.get("text_path"),
        token_count: row.get("token_count"),
        tier: Tier::try_from(tier as u8).unwrap_or(Tier::T1),
        page_count: row.get("page_count"),
        row_count: row.get("row_count"),
        status: DocumentStatus::parse(&status),
        created_at: chrono::DateTime::from_timestamp(created_at, 0)
            .unwrap_or(chrono::DateTime::UNIX_EPOCH),
    }
}
