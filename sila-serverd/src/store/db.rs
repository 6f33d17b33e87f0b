use std::path::Path;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params, OptionalExtension};

/// A persisted server UUID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredIdentity {
    pub server_name: String,
    pub uuid: String,
    pub created_at: DateTime<Utc>,
}

/// Keeps server UUIDs stable across restarts, keyed by server name
pub struct IdentityStore {
    conn: Connection,
}

impl IdentityStore {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS server_identity (
                server_name TEXT PRIMARY KEY,
                uuid        TEXT NOT NULL UNIQUE,
                created_at  TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    pub fn get(&self, server_name: &str) -> Result<Option<StoredIdentity>> {
        self.conn
            .query_row(
                "SELECT server_name, uuid, created_at FROM server_identity WHERE server_name = ?1",
                params![server_name],
                Self::row_to_identity,
            )
            .optional()
            .context("Failed to query server identity")
    }

    pub fn get_uuid(&self, server_name: &str) -> Result<Option<String>> {
        Ok(self.get(server_name)?.map(|identity| identity.uuid))
    }

    /// Return the stored UUID for `server_name`, generating and persisting one on first use
    pub fn get_or_create_uuid(&self, server_name: &str) -> Result<String> {
        if let Some(uuid) = self.get_uuid(server_name)? {
            return Ok(uuid);
        }

        let uuid = uuid::Uuid::new_v4().to_string();
        self.set_uuid(server_name, &uuid)?;
        tracing::info!("Generated UUID {} for server {:?}", uuid, server_name);
        Ok(uuid)
    }

    pub fn set_uuid(&self, server_name: &str, uuid: &str) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO server_identity (server_name, uuid, created_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(server_name) DO UPDATE SET uuid = excluded.uuid
                "#,
                params![server_name, uuid, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("Failed to store UUID for server {:?}", server_name))?;
        Ok(())
    }

    fn row_to_identity(row: &rusqlite::Row) -> Result<StoredIdentity, rusqlite::Error> {
        let created_at_str: String = row.get(2)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))?
            .with_timezone(&Utc);

        Ok(StoredIdentity {
            server_name: row.get(0)?,
            uuid: row.get(1)?,
            created_at,
        })
    }
}
