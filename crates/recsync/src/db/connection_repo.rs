//! Mailbox connection repository: CRUD for the `mailbox_connections` table.

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{Database, DatabaseError};

/// Lifecycle state of a mailbox connection. Connections are never
/// hard-deleted; the status flips instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(ConnectionStatus::Connected),
            "disconnected" => Ok(ConnectionStatus::Disconnected),
            "error" => Ok(ConnectionStatus::Error),
            other => Err(format!("unknown connection status: {}", other)),
        }
    }
}

/// A raw mailbox connection row from the database.
#[derive(Debug, Clone)]
pub struct MailboxConnectionRow {
    pub id: String,
    pub business_id: String,
    pub address: String,
    /// Refresh token as stored: sealed ciphertext or the marked dev fallback.
    pub refresh_token_enc: String,
    pub status: ConnectionStatus,
    pub last_sync_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl MailboxConnectionRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status: String = row.get("status")?;
        Ok(Self {
            id: row.get("id")?,
            business_id: row.get("business_id")?,
            address: row.get("address")?,
            refresh_token_enc: row.get("refresh_token_enc")?,
            status: super::parse_text_col(status, "connection status")?,
            last_sync_at: row.get("last_sync_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a connection, or refreshes the existing one for the business.
/// `last_sync_at` is preserved across reconnects.
pub fn upsert(db: &Database, row: &MailboxConnectionRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO mailbox_connections (id, business_id, address, refresh_token_enc,
             status, last_sync_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(business_id) DO UPDATE SET
               address = ?3,
               refresh_token_enc = ?4,
               status = ?5,
               updated_at = ?8",
            params![
                row.id,
                row.business_id,
                row.address,
                row.refresh_token_enc,
                row.status.as_str(),
                row.last_sync_at,
                row.created_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds the connection for a business.
pub fn find_by_business(
    db: &Database,
    business_id: &str,
) -> Result<Option<MailboxConnectionRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM mailbox_connections WHERE business_id = ?1")?;
        let mut rows = stmt.query_map(params![business_id], MailboxConnectionRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Updates only the status of a connection.
pub fn set_status(
    db: &Database,
    business_id: &str,
    status: ConnectionStatus,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE mailbox_connections SET status = ?2, updated_at = ?3 WHERE business_id = ?1",
            params![business_id, status.as_str(), updated_at],
        )?;
        Ok(())
    })
}

/// Records the time of the last successful sync.
pub fn set_last_sync(
    db: &Database,
    business_id: &str,
    last_sync_at: &str,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE mailbox_connections SET last_sync_at = ?2, updated_at = ?3
             WHERE business_id = ?1",
            params![business_id, last_sync_at, updated_at],
        )?;
        Ok(())
    })
}
