//! `SQLite` persistence layer.

use crate::error::StoreError;
use crate::store::{ClockStore, RowStore, Storage, Transaction};
use hlcsync_core::{CellKey, Clock, LwwRegister, Mutation, Timestamp, Value};
use hlcsync_proto::cbor::{from_cbor, to_cbor};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// `SQLite`-backed replica store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create a `SQLite` database.
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be opened or initialized.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        tracing::debug!(path = %path.display(), "Opened SQLite store");
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be created.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            r"
            -- The replica clock: last timestamp and causal digest
            CREATE TABLE IF NOT EXISTS clock (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                timestamp TEXT NOT NULL,
                digest BLOB NOT NULL
            );

            -- Current value of every written cell
            CREATE TABLE IF NOT EXISTS cells (
                table_name TEXT NOT NULL,
                row_id TEXT NOT NULL,
                column_name TEXT NOT NULL,
                value BLOB NOT NULL,
                timestamp TEXT NOT NULL,
                PRIMARY KEY (table_name, row_id, column_name)
            );

            -- Every mutation ever applied, keyed by encoded timestamp
            CREATE TABLE IF NOT EXISTS mutation_log (
                timestamp TEXT PRIMARY KEY,
                table_name TEXT NOT NULL,
                row_id TEXT NOT NULL,
                column_name TEXT NOT NULL,
                value BLOB NOT NULL
            );
            ",
        )
    }
}

impl Storage for SqliteStore {
    type Transaction<'a> = SqliteTransaction<'a>;

    fn begin(&mut self) -> Result<SqliteTransaction<'_>, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(SqliteTransaction { tx })
    }
}

/// An `IMMEDIATE` transaction; rolled back on drop unless committed.
pub struct SqliteTransaction<'a> {
    tx: rusqlite::Transaction<'a>,
}

impl RowStore for SqliteTransaction<'_> {
    fn read_value(&self, key: &CellKey) -> Result<Option<LwwRegister<Value>>, StoreError> {
        let row: Option<(Vec<u8>, String)> = self
            .tx
            .query_row(
                r"
                SELECT value, timestamp FROM cells
                WHERE table_name = ?1 AND row_id = ?2 AND column_name = ?3
                ",
                (&key.table, &key.row, &key.column),
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(value, timestamp)| {
            Ok(LwwRegister::new(from_blob(&value)?, decode_timestamp(&timestamp)?))
        })
        .transpose()
    }

    fn write_value(
        &mut self,
        key: &CellKey,
        register: &LwwRegister<Value>,
    ) -> Result<(), StoreError> {
        self.tx.execute(
            r"
            INSERT OR REPLACE INTO cells (table_name, row_id, column_name, value, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            (
                &key.table,
                &key.row,
                &key.column,
                to_blob(&register.value)?,
                register.timestamp.encode(),
            ),
        )?;
        Ok(())
    }

    fn record_mutation(&mut self, mutation: &Mutation) -> Result<bool, StoreError> {
        let inserted = self.tx.execute(
            r"
            INSERT OR IGNORE INTO mutation_log (timestamp, table_name, row_id, column_name, value)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            (
                mutation.timestamp.encode(),
                &mutation.key.table,
                &mutation.key.row,
                &mutation.key.column,
                to_blob(&mutation.value)?,
            ),
        )?;
        Ok(inserted == 1)
    }

    fn mutations_since(&self, since: u64) -> Result<Vec<Mutation>, StoreError> {
        // Encoded timestamps sort like timestamps, and the bare millis field
        // sorts before every timestamp carrying it.
        let lower_bound = format!("{since:016x}");
        let mut stmt = self.tx.prepare(
            r"
            SELECT timestamp, table_name, row_id, column_name, value FROM mutation_log
            WHERE timestamp >= ?1
            ORDER BY timestamp ASC
            ",
        )?;

        let rows = stmt
            .query_map([lower_bound], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    CellKey::new(
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ),
                    row.get::<_, Vec<u8>>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(timestamp, key, value)| {
                Ok(Mutation {
                    timestamp: decode_timestamp(&timestamp)?,
                    key,
                    value: from_blob(&value)?,
                })
            })
            .collect()
    }
}

impl ClockStore for SqliteTransaction<'_> {
    fn read_clock(&self) -> Result<Option<Clock>, StoreError> {
        let row: Option<(String, Vec<u8>)> = self
            .tx
            .query_row(
                "SELECT timestamp, digest FROM clock WHERE id = 0",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(timestamp, digest)| {
            Ok(Clock {
                timestamp: decode_timestamp(&timestamp)?,
                digest: from_blob(&digest)?,
            })
        })
        .transpose()
    }

    fn write_clock(&mut self, clock: &Clock) -> Result<(), StoreError> {
        self.tx.execute(
            r"
            INSERT INTO clock (id, timestamp, digest) VALUES (0, ?1, ?2)
            ON CONFLICT (id) DO UPDATE SET timestamp = excluded.timestamp, digest = excluded.digest
            ",
            (clock.timestamp.encode(), to_blob(&clock.digest)?),
        )?;
        Ok(())
    }
}

impl Transaction for SqliteTransaction<'_> {
    fn commit(self) -> Result<(), StoreError> {
        self.tx.commit()?;
        Ok(())
    }
}

fn to_blob<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(to_cbor(value)?)
}

fn from_blob<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(from_cbor(bytes)?)
}

fn decode_timestamp(encoded: &str) -> Result<Timestamp, StoreError> {
    Timestamp::decode(encoded).map_err(|e| StoreError::Encoding(e.to_string()))
}
