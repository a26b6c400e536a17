use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use rusqlite_migration::{Migrations, M};

use crate::app::{Result, WatchlistError};
use crate::remote::{
    ensure_id, merge_fields, ChangeEvent, ChangeFeed, ChangeKind, Collection, Filter, Record,
    RemoteCollection, Subscription,
};

/// Local stand-in for the hosted backend: records are stored as JSON bodies
/// in SQLite, change notifications are delivered in-process.
pub struct SqliteRemote {
    conn: Mutex<Connection>,
    feed: ChangeFeed,
}

impl SqliteRemote {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            feed: ChangeFeed::new(),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            feed: ChangeFeed::new(),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;
        migrations
            .to_latest(&mut conn)
            .map_err(|_| WatchlistError::Database(rusqlite::Error::InvalidQuery))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            WatchlistError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn fetch(conn: &Connection, collection: Collection, id: &str) -> Result<Option<Record>> {
        let body = conn
            .query_row(
                "SELECT body FROM records WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        body.map(|b| Self::parse_body(&b)).transpose()
    }

    fn parse_body(body: &str) -> Result<Record> {
        Ok(serde_json::from_str(body)?)
    }

    fn not_found(collection: Collection, id: &str) -> WatchlistError {
        WatchlistError::NotFound(format!("{} record {}", collection, id))
    }

    /// Translate the filter's scalar clauses into `json_extract` conditions.
    ///
    /// Clauses on nulls, arrays, objects or unusual field names are left out
    /// and only checked in Rust, as is every clause again after the query,
    /// since SQLite does not tell booleans from integers.
    fn filter_sql(collection: Collection, filter: &Filter) -> (String, Vec<SqlValue>) {
        let mut sql = String::from("SELECT body FROM records WHERE collection = ?1");
        let mut args = vec![SqlValue::Text(collection.as_str().to_string())];

        for (field, expected) in filter.clauses() {
            if field.contains(['"', '\\']) {
                continue;
            }
            let arg = match expected {
                Value::String(s) => SqlValue::Text(s.clone()),
                Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
                Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                    (Some(i), _) => SqlValue::Integer(i),
                    (None, Some(f)) if n.is_f64() => SqlValue::Real(f),
                    _ => continue,
                },
                Value::Null | Value::Array(_) | Value::Object(_) => continue,
            };
            args.push(SqlValue::Text(format!("$.\"{}\"", field)));
            sql.push_str(&format!(
                " AND json_extract(body, ?{}) = ?{}",
                args.len(),
                args.len() + 1
            ));
            args.push(arg);
        }

        sql.push_str(" ORDER BY created_at, rowid");
        (sql, args)
    }

    fn list_sync(&self, collection: Collection, filter: &Filter) -> Result<Vec<Record>> {
        let (sql, args) = Self::filter_sql(collection, filter);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;

        let bodies = stmt
            .query_map(params_from_iter(args), |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(bodies.len());
        for body in bodies {
            let record = Self::parse_body(&body)?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn get_sync(&self, collection: Collection, id: &str) -> Result<Option<Record>> {
        let conn = self.conn()?;
        Self::fetch(&conn, collection, id)
    }

    fn create_sync(&self, collection: Collection, record: Record) -> Result<Record> {
        let (id, record) = ensure_id(record);
        let conn = self.conn()?;

        if Self::fetch(&conn, collection, &id)?.is_some() {
            return Err(WatchlistError::ValidationFailed(format!(
                "duplicate {} id {}",
                collection, id
            )));
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO records (collection, id, body, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![
                collection.as_str(),
                id,
                serde_json::to_string(&record)?,
                now
            ],
        )?;

        Ok(record)
    }

    fn delete_sync(&self, collection: Collection, id: &str) -> Result<Record> {
        let conn = self.conn()?;
        let existing =
            Self::fetch(&conn, collection, id)?.ok_or_else(|| Self::not_found(collection, id))?;

        conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND id = ?2",
            params![collection.as_str(), id],
        )?;

        Ok(existing)
    }

    fn update_sync(&self, collection: Collection, id: &str, fields: Record) -> Result<Record> {
        let conn = self.conn()?;
        let mut record =
            Self::fetch(&conn, collection, id)?.ok_or_else(|| Self::not_found(collection, id))?;
        merge_fields(&mut record, fields);

        conn.execute(
            "UPDATE records SET body = ?1, updated_at = ?2 WHERE collection = ?3 AND id = ?4",
            params![
                serde_json::to_string(&record)?,
                Utc::now().to_rfc3339(),
                collection.as_str(),
                id
            ],
        )?;

        Ok(record)
    }
}

#[async_trait]
impl RemoteCollection for SqliteRemote {
    async fn list(&self, collection: Collection, filter: &Filter) -> Result<Vec<Record>> {
        self.list_sync(collection, filter)
            .map_err(WatchlistError::into_remote)
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Record>> {
        self.get_sync(collection, id)
            .map_err(WatchlistError::into_remote)
    }

    async fn create(&self, collection: Collection, record: Record) -> Result<Record> {
        let record = self
            .create_sync(collection, record)
            .map_err(WatchlistError::into_remote)?;
        self.feed.publish(ChangeEvent {
            collection,
            kind: ChangeKind::Created,
            record: record.clone(),
        });
        Ok(record)
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        let record = self
            .delete_sync(collection, id)
            .map_err(WatchlistError::into_remote)?;
        self.feed.publish(ChangeEvent {
            collection,
            kind: ChangeKind::Deleted,
            record,
        });
        Ok(())
    }

    async fn update(&self, collection: Collection, id: &str, fields: Record) -> Result<Record> {
        let record = self
            .update_sync(collection, id, fields)
            .map_err(WatchlistError::into_remote)?;
        self.feed.publish(ChangeEvent {
            collection,
            kind: ChangeKind::Updated,
            record: record.clone(),
        });
        Ok(record)
    }

    async fn subscribe(
        &self,
        collection: Collection,
        filter: Filter,
        kinds: &[ChangeKind],
    ) -> Result<Subscription> {
        Ok(self.feed.subscribe(collection, filter, kinds))
    }
}
