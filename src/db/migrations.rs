use anyhow::{bail, Context, Result};
use rusqlite::Connection;

const SCHEMA_VERSION: i32 = 1;

/// Brings a fresh file up to the key-value schema; refuses files from a newer build.
pub fn ensure_schema(conn: &mut Connection) -> Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    match version {
        SCHEMA_VERSION => Ok(()),
        0 => {
            let tx = conn
                .transaction()
                .context("failed to open schema transaction")?;
            tx.execute_batch(include_str!("schemas/schema_v1.sql"))
                .context("failed to create kv_store schema")?;
            tx.pragma_update(None, "user_version", SCHEMA_VERSION)
                .context("failed to stamp user_version")?;
            tx.commit().context("failed to commit schema")
        }
        newer => bail!("database schema version {newer} is newer than supported {SCHEMA_VERSION}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_version(conn: &Connection) -> i32 {
        conn.pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_fresh_database_gets_kv_table() {
        let mut conn = Connection::open_in_memory().unwrap();
        ensure_schema(&mut conn).unwrap();
        assert_eq!(user_version(&conn), SCHEMA_VERSION);

        // Second run is a no-op.
        ensure_schema(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES ('k', x'00', 'now')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", 7).unwrap();
        assert!(ensure_schema(&mut conn).is_err());
    }
}
