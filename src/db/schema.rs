//! Schema migrations, tracked with `PRAGMA user_version`.

use rusqlite::Connection;
use tracing::info;

use super::StorageError;

/// Latest schema version.
pub const SCHEMA_VERSION: i64 = 1;

const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    r#"
CREATE TABLE IF NOT EXISTS volumes (
    id              INTEGER PRIMARY KEY,
    root_path       TEXT    NOT NULL UNIQUE,
    name            TEXT    NOT NULL,
    description     TEXT,
    created_at      TEXT    NOT NULL,
    last_scanned_at TEXT
);

CREATE TABLE IF NOT EXISTS assets (
    id             INTEGER PRIMARY KEY,
    volume_id      INTEGER NOT NULL REFERENCES volumes (id) ON DELETE CASCADE,
    relative_path  TEXT    NOT NULL,
    file_name      TEXT    NOT NULL,
    extension      TEXT,
    size_bytes     INTEGER NOT NULL,
    modified_at_ns INTEGER NOT NULL,
    indexed_at     TEXT    NOT NULL,
    UNIQUE (volume_id, relative_path)
);

CREATE INDEX IF NOT EXISTS idx_assets_volume_id ON assets (volume_id);
"#,
)];

/// Apply every migration newer than the database's `user_version`.
pub fn migrate(conn: &mut Connection) -> Result<(), StorageError> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        info!(version, "Applied volume cache migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_asset_uniqueness_per_volume() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO volumes (id, root_path, name, created_at) VALUES (1, '/v', 'v', 'now')",
            [],
        )
        .unwrap();
        let insert = "INSERT INTO assets (volume_id, relative_path, file_name, size_bytes, modified_at_ns, indexed_at)
                      VALUES (1, 'kick.wav', 'kick.wav', 10, 0, 'now')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}
