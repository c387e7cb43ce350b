use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (libraries, users, messages)");
        conn.execute_batch(
            "
            CREATE TABLE libraries (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL UNIQUE,
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
            );

            CREATE TABLE users (
                id            TEXT PRIMARY KEY,
                library_id    INTEGER NOT NULL REFERENCES libraries(id),
                username      TEXT NOT NULL UNIQUE,
                display_name  TEXT NOT NULL,
                role          TEXT NOT NULL CHECK (role IN ('supervisor', 'librarian', 'member')),
                status        TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'inactive')),
                password      TEXT NOT NULL,
                created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
            );

            CREATE INDEX idx_users_library_role
                ON users(library_id, role, status);

            CREATE TABLE messages (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                library_id    INTEGER NOT NULL REFERENCES libraries(id),
                sender_id     TEXT NOT NULL REFERENCES users(id),
                recipient_id  TEXT NOT NULL REFERENCES users(id),
                subject       TEXT NOT NULL,
                body          TEXT NOT NULL,
                is_read       INTEGER NOT NULL DEFAULT 0,
                is_starred    INTEGER NOT NULL DEFAULT 0,
                is_deleted    INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
                updated_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
            );

            CREATE INDEX idx_messages_recipient
                ON messages(library_id, recipient_id, is_deleted, created_at);

            CREATE INDEX idx_messages_sender
                ON messages(library_id, sender_id, is_deleted, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }
}
