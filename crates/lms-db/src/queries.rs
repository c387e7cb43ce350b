use crate::Database;
use crate::models::{LibraryRow, MessageRow, UserRow};
use anyhow::Result;
use rusqlite::{Connection, Row};

/// SQL expression for "now" in the same format as the column defaults.
pub(crate) const NOW: &str = "strftime('%Y-%m-%d %H:%M:%f', 'now')";

const MESSAGE_SELECT: &str = "SELECT m.id, m.library_id, m.sender_id, s.display_name, m.recipient_id, r.display_name,
            m.subject, m.body, m.is_read, m.is_starred, m.is_deleted, m.created_at, m.updated_at
     FROM messages m
     LEFT JOIN users s ON s.id = m.sender_id
     LEFT JOIN users r ON r.id = m.recipient_id";

const USER_SELECT: &str =
    "SELECT id, library_id, username, display_name, role, status, password, created_at FROM users";

/// Which per-user message list to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mailbox {
    Inbox,
    Sent,
    Starred,
}

impl Mailbox {
    fn filter(&self) -> &'static str {
        match self {
            Mailbox::Inbox => "m.recipient_id = ?2",
            Mailbox::Sent => "m.sender_id = ?2",
            Mailbox::Starred => "m.recipient_id = ?2 AND m.is_starred = 1",
        }
    }
}

impl Database {
    // -- Libraries --

    pub fn create_library(&self, name: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute("INSERT INTO libraries (name) VALUES (?1)", [name])?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_library_by_name(&self, name: &str) -> Result<Option<LibraryRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, created_at FROM libraries WHERE name = ?1",
                [name],
                |row| {
                    Ok(LibraryRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        library_id: i64,
        username: &str,
        display_name: &str,
        role: &str,
        password_hash: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, library_id, username, display_name, role, password)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, library_id, username, display_name, role, password_hash],
            )?;
            Ok(())
        })
    }

    pub fn set_user_status(&self, id: &str, status: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed =
                conn.execute("UPDATE users SET status = ?2 WHERE id = ?1", (id, status))?;
            Ok(changed == 1)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("{USER_SELECT} WHERE username = ?1");
            conn.query_row(&sql, [username], map_user_row).optional()
        })
    }
}

// -- Users (connection level) --

/// A user in `library_id`, regardless of status. Users of other libraries
/// are invisible.
pub fn query_user_in_library(conn: &Connection, library_id: i64, id: &str) -> Result<Option<UserRow>> {
    let sql = format!("{USER_SELECT} WHERE library_id = ?1 AND id = ?2");
    conn.query_row(&sql, rusqlite::params![library_id, id], map_user_row)
        .optional()
}

/// Every user of the library, oldest account first.
pub fn query_users_in_library(conn: &Connection, library_id: i64) -> Result<Vec<UserRow>> {
    let sql = format!("{USER_SELECT} WHERE library_id = ?1 ORDER BY created_at ASC, rowid ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([library_id], map_user_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Active users of one role in the library, oldest account first.
pub fn query_active_users_by_role(
    conn: &Connection,
    library_id: i64,
    role: &str,
) -> Result<Vec<UserRow>> {
    let sql = format!(
        "{USER_SELECT} WHERE library_id = ?1 AND role = ?2 AND status = 'active'
         ORDER BY created_at ASC, rowid ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![library_id, role], map_user_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        library_id: row.get(1)?,
        username: row.get(2)?,
        display_name: row.get(3)?,
        role: row.get(4)?,
        status: row.get(5)?,
        password: row.get(6)?,
        created_at: row.get(7)?,
    })
}

// -- Messages --

pub fn insert_message(
    conn: &Connection,
    library_id: i64,
    sender_id: &str,
    recipient_id: &str,
    subject: &str,
    body: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO messages (library_id, sender_id, recipient_id, subject, body)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![library_id, sender_id, recipient_id, subject, body],
    )?;
    Ok(conn.last_insert_rowid())
}

/// One message of the library, including soft-deleted ones.
pub fn query_message(conn: &Connection, library_id: i64, id: i64) -> Result<Option<MessageRow>> {
    let sql = format!("{MESSAGE_SELECT} WHERE m.library_id = ?1 AND m.id = ?2");
    conn.query_row(&sql, rusqlite::params![library_id, id], map_message_row)
        .optional()
}

/// Non-deleted messages of a mailbox, newest first. Ordered by id so the
/// `before` cursor and the page order agree.
pub fn query_mailbox(
    conn: &Connection,
    library_id: i64,
    user_id: &str,
    mailbox: Mailbox,
    limit: u32,
    before: Option<i64>,
) -> Result<Vec<MessageRow>> {
    let sql = format!(
        "{MESSAGE_SELECT}
         WHERE m.library_id = ?1 AND {} AND m.is_deleted = 0
           AND (?3 IS NULL OR m.id < ?3)
         ORDER BY m.id DESC
         LIMIT ?4",
        mailbox.filter()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![library_id, user_id, before, limit], map_message_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every non-deleted message the user sent or received, oldest first.
pub fn query_participant_messages(
    conn: &Connection,
    library_id: i64,
    user_id: &str,
) -> Result<Vec<MessageRow>> {
    let sql = format!(
        "{MESSAGE_SELECT}
         WHERE m.library_id = ?1 AND (m.sender_id = ?2 OR m.recipient_id = ?2) AND m.is_deleted = 0
         ORDER BY m.created_at ASC, m.id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![library_id, user_id], map_message_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Non-deleted messages between two users in either direction, oldest first.
pub fn query_thread(
    conn: &Connection,
    library_id: i64,
    user_id: &str,
    other_id: &str,
    after: Option<i64>,
) -> Result<Vec<MessageRow>> {
    let sql = format!(
        "{MESSAGE_SELECT}
         WHERE m.library_id = ?1 AND m.is_deleted = 0
           AND ((m.sender_id = ?2 AND m.recipient_id = ?3) OR (m.sender_id = ?3 AND m.recipient_id = ?2))
           AND (?4 IS NULL OR m.id > ?4)
         ORDER BY m.created_at ASC, m.id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![library_id, user_id, other_id, after], map_message_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_unread(conn: &Connection, library_id: i64, recipient_id: &str) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages
         WHERE library_id = ?1 AND recipient_id = ?2 AND is_read = 0 AND is_deleted = 0",
        rusqlite::params![library_id, recipient_id],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Mark unread, non-deleted messages `sender_id` sent to `recipient_id` as
/// read, up to and including message `up_to`. Returns the number of rows
/// changed.
pub fn mark_received_read(
    conn: &Connection,
    library_id: i64,
    recipient_id: &str,
    sender_id: &str,
    up_to: i64,
) -> Result<usize> {
    let sql = format!(
        "UPDATE messages SET is_read = 1, updated_at = {NOW}
         WHERE library_id = ?1 AND recipient_id = ?2 AND sender_id = ?3 AND id <= ?4
           AND is_read = 0 AND is_deleted = 0"
    );
    let changed = conn.execute(&sql, rusqlite::params![library_id, recipient_id, sender_id, up_to])?;
    Ok(changed)
}

/// Mark the listed messages read, skipping any not addressed to
/// `recipient_id`, already read or deleted.
pub fn mark_ids_read(conn: &Connection, library_id: i64, recipient_id: &str, ids: &[i64]) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }

    let placeholders: Vec<String> = (3..ids.len() + 3).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "UPDATE messages SET is_read = 1, updated_at = {NOW}
         WHERE library_id = ?1 AND recipient_id = ?2 AND is_read = 0 AND is_deleted = 0
           AND id IN ({})",
        placeholders.join(", ")
    );

    let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![
        &library_id as &dyn rusqlite::types::ToSql,
        &recipient_id as &dyn rusqlite::types::ToSql,
    ];
    params.extend(ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));
    let changed = conn.execute(&sql, params.as_slice())?;
    Ok(changed)
}

/// Column a single-row flag update may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Read,
    Starred,
    Deleted,
}

impl Flag {
    fn column(&self) -> &'static str {
        match self {
            Flag::Read => "is_read",
            Flag::Starred => "is_starred",
            Flag::Deleted => "is_deleted",
        }
    }
}

pub fn set_message_flag(
    conn: &Connection,
    library_id: i64,
    id: i64,
    flag: Flag,
    value: bool,
) -> Result<bool> {
    let sql = format!(
        "UPDATE messages SET {} = ?3, updated_at = {NOW} WHERE library_id = ?1 AND id = ?2",
        flag.column()
    );
    let changed = conn.execute(&sql, rusqlite::params![library_id, id, value])?;
    Ok(changed == 1)
}

fn map_message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        library_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row.get::<_, Option<String>>(3)?.unwrap_or_else(|| "unknown".to_string()),
        recipient_id: row.get(4)?,
        recipient_name: row.get::<_, Option<String>>(5)?.unwrap_or_else(|| "unknown".to_string()),
        subject: row.get(6)?,
        body: row.get(7)?,
        is_read: row.get(8)?,
        is_starred: row.get(9)?,
        is_deleted: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
