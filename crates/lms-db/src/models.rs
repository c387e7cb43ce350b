//! Database row types: these map directly to SQLite rows.
//! Distinct from lms-types API models to keep the DB layer independent.
use chrono::{DateTime, NaiveDateTime, Utc};

pub struct LibraryRow {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

pub struct UserRow {
    pub id: String,
    pub library_id: i64,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub status: String,
    pub password: String,
    pub created_at: String,
}

impl UserRow {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

pub struct MessageRow {
    pub id: i64,
    pub library_id: i64,
    pub sender_id: String,
    pub sender_name: String,
    pub recipient_id: String,
    pub recipient_name: String,
    pub subject: String,
    pub body: String,
    pub is_read: bool,
    pub is_starred: bool,
    pub is_deleted: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS[.SSS]" without timezone.
/// RFC 3339 is accepted too.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = raw.parse::<DateTime<Utc>>() {
        return Some(dt);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .map(|ndt| ndt.and_utc())
        .ok()
}
