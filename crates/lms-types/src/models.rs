use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque external user identifier (e.g. `LIB-0042`). The only user key used
/// anywhere in the API or the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Tenant key: one library's isolated partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LibraryId(pub i64);

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Supervisor,
    Librarian,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Supervisor => "supervisor",
            Role::Librarian => "librarian",
            Role::Member => "member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "supervisor" => Ok(Role::Supervisor),
            "librarian" => Ok(Role::Librarian),
            "member" => Ok(Role::Member),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Who is acting, in which tenant, with which role. Built once per request
/// by the auth middleware and passed explicitly to every store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: UserId,
    pub library_id: LibraryId,
    pub role: Role,
}

impl RequestContext {
    pub fn new(user_id: impl Into<UserId>, library_id: LibraryId, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            library_id,
            role,
        }
    }
}

/// One directed message, with participant display names resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub library_id: LibraryId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub recipient_id: UserId,
    pub recipient_name: String,
    pub subject: String,
    pub body: String,
    pub is_read: bool,
    pub is_starred: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// The participant that is not `user`. Assumes `user` is one of the two.
    pub fn other_party(&self, user: &UserId) -> &UserId {
        if &self.sender_id == user {
            &self.recipient_id
        } else {
            &self.sender_id
        }
    }

    pub fn involves(&self, user: &UserId) -> bool {
        &self.sender_id == user || &self.recipient_id == user
    }
}

/// Latest message and unread count for one conversation partner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub other_user_id: UserId,
    pub other_user_name: String,
    pub other_user_role: Role,
    pub latest_message_id: MessageId,
    pub latest_subject: String,
    pub latest_body: String,
    pub latest_at: DateTime<Utc>,
    pub unread_count: u64,
}

/// A user the caller may address individually.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub user_id: UserId,
    pub display_name: String,
    pub role: Role,
}
