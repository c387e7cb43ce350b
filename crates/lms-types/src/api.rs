use serde::{Deserialize, Serialize};

use crate::models::{Contact, ConversationSummary, LibraryId, Message, MessageId, Role, UserId};

// -- JWT Claims --

/// JWT claims issued at login. The auth middleware turns these into a
/// `RequestContext`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub username: String,
    pub library_id: LibraryId,
    pub role: Role,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
    pub library_id: LibraryId,
    pub token: String,
}

// -- Messages --

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageView {
    #[default]
    Inbox,
    Sent,
    Starred,
}

#[derive(Debug, Deserialize)]
pub struct MessageListQuery {
    #[serde(default)]
    pub view: MessageView,
    pub limit: Option<u32>,
    /// Cursor: only messages with an id lower than this one.
    pub before: Option<MessageId>,
}

#[derive(Debug, Serialize)]
pub struct MessageListResponse {
    pub success: bool,
    pub view: MessageView,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub success: bool,
    pub unread: u64,
}

/// Compose form submission. `recipient_type` is either `individual` (with
/// `individual_recipient` set) or an audience selector name.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendMessageRequest {
    pub recipient_type: String,
    #[serde(default)]
    pub individual_recipient: Option<UserId>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub success: bool,
    pub count: usize,
}

/// Inline chat widget send. The subject is filled in server side.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChatSendRequest {
    pub message: String,
    pub recipient_id: UserId,
    pub recipient_type: Role,
}

#[derive(Debug, Serialize)]
pub struct ChatSendResponse {
    pub success: bool,
    pub message: Message,
}

// -- Conversations --

#[derive(Debug, Serialize)]
pub struct ConversationListResponse {
    pub success: bool,
    pub conversations: Vec<ConversationSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationQuery {
    pub with_user: UserId,
    /// Polling cursor: only messages newer than this id.
    pub after: Option<MessageId>,
}

#[derive(Debug, Serialize)]
pub struct ConversationThreadResponse {
    pub success: bool,
    pub with_user: UserId,
    pub messages: Vec<Message>,
}

// -- Flags --

#[derive(Debug, Serialize)]
pub struct StarResponse {
    pub success: bool,
    pub starred: bool,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct RecipientsResponse {
    pub success: bool,
    pub recipients: Vec<Contact>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}
