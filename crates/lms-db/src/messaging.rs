//! Message store: direct messages, broadcasts, mailboxes and conversations.
//!
//! Every operation takes the caller's `RequestContext` and filters every
//! statement by its library, so one tenant can never read or touch another
//! tenant's messages. Listing never changes state. Marking read is either an
//! explicit call (`mark_inbox_read`, `mark_conversation_read`, `mark_read`)
//! or one of the `open_*` reads, which mark exactly the messages they return.

use std::collections::HashMap;

use anyhow::anyhow;
use lms_types::{
    AudienceSelector, Contact, ConversationSummary, LibraryId, Message, MessageId,
    RequestContext, Role, UserId,
};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::Database;
use crate::error::{MessageError, Result};
use crate::models::{MessageRow, UserRow, parse_timestamp};
use crate::queries::{self, Flag, Mailbox};

pub const MAX_SUBJECT_LEN: usize = 255;
pub const MAX_BODY_LEN: usize = 5000;

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 200;

/// Keyset pagination for mailbox listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    /// Only messages with a lower id than this one.
    pub before: Option<MessageId>,
}

impl Page {
    pub fn new(limit: Option<u32>, before: Option<MessageId>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            before,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl Database {
    // -- Sending --

    pub fn send_message(
        &self,
        ctx: &RequestContext,
        recipient_id: &UserId,
        subject: &str,
        body: &str,
    ) -> Result<Message> {
        let (subject, body) = validate_content(subject, body)?;
        if recipient_id == &ctx.user_id {
            return Err(MessageError::Validation(
                "You cannot send a message to yourself".into(),
            ));
        }

        self.with_conn(|conn| {
            let sender_role = active_sender_role(conn, ctx)?;
            let recipient = queries::query_user_in_library(conn, ctx.library_id.0, recipient_id.as_str())?
                .filter(UserRow::is_active)
                .ok_or_else(|| MessageError::RecipientNotFound(recipient_id.to_string()))?;

            let recipient_role = parse_role(&recipient)?;
            if !sender_role.can_message(recipient_role) {
                return Err(MessageError::PolicyViolation(format!(
                    "A {} may not message a {}",
                    sender_role, recipient_role
                )));
            }

            let id = queries::insert_message(
                conn,
                ctx.library_id.0,
                ctx.user_id.as_str(),
                recipient_id.as_str(),
                subject,
                body,
            )?;
            let row = queries::query_message(conn, ctx.library_id.0, id)?
                .ok_or_else(|| anyhow!("message {} missing after insert", id))?;

            info!(
                message_id = id,
                library_id = %ctx.library_id,
                "{} -> {} message sent",
                ctx.user_id,
                recipient_id
            );
            Ok(row_to_message(row))
        })
    }

    /// Fan a message out to every user the audience resolves to, one row per
    /// recipient. All rows are written in one transaction.
    pub fn broadcast_message(
        &self,
        ctx: &RequestContext,
        audience: AudienceSelector,
        subject: &str,
        body: &str,
    ) -> Result<usize> {
        let (subject, body) = validate_content(subject, body)?;

        self.with_conn_mut(|conn| {
            let sender_role = active_sender_role(conn, ctx)?;
            if !sender_role.can_broadcast(audience) {
                return Err(MessageError::PolicyViolation(format!(
                    "A {} may not message {:?}",
                    sender_role, audience
                )));
            }

            let recipients = resolve_audience_in(conn, ctx, audience)?;
            if recipients.is_empty() {
                return Err(MessageError::EmptyAudience);
            }

            let tx = conn.transaction()?;
            for recipient in &recipients {
                queries::insert_message(
                    &tx,
                    ctx.library_id.0,
                    ctx.user_id.as_str(),
                    recipient.as_str(),
                    subject,
                    body,
                )?;
            }
            tx.commit()?;

            info!(
                library_id = %ctx.library_id,
                "{} broadcast to {:?}: {} recipients",
                ctx.user_id,
                audience,
                recipients.len()
            );
            Ok(recipients.len())
        })
    }

    /// Active users of the caller's library the audience stands for,
    /// excluding the caller.
    pub fn resolve_audience(
        &self,
        ctx: &RequestContext,
        audience: AudienceSelector,
    ) -> Result<Vec<UserId>> {
        self.with_conn(|conn| resolve_audience_in(conn, ctx, audience))
    }

    /// Users the caller may address individually.
    pub fn list_recipients(&self, ctx: &RequestContext) -> Result<Vec<Contact>> {
        self.with_conn(|conn| {
            let contacts = queries::query_users_in_library(conn, ctx.library_id.0)?
                .into_iter()
                .filter(|u| u.is_active() && u.id != ctx.user_id.as_str())
                .filter_map(|u| user_to_contact(u).ok())
                .filter(|c| ctx.role.can_message(c.role))
                .collect();
            Ok(contacts)
        })
    }

    /// An active user of the caller's library.
    pub fn find_contact(&self, ctx: &RequestContext, user_id: &UserId) -> Result<Option<Contact>> {
        self.with_conn(|conn| {
            let contact = queries::query_user_in_library(conn, ctx.library_id.0, user_id.as_str())?
                .filter(UserRow::is_active)
                .map(user_to_contact)
                .transpose()?;
            Ok(contact)
        })
    }

    // -- Mailboxes --

    pub fn list_inbox(&self, ctx: &RequestContext, page: Page) -> Result<Vec<Message>> {
        self.list_mailbox(ctx, Mailbox::Inbox, page)
    }

    pub fn list_sent(&self, ctx: &RequestContext, page: Page) -> Result<Vec<Message>> {
        self.list_mailbox(ctx, Mailbox::Sent, page)
    }

    pub fn list_starred(&self, ctx: &RequestContext, page: Page) -> Result<Vec<Message>> {
        self.list_mailbox(ctx, Mailbox::Starred, page)
    }

    fn list_mailbox(&self, ctx: &RequestContext, mailbox: Mailbox, page: Page) -> Result<Vec<Message>> {
        self.with_conn(|conn| load_mailbox(conn, ctx, mailbox, page))
    }

    /// One inbox page, with exactly the returned messages marked read. The
    /// returned messages still carry the flags they had before opening.
    pub fn open_inbox(&self, ctx: &RequestContext, page: Page) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let messages = load_mailbox(conn, ctx, Mailbox::Inbox, page)?;
            let ids: Vec<MessageId> = messages.iter().map(|m| m.id).collect();
            mark_ids_read(conn, ctx, &ids)?;
            Ok(messages)
        })
    }

    /// Mark the listed inbox messages read. Ids that are not unread messages
    /// addressed to the caller are skipped.
    pub fn mark_inbox_read(&self, ctx: &RequestContext, ids: &[MessageId]) -> Result<usize> {
        self.with_conn(|conn| mark_ids_read(conn, ctx, ids))
    }

    pub fn unread_count(&self, ctx: &RequestContext) -> Result<u64> {
        self.with_conn(|conn| Ok(queries::count_unread(conn, ctx.library_id.0, ctx.user_id.as_str())?))
    }

    // -- Conversations --

    pub fn list_conversations(&self, ctx: &RequestContext) -> Result<Vec<ConversationSummary>> {
        self.with_conn(|conn| {
            let messages: Vec<Message> =
                queries::query_participant_messages(conn, ctx.library_id.0, ctx.user_id.as_str())?
                    .into_iter()
                    .map(row_to_message)
                    .collect();
            let directory = contact_directory(conn, ctx.library_id)?;
            Ok(group_conversations(&ctx.user_id, &messages, &directory))
        })
    }

    /// Both directions of the exchange with `other_id`, oldest first. `after`
    /// restricts the result to messages newer than a previously seen id.
    pub fn get_conversation_thread(
        &self,
        ctx: &RequestContext,
        other_id: &UserId,
        after: Option<MessageId>,
    ) -> Result<Vec<Message>> {
        self.with_conn(|conn| load_thread(conn, ctx, other_id, after))
    }

    /// Load the thread like `get_conversation_thread` and mark what
    /// `other_id` sent the caller read, up to the newest message returned.
    /// Messages arriving after the read stay unread.
    pub fn open_conversation(
        &self,
        ctx: &RequestContext,
        other_id: &UserId,
        after: Option<MessageId>,
    ) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let messages = load_thread(conn, ctx, other_id, after)?;
            if let Some(newest) = messages.iter().map(|m| m.id).max() {
                mark_thread_read(conn, ctx, other_id, newest)?;
            }
            Ok(messages)
        })
    }

    /// Mark what `other_id` sent the caller read, up to and including
    /// message `up_to`.
    pub fn mark_conversation_read(
        &self,
        ctx: &RequestContext,
        other_id: &UserId,
        up_to: MessageId,
    ) -> Result<usize> {
        self.with_conn(|conn| mark_thread_read(conn, ctx, other_id, up_to))
    }

    // -- Per-message flags --

    /// Flip the starred flag. Returns the new state.
    pub fn toggle_star(&self, ctx: &RequestContext, id: MessageId) -> Result<bool> {
        self.with_conn(|conn| {
            let row = load_participant_message(conn, ctx, id, false)?;
            let starred = !row.is_starred;
            queries::set_message_flag(conn, ctx.library_id.0, row.id, Flag::Starred, starred)?;
            debug!("message {} starred={} by {}", id, starred, ctx.user_id);
            Ok(starred)
        })
    }

    pub fn mark_read(&self, ctx: &RequestContext, id: MessageId) -> Result<()> {
        self.with_conn(|conn| {
            let row = load_participant_message(conn, ctx, id, false)?;
            if row.recipient_id != ctx.user_id.as_str() {
                return Err(MessageError::Forbidden(
                    "Only the recipient can mark a message as read".into(),
                ));
            }
            if !row.is_read {
                queries::set_message_flag(conn, ctx.library_id.0, row.id, Flag::Read, true)?;
            }
            Ok(())
        })
    }

    /// Hide the message from every view. Deleting twice is a no-op.
    pub fn soft_delete(&self, ctx: &RequestContext, id: MessageId) -> Result<()> {
        self.with_conn(|conn| {
            let row = load_participant_message(conn, ctx, id, true)?;
            if !row.is_deleted {
                queries::set_message_flag(conn, ctx.library_id.0, row.id, Flag::Deleted, true)?;
                info!("message {} deleted by {}", id, ctx.user_id);
            }
            Ok(())
        })
    }
}

/// Group a user's messages by the other party, keeping the latest message
/// (by `created_at`, then id) and counting unread messages addressed to
/// `viewer`. Newest conversation first.
pub fn group_conversations(
    viewer: &UserId,
    messages: &[Message],
    directory: &HashMap<UserId, Contact>,
) -> Vec<ConversationSummary> {
    struct Group<'a> {
        latest: &'a Message,
        unread: u64,
    }

    let mut groups: HashMap<&UserId, Group<'_>> = HashMap::new();
    for message in messages.iter().filter(|m| m.involves(viewer)) {
        let unread = u64::from(&message.recipient_id == viewer && !message.is_read);
        groups
            .entry(message.other_party(viewer))
            .and_modify(|group| {
                if is_later(message, group.latest) {
                    group.latest = message;
                }
                group.unread += unread;
            })
            .or_insert(Group {
                latest: message,
                unread,
            });
    }

    let mut summaries: Vec<ConversationSummary> = groups
        .into_iter()
        .filter_map(|(other, group)| {
            let Some(contact) = directory.get(other) else {
                warn!("conversation partner {} missing from directory", other);
                return None;
            };
            Some(ConversationSummary {
                other_user_id: other.clone(),
                other_user_name: contact.display_name.clone(),
                other_user_role: contact.role,
                latest_message_id: group.latest.id,
                latest_subject: group.latest.subject.clone(),
                latest_body: group.latest.body.clone(),
                latest_at: group.latest.created_at,
                unread_count: group.unread,
            })
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.latest_at
            .cmp(&a.latest_at)
            .then(b.latest_message_id.cmp(&a.latest_message_id))
    });
    summaries
}

fn is_later(a: &Message, b: &Message) -> bool {
    (a.created_at, a.id) > (b.created_at, b.id)
}

fn validate_content<'a>(subject: &'a str, body: &'a str) -> Result<(&'a str, &'a str)> {
    let subject = subject.trim();
    let body = body.trim();

    if subject.is_empty() {
        return Err(MessageError::Validation("Subject is required".into()));
    }
    if body.is_empty() {
        return Err(MessageError::Validation("Message body is required".into()));
    }
    if subject.chars().count() > MAX_SUBJECT_LEN {
        return Err(MessageError::Validation(format!(
            "Subject must be at most {} characters",
            MAX_SUBJECT_LEN
        )));
    }
    if body.chars().count() > MAX_BODY_LEN {
        return Err(MessageError::Validation(format!(
            "Message body must be at most {} characters",
            MAX_BODY_LEN
        )));
    }
    Ok((subject, body))
}

fn resolve_audience_in(
    conn: &Connection,
    ctx: &RequestContext,
    audience: AudienceSelector,
) -> Result<Vec<UserId>> {
    let users = queries::query_active_users_by_role(
        conn,
        ctx.library_id.0,
        audience.target_role().as_str(),
    )?;
    let ids = users
        .into_iter()
        .map(|u| UserId::from(u.id))
        .filter(|id| id != &ctx.user_id);

    let resolved: Vec<UserId> = match audience {
        AudienceSelector::AllLibrarians | AudienceSelector::AllMembers => ids.collect(),
        AudienceSelector::TenantSupervisor | AudienceSelector::TenantLibrarian => ids.take(1).collect(),
    };
    Ok(resolved)
}

/// The caller's stored role. Accounts deactivated or removed since the token
/// was issued may not send.
fn active_sender_role(conn: &Connection, ctx: &RequestContext) -> Result<Role> {
    let sender = queries::query_user_in_library(conn, ctx.library_id.0, ctx.user_id.as_str())?
        .filter(UserRow::is_active)
        .ok_or_else(|| {
            warn!("inactive or unknown sender {} refused", ctx.user_id);
            MessageError::Forbidden("Your account is not active".into())
        })?;

    let role = parse_role(&sender)?;
    if role != ctx.role {
        debug!("{} presents as {} but is stored as {}", ctx.user_id, ctx.role, role);
    }
    Ok(role)
}

fn load_mailbox(conn: &Connection, ctx: &RequestContext, mailbox: Mailbox, page: Page) -> Result<Vec<Message>> {
    let rows = queries::query_mailbox(
        conn,
        ctx.library_id.0,
        ctx.user_id.as_str(),
        mailbox,
        page.limit,
        page.before.map(|id| id.0),
    )?;
    Ok(rows.into_iter().map(row_to_message).collect())
}

fn load_thread(
    conn: &Connection,
    ctx: &RequestContext,
    other_id: &UserId,
    after: Option<MessageId>,
) -> Result<Vec<Message>> {
    if queries::query_user_in_library(conn, ctx.library_id.0, other_id.as_str())?.is_none() {
        return Err(MessageError::NotFound {
            entity: "user",
            id: other_id.to_string(),
        });
    }

    let rows = queries::query_thread(
        conn,
        ctx.library_id.0,
        ctx.user_id.as_str(),
        other_id.as_str(),
        after.map(|id| id.0),
    )?;
    Ok(rows.into_iter().map(row_to_message).collect())
}

fn mark_ids_read(conn: &Connection, ctx: &RequestContext, ids: &[MessageId]) -> Result<usize> {
    let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
    let changed = queries::mark_ids_read(conn, ctx.library_id.0, ctx.user_id.as_str(), &ids)?;
    debug!("{} inbox: {} of {} marked read", ctx.user_id, changed, ids.len());
    Ok(changed)
}

fn mark_thread_read(conn: &Connection, ctx: &RequestContext, other_id: &UserId, up_to: MessageId) -> Result<usize> {
    let changed = queries::mark_received_read(
        conn,
        ctx.library_id.0,
        ctx.user_id.as_str(),
        other_id.as_str(),
        up_to.0,
    )?;
    debug!("{} <- {}: {} marked read up to {}", ctx.user_id, other_id, changed, up_to);
    Ok(changed)
}

/// Load a message the caller takes part in. Absent rows, rows of another
/// library and (unless `include_deleted`) soft-deleted rows are `NotFound`.
fn load_participant_message(
    conn: &Connection,
    ctx: &RequestContext,
    id: MessageId,
    include_deleted: bool,
) -> Result<MessageRow> {
    let row = queries::query_message(conn, ctx.library_id.0, id.0)?
        .filter(|row| include_deleted || !row.is_deleted)
        .ok_or_else(|| MessageError::NotFound {
            entity: "message",
            id: id.to_string(),
        })?;

    let user = ctx.user_id.as_str();
    if row.sender_id != user && row.recipient_id != user {
        warn!("{} touched message {} without taking part in it", user, id);
        return Err(MessageError::Forbidden(
            "You are not a participant of this message".into(),
        ));
    }
    Ok(row)
}

fn contact_directory(conn: &Connection, library_id: LibraryId) -> Result<HashMap<UserId, Contact>> {
    let directory = queries::query_users_in_library(conn, library_id.0)?
        .into_iter()
        .filter_map(|u| user_to_contact(u).ok())
        .map(|c| (c.user_id.clone(), c))
        .collect();
    Ok(directory)
}

fn parse_role(user: &UserRow) -> Result<Role> {
    user.role
        .parse::<Role>()
        .map_err(|e| MessageError::Store(anyhow!("user {}: {}", user.id, e)))
}

fn user_to_contact(user: UserRow) -> Result<Contact> {
    let role = parse_role(&user).inspect_err(|e| warn!("{}", e))?;
    Ok(Contact {
        user_id: UserId::from(user.id),
        display_name: user.display_name,
        role,
    })
}

fn row_to_message(row: MessageRow) -> Message {
    let created_at = parse_timestamp(&row.created_at).unwrap_or_else(|| {
        warn!("Corrupt created_at '{}' on message {}", row.created_at, row.id);
        chrono::DateTime::default()
    });
    let updated_at = parse_timestamp(&row.updated_at).unwrap_or(created_at);

    Message {
        id: MessageId(row.id),
        library_id: LibraryId(row.library_id),
        sender_id: UserId::from(row.sender_id),
        sender_name: row.sender_name,
        recipient_id: UserId::from(row.recipient_id),
        recipient_name: row.recipient_name,
        subject: row.subject,
        body: row.body,
        is_read: row.is_read,
        is_starred: row.is_starred,
        created_at,
        updated_at,
    }
}
