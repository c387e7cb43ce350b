use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use tracing::info;

use lms_db::{MessageError, Page};
use lms_types::api::{
    AckResponse, ChatSendRequest, ChatSendResponse, MessageListQuery, MessageListResponse,
    MessageView, RecipientsResponse, SendMessageRequest, SendMessageResponse, StarResponse,
    UnreadCountResponse,
};
use lms_types::{AudienceSelector, MessageId, RequestContext, UserId};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::run_blocking;

/// Subject given to messages sent from the inline chat widget.
pub const CHAT_SUBJECT: &str = "Chat message";

/// `recipientType` value for a single, explicitly chosen recipient.
const INDIVIDUAL: &str = "individual";

enum Target {
    Individual(UserId),
    Audience(AudienceSelector),
}

/// GET /messages?view=inbox|sent|starred. Opening the inbox marks the
/// returned page read; the listing itself still shows which messages were new.
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    WithRejection(Query(query), _): WithRejection<Query<MessageListQuery>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let page = Page::new(query.limit, query.before);
    let view = query.view;

    let messages = run_blocking(&state, move |db| match view {
        MessageView::Inbox => db.open_inbox(&ctx, page),
        MessageView::Sent => db.list_sent(&ctx, page),
        MessageView::Starred => db.list_starred(&ctx, page),
    })
    .await?;

    Ok(Json(MessageListResponse {
        success: true,
        view,
        messages,
    }))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<impl IntoResponse, ApiError> {
    let unread = run_blocking(&state, move |db| db.unread_count(&ctx)).await?;
    Ok(Json(UnreadCountResponse {
        success: true,
        unread,
    }))
}

/// POST /messages/send: one recipient, or every user an audience resolves to.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    WithRejection(Json(req), _): WithRejection<Json<SendMessageRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let SendMessageRequest {
        recipient_type,
        individual_recipient,
        subject,
        body,
    } = req;

    let target = if recipient_type == INDIVIDUAL {
        let recipient = individual_recipient
            .filter(|id| !id.as_str().trim().is_empty())
            .ok_or_else(|| ApiError::BadRequest("Please choose a recipient".into()))?;
        Target::Individual(recipient)
    } else {
        let audience = AudienceSelector::parse(&recipient_type).ok_or_else(|| {
            ApiError::BadRequest(format!("Unknown recipient type: {}", recipient_type))
        })?;
        Target::Audience(audience)
    };

    let count = run_blocking(&state, move |db| match target {
        Target::Individual(recipient) => db
            .send_message(&ctx, &recipient, &subject, &body)
            .map(|_| 1),
        Target::Audience(audience) => db.broadcast_message(&ctx, audience, &subject, &body),
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            success: true,
            count,
        }),
    ))
}

/// POST /chat/send: single-recipient send from the chat widget. The
/// recipient must hold the role the widget believes it does.
pub async fn send_chat_message(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    WithRejection(Json(req), _): WithRejection<Json<ChatSendRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let message = run_blocking(&state, move |db| {
        let recipient = db
            .find_contact(&ctx, &req.recipient_id)?
            .filter(|c| c.role == req.recipient_type)
            .ok_or_else(|| MessageError::RecipientNotFound(req.recipient_id.to_string()))?;
        db.send_message(&ctx, &recipient.user_id, CHAT_SUBJECT, &req.message)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(ChatSendResponse {
            success: true,
            message,
        }),
    ))
}

pub async fn toggle_star(
    State(state): State<AppState>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<impl IntoResponse, ApiError> {
    let starred = run_blocking(&state, move |db| db.toggle_star(&ctx, MessageId(id))).await?;
    Ok(Json(StarResponse {
        success: true,
        starred,
    }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<impl IntoResponse, ApiError> {
    run_blocking(&state, move |db| db.mark_read(&ctx, MessageId(id))).await?;
    Ok(Json(AckResponse { success: true }))
}

pub async fn delete_message(
    State(state): State<AppState>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<impl IntoResponse, ApiError> {
    let user = ctx.user_id.clone();
    run_blocking(&state, move |db| db.soft_delete(&ctx, MessageId(id))).await?;
    info!("message {} removed from view by {}", id, user);
    Ok(Json(AckResponse { success: true }))
}

/// GET /recipients: who the caller can pick in the compose form.
pub async fn list_recipients(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<impl IntoResponse, ApiError> {
    let recipients = run_blocking(&state, move |db| db.list_recipients(&ctx)).await?;
    Ok(Json(RecipientsResponse {
        success: true,
        recipients,
    }))
}
