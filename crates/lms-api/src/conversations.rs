use axum::{
    Extension, Json,
    extract::{Query, State},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;

use lms_types::RequestContext;
use lms_types::api::{ConversationListResponse, ConversationQuery, ConversationThreadResponse};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::run_blocking;

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = run_blocking(&state, move |db| db.list_conversations(&ctx)).await?;
    Ok(Json(ConversationListResponse {
        success: true,
        conversations,
    }))
}

/// GET /conversation?withUser=..&after=.. : the thread with one user. Polled
/// by the chat widget; what the other user sent is marked read up to the
/// newest message returned.
pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    WithRejection(Query(query), _): WithRejection<Query<ConversationQuery>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let ConversationQuery { with_user, after } = query;
    let other = with_user.clone();
    let messages = run_blocking(&state, move |db| db.open_conversation(&ctx, &other, after)).await?;

    Ok(Json(ConversationThreadResponse {
        success: true,
        with_user,
        messages,
    }))
}
