pub mod auth;
pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;

use axum::{
    Json, Router,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use lms_db::{Database, MessageError};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::require_auth;

/// Full HTTP surface: public login/health plus the authenticated messaging
/// routes.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/health", get(health))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/messages", get(messages::list_messages))
        .route("/messages/unread-count", get(messages::unread_count))
        .route("/messages/send", post(messages::send_message))
        .route("/messages/{id}", delete(messages::delete_message))
        .route("/messages/{id}/star", post(messages::toggle_star))
        .route("/messages/{id}/read", post(messages::mark_read))
        .route("/chat/send", post(messages::send_chat_message))
        .route("/recipients", get(messages::list_recipients))
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversation", get(conversations::get_conversation))
        .layer(axum::middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Run a store operation off the async runtime.
pub(crate) async fn run_blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> Result<T, MessageError> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal("background task failed".into())
        })?
        .map_err(ApiError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use lms_types::{LibraryId, Role, UserId};

    use crate::auth::{AppStateInner, create_token, hash_password};

    const SECRET: &str = "test-secret";

    fn app() -> Router {
        let db = Database::open_in_memory().unwrap();
        let library = db.create_library("Central").unwrap();
        let other = db.create_library("Eastside").unwrap();

        let password = hash_password("correct horse").unwrap();
        db.create_user("SUP-1", library, "sup1", "Sam Supervisor", "supervisor", "x").unwrap();
        db.create_user("LIB-1", library, "lib1", "Lee Librarian", "librarian", &password).unwrap();
        db.create_user("LIB-2", library, "lib2", "Lou Librarian", "librarian", "x").unwrap();
        db.create_user("MEM-1", library, "mem1", "Max Member", "member", "x").unwrap();
        db.create_user("LIB-9", other, "lib9", "East Librarian", "librarian", "x").unwrap();

        router(AppStateInner::new(db, SECRET))
    }

    fn token(user: &str, library: i64, role: Role) -> String {
        create_token(SECRET, &UserId::from(user), user, LibraryId(library), role).unwrap()
    }

    fn member() -> String {
        token("MEM-1", 1, Role::Member)
    }

    fn librarian() -> String {
        token("LIB-1", 1, Role::Librarian)
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn send(app: &Router, token: &str, body: Value) -> (StatusCode, Value) {
        call(app, "POST", "/messages/send", Some(token), Some(body)).await
    }

    #[tokio::test]
    async fn protected_routes_require_a_valid_token() {
        let app = app();

        let (status, body) = call(&app, "GET", "/messages", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);

        let forged = create_token("other-secret", &"LIB-1".into(), "lib1", LibraryId(1), Role::Librarian)
            .unwrap();
        let (status, _) = call(&app, "GET", "/messages", Some(&forged), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn login_issues_a_usable_token() {
        let app = app();

        let (status, _) = call(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "username": "lib1", "password": "wrong" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "username": "lib1", "password": "correct horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "librarian");
        assert_eq!(body["library_id"], 1);

        let token = body["token"].as_str().unwrap().to_string();
        let (status, body) = call(&app, "GET", "/messages?view=sent", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["view"], "sent");
    }

    #[tokio::test]
    async fn opening_the_inbox_marks_it_read() {
        let app = app();

        let (status, body) = send(
            &app,
            &member(),
            json!({
                "recipientType": "individual",
                "individualRecipient": "LIB-1",
                "subject": "Help",
                "body": "Where is book X?"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({ "success": true, "count": 1 }));

        let (_, body) = call(&app, "GET", "/messages/unread-count", Some(&librarian()), None).await;
        assert_eq!(body["unread"], 1);

        let (status, body) = call(&app, "GET", "/messages?view=inbox", Some(&librarian()), None).await;
        assert_eq!(status, StatusCode::OK);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["sender_id"], "MEM-1");
        // The listing shows the state before it was opened.
        assert_eq!(messages[0]["is_read"], false);

        let (_, body) = call(&app, "GET", "/messages/unread-count", Some(&librarian()), None).await;
        assert_eq!(body["unread"], 0);
    }

    #[tokio::test]
    async fn refused_sends_report_errors() {
        let app = app();

        let (status, body) = send(
            &app,
            &member(),
            json!({ "recipientType": "all_members", "subject": "Party", "body": "Everyone!" }),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("may not"));

        let (status, _) = send(
            &app,
            &member(),
            json!({ "recipientType": "individual", "individualRecipient": "LIB-1", "subject": "Hi", "body": " " }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            &member(),
            json!({ "recipientType": "individual", "subject": "Hi", "body": "Hello" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            &member(),
            json!({ "recipientType": "everyone", "subject": "Hi", "body": "Hello" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            &member(),
            json!({ "recipientType": "individual", "individualRecipient": "LIB-9", "subject": "Hi", "body": "Hello" }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn broadcast_reports_recipient_count() {
        let app = app();
        let supervisor = token("SUP-1", 1, Role::Supervisor);

        let (status, body) = send(
            &app,
            &supervisor,
            json!({ "recipientType": "all_librarians", "subject": "Meeting", "body": "Friday 10am" }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn chat_send_checks_recipient_role() {
        let app = app();

        let (status, _) = call(
            &app,
            "POST",
            "/chat/send",
            Some(&member()),
            Some(json!({ "message": "Hi", "recipientId": "LIB-1", "recipientType": "supervisor" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            &app,
            "POST",
            "/chat/send",
            Some(&member()),
            Some(json!({ "message": "Hi", "recipientId": "LIB-1", "recipientType": "librarian" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"]["subject"], messages::CHAT_SUBJECT);
        assert_eq!(body["message"]["body"], "Hi");
    }

    #[tokio::test]
    async fn conversation_view_marks_thread_read() {
        let app = app();

        for text in ["One", "Two"] {
            let (status, _) = call(
                &app,
                "POST",
                "/chat/send",
                Some(&member()),
                Some(json!({ "message": text, "recipientId": "LIB-1", "recipientType": "librarian" })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (_, body) = call(&app, "GET", "/conversations", Some(&librarian()), None).await;
        let conversations = body["conversations"].as_array().unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0]["other_user_id"], "MEM-1");
        assert_eq!(conversations[0]["latest_body"], "Two");
        assert_eq!(conversations[0]["unread_count"], 2);

        let (status, body) =
            call(&app, "GET", "/conversation?withUser=MEM-1", Some(&librarian()), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["with_user"], "MEM-1");
        let thread = body["messages"].as_array().unwrap();
        assert_eq!(thread.len(), 2);
        assert_eq!(thread[0]["body"], "One");

        let first_id = thread[0]["id"].as_i64().unwrap();
        let (_, body) = call(
            &app,
            "GET",
            &format!("/conversation?withUser=MEM-1&after={first_id}"),
            Some(&librarian()),
            None,
        )
        .await;
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);

        let (_, body) = call(&app, "GET", "/conversations", Some(&librarian()), None).await;
        assert_eq!(body["conversations"][0]["unread_count"], 0);

        let (status, _) =
            call(&app, "GET", "/conversation?withUser=LIB-9", Some(&librarian()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn flags_are_limited_to_participants() {
        let app = app();

        let (_, body) = call(
            &app,
            "POST",
            "/chat/send",
            Some(&member()),
            Some(json!({ "message": "Hi", "recipientId": "LIB-1", "recipientType": "librarian" })),
        )
        .await;
        let id = body["message"]["id"].as_i64().unwrap();

        let outsider = token("LIB-2", 1, Role::Librarian);
        let (status, _) = call(&app, "POST", &format!("/messages/{id}/star"), Some(&outsider), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) =
            call(&app, "POST", &format!("/messages/{id}/star"), Some(&librarian()), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["starred"], true);

        let (_, body) = call(&app, "GET", "/messages?view=starred", Some(&librarian()), None).await;
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);

        let (status, _) =
            call(&app, "POST", &format!("/messages/{id}/read"), Some(&member()), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) =
            call(&app, "DELETE", &format!("/messages/{id}"), Some(&member()), None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, "GET", "/messages?view=starred", Some(&librarian()), None).await;
        assert!(body["messages"].as_array().unwrap().is_empty());

        let (status, _) =
            call(&app, "POST", &format!("/messages/{id}/star"), Some(&librarian()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn recipients_for_member_are_librarians() {
        let app = app();

        let (status, body) = call(&app, "GET", "/recipients", Some(&member()), None).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body["recipients"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["user_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["LIB-1", "LIB-2"]);
    }

    #[tokio::test]
    async fn opening_one_inbox_page_leaves_older_messages_unread() {
        let app = app();

        for subject in ["First", "Second", "Third"] {
            let (status, _) = send(
                &app,
                &member(),
                json!({
                    "recipientType": "individual",
                    "individualRecipient": "LIB-1",
                    "subject": subject,
                    "body": "Hello"
                }),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, body) =
            call(&app, "GET", "/messages?view=inbox&limit=1", Some(&librarian()), None).await;
        assert_eq!(status, StatusCode::OK);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["subject"], "Third");

        let (_, body) = call(&app, "GET", "/messages/unread-count", Some(&librarian()), None).await;
        assert_eq!(body["unread"], 2);
    }

    #[tokio::test]
    async fn malformed_requests_get_json_errors() {
        let app = app();

        let (status, body) = send(
            &app,
            &member(),
            json!({ "recipientType": "individual", "individualRecipient": "LIB-1", "body": "Hello" }),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());

        let (status, body) = call(&app, "GET", "/conversation", Some(&librarian()), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());

        let (status, body) = call(&app, "POST", "/messages/abc/star", Some(&librarian()), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, body) = call(&app, "GET", "/messages?view=drafts", Some(&librarian()), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }
}
