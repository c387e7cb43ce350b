use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Json, extract::State};
use axum_extra::extract::WithRejection;
use jsonwebtoken::{EncodingKey, Header, encode};
use rand_core::OsRng;
use tracing::info;

use lms_db::Database;
use lms_types::api::{Claims, LoginRequest, LoginResponse};
use lms_types::{LibraryId, Role, UserId};

use crate::error::ApiError;

const TOKEN_LIFETIME_HOURS: i64 = 12;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
}

impl AppStateInner {
    pub fn new(db: Database, jwt_secret: impl Into<String>) -> AppState {
        Arc::new(Self {
            db,
            jwt_secret: jwt_secret.into(),
        })
    }
}

pub async fn login(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> Result<Json<LoginResponse>, ApiError> {
    let db = state.clone();
    let (user, verified) = tokio::task::spawn_blocking(move || {
        let user = db
            .db
            .get_user_by_username(&req.username)
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .ok_or(ApiError::Unauthorized("Invalid username or password"))?;

        // Argon2 verification is CPU heavy, keep it off the async threads too.
        let parsed_hash =
            PasswordHash::new(&user.password).map_err(|e| ApiError::Internal(e.to_string()))?;
        let verified = Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed_hash)
            .is_ok();

        Ok::<_, ApiError>((user, verified))
    })
    .await
    .map_err(|e| ApiError::Internal(format!("spawn_blocking join error: {}", e)))??;

    if !verified || !user.is_active() {
        return Err(ApiError::Unauthorized("Invalid username or password"));
    }

    let role = user
        .role
        .parse::<Role>()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let user_id = UserId::from(user.id);
    let library_id = LibraryId(user.library_id);

    let token = create_token(&state.jwt_secret, &user_id, &user.username, library_id, role)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    info!("{} logged in ({} of library {})", user_id, role, library_id);
    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        role,
        library_id,
        token,
    }))
}

pub fn create_token(
    secret: &str,
    user_id: &UserId,
    username: &str,
    library_id: LibraryId,
    role: Role,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id.clone(),
        username: username.to_string(),
        library_id,
        role,
        exp: (chrono::Utc::now() + chrono::Duration::hours(TOKEN_LIFETIME_HOURS)).timestamp()
            as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Hash a password with Argon2id for storage in `users.password`.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}
