//! User model and authentication request/response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::session::Session;

/// Represents a user record from the database.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub username: String,

    /// Argon2 PHC string, never serialized
    pub hashed_password: String,

    pub full_name: String,
    pub email: String,
    pub password_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateUserParams {
    pub username: String,
    pub hashed_password: String,
    pub full_name: String,
    pub email: String,
}

/// `password_changed_at` of a user who never changed their password
/// (`0001-01-01T00:00:00Z`, the column default).
pub fn password_never_changed() -> DateTime<Utc> {
    DateTime::from_timestamp(-62_135_596_800, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Request body for `POST /users`.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 3, max = 64), custom(function = "validate_username"))]
    pub username: String,

    #[validate(length(min = 6))]
    pub password: String,

    #[validate(length(min = 1))]
    pub full_name: String,

    #[validate(email)]
    pub email: String,
}

/// Request body for `POST /users/login`.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginUserRequest {
    #[validate(length(min = 3, max = 64), custom(function = "validate_username"))]
    pub username: String,

    #[validate(length(min = 6))]
    pub password: String,
}

/// User as shown to API clients (no password hash).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub password_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            username: user.username,
            full_name: user.full_name,
            email: user.email,
            password_changed_at: user.password_changed_at,
            created_at: user.created_at,
        }
    }
}

/// Response body for a successful login.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginUserResponse {
    pub session_id: uuid::Uuid,
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

/// Everything produced by a login, before it is shaped for the wire.
#[derive(Debug)]
pub struct LoginOutcome {
    pub session: Session,
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub user: User,
}

impl From<LoginOutcome> for LoginUserResponse {
    fn from(outcome: LoginOutcome) -> Self {
        Self {
            session_id: outcome.session.id,
            access_token: outcome.access_token,
            access_token_expires_at: outcome.access_token_expires_at,
            refresh_token: outcome.session.refresh_token,
            refresh_token_expires_at: outcome.session.expires_at,
            user: outcome.user.into(),
        }
    }
}

/// Usernames are ASCII alphanumeric (underscores allowed).
fn validate_username(username: &str) -> Result<(), validator::ValidationError> {
    if username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(())
    } else {
        Err(validator::ValidationError::new("username"))
    }
}
