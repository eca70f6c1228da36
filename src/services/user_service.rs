//! User service - registration, login and refresh-token rotation.
//!
//! Passwords are stored as argon2 PHC strings. A login issues a short-lived
//! access token and a long-lived refresh token; the refresh token's id keys
//! a `Session` row so the session can later be blocked or checked.

use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::models::{
    session::CreateSessionParams,
    user::{CreateUserParams, CreateUserRequest, LoginOutcome, LoginUserRequest, User},
};
use crate::store::{Store, StoreError, run_in_transaction};
use crate::token::{TokenError, TokenMaker};

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("incorrect username or password")]
    InvalidCredentials,

    #[error("session is blocked")]
    BlockedSession,

    #[error("session belongs to another user")]
    IncorrectSessionUser,

    #[error("refresh token does not match the session")]
    MismatchedSessionToken,

    #[error("session has expired")]
    ExpiredSession,

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Hash `password` into an argon2 PHC string with a random salt.
///
/// Argon2 is deliberately slow, so it runs on the blocking pool.
pub async fn hash_password(password: String) -> Result<String, UserError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| UserError::Hash(e.to_string()))
    })
    .await
    .map_err(|e| UserError::Hash(e.to_string()))?
}

/// Check `password` against a PHC string produced by `hash_password`.
pub async fn check_password(password: String, hashed_password: String) -> Result<(), UserError> {
    tokio::task::spawn_blocking(move || {
        let parsed =
            PasswordHash::new(&hashed_password).map_err(|e| UserError::Hash(e.to_string()))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| UserError::InvalidCredentials)
    })
    .await
    .map_err(|e| UserError::Hash(e.to_string()))?
}

/// Where a login came from, recorded on the session.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: String,
    pub client_ip: String,
}

pub struct UserService {
    store: Arc<dyn Store>,
    token_maker: Arc<dyn TokenMaker>,
    access_token_duration: chrono::Duration,
    refresh_token_duration: chrono::Duration,
}

impl UserService {
    pub fn new(
        store: Arc<dyn Store>,
        token_maker: Arc<dyn TokenMaker>,
        access_token_duration: chrono::Duration,
        refresh_token_duration: chrono::Duration,
    ) -> Self {
        Self {
            store,
            token_maker,
            access_token_duration,
            refresh_token_duration,
        }
    }

    /// Register a new user.
    ///
    /// # Errors
    ///
    /// - `Store(ConstraintViolation)`: username or email already taken
    pub async fn create_user(
        &self,
        req: CreateUserRequest,
        cancel: &CancellationToken,
    ) -> Result<User, UserError> {
        let params = CreateUserParams {
            hashed_password: hash_password(req.password).await?,
            username: req.username,
            full_name: req.full_name,
            email: req.email,
        };

        let user = run_in_transaction(self.store.as_ref(), cancel, move |tx| {
            Box::pin(async move { tx.create_user(params).await })
        })
        .await?;

        tracing::info!(username = %user.username, "user created");
        Ok(user)
    }

    /// Verify credentials, then issue an access token and open a session.
    ///
    /// # Errors
    ///
    /// - `Store(NotFound)`: no such user
    /// - `InvalidCredentials`: wrong password
    pub async fn login_user(
        &self,
        req: LoginUserRequest,
        client: ClientInfo,
        cancel: &CancellationToken,
    ) -> Result<LoginOutcome, UserError> {
        let username = req.username.clone();
        let user = run_in_transaction(self.store.as_ref(), cancel, move |tx| {
            Box::pin(async move { tx.get_user(&username).await })
        })
        .await?;

        check_password(req.password, user.hashed_password.clone()).await?;

        let (access_token, access_payload) = self
            .token_maker
            .create_token(&user.username, self.access_token_duration)?;
        let (refresh_token, refresh_payload) = self
            .token_maker
            .create_token(&user.username, self.refresh_token_duration)?;

        let params = CreateSessionParams {
            id: refresh_payload.id,
            username: user.username.clone(),
            refresh_token,
            user_agent: client.user_agent,
            client_ip: client.client_ip,
            is_blocked: false,
            expires_at: refresh_payload.expired_at,
        };
        let session = run_in_transaction(self.store.as_ref(), cancel, move |tx| {
            Box::pin(async move { tx.create_session(params).await })
        })
        .await?;

        tracing::info!(username = %user.username, session_id = %session.id, "user logged in");

        Ok(LoginOutcome {
            session,
            access_token,
            access_token_expires_at: access_payload.expired_at,
            user,
        })
    }

    /// Exchange a refresh token for a fresh access token.
    ///
    /// The session opened by the refresh token must exist, must not be
    /// blocked or expired, and must still hold exactly this token.
    pub async fn renew_access_token(
        &self,
        refresh_token: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, DateTime<Utc>), UserError> {
        let refresh_payload = self.token_maker.verify_token(refresh_token)?;

        let session_id = refresh_payload.id;
        let session = run_in_transaction(self.store.as_ref(), cancel, move |tx| {
            Box::pin(async move { tx.get_session(session_id).await })
        })
        .await?;

        if session.is_blocked {
            return Err(UserError::BlockedSession);
        }
        if session.username != refresh_payload.username {
            return Err(UserError::IncorrectSessionUser);
        }
        if session.refresh_token != refresh_token {
            return Err(UserError::MismatchedSessionToken);
        }
        if Utc::now() > session.expires_at {
            return Err(UserError::ExpiredSession);
        }

        let (access_token, access_payload) = self
            .token_maker
            .create_token(&refresh_payload.username, self.access_token_duration)?;
        Ok((access_token, access_payload.expired_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::token::JwtMaker;
    use std::time::Duration;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn service(store: &MemoryStore) -> UserService {
        UserService::new(
            Arc::new(store.clone()),
            Arc::new(JwtMaker::new(SECRET).unwrap()),
            chrono::Duration::minutes(15),
            chrono::Duration::hours(24),
        )
    }

    fn register(username: &str) -> CreateUserRequest {
        CreateUserRequest {
            username: username.to_string(),
            password: "secret123".to_string(),
            full_name: "Alice Example".to_string(),
            email: format!("{username}@example.com"),
        }
    }

    fn login(username: &str, password: &str) -> LoginUserRequest {
        LoginUserRequest {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    async fn open_session(
        store: &MemoryStore,
        username: &str,
        mutate: impl FnOnce(&mut CreateSessionParams),
    ) -> String {
        let maker = JwtMaker::new(SECRET).unwrap();
        let (token, payload) = maker.create_token(username, chrono::Duration::hours(1)).unwrap();
        let mut params = CreateSessionParams {
            id: payload.id,
            username: username.to_string(),
            refresh_token: token.clone(),
            user_agent: String::new(),
            client_ip: String::new(),
            is_blocked: false,
            expires_at: payload.expired_at,
        };
        mutate(&mut params);

        let store: &dyn Store = store;
        run_in_transaction(store, &CancellationToken::new(), move |tx| {
            Box::pin(async move { tx.create_session(params).await })
        })
        .await
        .unwrap();
        token
    }

    #[tokio::test]
    async fn password_hash_round_trip() {
        let hashed = hash_password("secret123".to_string()).await.unwrap();
        assert!(hashed.starts_with("$argon2"));
        assert!(check_password("secret123".to_string(), hashed.clone()).await.is_ok());
        assert!(matches!(
            check_password("wrong-password".to_string(), hashed.clone()).await,
            Err(UserError::InvalidCredentials)
        ));
        assert_ne!(hashed, hash_password("secret123".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn hashing_does_not_stall_the_runtime() {
        use std::time::Instant;

        // Single-threaded runtime: the second branch only runs first if the
        // hash yields instead of computing inline.
        let (hashed_at, ticked_at) = tokio::join!(
            async {
                hash_password("secret123".to_string()).await.unwrap();
                Instant::now()
            },
            async { Instant::now() },
        );
        assert!(ticked_at < hashed_at);

        let hashed = hash_password("secret123".to_string()).await.unwrap();
        let (checked_at, ticked_at) = tokio::join!(
            async {
                check_password("secret123".to_string(), hashed).await.unwrap();
                Instant::now()
            },
            async { Instant::now() },
        );
        assert!(ticked_at < checked_at);
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let store = MemoryStore::new(Duration::from_secs(1));
        let service = service(&store);
        let cancel = CancellationToken::new();

        let user = service.create_user(register("alice"), &cancel).await.unwrap();
        assert_eq!(user.username, "alice");
        assert_ne!(user.hashed_password, "secret123");

        let mut again = register("alice");
        again.email = "other@example.com".to_string();
        let err = service.create_user(again, &cancel).await.unwrap_err();
        assert!(matches!(err, UserError::Store(StoreError::ConstraintViolation(_))));
    }

    #[tokio::test]
    async fn login_opens_session_and_renews() {
        let store = MemoryStore::new(Duration::from_secs(1));
        let service = service(&store);
        let cancel = CancellationToken::new();
        service.create_user(register("bob"), &cancel).await.unwrap();

        let client = ClientInfo {
            user_agent: "curl/8".to_string(),
            client_ip: "127.0.0.1".to_string(),
        };
        let outcome = service
            .login_user(login("bob", "secret123"), client, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.user.username, "bob");
        assert_eq!(outcome.session.username, "bob");
        assert_eq!(outcome.session.user_agent, "curl/8");
        assert!(!outcome.session.is_blocked);
        assert!(outcome.access_token_expires_at < outcome.session.expires_at);

        let (access_token, expires_at) = service
            .renew_access_token(&outcome.session.refresh_token, &cancel)
            .await
            .unwrap();
        assert!(expires_at > Utc::now());
        let maker = JwtMaker::new(SECRET).unwrap();
        assert_eq!(maker.verify_token(&access_token).unwrap().username, "bob");
    }

    #[tokio::test]
    async fn login_failures() {
        let store = MemoryStore::new(Duration::from_secs(1));
        let service = service(&store);
        let cancel = CancellationToken::new();
        service.create_user(register("carol"), &cancel).await.unwrap();

        let err = service
            .login_user(login("carol", "not-it"), ClientInfo::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::InvalidCredentials));

        let err = service
            .login_user(login("nobody", "secret123"), ClientInfo::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::Store(StoreError::NotFound { entity: "user", .. })));
    }

    #[tokio::test]
    async fn renew_rejects_bad_sessions() {
        let store = MemoryStore::new(Duration::from_secs(1));
        let service = service(&store);
        let cancel = CancellationToken::new();
        service.create_user(register("dave"), &cancel).await.unwrap();
        service.create_user(register("erin"), &cancel).await.unwrap();

        let blocked = open_session(&store, "dave", |p| p.is_blocked = true).await;
        assert!(matches!(
            service.renew_access_token(&blocked, &cancel).await,
            Err(UserError::BlockedSession)
        ));

        let foreign = open_session(&store, "dave", |p| p.username = "erin".to_string()).await;
        assert!(matches!(
            service.renew_access_token(&foreign, &cancel).await,
            Err(UserError::IncorrectSessionUser)
        ));

        let rotated = open_session(&store, "dave", |p| p.refresh_token = "stale".to_string()).await;
        assert!(matches!(
            service.renew_access_token(&rotated, &cancel).await,
            Err(UserError::MismatchedSessionToken)
        ));

        let expired = open_session(&store, "dave", |p| {
            p.expires_at = Utc::now() - chrono::Duration::minutes(1)
        })
        .await;
        assert!(matches!(
            service.renew_access_token(&expired, &cancel).await,
            Err(UserError::ExpiredSession)
        ));

        // An access token never opened a session.
        let outcome = service
            .login_user(login("dave", "secret123"), ClientInfo::default(), &cancel)
            .await
            .unwrap();
        assert!(matches!(
            service.renew_access_token(&outcome.access_token, &cancel).await,
            Err(UserError::Store(StoreError::NotFound { entity: "session", .. }))
        ));

        assert!(matches!(
            service.renew_access_token("garbage", &cancel).await,
            Err(UserError::Token(TokenError::InvalidToken))
        ));
    }
}
