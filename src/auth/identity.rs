use chrono::{DateTime, Duration, Utc};
use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::AppError;

const INVALID_CREDENTIALS: &str = "Invalid email or password";
const NOTIFICATION_BUFFER: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub email: String,
}

/// Pushed to subscribers whenever a session opens (register, sign-in) or is
/// signed out. `token` names the session the change belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityChange {
    pub token: String,
    pub identity: Option<Identity>,
}

#[derive(Debug, Clone)]
pub struct SignedIn {
    pub identity: Identity,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// A live registration for identity-change notifications. Dropping it (or
/// calling [`IdentitySubscription::unsubscribe`]) deregisters.
pub struct IdentitySubscription {
    receiver: broadcast::Receiver<IdentityChange>,
}

impl IdentitySubscription {
    /// Waits for the next notification; `None` once the gateway is gone.
    pub async fn next(&mut self) -> Option<IdentityChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) => return Some(change),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Identity subscriber lagged, skipping stale notifications");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

#[rocket::async_trait]
pub trait IdentityGateway: Send + Sync {
    async fn register(&self, email: &str, password: &str) -> Result<SignedIn, AppError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<SignedIn, AppError>;

    async fn sign_out(&self, token: &str) -> Result<(), AppError>;

    /// The identity behind a session token, or `None` if the token is unknown
    /// or expired.
    async fn current_identity(&self, token: &str) -> Result<Option<Identity>, AppError>;

    fn subscribe(&self) -> IdentitySubscription;

    async fn purge_expired_sessions(&self) -> Result<u64, AppError>;
}

pub fn generate_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

#[derive(sqlx::FromRow)]
struct DbCredentials {
    uid: String,
    email: String,
    password_hash: String,
}

#[derive(sqlx::FromRow)]
struct DbIdentitySession {
    uid: String,
    email: String,
    expires_at: DateTime<Utc>,
}

pub struct SqliteIdentityGateway {
    pool: Pool<Sqlite>,
    notifier: broadcast::Sender<IdentityChange>,
    session_ttl: Duration,
    bcrypt_cost: u32,
}

impl SqliteIdentityGateway {
    pub fn new(pool: Pool<Sqlite>, config: &AppConfig) -> Self {
        let (notifier, _) = broadcast::channel(NOTIFICATION_BUFFER);

        Self {
            pool,
            notifier,
            session_ttl: Duration::hours(config.session_ttl_hours),
            bcrypt_cost: config.bcrypt_cost,
        }
    }

    fn publish(&self, token: &str, identity: Option<Identity>) {
        // Nobody listening is fine
        let _ = self.notifier.send(IdentityChange {
            token: token.to_string(),
            identity,
        });
    }

    async fn open_session(&self, identity: Identity) -> Result<SignedIn, AppError> {
        let token = generate_token();
        let now = Utc::now();
        let expires_at = now + self.session_ttl;

        sqlx::query(
            "INSERT INTO identity_sessions (token, uid, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&token)
        .bind(&identity.uid)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        self.publish(&token, Some(identity.clone()));

        Ok(SignedIn {
            identity,
            token,
            expires_at,
        })
    }
}

#[rocket::async_trait]
impl IdentityGateway for SqliteIdentityGateway {
    #[instrument(skip_all, fields(email = %email))]
    async fn register(&self, email: &str, password: &str) -> Result<SignedIn, AppError> {
        info!("Registering identity");

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT uid FROM identities WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;

        if existing.is_some() {
            return Err(AppError::Validation("Email already in use".to_string()));
        }

        let password_hash = bcrypt::hash(password, self.bcrypt_cost)?;
        let identity = Identity {
            uid: Uuid::new_v4().simple().to_string(),
            email: email.to_string(),
        };

        sqlx::query(
            "INSERT INTO identities (uid, email, password_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&identity.uid)
        .bind(&identity.email)
        .bind(password_hash)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.open_session(identity).await
    }

    #[instrument(skip_all, fields(email = %email))]
    async fn sign_in(&self, email: &str, password: &str) -> Result<SignedIn, AppError> {
        info!("Signing in");

        let credentials = sqlx::query_as::<_, DbCredentials>(
            "SELECT uid, email, password_hash FROM identities WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::Authentication(INVALID_CREDENTIALS.to_string()))?;

        match bcrypt::verify(password, &credentials.password_hash) {
            Ok(true) => {}
            _ => return Err(AppError::Authentication(INVALID_CREDENTIALS.to_string())),
        }

        self.open_session(Identity {
            uid: credentials.uid,
            email: credentials.email,
        })
        .await
    }

    #[instrument(skip_all)]
    async fn sign_out(&self, token: &str) -> Result<(), AppError> {
        info!("Signing out");
        sqlx::query("DELETE FROM identity_sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;

        self.publish(token, None);
        Ok(())
    }

    #[instrument(skip_all)]
    async fn current_identity(&self, token: &str) -> Result<Option<Identity>, AppError> {
        let row = sqlx::query_as::<_, DbIdentitySession>(
            "SELECT i.uid, i.email, s.expires_at
             FROM identity_sessions s
             JOIN identities i ON i.uid = s.uid
             WHERE s.token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(session) if session.expires_at > Utc::now() => Ok(Some(Identity {
                uid: session.uid,
                email: session.email,
            })),
            Some(_) => {
                debug!("Session token expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn subscribe(&self) -> IdentitySubscription {
        IdentitySubscription {
            receiver: self.notifier.subscribe(),
        }
    }

    #[instrument(skip_all)]
    async fn purge_expired_sessions(&self) -> Result<u64, AppError> {
        info!("Cleaning expired sessions");
        let result = sqlx::query("DELETE FROM identity_sessions WHERE expires_at <= ?")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
