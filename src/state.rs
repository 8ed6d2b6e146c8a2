use std::sync::Arc;

use chrono::Utc;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

use crate::auth::{
    IdentityGateway, Role, RoleDocument, SessionResolver, SignedIn, SqliteIdentityGateway,
};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::models::USERS_COLLECTION;
use crate::repository::MarksRepository;
use crate::store::{RecordStore, SqliteRecordStore, to_body};

/// Everything a request needs: the two external collaborators behind their
/// traits, plus configuration.
#[derive(Clone)]
pub struct Portal {
    pub identity: Arc<dyn IdentityGateway>,
    pub store: Arc<dyn RecordStore>,
    pub config: AppConfig,
}

impl Portal {
    pub fn sqlite(pool: Pool<Sqlite>, config: AppConfig) -> Self {
        Self {
            identity: Arc::new(SqliteIdentityGateway::new(pool.clone(), &config)),
            store: Arc::new(SqliteRecordStore::new(pool)),
            config,
        }
    }

    pub fn marks(&self) -> MarksRepository {
        MarksRepository::new(self.store.clone())
    }

    pub fn resolver(&self) -> SessionResolver {
        SessionResolver::new(self.store.clone())
    }

    /// Creates the identity and its role document. The new identity is
    /// signed in.
    #[instrument(skip(self, password))]
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<SignedIn, AppError> {
        let signed_in = self.identity.register(email, password).await?;

        let document = RoleDocument {
            email: email.to_string(),
            role: role.as_str().to_lowercase(),
            created_at: Utc::now().to_rfc3339(),
        };

        self.store
            .put(USERS_COLLECTION, &signed_in.identity.uid, to_body(&document)?)
            .await?;

        info!(uid = %signed_in.identity.uid, "Registered user");
        Ok(signed_in)
    }

    /// Signs in and checks the stored role against the one the user picked.
    /// On any failure after the credentials were accepted the fresh session
    /// is discarded.
    #[instrument(skip(self, password))]
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
        selected_role: &str,
    ) -> Result<(SignedIn, Role), AppError> {
        let signed_in = self.identity.sign_in(email, password).await?;

        match self.stored_role(&signed_in, selected_role).await {
            Ok(role) => Ok((signed_in, role)),
            Err(err) => {
                if let Err(sign_out_err) = self.identity.sign_out(&signed_in.token).await {
                    sign_out_err.log_and_record("Discarding rejected session");
                }
                Err(err)
            }
        }
    }

    async fn stored_role(&self, signed_in: &SignedIn, selected_role: &str) -> Result<Role, AppError> {
        let document = self
            .store
            .get_by_id(USERS_COLLECTION, &signed_in.identity.uid)
            .await?
            .ok_or_else(|| AppError::NotFound("User profile not found.".to_string()))?;

        let stored = document.decode::<RoleDocument>()?.role.to_lowercase();
        let selected = selected_role.to_lowercase();

        if stored != selected {
            warn!(stored = %stored, selected = %selected, "Role mismatch at sign-in");
            return Err(AppError::Authorization(format!(
                "You're registered as a {}, not a {}",
                stored, selected
            )));
        }

        stored
            .parse::<Role>()
            .map_err(|_| AppError::Authorization("Invalid user role".to_string()))
    }
}
