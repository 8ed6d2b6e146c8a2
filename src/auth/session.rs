use std::sync::Arc;

use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, instrument, warn};

use crate::models::USERS_COLLECTION;
use crate::state::Portal;
use crate::store::RecordStore;

use super::{Identity, IdentityGateway, Role};

pub const SESSION_COOKIE: &str = "session_token";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub identity: Option<Identity>,
    pub role: Option<Role>,
    pub is_resolving: bool,
}

impl Session {
    pub fn resolving() -> Self {
        Self {
            identity: None,
            role: None,
            is_resolving: true,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            identity: None,
            role: None,
            is_resolving: false,
        }
    }

    pub fn authenticated(identity: Identity, role: Role) -> Self {
        Self {
            identity: Some(identity),
            role: Some(role),
            is_resolving: false,
        }
    }
}

/// Stored under `users/<uid>`, written at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDocument {
    pub email: String,
    pub role: String,
    pub created_at: String,
}

/// Maps an identity to a session by looking up its role document.
#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn RecordStore>,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// A missing, unreadable or unrecognised role document yields an
    /// anonymous session even when the identity itself is valid.
    #[instrument(skip_all, fields(uid = identity.as_ref().map(|i| i.uid.as_str())))]
    pub async fn resolve(&self, identity: Option<Identity>) -> Session {
        let Some(identity) = identity else {
            return Session::anonymous();
        };

        let document = match self.store.get_by_id(USERS_COLLECTION, &identity.uid).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                warn!("No role document for identity");
                return Session::anonymous();
            }
            Err(err) => {
                err.log_and_record("Fetching role document");
                return Session::anonymous();
            }
        };

        match document
            .decode::<RoleDocument>()
            .and_then(|doc| doc.role.parse::<Role>())
        {
            Ok(role) => {
                debug!(role = %role, "Session resolved");
                Session::authenticated(identity, role)
            }
            Err(err) => {
                err.log_and_record("Reading role document");
                Session::anonymous()
            }
        }
    }

    /// Follows one gateway session, the way a single browser tab would.
    /// Resolves the identity behind `token`, then re-resolves whenever that
    /// same session changes; other sessions' changes are ignored. The spawned
    /// task is the only writer and stops once the session has signed out.
    pub fn follow(self, gateway: Arc<dyn IdentityGateway>, token: Option<String>) -> SessionWatch {
        let (sender, receiver) = watch::channel(Session::resolving());
        let mut subscription = gateway.subscribe();

        let task = tokio::spawn(
            async move {
                let Some(token) = token else {
                    sender.send_replace(Session::anonymous());
                    return;
                };

                let initial = match gateway.current_identity(&token).await {
                    Ok(identity) => identity,
                    Err(err) => {
                        err.log_and_record("Resolving followed session");
                        None
                    }
                };
                let signed_in = initial.is_some();
                sender.send_replace(self.resolve(initial).await);

                if signed_in {
                    while let Some(change) = subscription.next().await {
                        if change.token != token {
                            continue;
                        }

                        let signed_out = change.identity.is_none();
                        if sender.send(self.resolve(change.identity).await).is_err() || signed_out {
                            break;
                        }
                    }
                }

                subscription.unsubscribe();
            }
            .instrument(tracing::info_span!("session_follow")),
        );

        SessionWatch { receiver, task }
    }
}

/// Read side of a followed session. Dropping it stops the resolver task and
/// releases the identity subscription.
pub struct SessionWatch {
    receiver: watch::Receiver<Session>,
    task: JoinHandle<()>,
}

impl SessionWatch {
    pub fn current(&self) -> Session {
        self.receiver.borrow().clone()
    }

    pub fn receiver(&self) -> watch::Receiver<Session> {
        self.receiver.clone()
    }

    /// Waits for the next published session; `None` if the resolver has
    /// stopped.
    pub async fn changed(&mut self) -> Option<Session> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Waits until the session satisfies `predicate`; `None` if the resolver
    /// has stopped.
    pub async fn wait_for(&mut self, predicate: impl FnMut(&Session) -> bool) -> Option<Session> {
        self.receiver
            .wait_for(predicate)
            .await
            .map(|session| Session::clone(&session))
            .ok()
    }

    pub fn shutdown(self) {}
}

impl Drop for SessionWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Session {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let portal = match request.rocket().state::<Portal>() {
            Some(portal) => portal,
            None => {
                error!("Portal not found in managed state");
                return Outcome::Error((Status::InternalServerError, ()));
            }
        };

        let session = request
            .local_cache_async(
                async {
                    let token = request
                        .cookies()
                        .get_private(SESSION_COOKIE)
                        .map(|c| c.value().to_string());

                    let identity = match token {
                        Some(token) => match portal.identity.current_identity(&token).await {
                            Ok(identity) => identity,
                            Err(err) => {
                                err.log_and_record("Resolving session token");
                                None
                            }
                        },
                        None => None,
                    };

                    portal.resolver().resolve(identity).await
                }
                .instrument(tracing::info_span!("session_guard")),
            )
            .await;

        Outcome::Success(session.clone())
    }
}
