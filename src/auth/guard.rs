use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::response::Redirect;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde_json::{Value, json};
use tracing::warn;

use super::{Identity, Role, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Loading,
    RedirectToSignIn,
    Granted,
}

/// Wrong role and no sign-in are deliberately indistinguishable here.
pub fn check(session: &Session, required: Option<Role>) -> Access {
    if session.is_resolving {
        return Access::Loading;
    }

    if session.identity.is_none() {
        return Access::RedirectToSignIn;
    }

    match required {
        Some(role) if session.role != Some(role) => Access::RedirectToSignIn,
        _ => Access::Granted,
    }
}

async fn guarded(request: &Request<'_>, required: Role) -> Outcome<Identity, ()> {
    let session = match request.guard::<Session>().await {
        Outcome::Success(session) => session,
        Outcome::Error(e) => return Outcome::Error(e),
        Outcome::Forward(status) => return Outcome::Forward(status),
    };

    match check(&session, Some(required)) {
        Access::Granted => match session.identity {
            Some(identity) => Outcome::Success(identity),
            None => Outcome::Error((Status::Unauthorized, ())),
        },
        Access::RedirectToSignIn => {
            warn!(
                required = %required,
                role = ?session.role,
                uri = %request.uri(),
                "Access denied"
            );
            Outcome::Error((Status::Unauthorized, ()))
        }
        Access::Loading => Outcome::Error((Status::ServiceUnavailable, ())),
    }
}

/// A signed-in identity whose stored role is `teacher`.
pub struct TeacherSession(pub Identity);

/// A signed-in identity whose stored role is `student`.
pub struct StudentSession(pub Identity);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for TeacherSession {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        guarded(request, Role::Teacher).await.map(TeacherSession)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for StudentSession {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        guarded(request, Role::Student).await.map(StudentSession)
    }
}

#[catch(401)]
pub fn unauthorized(_req: &Request) -> Redirect {
    Redirect::to("/")
}

#[catch(401)]
pub fn unauthorized_api(_req: &Request) -> Custom<Json<Value>> {
    let error_json = json!({
        "success": false,
        "error": "Authentication required"
    });

    Custom(Status::Unauthorized, Json(error_json))
}
