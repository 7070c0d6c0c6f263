//! Access gating for handlers.
//!
//! Each guard is a pure decision over already-loaded data returning
//! [`Access`]; the async helpers load the session user and organization
//! and then apply the pure checks in order.

use actix_identity::Identity;
use actix_session::Session;
use actix_web::HttpResponse;

use crate::{
    db,
    errors::AppError,
    flash::{self, FlashMessage},
    structs::{Organization, User},
    utils::see_other,
    AppState,
};

pub const LOGIN_PATH: &str = "/login";
pub const HOME_PATH: &str = "/home";
pub const ONBOARD_PATH: &str = "/home/onboard";

pub const ONBOARD_REQUIRED_MESSAGE: &str =
    "Please complete your onboarding steps to continue forward.";
pub const ALREADY_ONBOARDED_MESSAGE: &str =
    "You have already onboarded. If you need more help, please contact our support.";

#[derive(Debug, Clone, PartialEq)]
pub enum Access<T> {
    Granted(T),
    Redirect {
        location: &'static str,
        flash: Option<FlashMessage>,
    },
}

impl<T> Access<T> {
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Access<U>) -> Access<U> {
        match self {
            Access::Granted(value) => f(value),
            Access::Redirect { location, flash } => Access::Redirect { location, flash },
        }
    }

    /// The granted value, or the redirect response with its flash queued.
    pub fn resolve(self, session: &Session) -> Result<T, HttpResponse> {
        match self {
            Access::Granted(value) => Ok(value),
            Access::Redirect { location, flash } => {
                if let Some(message) = flash {
                    if let Err(e) = flash::push(session, message) {
                        log::warn!("Could not queue flash message: {}", e);
                    }
                }
                log::debug!("Access redirected to {}", location);
                Err(see_other(location))
            }
        }
    }
}

/// An onboarded user together with their organization.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub user: User,
    pub organization: Organization,
}

pub fn require_login(user: Option<User>) -> Access<User> {
    match user {
        Some(user) => Access::Granted(user),
        None => Access::Redirect {
            location: LOGIN_PATH,
            flash: None,
        },
    }
}

pub fn require_onboarded(user: User, organization: Option<Organization>) -> Access<Member> {
    match organization {
        Some(organization) if user.organization_id == Some(organization.id) => {
            Access::Granted(Member { user, organization })
        }
        _ => Access::Redirect {
            location: ONBOARD_PATH,
            flash: Some(FlashMessage::error(ONBOARD_REQUIRED_MESSAGE)),
        },
    }
}

pub fn require_onboard_pending(user: User) -> Access<User> {
    if user.is_onboarded() {
        Access::Redirect {
            location: HOME_PATH,
            flash: Some(FlashMessage::error(ALREADY_ONBOARDED_MESSAGE)),
        }
    } else {
        Access::Granted(user)
    }
}

/// Loads the user behind the session identity, if any.
pub async fn current_user(
    state: &AppState,
    identity: Option<Identity>,
) -> Result<Option<User>, AppError> {
    let Some(identity) = identity else {
        return Ok(None);
    };
    let id = identity
        .id()
        .map_err(|e| AppError::IdentityError(e.to_string()))?;
    let Ok(user_id) = id.parse::<i64>() else {
        log::warn!("Session carries a non-numeric identity: {}", id);
        identity.logout();
        return Ok(None);
    };
    Ok(db::get_user_by_id(state, user_id).await?)
}

pub async fn logged_in(
    state: &AppState,
    identity: Option<Identity>,
) -> Result<Access<User>, AppError> {
    Ok(require_login(current_user(state, identity).await?))
}

pub async fn onboarded(
    state: &AppState,
    identity: Option<Identity>,
) -> Result<Access<Member>, AppError> {
    match logged_in(state, identity).await? {
        Access::Granted(user) => {
            let organization = match user.organization_id {
                Some(id) => db::get_organization_by_id(state, id).await?,
                None => None,
            };
            Ok(require_onboarded(user, organization))
        }
        Access::Redirect { location, flash } => Ok(Access::Redirect { location, flash }),
    }
}

pub async fn onboard_pending(
    state: &AppState,
    identity: Option<Identity>,
) -> Result<Access<User>, AppError> {
    Ok(logged_in(state, identity).await?.and_then(require_onboard_pending))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(organization_id: Option<i64>) -> User {
        let now = Utc::now();
        User {
            id: 7,
            username: "medic".into(),
            email: "medic@example.org".into(),
            first_name: String::new(),
            last_name: String::new(),
            pwd_hash: String::new(),
            organization_id,
            timezone: "UTC".into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn organization(id: i64) -> Organization {
        Organization {
            id,
            name: "Mercy".into(),
            code: "code".into(),
            parent_id: None,
            is_provider: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_anonymous_is_sent_to_login() {
        assert_eq!(
            require_login(None),
            Access::Redirect {
                location: LOGIN_PATH,
                flash: None
            }
        );
    }

    #[test]
    fn test_unaffiliated_user_is_sent_to_onboarding() {
        let access = require_login(Some(user(None))).and_then(|u| require_onboarded(u, None));
        match access {
            Access::Redirect { location, flash } => {
                assert_eq!(location, ONBOARD_PATH);
                assert_eq!(flash, Some(FlashMessage::error(ONBOARD_REQUIRED_MESSAGE)));
            }
            Access::Granted(_) => panic!("unaffiliated user must not pass"),
        }
    }

    #[test]
    fn test_onboarded_user_passes_with_organization() {
        match require_onboarded(user(Some(3)), Some(organization(3))) {
            Access::Granted(member) => assert_eq!(member.organization.id, 3),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            require_onboarded(user(Some(3)), Some(organization(4))),
            Access::Redirect { .. }
        ));
    }

    #[test]
    fn test_onboarded_user_cannot_reonboard() {
        assert_eq!(
            require_onboard_pending(user(Some(1))),
            Access::Redirect {
                location: HOME_PATH,
                flash: Some(FlashMessage::error(ALREADY_ONBOARDED_MESSAGE)),
            }
        );
        assert!(matches!(require_onboard_pending(user(None)), Access::Granted(_)));
    }
}
