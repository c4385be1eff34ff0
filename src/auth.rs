use std::ops::Add;
use std::sync::Arc;

use axum::extract::{FromRequest, RequestParts};
use axum::headers::authorization::Bearer;
use axum::headers::Authorization;
use axum::{async_trait, Extension, Json, TypedHeader};
use chrono::{DateTime, Duration, Utc};
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::Pbkdf2;
use rand::{thread_rng, Rng};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Settings;
use crate::gate::{self, Session};
use crate::models::{NewUser, Role, User, UserSession};
use crate::store::Store;
use crate::{proceeds, AppState, Error, Payload};

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum AuthResult {
    Success(User),
    SessionExpired,
    InvalidSession,
}

pub fn hash_password(password: &str) -> Result<String, Error> {
    Ok(Pbkdf2
        .hash_password(password.as_bytes(), &SaltString::generate(&mut OsRng))?
        .to_string())
}

pub fn verify_password(password_hash: &str, password: &str) -> bool {
    PasswordHash::new(password_hash)
        .map(|hash| Pbkdf2.verify_password(password.as_bytes(), &hash).is_ok())
        .unwrap_or(false)
}

pub fn check_password_strength(password: &str) -> Result<(), Error> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::invalid(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// `local@domain.tld`, no whitespace.
pub fn check_email(email: &str) -> Result<(), Error> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(Error::invalid(format!("`{}` is not a valid email address", email)));
    }
    Ok(())
}

pub fn new_session_id() -> String {
    let ssid_bytes: [u8; 32] = thread_rng().gen();

    let mut hasher: Sha256 = Digest::new();
    hasher.update(ssid_bytes);
    hex::encode(hasher.finalize())
}

pub async fn ensure_authenticated(token: Option<&str>, store: &dyn Store) -> Result<AuthResult, Error> {
    let ssid = match token {
        Some(ssid) if !ssid.is_empty() => ssid,
        _ => return Ok(AuthResult::InvalidSession),
    };
    let session = match store.session_by_id(ssid).await? {
        Some(session) => session,
        None => return Ok(AuthResult::InvalidSession),
    };
    if Utc::now().gt(&session.expires_at) {
        store.delete_session(ssid).await?;
        log::debug!("purged expired session of user {}", session.belongs_to);
        return Ok(AuthResult::SessionExpired);
    }
    Ok(match store.user_by_id(session.belongs_to).await? {
        Some(user) => AuthResult::Success(user),
        None => AuthResult::InvalidSession,
    })
}

/// The authenticated (or anonymous) party behind a request.
pub struct Caller {
    pub session: Session,
    pub user: Option<User>,
    settings: Arc<Settings>,
}

impl Caller {
    /// Passes the request through the gate and hands back the user on success.
    pub fn require(&self, allowed: &[Role]) -> Result<&User, Error> {
        gate::require(&self.session, allowed, &self.settings.routes)?;
        self.user.as_ref().ok_or_else(|| Error::Unauthenticated {
            message: "Session has no user".to_string(),
            redirect: self.settings.routes.login.clone(),
        })
    }
}

#[async_trait]
impl<B> FromRequest<B> for Caller
where
    B: Send,
{
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let Extension(state) = Extension::<AppState>::from_request(req)
            .await
            .map_err(|err| Error::InternalError {
                kind: "ExtensionError",
                message: err.to_string(),
            })?;
        let bearer = TypedHeader::<Authorization<Bearer>>::from_request(req).await.ok();
        let token = bearer.as_ref().map(|TypedHeader(Authorization(b))| b.token());

        let (session, user) = match ensure_authenticated(token, state.store.as_ref()).await? {
            AuthResult::Success(user) => (
                Session::new(token.unwrap_or_default(), user.role.as_str()),
                Some(user),
            ),
            AuthResult::SessionExpired | AuthResult::InvalidSession => (Session::anonymous(), None),
        };
        Ok(Caller {
            session,
            user,
            settings: state.settings.clone(),
        })
    }
}

pub async fn register_user(
    Extension(state): Extension<AppState>,
    Json(body): Json<RegisterUser>,
) -> Payload<CreatedUser> {
    check_email(&body.email)?;
    check_password_strength(&body.password)?;
    let user = state
        .store
        .insert_user(NewUser {
            first_name: body.first_name,
            last_name: body.last_name,
            email: body.email,
            role: Role::Student,
            password_hash: hash_password(&body.password)?,
        })
        .await?;
    log::info!("registered student {} <{}>", user.id, user.email);
    proceeds(CreatedUser { user_id: user.id })
}

pub async fn login_user(
    Extension(state): Extension<AppState>,
    Json(login): Json<LoginUser>,
) -> Payload<LoggedInUser> {
    if login.email.is_empty() || login.password.is_empty() {
        return Err(Error::invalid("Authentication credentials are required"));
    }
    let user = match state.store.user_by_email(&login.email).await? {
        Some(user) if verify_password(&user.password_hash, &login.password) => user,
        _ => {
            log::warn!("failed login for <{}>", login.email);
            return Err(Error::AuthenticationFailure {
                message: "Invalid email or password".to_string(),
            });
        }
    };

    let expires_at = Utc::now().add(Duration::hours(state.settings.session_ttl_hours));
    let session = UserSession {
        ssid: new_session_id(),
        belongs_to: user.id,
        expires_at,
    };
    state.store.insert_session(&session).await?;
    log::info!("user {} logged in as {}", user.id, user.role);

    proceeds(LoggedInUser {
        token: session.ssid,
        expires_at,
        user,
    })
}

pub async fn logout_user(caller: Caller, Extension(state): Extension<AppState>) -> Payload<SessionDropped> {
    caller.require(&[])?;
    let drop_success = match caller.session.token() {
        Some(token) => state.store.delete_session(token).await?,
        None => false,
    };
    proceeds(SessionDropped { drop_success })
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDropped {
    pub drop_success: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggedInUser {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedUser {
    pub user_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginUser {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn passwords_verify_against_their_hash_only() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password(&hash, "correct horse"));
        assert!(!verify_password(&hash, "battery staple"));
        assert!(!verify_password("not a phc string", "correct horse"));
    }

    #[test]
    fn session_ids_are_hex_sha256() {
        let a = new_session_id();
        let b = new_session_id();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn email_and_password_rules() {
        assert!(check_email("ada@school.test").is_ok());
        for bad in ["ada", "@school.test", "ada@school", "ada@.test", "a da@school.test", "a@b@c.d"] {
            assert!(check_email(bad).is_err(), "{} accepted", bad);
        }
        assert!(check_password_strength("1234567").is_err());
        assert!(check_password_strength("12345678").is_ok());
    }

    #[tokio::test]
    async fn expired_sessions_are_purged() {
        let store = MemoryStore::new();
        let user = store
            .insert_user(NewUser {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                email: "ada@school.test".into(),
                role: Role::Teacher,
                password_hash: String::new(),
            })
            .await
            .unwrap();
        store
            .insert_session(&UserSession {
                ssid: "old".into(),
                belongs_to: user.id,
                expires_at: Utc::now() - Duration::hours(1),
            })
            .await
            .unwrap();
        store
            .insert_session(&UserSession {
                ssid: "fresh".into(),
                belongs_to: user.id,
                expires_at: Utc::now() + Duration::hours(1),
            })
            .await
            .unwrap();

        assert_eq!(
            ensure_authenticated(Some("old"), &store).await.unwrap(),
            AuthResult::SessionExpired
        );
        assert!(store.session_by_id("old").await.unwrap().is_none());
        assert_eq!(
            ensure_authenticated(Some("fresh"), &store).await.unwrap(),
            AuthResult::Success(user)
        );
        assert_eq!(
            ensure_authenticated(None, &store).await.unwrap(),
            AuthResult::InvalidSession
        );
        assert_eq!(
            ensure_authenticated(Some("missing"), &store).await.unwrap(),
            AuthResult::InvalidSession
        );
    }
}
