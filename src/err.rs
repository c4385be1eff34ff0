#![allow(non_snake_case)]

use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;

use serde::Serialize;

use crate::models::LabStatus;

pub async fn handler404(path: Uri) -> Error {
    Error::NotFound {
        entity: "route",
        message: format!("Invalid path: {}", path),
    }
}

/// Wraps a successful response as `{"success": true, ...value}`.
pub fn Fine<V>(v: V) -> Success<V>
where
    V: Serialize,
{
    Success::of(v)
}

#[derive(Debug, Clone, Serialize)]
pub struct Success<V> {
    success: bool,
    #[serde(flatten)]
    value: V,
}

impl<V: Serialize> Success<V> {
    pub fn of(value: V) -> Self {
        Self {
            success: true,
            value,
        }
    }
}

/// Every failure the service reports. Serialized as `{"error": "<Variant>", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "error")]
pub enum Error {
    Unauthenticated {
        message: String,
        redirect: String,
    },
    AuthenticationFailure {
        message: String,
    },
    /// Role mismatch. `redirect` is the caller's own home view.
    Forbidden {
        message: String,
        redirect: Option<String>,
    },
    InvalidTransition {
        from: LabStatus,
        to: LabStatus,
        message: String,
    },
    MissingRequiredField {
        field: &'static str,
        message: String,
    },
    NotFound {
        entity: &'static str,
        message: String,
    },
    Conflict {
        message: String,
    },
    InvalidPayload {
        message: String,
    },
    InternalError {
        kind: &'static str,
        message: String,
    },
    Unknown {
        message: String,
    },
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl Error {
    pub fn unknown<S: Into<String>>(msg: S) -> Error {
        Error::Unknown {
            message: msg.into(),
        }
    }

    pub fn not_found<S: Into<String>>(entity: &'static str, msg: S) -> Error {
        Error::NotFound {
            entity,
            message: msg.into(),
        }
    }

    pub fn conflict<S: Into<String>>(msg: S) -> Error {
        Error::Conflict {
            message: msg.into(),
        }
    }

    pub fn invalid<S: Into<String>>(msg: S) -> Error {
        Error::InvalidPayload {
            message: msg.into(),
        }
    }

    pub fn forbidden<S: Into<String>>(msg: S) -> Error {
        Error::Forbidden {
            message: msg.into(),
            redirect: None,
        }
    }

    pub fn missing(field: &'static str) -> Error {
        Error::MissingRequiredField {
            field,
            message: format!("`{}` is required", field),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } | Error::AuthenticationFailure { .. } => {
                StatusCode::UNAUTHORIZED
            }
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::InvalidTransition { .. } | Error::MissingRequiredField { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Error::InvalidPayload { .. } => StatusCode::BAD_REQUEST,
            Error::InternalError { .. } | Error::Unknown { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(io: std::io::Error) -> Self {
        Self::InternalError {
            kind: "IOError",
            message: io.to_string(),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        log::error!("database error: {}", err);
        Self::InternalError {
            kind: "DatabaseError",
            message: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::InternalError {
            kind: "MigrationError",
            message: err.to_string(),
        }
    }
}

impl From<pbkdf2::password_hash::Error> for Error {
    fn from(err: pbkdf2::password_hash::Error) -> Self {
        Self::InternalError {
            kind: "PasswordHashError",
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::unknown(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_serialize_with_their_variant_tag() {
        let json = serde_json::to_value(Error::not_found("lab", "Lab `4` not found")).unwrap();
        assert_eq!(json["error"], "NotFound");
        assert_eq!(json["entity"], "lab");
        assert_eq!(json["message"], "Lab `4` not found");
    }

    #[test]
    fn success_envelope_flattens_the_value() {
        #[derive(Serialize)]
        struct Created {
            lab_id: i64,
        }
        let json = serde_json::to_value(Fine(Created { lab_id: 7 })).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["lab_id"], 7);
    }

    #[test]
    fn guard_violations_map_to_client_errors() {
        assert_eq!(Error::missing("admin_comment").status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(Error::conflict("full").status(), StatusCode::CONFLICT);
        assert_eq!(Error::forbidden("no").status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn unexpected_failures_surface_as_unknown() {
        let err = Error::from(anyhow::anyhow!("disk on fire"));
        assert!(err.status().is_server_error());
        let json = serde_json::to_value(err).unwrap();
        assert_eq!(json["error"], "Unknown");
        assert_eq!(json["message"], "disk on fire");
    }
}
