//! Authorization gate.
//!
//! Decides, for one request or navigation, whether a session may proceed and
//! where to send it otherwise. The decision is a pure function of the session
//! and the allowed roles, so it is recomputed on every request and never
//! cached: a token can expire or be revoked between two calls.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::err::Error;
use crate::models::Role;

/// The caller's credentials as far as the gate is concerned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    token: Option<String>,
    role: Option<String>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn new<T: Into<String>, R: Into<String>>(token: T, role: R) -> Self {
        Self {
            token: Some(token.into()),
            role: Some(role.into()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.as_deref().map_or(false, |token| !token.is_empty())
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|_| self.is_authenticated())
    }

    /// Raw role string. Only meaningful while a token is present.
    pub fn role(&self) -> Option<&str> {
        if self.is_authenticated() {
            self.role.as_deref()
        } else {
            None
        }
    }

    /// The role, if it is one the platform knows.
    pub fn known_role(&self) -> Option<Role> {
        self.role().and_then(|role| Role::from_str(role).ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectTarget {
    Login,
    AdminHome,
    TeacherHome,
    StudentHome,
    PublicHome,
}

const ROLE_HOMES: [(Role, RedirectTarget); 3] = [
    (Role::Administrator, RedirectTarget::AdminHome),
    (Role::Teacher, RedirectTarget::TeacherHome),
    (Role::Student, RedirectTarget::StudentHome),
];

/// Where a session holding `role` belongs. Unknown roles land on the public root.
pub fn home_of(role: Option<&str>) -> RedirectTarget {
    role.and_then(|role| Role::from_str(role).ok())
        .and_then(|role| ROLE_HOMES.iter().find(|(r, _)| *r == role))
        .map_or(RedirectTarget::PublicHome, |(_, home)| *home)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    DenyUnauthenticated,
    DenyWrongRole(RedirectTarget),
}

impl GateDecision {
    pub fn redirect(&self) -> Option<RedirectTarget> {
        match self {
            GateDecision::Allow => None,
            GateDecision::DenyUnauthenticated => Some(RedirectTarget::Login),
            GateDecision::DenyWrongRole(target) => Some(*target),
        }
    }
}

/// An empty `allowed` slice admits any authenticated role.
pub fn evaluate(session: &Session, allowed: &[Role]) -> GateDecision {
    if !session.is_authenticated() {
        return GateDecision::DenyUnauthenticated;
    }
    if allowed.is_empty() {
        return GateDecision::Allow;
    }
    match session.known_role() {
        Some(role) if allowed.contains(&role) => GateDecision::Allow,
        _ => GateDecision::DenyWrongRole(home_of(session.role())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutePaths {
    pub login: String,
    pub public_home: String,
    pub admin_home: String,
    pub teacher_home: String,
    pub student_home: String,
}

impl Default for RoutePaths {
    fn default() -> Self {
        Self {
            login: "/login".to_string(),
            public_home: "/".to_string(),
            admin_home: "/admin/dashboard".to_string(),
            teacher_home: "/teacher/dashboard".to_string(),
            student_home: "/student/dashboard".to_string(),
        }
    }
}

impl RoutePaths {
    pub fn resolve(&self, target: RedirectTarget) -> &str {
        match target {
            RedirectTarget::Login => &self.login,
            RedirectTarget::AdminHome => &self.admin_home,
            RedirectTarget::TeacherHome => &self.teacher_home,
            RedirectTarget::StudentHome => &self.student_home,
            RedirectTarget::PublicHome => &self.public_home,
        }
    }

    /// Protected views and the roles allowed to open them.
    pub fn views(&self) -> [(&str, &'static [Role]); 4] {
        [
            (self.admin_home.as_str(), &[Role::Administrator]),
            (self.teacher_home.as_str(), &[Role::Teacher]),
            (self.student_home.as_str(), &[Role::Student]),
            ("/profile", &[]),
        ]
    }

    pub fn view(&self, path: &str) -> Option<&'static [Role]> {
        self.views()
            .into_iter()
            .find(|(view, _)| *view == path)
            .map(|(_, roles)| roles)
    }
}

/// Runs the gate and turns a denial into the matching API error.
pub fn require(session: &Session, allowed: &[Role], paths: &RoutePaths) -> Result<(), Error> {
    match evaluate(session, allowed) {
        GateDecision::Allow => Ok(()),
        GateDecision::DenyUnauthenticated => Err(Error::Unauthenticated {
            message: "Authentication token is missing or expired".to_string(),
            redirect: paths.login.clone(),
        }),
        GateDecision::DenyWrongRole(home) => Err(Error::Forbidden {
            message: format!(
                "Role `{}` may not access this resource",
                session.role().unwrap_or("unknown")
            ),
            redirect: Some(paths.resolve(home).to_string()),
        }),
    }
}
