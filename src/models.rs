use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Administrator,
    Teacher,
    Student,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Administrator, Role::Teacher, Role::Student];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Administrator => "administrator",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unrecognized role `{}`", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "lab_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LabStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for LabStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LabStatus::Pending => "pending",
            LabStatus::Approved => "approved",
            LabStatus::Rejected => "rejected",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "progress_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserSession {
    pub ssid: String,
    pub belongs_to: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Subject {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Class {
    pub id: i64,
    pub name: String,
    pub capacity: i32,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewClass {
    pub name: String,
    pub capacity: i32,
    pub description: Option<String>,
}

/// A subject carried by a class, optionally taught by one teacher.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ClassSubject {
    pub class_id: i64,
    pub subject_id: i64,
    pub teacher_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Lab {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub objectives: Option<String>,
    pub resources: Option<String>,
    pub duration_hours: Option<f64>,
    pub subject_id: i64,
    pub creator_id: i64,
    pub status: LabStatus,
    pub admin_comment: Option<String>,
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

/// Teacher-owned part of a lab.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabContent {
    pub title: Option<String>,
    pub description: Option<String>,
    pub objectives: Option<String>,
    pub resources: Option<String>,
    pub duration_hours: Option<f64>,
    pub subject_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewLab {
    pub title: String,
    pub description: Option<String>,
    pub objectives: Option<String>,
    pub resources: Option<String>,
    pub duration_hours: Option<f64>,
    pub subject_id: i64,
    pub creator_id: i64,
    pub status: LabStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabFilter {
    pub status: Option<LabStatus>,
    pub subject_id: Option<i64>,
}

impl LabFilter {
    pub fn matches(&self, lab: &Lab) -> bool {
        self.status.map_or(true, |status| lab.status == status)
            && self.subject_id.map_or(true, |subject| lab.subject_id == subject)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct LabProgress {
    pub student_id: i64,
    pub lab_id: i64,
    pub status: ProgressStatus,
    pub score: Option<f64>,
    pub comments: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
