//! Lab lifecycle.
//!
//! A lab enters as `pending` and leaves that state only through an
//! administrator's decision. Every legal status change is a row of
//! [`TRANSITIONS`]; nothing else in the crate compares statuses to decide
//! whether a change is allowed.
//!
//! Content fields belong to the creating teacher and may change while the
//! lab is `pending` or `rejected`. Once approved the content is frozen.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::err::Error;
use crate::models::{Lab, LabContent, LabStatus, NewLab, Role, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentRule {
    /// A supplied comment replaces the stored one, otherwise it is kept.
    Optional,
    /// The lab must end up with a non-empty comment.
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: LabStatus,
    pub to: LabStatus,
    pub actor: Role,
    pub comment: CommentRule,
}

const fn row(from: LabStatus, to: LabStatus, comment: CommentRule) -> Transition {
    Transition {
        from,
        to,
        actor: Role::Administrator,
        comment,
    }
}

/// The transition table. Rows with `from == to` re-assert a decision
/// without changing it; `pending -> pending` is deliberately absent.
pub static TRANSITIONS: [Transition; 5] = [
    row(LabStatus::Pending, LabStatus::Approved, CommentRule::Optional),
    row(LabStatus::Pending, LabStatus::Rejected, CommentRule::Required),
    row(LabStatus::Rejected, LabStatus::Approved, CommentRule::Optional),
    row(LabStatus::Approved, LabStatus::Approved, CommentRule::Optional),
    row(LabStatus::Rejected, LabStatus::Rejected, CommentRule::Required),
];

pub fn lookup(from: LabStatus, to: LabStatus) -> Option<&'static Transition> {
    TRANSITIONS.iter().find(|t| t.from == from && t.to == to)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("cannot move a lab from `{from}` to `{to}`")]
    InvalidTransition { from: LabStatus, to: LabStatus },
    #[error("rejecting a lab requires a non-empty admin_comment")]
    MissingComment,
    #[error("role `{0}` may not change the status of a lab")]
    NotAuthorized(Role),
    #[error("only the teacher who created the lab may change its content")]
    NotCreator,
    #[error("only teachers create labs")]
    NotTeacher,
    #[error("the content of an approved lab is frozen")]
    ContentFrozen,
    #[error("`{0}` is required")]
    MissingField(&'static str),
    #[error("{0}")]
    InvalidContent(String),
    #[error("lab already has an attachment named `{0}`")]
    DuplicateFile(String),
}

impl From<LifecycleError> for Error {
    fn from(err: LifecycleError) -> Self {
        let message = err.to_string();
        match err {
            LifecycleError::InvalidTransition { from, to } => {
                Error::InvalidTransition { from, to, message }
            }
            LifecycleError::MissingComment => Error::MissingRequiredField {
                field: "admin_comment",
                message,
            },
            LifecycleError::MissingField(field) => Error::MissingRequiredField { field, message },
            LifecycleError::NotAuthorized(_)
            | LifecycleError::NotCreator
            | LifecycleError::NotTeacher => Error::Forbidden {
                message,
                redirect: None,
            },
            LifecycleError::ContentFrozen | LifecycleError::DuplicateFile(_) => {
                Error::Conflict { message }
            }
            LifecycleError::InvalidContent(_) => Error::InvalidPayload { message },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusChange {
    pub status: LabStatus,
    pub admin_comment: Option<String>,
}

fn non_empty(comment: Option<&str>) -> Option<&str> {
    comment.map(str::trim).filter(|c| !c.is_empty())
}

/// Checks `change` against the table and returns the lab as it should be stored.
///
/// Legality of the status pair is checked before the actor, so an illegal
/// pair reports `InvalidTransition` whoever asks.
pub fn change_status(
    lab: &Lab,
    actor: Role,
    change: &StatusChange,
    now: DateTime<Utc>,
) -> Result<Lab, LifecycleError> {
    let transition = lookup(lab.status, change.status).ok_or(LifecycleError::InvalidTransition {
        from: lab.status,
        to: change.status,
    })?;
    if actor != transition.actor {
        return Err(LifecycleError::NotAuthorized(actor));
    }

    let supplied = change.admin_comment.as_deref();
    let admin_comment = match transition.comment {
        CommentRule::Optional => non_empty(supplied)
            .map(str::to_string)
            .or_else(|| lab.admin_comment.clone()),
        CommentRule::Required => {
            let effective = match supplied {
                Some(comment) => non_empty(Some(comment)),
                None => non_empty(lab.admin_comment.as_deref()),
            };
            Some(effective.ok_or(LifecycleError::MissingComment)?.to_string())
        }
    };

    let mut updated = lab.clone();
    updated.status = transition.to;
    updated.admin_comment = admin_comment;
    if transition.to == LabStatus::Approved && transition.from != LabStatus::Approved {
        updated.approved_at = Some(now);
    }
    Ok(updated)
}

/// Whether the reject control may be offered for the given comment draft.
pub fn can_submit_rejection(draft: &str) -> bool {
    non_empty(Some(draft)).is_some()
}

pub fn is_editable(status: LabStatus) -> bool {
    matches!(status, LabStatus::Pending | LabStatus::Rejected)
}

pub fn editable_by(lab: &Lab, user: &User) -> bool {
    lab.creator_id == user.id && is_editable(lab.status)
}

pub fn ensure_editable(lab: &Lab, editor: &User) -> Result<(), LifecycleError> {
    if lab.creator_id != editor.id {
        return Err(LifecycleError::NotCreator);
    }
    if !is_editable(lab.status) {
        return Err(LifecycleError::ContentFrozen);
    }
    Ok(())
}

fn required_title(title: Option<String>) -> Result<String, LifecycleError> {
    match title.map(|t| t.trim().to_string()) {
        Some(title) if !title.is_empty() => Ok(title),
        _ => Err(LifecycleError::MissingField("title")),
    }
}

fn check_duration(duration: Option<f64>) -> Result<(), LifecycleError> {
    match duration {
        Some(hours) if !(hours.is_finite() && hours > 0.0) => Err(LifecycleError::InvalidContent(
            "`duration_hours` must be a positive number".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Builds the row for a freshly authored lab. The status is always `pending`.
pub fn new_lab(content: LabContent, creator: &User, now: DateTime<Utc>) -> Result<NewLab, LifecycleError> {
    if creator.role != Role::Teacher {
        return Err(LifecycleError::NotTeacher);
    }
    let title = required_title(content.title)?;
    let subject_id = content.subject_id.ok_or(LifecycleError::MissingField("subject_id"))?;
    check_duration(content.duration_hours)?;
    Ok(NewLab {
        title,
        description: content.description,
        objectives: content.objectives,
        resources: content.resources,
        duration_hours: content.duration_hours,
        subject_id,
        creator_id: creator.id,
        status: LabStatus::Pending,
        created_at: now,
    })
}

/// Applies a content edit. Status and admin_comment are never touched.
pub fn edit_content(lab: &Lab, editor: &User, content: LabContent) -> Result<Lab, LifecycleError> {
    ensure_editable(lab, editor)?;
    check_duration(content.duration_hours)?;
    let mut updated = lab.clone();
    if content.title.is_some() {
        updated.title = required_title(content.title)?;
    }
    if let Some(subject_id) = content.subject_id {
        updated.subject_id = subject_id;
    }
    if content.description.is_some() {
        updated.description = content.description;
    }
    if content.objectives.is_some() {
        updated.objectives = content.objectives;
    }
    if content.resources.is_some() {
        updated.resources = content.resources;
    }
    if content.duration_hours.is_some() {
        updated.duration_hours = content.duration_hours;
    }
    Ok(updated)
}

pub fn attach_file(lab: &Lab, editor: &User, name: &str) -> Result<Lab, LifecycleError> {
    ensure_editable(lab, editor)?;
    if lab.files.iter().any(|f| f == name) {
        return Err(LifecycleError::DuplicateFile(name.to_string()));
    }
    let mut updated = lab.clone();
    updated.files.push(name.to_string());
    Ok(updated)
}

/// Who is looking at a lab, with whatever context their role needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Viewer {
    Administrator,
    Teacher { id: i64 },
    /// Subjects carried by the classes the student is enrolled in.
    Student { subjects: BTreeSet<i64> },
}

pub fn visible_to_students(lab: &Lab) -> bool {
    lab.status == LabStatus::Approved
}

pub fn visible_to(lab: &Lab, viewer: &Viewer) -> bool {
    match viewer {
        Viewer::Administrator => true,
        Viewer::Teacher { id } => lab.creator_id == *id || visible_to_students(lab),
        Viewer::Student { subjects } => visible_to_students(lab) && subjects.contains(&lab.subject_id),
    }
}
