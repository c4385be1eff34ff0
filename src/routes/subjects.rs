use axum::extract::Path;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::auth::Caller;
use crate::models::{Role, Subject};
use crate::{proceeds, AppState, Error, Payload};

#[derive(Debug, Clone, Serialize)]
pub struct SubjectList {
    pub subjects: Vec<Subject>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectDeleted {
    pub subject_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubjectBody {
    pub name: Option<String>,
    pub description: Option<String>,
}

fn required_name(name: Option<String>) -> Result<String, Error> {
    match name.map(|n| n.trim().to_string()) {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(Error::missing("name")),
    }
}

pub async fn list_subjects(caller: Caller, Extension(state): Extension<AppState>) -> Payload<SubjectList> {
    caller.require(&[])?;
    proceeds(SubjectList {
        subjects: state.store.list_subjects().await?,
    })
}

pub async fn read_subject(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> Payload<Subject> {
    caller.require(&[])?;
    let subject = state
        .store
        .subject_by_id(id)
        .await?
        .ok_or_else(|| Error::not_found("subject", format!("Subject `{}` not found", id)))?;
    proceeds(subject)
}

pub async fn create_subject(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Json(body): Json<SubjectBody>,
) -> Payload<Subject> {
    caller.require(&[Role::Administrator, Role::Teacher])?;
    let name = required_name(body.name)?;
    let subject = state.store.insert_subject(&name, body.description).await?;
    log::info!("subject {} `{}` created", subject.id, subject.name);
    proceeds(subject)
}

pub async fn update_subject(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<SubjectBody>,
) -> Payload<Subject> {
    caller.require(&[Role::Administrator])?;
    let mut subject = state
        .store
        .subject_by_id(id)
        .await?
        .ok_or_else(|| Error::not_found("subject", format!("Subject `{}` not found", id)))?;
    subject.name = required_name(body.name)?;
    if body.description.is_some() {
        subject.description = body.description;
    }
    state.store.update_subject(&subject).await?;
    proceeds(subject)
}

pub async fn delete_subject(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> Payload<SubjectDeleted> {
    caller.require(&[Role::Administrator])?;
    if !state.store.delete_subject(id).await? {
        return Err(Error::not_found("subject", format!("Subject `{}` not found", id)));
    }
    proceeds(SubjectDeleted { subject_id: id })
}
