use axum::body::Bytes;
use axum::extract::{Path, Query};
use axum::{Extension, Json};
use chrono::Utc;
use serde::Serialize;

use crate::auth::Caller;
use crate::io;
use crate::lifecycle::{self, StatusChange, Viewer};
use crate::models::{Lab, LabContent, LabFilter, Role, User};
use crate::store::{student_subject_ids, Store};
use crate::{proceeds, AppState, Error, Payload};

#[derive(Debug, Clone, Serialize)]
pub struct LabList {
    pub labs: Vec<Lab>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LabDeleted {
    pub lab_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileAttached {
    pub lab_id: i64,
    pub file: String,
    pub files: Vec<String>,
}

pub(crate) async fn viewer_for(store: &dyn Store, user: &User) -> Result<Viewer, Error> {
    Ok(match user.role {
        Role::Administrator => Viewer::Administrator,
        Role::Teacher => Viewer::Teacher { id: user.id },
        Role::Student => Viewer::Student {
            subjects: student_subject_ids(store, user.id)
                .await?
                .into_iter()
                .collect(),
        },
    })
}

/// Labs the caller may not see are reported as missing.
pub(crate) async fn fetch_visible_lab(store: &dyn Store, user: &User, id: i64) -> Result<Lab, Error> {
    let missing = || Error::not_found("lab", format!("Lab `{}` not found", id));
    let lab = store.lab_by_id(id).await?.ok_or_else(missing)?;
    if !lifecycle::visible_to(&lab, &viewer_for(store, user).await?) {
        return Err(missing());
    }
    Ok(lab)
}

async fn ensure_subject(store: &dyn Store, subject_id: Option<i64>) -> Result<(), Error> {
    if let Some(id) = subject_id {
        store
            .subject_by_id(id)
            .await?
            .ok_or_else(|| Error::not_found("subject", format!("Subject `{}` not found", id)))?;
    }
    Ok(())
}

pub async fn list_labs(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Query(filter): Query<LabFilter>,
) -> Payload<LabList> {
    let me = caller.require(&[])?;
    let store = state.store.as_ref();
    let viewer = viewer_for(store, me).await?;
    let labs = store
        .list_labs(&filter)
        .await?
        .into_iter()
        .filter(|lab| lifecycle::visible_to(lab, &viewer))
        .collect();
    proceeds(LabList { labs })
}

pub async fn read_lab(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> Payload<Lab> {
    let me = caller.require(&[])?;
    proceeds(fetch_visible_lab(state.store.as_ref(), me, id).await?)
}

pub async fn create_lab(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Json(content): Json<LabContent>,
) -> Payload<Lab> {
    let me = caller.require(&[Role::Teacher])?;
    let store = state.store.as_ref();
    let new = lifecycle::new_lab(content, me, Utc::now())?;
    ensure_subject(store, Some(new.subject_id)).await?;
    let lab = store.insert_lab(new).await?;
    log::info!("lab {} `{}` submitted by teacher {}", lab.id, lab.title, me.id);
    proceeds(lab)
}

pub async fn update_lab(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
    Json(content): Json<LabContent>,
) -> Payload<Lab> {
    let me = caller.require(&[Role::Teacher])?;
    let store = state.store.as_ref();
    let lab = fetch_visible_lab(store, me, id).await?;
    ensure_subject(store, content.subject_id).await?;
    let edited = lifecycle::edit_content(&lab, me, content)?;
    proceeds(store.update_lab_content(&edited).await?)
}

pub async fn set_lab_status(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
    Json(change): Json<StatusChange>,
) -> Payload<Lab> {
    let me = caller.require(&[])?;
    let store = state.store.as_ref();
    // the transition table decides who may ask, so only a missing id is hidden
    let lab = store
        .lab_by_id(id)
        .await?
        .ok_or_else(|| Error::not_found("lab", format!("Lab `{}` not found", id)))?;
    let updated = lifecycle::change_status(&lab, me.role, &change, Utc::now())?;
    let updated = store.update_lab_status(&updated, lab.status).await?;
    log::info!(
        "lab {} moved from {} to {} by {}",
        id,
        lab.status,
        updated.status,
        me.id
    );
    proceeds(updated)
}

pub async fn delete_lab(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> Payload<LabDeleted> {
    caller.require(&[Role::Administrator])?;
    if !state.store.delete_lab(id).await? {
        return Err(Error::not_found("lab", format!("Lab `{}` not found", id)));
    }
    io::remove_lab_files(&state.settings.data_dir, id).await?;
    proceeds(LabDeleted { lab_id: id })
}

pub async fn upload_attachment(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path((id, name)): Path<(i64, String)>,
    body: Bytes,
) -> Payload<FileAttached> {
    let me = caller.require(&[Role::Teacher])?;
    let store = state.store.as_ref();
    let path = io::attachment_path(&state.settings.data_dir, id, &name)?;
    let lab = fetch_visible_lab(store, me, id).await?;
    lifecycle::attach_file(&lab, me, &name)?;
    let lab = store.attach_lab_file(id, &name).await?;
    io::write_attachment(&path, &body).await?;
    log::debug!("stored {} bytes as `{}` for lab {}", body.len(), name, id);
    proceeds(FileAttached {
        lab_id: id,
        file: name,
        files: lab.files,
    })
}

pub async fn read_attachment(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path((id, name)): Path<(i64, String)>,
) -> Result<Vec<u8>, Error> {
    let me = caller.require(&[])?;
    let lab = fetch_visible_lab(state.store.as_ref(), me, id).await?;
    if !lab.files.iter().any(|f| *f == name) {
        return Err(Error::not_found("attachment", format!("Lab `{}` has no file `{}`", id, name)));
    }
    io::read_attachment(&io::attachment_path(&state.settings.data_dir, id, &name)?).await
}
