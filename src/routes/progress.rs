use axum::extract::Path;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Serialize;

use crate::auth::Caller;
use crate::models::{LabProgress, Role, User};
use crate::progress::{self, ClassProgress, ProgressUpdate};
use crate::routes::classes::find_class;
use crate::routes::labs::fetch_visible_lab;
use crate::store::Store;
use crate::{proceeds, AppState, Error, Payload};

#[derive(Debug, Clone, Serialize)]
pub struct ProgressList {
    pub student_id: i64,
    pub progress: Vec<LabProgress>,
}

async fn find_student(store: &dyn Store, id: i64) -> Result<User, Error> {
    let student = store
        .user_by_id(id)
        .await?
        .ok_or_else(|| Error::not_found("user", format!("Student `{}` not found", id)))?;
    if student.role != Role::Student {
        return Err(Error::invalid(format!("User `{}` is not a student", id)));
    }
    Ok(student)
}

pub async fn record_progress(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path((student_id, lab_id)): Path<(i64, i64)>,
    Json(update): Json<ProgressUpdate>,
) -> Payload<LabProgress> {
    let me = caller.require(&[])?;
    progress::ensure_may_track(me, student_id)?;
    let store = state.store.as_ref();
    let student = find_student(store, student_id).await?;
    // progress is only kept for labs the student can actually open
    fetch_visible_lab(store, &student, lab_id).await?;

    let existing = store.progress(student_id, lab_id).await?;
    let entry = progress::record(existing, student_id, lab_id, me, update, Utc::now())?;
    store.upsert_progress(&entry).await?;
    log::debug!("progress of student {} on lab {}: {:?}", student_id, lab_id, entry.status);
    proceeds(entry)
}

pub async fn student_progress(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path(student_id): Path<i64>,
) -> Payload<ProgressList> {
    let me = caller.require(&[])?;
    progress::ensure_may_track(me, student_id)?;
    let store = state.store.as_ref();
    find_student(store, student_id).await?;
    proceeds(ProgressList {
        student_id,
        progress: store.student_progress(student_id).await?,
    })
}

pub async fn class_progress(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path(class_id): Path<i64>,
) -> Payload<ClassProgress> {
    caller.require(&[Role::Administrator, Role::Teacher])?;
    let store = state.store.as_ref();
    find_class(store, class_id).await?;
    let students = store.class_students(class_id).await?;
    let mut entries = Vec::new();
    for student in &students {
        entries.extend(store.student_progress(student.id).await?);
    }
    proceeds(progress::summarize(&students, &entries))
}
