//! Persistence behind one trait so the handlers never care whether rows live
//! in Postgres or in process memory.

mod memory;
mod postgres;

use async_trait::async_trait;

use crate::err::Error;
use crate::lifecycle::{self, LifecycleError};
use crate::models::{
    Class, ClassSubject, Lab, LabFilter, LabProgress, LabStatus, NewClass, NewLab, NewUser, Subject,
    User, UserSession,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, Error>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Fails with `Conflict` when the email is taken.
    async fn insert_user(&self, user: NewUser) -> StoreResult<User>;
    async fn user_by_id(&self, id: i64) -> StoreResult<Option<User>>;
    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn list_users(&self) -> StoreResult<Vec<User>>;
    /// Fails with `Conflict` when the email is taken by someone else.
    async fn update_user(&self, user: &User) -> StoreResult<()>;
    /// Removes the user together with sessions, enrollments, authored labs and progress.
    async fn delete_user(&self, id: i64) -> StoreResult<bool>;

    async fn insert_session(&self, session: &UserSession) -> StoreResult<()>;
    async fn session_by_id(&self, ssid: &str) -> StoreResult<Option<UserSession>>;
    async fn delete_session(&self, ssid: &str) -> StoreResult<bool>;

    async fn insert_subject(&self, name: &str, description: Option<String>) -> StoreResult<Subject>;
    async fn subject_by_id(&self, id: i64) -> StoreResult<Option<Subject>>;
    async fn list_subjects(&self) -> StoreResult<Vec<Subject>>;
    async fn update_subject(&self, subject: &Subject) -> StoreResult<()>;
    async fn delete_subject(&self, id: i64) -> StoreResult<bool>;

    async fn insert_class(&self, class: NewClass) -> StoreResult<Class>;
    async fn class_by_id(&self, id: i64) -> StoreResult<Option<Class>>;
    async fn list_classes(&self) -> StoreResult<Vec<Class>>;
    async fn update_class(&self, class: &Class) -> StoreResult<()>;
    async fn delete_class(&self, id: i64) -> StoreResult<bool>;

    /// Atomically checks capacity with [`crate::enrollment::admit`] and enrolls.
    async fn enroll(&self, class_id: i64, student_id: i64) -> StoreResult<()>;
    async fn unenroll(&self, class_id: i64, student_id: i64) -> StoreResult<bool>;
    async fn class_students(&self, class_id: i64) -> StoreResult<Vec<User>>;
    async fn student_class_ids(&self, student_id: i64) -> StoreResult<Vec<i64>>;

    /// Fails with `Conflict` when the subject is already linked to the class.
    async fn add_class_subject(&self, link: &ClassSubject) -> StoreResult<()>;
    async fn remove_class_subject(&self, class_id: i64, subject_id: i64) -> StoreResult<bool>;
    async fn class_subjects(&self, class_id: i64) -> StoreResult<Vec<ClassSubject>>;
    /// Returns `false` when the class does not carry the subject.
    async fn assign_teacher(&self, class_id: i64, subject_id: i64, teacher_id: i64) -> StoreResult<bool>;
    async fn teacher_assignments(&self, teacher_id: i64) -> StoreResult<Vec<ClassSubject>>;

    async fn insert_lab(&self, lab: NewLab) -> StoreResult<Lab>;
    async fn lab_by_id(&self, id: i64) -> StoreResult<Option<Lab>>;
    async fn list_labs(&self, filter: &LabFilter) -> StoreResult<Vec<Lab>>;
    /// Writes the teacher-owned columns of `lab`, and nothing else, while the
    /// stored row is still `pending` or `rejected`.
    async fn update_lab_content(&self, lab: &Lab) -> StoreResult<Lab>;
    /// Writes `status`, `admin_comment` and `approved_at` of `lab`, provided the
    /// stored status is still `from`.
    async fn update_lab_status(&self, lab: &Lab, from: LabStatus) -> StoreResult<Lab>;
    /// Appends `name` to the lab's files while its content is editable.
    async fn attach_lab_file(&self, id: i64, name: &str) -> StoreResult<Lab>;
    async fn delete_lab(&self, id: i64) -> StoreResult<bool>;

    async fn upsert_progress(&self, progress: &LabProgress) -> StoreResult<()>;
    async fn progress(&self, student_id: i64, lab_id: i64) -> StoreResult<Option<LabProgress>>;
    async fn student_progress(&self, student_id: i64) -> StoreResult<Vec<LabProgress>>;
}

/// Subjects carried by any of the classes a student is enrolled in.
pub async fn student_subject_ids(store: &dyn Store, student_id: i64) -> StoreResult<Vec<i64>> {
    let mut subjects = Vec::new();
    for class_id in store.student_class_ids(student_id).await? {
        subjects.extend(
            store
                .class_subjects(class_id)
                .await?
                .into_iter()
                .map(|link| link.subject_id),
        );
    }
    subjects.sort_unstable();
    subjects.dedup();
    Ok(subjects)
}

fn lab_not_found(id: i64) -> Error {
    Error::not_found("lab", format!("Lab `{}` not found", id))
}

/// Explains a guarded content write that matched no row.
pub(crate) fn content_refused(current: Option<&Lab>, id: i64) -> Error {
    match current {
        None => lab_not_found(id),
        Some(_) => LifecycleError::ContentFrozen.into(),
    }
}

/// Explains a guarded status write that matched no row.
pub(crate) fn status_refused(current: Option<&Lab>, id: i64, from: LabStatus) -> Error {
    match current {
        None => lab_not_found(id),
        Some(lab) => Error::conflict(format!(
            "Lab `{}` moved from `{}` to `{}` in the meantime",
            id, from, lab.status
        )),
    }
}

/// Explains a guarded attachment append that matched no row.
pub(crate) fn attach_refused(current: Option<&Lab>, id: i64, name: &str) -> Error {
    match current {
        None => lab_not_found(id),
        Some(lab) if !lifecycle::is_editable(lab.status) => LifecycleError::ContentFrozen.into(),
        Some(_) => LifecycleError::DuplicateFile(name.to_string()).into(),
    }
}
