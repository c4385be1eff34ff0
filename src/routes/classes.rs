use axum::extract::Path;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::auth::Caller;
use crate::enrollment;
use crate::models::{Class, ClassSubject, NewClass, Role, Subject, User};
use crate::store::Store;
use crate::{proceeds, AppState, Error, Payload};

#[derive(Debug, Clone, Serialize)]
pub struct ClassList {
    pub classes: Vec<Class>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentList {
    pub students: Vec<User>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeacherRef {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassSubjectView {
    #[serde(flatten)]
    pub subject: Subject,
    pub teacher: Option<TeacherRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassSubjectList {
    pub subjects: Vec<ClassSubjectView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassDetail {
    #[serde(flatten)]
    pub class: Class,
    pub enrolled: usize,
    pub students: Vec<User>,
    pub subjects: Vec<ClassSubjectView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassChanged {
    pub class_id: i64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassBody {
    pub name: Option<String>,
    pub capacity: Option<i32>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrollStudent {
    pub user_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddSubject {
    pub subject_id: i64,
    pub teacher_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignTeacher {
    pub subject_id: i64,
    pub teacher_id: i64,
}

pub(crate) async fn find_class(store: &dyn Store, id: i64) -> Result<Class, Error> {
    store
        .class_by_id(id)
        .await?
        .ok_or_else(|| Error::not_found("class", format!("Class `{}` not found", id)))
}

async fn find_teacher(store: &dyn Store, id: i64) -> Result<User, Error> {
    let teacher = store
        .user_by_id(id)
        .await?
        .ok_or_else(|| Error::not_found("user", format!("Teacher `{}` not found", id)))?;
    if teacher.role != Role::Teacher {
        return Err(Error::invalid(format!("User `{}` is not a teacher", id)));
    }
    Ok(teacher)
}

async fn subject_views(store: &dyn Store, class_id: i64) -> Result<Vec<ClassSubjectView>, Error> {
    let mut views = Vec::new();
    for link in store.class_subjects(class_id).await? {
        let subject = match store.subject_by_id(link.subject_id).await? {
            Some(subject) => subject,
            None => continue,
        };
        let teacher = match link.teacher_id {
            Some(id) => store.user_by_id(id).await?.map(|t| TeacherRef {
                id: t.id,
                first_name: t.first_name,
                last_name: t.last_name,
            }),
            None => None,
        };
        views.push(ClassSubjectView { subject, teacher });
    }
    Ok(views)
}

fn changed(class_id: i64, message: &str) -> ClassChanged {
    ClassChanged {
        class_id,
        message: message.to_string(),
    }
}

pub async fn list_classes(caller: Caller, Extension(state): Extension<AppState>) -> Payload<ClassList> {
    caller.require(&[])?;
    proceeds(ClassList {
        classes: state.store.list_classes().await?,
    })
}

pub async fn read_class(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> Payload<ClassDetail> {
    caller.require(&[])?;
    let store = state.store.as_ref();
    let class = find_class(store, id).await?;
    let students = store.class_students(id).await?;
    proceeds(ClassDetail {
        class,
        enrolled: students.len(),
        students,
        subjects: subject_views(store, id).await?,
    })
}

pub async fn create_class(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Json(body): Json<ClassBody>,
) -> Payload<Class> {
    caller.require(&[Role::Administrator])?;
    let name = match body.name.map(|n| n.trim().to_string()) {
        Some(name) if !name.is_empty() => name,
        _ => return Err(Error::missing("name")),
    };
    let capacity = body.capacity.ok_or_else(|| Error::missing("capacity"))?;
    enrollment::validate_capacity(capacity)?;
    let class = state
        .store
        .insert_class(NewClass {
            name,
            capacity,
            description: body.description,
        })
        .await?;
    log::info!("class {} `{}` created with {} seats", class.id, class.name, class.capacity);
    proceeds(class)
}

pub async fn update_class(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ClassBody>,
) -> Payload<Class> {
    caller.require(&[Role::Administrator])?;
    let mut class = find_class(state.store.as_ref(), id).await?;
    if let Some(name) = body.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(Error::missing("name"));
        }
        class.name = name;
    }
    if let Some(capacity) = body.capacity {
        class.capacity = capacity;
    }
    if body.description.is_some() {
        class.description = body.description;
    }
    state.store.update_class(&class).await?;
    proceeds(class)
}

pub async fn delete_class(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> Payload<ClassChanged> {
    caller.require(&[Role::Administrator])?;
    if !state.store.delete_class(id).await? {
        return Err(Error::not_found("class", format!("Class `{}` not found", id)));
    }
    proceeds(changed(id, "Class deleted successfully"))
}

pub async fn list_students(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> Payload<StudentList> {
    caller.require(&[])?;
    find_class(state.store.as_ref(), id).await?;
    proceeds(StudentList {
        students: state.store.class_students(id).await?,
    })
}

pub async fn enroll_student(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<EnrollStudent>,
) -> Payload<ClassChanged> {
    caller.require(&[Role::Administrator])?;
    let store = state.store.as_ref();
    find_class(store, id).await?;
    let student = store
        .user_by_id(body.user_id)
        .await?
        .ok_or_else(|| Error::not_found("user", format!("User `{}` not found", body.user_id)))?;
    enrollment::ensure_student(&student)?;
    store.enroll(id, student.id).await?;
    log::info!("student {} enrolled in class {}", student.id, id);
    proceeds(changed(id, "Student added to class successfully"))
}

pub async fn unenroll_student(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path((id, student_id)): Path<(i64, i64)>,
) -> Payload<ClassChanged> {
    caller.require(&[Role::Administrator])?;
    if !state.store.unenroll(id, student_id).await? {
        return Err(Error::not_found(
            "enrollment",
            format!("Student `{}` not found in class `{}`", student_id, id),
        ));
    }
    proceeds(changed(id, "Student removed from class successfully"))
}

pub async fn list_subjects(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> Payload<ClassSubjectList> {
    caller.require(&[])?;
    let store = state.store.as_ref();
    find_class(store, id).await?;
    proceeds(ClassSubjectList {
        subjects: subject_views(store, id).await?,
    })
}

pub async fn add_subject(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<AddSubject>,
) -> Payload<ClassChanged> {
    caller.require(&[Role::Administrator])?;
    let store = state.store.as_ref();
    find_class(store, id).await?;
    store.subject_by_id(body.subject_id).await?.ok_or_else(|| {
        Error::not_found("subject", format!("Subject `{}` not found", body.subject_id))
    })?;
    if let Some(teacher_id) = body.teacher_id {
        find_teacher(store, teacher_id).await?;
    }
    store
        .add_class_subject(&ClassSubject {
            class_id: id,
            subject_id: body.subject_id,
            teacher_id: body.teacher_id,
        })
        .await?;
    proceeds(changed(id, "Subject added to class successfully"))
}

pub async fn remove_subject(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path((id, subject_id)): Path<(i64, i64)>,
) -> Payload<ClassChanged> {
    caller.require(&[Role::Administrator])?;
    if !state.store.remove_class_subject(id, subject_id).await? {
        return Err(Error::not_found(
            "class_subject",
            format!("Subject `{}` not found in class `{}`", subject_id, id),
        ));
    }
    proceeds(changed(id, "Subject removed from class successfully"))
}

pub async fn assign_teacher(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<AssignTeacher>,
) -> Payload<ClassChanged> {
    caller.require(&[Role::Administrator])?;
    let store = state.store.as_ref();
    find_teacher(store, body.teacher_id).await?;
    if !store.assign_teacher(id, body.subject_id, body.teacher_id).await? {
        return Err(Error::not_found(
            "class_subject",
            format!("Subject `{}` not found for class `{}`", body.subject_id, id),
        ));
    }
    proceeds(changed(id, "Teacher assigned successfully"))
}
