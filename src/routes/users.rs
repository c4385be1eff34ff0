use std::collections::BTreeMap;

use axum::extract::Path;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::auth::{self, Caller, CreatedUser};
use crate::io;
use crate::models::{LabFilter, NewUser, Role, Subject, User};
use crate::{proceeds, AppState, Error, Payload};

#[derive(Debug, Clone, Serialize)]
pub struct UserList {
    pub users: Vec<User>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserDeleted {
    pub user_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

pub async fn list_users(caller: Caller, Extension(state): Extension<AppState>) -> Payload<UserList> {
    caller.require(&[Role::Administrator])?;
    proceeds(UserList {
        users: state.store.list_users().await?,
    })
}

pub async fn create_user(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Json(body): Json<CreateUser>,
) -> Payload<CreatedUser> {
    caller.require(&[Role::Administrator])?;
    auth::check_email(&body.email)?;
    auth::check_password_strength(&body.password)?;
    let user = state
        .store
        .insert_user(NewUser {
            first_name: body.first_name,
            last_name: body.last_name,
            email: body.email,
            role: body.role,
            password_hash: auth::hash_password(&body.password)?,
        })
        .await?;
    log::info!("created {} {} <{}>", user.role, user.id, user.email);
    proceeds(CreatedUser { user_id: user.id })
}

pub async fn read_user(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> Payload<User> {
    let me = caller.require(&[])?;
    if me.id != id && me.role != Role::Administrator {
        return Err(Error::forbidden("Users may only read their own account"));
    }
    let user = state
        .store
        .user_by_id(id)
        .await?
        .ok_or_else(|| Error::not_found("user", format!("User `{}` not found", id)))?;
    proceeds(user)
}

pub async fn delete_user(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> Payload<UserDeleted> {
    let me = caller.require(&[Role::Administrator])?;
    if me.id == id {
        return Err(Error::conflict("Administrators cannot delete their own account"));
    }
    // deleting a user cascades to the labs they authored
    let authored: Vec<i64> = state
        .store
        .list_labs(&LabFilter::default())
        .await?
        .into_iter()
        .filter(|lab| lab.creator_id == id)
        .map(|lab| lab.id)
        .collect();
    if !state.store.delete_user(id).await? {
        return Err(Error::not_found("user", format!("User `{}` not found", id)));
    }
    for lab in authored {
        io::remove_lab_files(&state.settings.data_dir, lab).await?;
    }
    log::info!("user {} deleted by {}", id, me.id);
    proceeds(UserDeleted { user_id: id })
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignedClass {
    pub id: i64,
    pub name: String,
    pub subjects: Vec<Subject>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_ids: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_classes: Option<Vec<AssignedClass>>,
}

pub async fn read_profile(caller: Caller, Extension(state): Extension<AppState>) -> Payload<Profile> {
    let me = caller.require(&[])?.clone();
    let store = state.store.as_ref();
    let mut profile = Profile {
        user: me.clone(),
        class_ids: None,
        assigned_classes: None,
    };
    match me.role {
        Role::Student => profile.class_ids = Some(store.student_class_ids(me.id).await?),
        Role::Teacher => {
            let mut classes: BTreeMap<i64, AssignedClass> = BTreeMap::new();
            for link in store.teacher_assignments(me.id).await? {
                let (class, subject) = match (
                    store.class_by_id(link.class_id).await?,
                    store.subject_by_id(link.subject_id).await?,
                ) {
                    (Some(class), Some(subject)) => (class, subject),
                    _ => continue,
                };
                classes
                    .entry(class.id)
                    .or_insert_with(|| AssignedClass {
                        id: class.id,
                        name: class.name,
                        subjects: Vec::new(),
                    })
                    .subjects
                    .push(subject);
            }
            profile.assigned_classes = Some(classes.into_values().collect());
        }
        Role::Administrator => {}
    }
    proceeds(profile)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

pub async fn update_profile(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Json(body): Json<UpdateProfile>,
) -> Payload<User> {
    let mut user = caller.require(&[])?.clone();
    if let Some(first_name) = body.first_name {
        user.first_name = first_name;
    }
    if let Some(last_name) = body.last_name {
        user.last_name = last_name;
    }
    if let Some(email) = body.email {
        auth::check_email(&email)?;
        user.email = email;
    }
    match (body.current_password, body.new_password) {
        (Some(current), Some(new)) => {
            if !auth::verify_password(&user.password_hash, &current) {
                return Err(Error::invalid("Current password is incorrect"));
            }
            auth::check_password_strength(&new)?;
            user.password_hash = auth::hash_password(&new)?;
        }
        (None, None) => {}
        _ => {
            return Err(Error::invalid(
                "Changing the password needs both `current_password` and `new_password`",
            ))
        }
    }
    state.store.update_user(&user).await?;
    proceeds(user)
}
