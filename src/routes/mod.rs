mod classes;
mod labs;
mod navigation;
mod progress;
mod subjects;
mod users;

use axum::handler::Handler;
use axum::routing::{get, post, put};
use axum::{Extension, Router};

use crate::{auth, err, AppState};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/register", post(auth::register_user))
        .route("/login", post(auth::login_user))
        .route("/logout", post(auth::logout_user))
        .route("/gate", get(navigation::navigate))
        .route("/profile", get(users::read_profile).put(users::update_profile))
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/:id", get(users::read_user).delete(users::delete_user))
        .route("/subjects", get(subjects::list_subjects).post(subjects::create_subject))
        .route(
            "/subjects/:id",
            get(subjects::read_subject)
                .put(subjects::update_subject)
                .delete(subjects::delete_subject),
        )
        .route("/classes", get(classes::list_classes).post(classes::create_class))
        .route(
            "/classes/:id",
            get(classes::read_class)
                .put(classes::update_class)
                .delete(classes::delete_class),
        )
        .route(
            "/classes/:id/students",
            get(classes::list_students).post(classes::enroll_student),
        )
        .route(
            "/classes/:id/students/:student_id",
            axum::routing::delete(classes::unenroll_student),
        )
        .route(
            "/classes/:id/subjects",
            get(classes::list_subjects).post(classes::add_subject),
        )
        .route(
            "/classes/:id/subjects/:subject_id",
            axum::routing::delete(classes::remove_subject),
        )
        .route("/classes/:id/teachers", post(classes::assign_teacher))
        .route("/classes/:id/progress", get(progress::class_progress))
        .route("/labs", get(labs::list_labs).post(labs::create_lab))
        .route(
            "/labs/:id",
            get(labs::read_lab).put(labs::update_lab).delete(labs::delete_lab),
        )
        .route("/labs/:id/status", put(labs::set_lab_status))
        .route(
            "/labs/:id/files/:name",
            get(labs::read_attachment).put(labs::upload_attachment),
        )
        .route("/students/:id/progress", get(progress::student_progress))
        .route(
            "/students/:id/labs/:lab_id/progress",
            post(progress::record_progress),
        )
        .fallback(err::handler404.into_service())
        .layer(Extension(state))
}
