use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use labgate_server::auth;
use labgate_server::config::Settings;
use labgate_server::models::{NewUser, Role, User};
use labgate_server::routes;
use labgate_server::store::{MemoryStore, Store};
use labgate_server::AppState;

const PASSWORD: &str = "correct horse";

struct School {
    app: Router,
    store: Arc<MemoryStore>,
    data: tempfile::TempDir,
}

impl School {
    fn open() -> School {
        let data = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let settings = Settings {
            data_dir: data.path().to_path_buf(),
            ..Settings::default()
        };
        let app = routes::router(AppState::new(store.clone() as Arc<dyn Store>, settings));
        School {
            app,
            store,
            data,
        }
    }

    async fn seed(&self, email: &str, role: Role, password_hash: &str) -> User {
        self.store
            .insert_user(NewUser {
                first_name: "Test".into(),
                last_name: email.split('@').next().unwrap_or_default().into(),
                email: email.into(),
                role,
                password_hash: password_hash.into(),
            })
            .await
            .unwrap()
    }

    /// Seeds a user with a real password hash and logs them in.
    async fn member(&self, email: &str, role: Role) -> (User, String) {
        let user = self
            .seed(email, role, &auth::hash_password(PASSWORD).unwrap())
            .await;
        let (status, body) = self
            .call(
                Method::POST,
                "/login",
                None,
                Some(json!({ "email": email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        (user, body["token"].as_str().unwrap().to_string())
    }

    async fn raw(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let (status, bytes) = self.raw(request).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}

/// Admin-built fixture: one subject carried by one class with one enrolled student.
struct Classroom {
    admin: String,
    teacher: String,
    teacher_id: i64,
    student: String,
    student_id: i64,
    subject_id: i64,
    class_id: i64,
}

async fn classroom(school: &School) -> Classroom {
    let (_, admin) = school.member("admin@school.test", Role::Administrator).await;
    let (teacher_user, teacher) = school.member("teacher@school.test", Role::Teacher).await;
    let (student_user, student) = school.member("student@school.test", Role::Student).await;

    let (status, subject) = school
        .call(Method::POST, "/subjects", Some(&admin), Some(json!({ "name": "Physics" })))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", subject);
    let (status, class) = school
        .call(
            Method::POST,
            "/classes",
            Some(&admin),
            Some(json!({ "name": "1A", "capacity": 30 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", class);

    let subject_id = subject["id"].as_i64().unwrap();
    let class_id = class["id"].as_i64().unwrap();
    let (status, _) = school
        .call(
            Method::POST,
            &format!("/classes/{}/subjects", class_id),
            Some(&admin),
            Some(json!({ "subject_id": subject_id })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = school
        .call(
            Method::POST,
            &format!("/classes/{}/students", class_id),
            Some(&admin),
            Some(json!({ "user_id": student_user.id })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    Classroom {
        admin,
        teacher,
        teacher_id: teacher_user.id,
        student,
        student_id: student_user.id,
        subject_id,
        class_id,
    }
}

async fn submit_lab(school: &School, room: &Classroom, title: &str) -> i64 {
    let (status, lab) = school
        .call(
            Method::POST,
            "/labs",
            Some(&room.teacher),
            Some(json!({ "title": title, "subject_id": room.subject_id, "duration_hours": 1.5 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", lab);
    assert_eq!(lab["status"], "pending");
    lab["id"].as_i64().unwrap()
}

async fn set_status(school: &School, token: &str, lab: i64, change: Value) -> (StatusCode, Value) {
    school
        .call(Method::PUT, &format!("/labs/{}/status", lab), Some(token), Some(change))
        .await
}

fn lab_ids(body: &Value) -> Vec<i64> {
    body["labs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|lab| lab["id"].as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn gate_sends_each_role_to_its_own_home() {
    let school = School::open();
    let (_, student) = school.member("s@school.test", Role::Student).await;
    let (_, admin) = school.member("a@school.test", Role::Administrator).await;

    let (status, body) = school
        .call(Method::GET, "/gate?path=/admin/dashboard", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["decision"], "redirect");
    assert_eq!(body["reason"], "unauthenticated");
    assert_eq!(body["location"], "/login");

    let (_, body) = school
        .call(Method::GET, "/gate?path=/admin/dashboard", Some(&student), None)
        .await;
    assert_eq!(body["decision"], "redirect");
    assert_eq!(body["reason"], "wrong_role");
    assert_eq!(body["location"], "/student/dashboard");

    let (_, body) = school
        .call(Method::GET, "/gate?path=/admin/dashboard", Some(&admin), None)
        .await;
    assert_eq!(body["decision"], "allow");
    assert!(body.get("location").is_none());

    let (_, body) = school
        .call(Method::GET, "/gate?path=/profile", Some(&student), None)
        .await;
    assert_eq!(body["decision"], "allow");

    let (status, body) = school
        .call(Method::GET, "/gate?path=/nowhere", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["entity"], "view");
}

#[tokio::test]
async fn protected_routes_reject_anonymous_and_wrong_roles() {
    let school = School::open();
    let (_, student) = school.member("s@school.test", Role::Student).await;

    let (status, body) = school.call(Method::GET, "/users", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthenticated");
    assert_eq!(body["redirect"], "/login");

    let (status, body) = school.call(Method::GET, "/users", Some("not-a-session"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthenticated");

    let (status, body) = school.call(Method::GET, "/users", Some(&student), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["redirect"], "/student/dashboard");

    let (status, body) = school.call(Method::GET, "/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["entity"], "route");
}

#[tokio::test]
async fn registration_always_creates_students() {
    let school = School::open();
    let (status, body) = school
        .call(
            Method::POST,
            "/register",
            None,
            Some(json!({
                "first_name": "Ada",
                "last_name": "Lovelace",
                "email": "ada@school.test",
                "password": PASSWORD,
                "role": "administrator",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);

    let (status, login) = school
        .call(
            Method::POST,
            "/login",
            None,
            Some(json!({ "email": "ada@school.test", "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(login["user"]["role"], "student");
    assert!(login["user"].get("password_hash").is_none());

    let (status, body) = school
        .call(
            Method::POST,
            "/login",
            None,
            Some(json!({ "email": "ada@school.test", "password": "wrong password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "AuthenticationFailure");

    let token = login["token"].as_str().unwrap();
    let (status, body) = school.call(Method::POST, "/logout", Some(token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["drop_success"], true);
    let (status, _) = school.call(Method::GET, "/profile", Some(token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn labs_reach_students_only_after_approval() {
    let school = School::open();
    let room = classroom(&school).await;
    let lab = submit_lab(&school, &room, "Intro").await;

    let (_, listed) = school.call(Method::GET, "/labs", Some(&room.student), None).await;
    assert!(lab_ids(&listed).is_empty());
    let (status, _) = school
        .call(Method::GET, &format!("/labs/{}", lab), Some(&room.student), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = set_status(&school, &room.teacher, lab, json!({ "status": "approved" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{}", body);

    let (status, approved) = set_status(&school, &room.admin, lab, json!({ "status": "approved" })).await;
    assert_eq!(status, StatusCode::OK, "{}", approved);
    assert_eq!(approved["status"], "approved");
    assert!(approved["approved_at"].is_string());

    let (_, listed) = school.call(Method::GET, "/labs", Some(&room.student), None).await;
    assert_eq!(lab_ids(&listed), vec![lab]);
    let (_, listed) = school
        .call(Method::GET, "/labs?status=pending", Some(&room.admin), None)
        .await;
    assert!(lab_ids(&listed).is_empty());

    let (status, body) = school
        .call(
            Method::PUT,
            &format!("/labs/{}", lab),
            Some(&room.teacher),
            Some(json!({ "title": "Changed" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", body);

    let (status, body) = set_status(&school, &room.admin, lab, json!({ "status": "pending" })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "InvalidTransition");
}

#[tokio::test]
async fn rejection_needs_a_comment_and_keeps_it() {
    let school = School::open();
    let room = classroom(&school).await;
    let lab = submit_lab(&school, &room, "Optics").await;

    let (status, body) = set_status(&school, &room.admin, lab, json!({ "status": "rejected" })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "MissingRequiredField");
    assert_eq!(body["field"], "admin_comment");

    let (status, _) = set_status(
        &school,
        &room.admin,
        lab,
        json!({ "status": "rejected", "admin_comment": "   " }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, still_pending) = school
        .call(Method::GET, &format!("/labs/{}", lab), Some(&room.teacher), None)
        .await;
    assert_eq!(still_pending["status"], "pending");

    let (status, rejected) = set_status(
        &school,
        &room.admin,
        lab,
        json!({ "status": "rejected", "admin_comment": "Needs safety notes" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rejected["admin_comment"], "Needs safety notes");

    let (status, again) = set_status(&school, &room.admin, lab, json!({ "status": "rejected" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["status"], "rejected");
    assert_eq!(again["admin_comment"], "Needs safety notes");

    let (status, edited) = school
        .call(
            Method::PUT,
            &format!("/labs/{}", lab),
            Some(&room.teacher),
            Some(json!({ "description": "Wear goggles" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(edited["status"], "rejected");
    assert_eq!(edited["description"], "Wear goggles");

    let (status, approved) = set_status(&school, &room.admin, lab, json!({ "status": "approved" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["admin_comment"], "Needs safety notes");

    let (status, again) = set_status(&school, &room.admin, lab, json!({ "status": "approved" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["approved_at"], approved["approved_at"]);
}

#[tokio::test]
async fn class_capacity_is_enforced() {
    let school = School::open();
    let (_, admin) = school.member("admin@school.test", Role::Administrator).await;
    let (_, class) = school
        .call(
            Method::POST,
            "/classes",
            Some(&admin),
            Some(json!({ "name": "2B", "capacity": 30 })),
        )
        .await;
    let class_id = class["id"].as_i64().unwrap();
    let enroll = format!("/classes/{}/students", class_id);

    for n in 0..30 {
        let student = school
            .seed(&format!("student{}@school.test", n), Role::Student, "unused")
            .await;
        let (status, body) = school
            .call(Method::POST, &enroll, Some(&admin), Some(json!({ "user_id": student.id })))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
    }

    let late = school.seed("late@school.test", Role::Student, "unused").await;
    let (status, body) = school
        .call(Method::POST, &enroll, Some(&admin), Some(json!({ "user_id": late.id })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Conflict");

    let (_, listed) = school.call(Method::GET, &enroll, Some(&admin), None).await;
    assert_eq!(listed["students"].as_array().unwrap().len(), 30);

    let (status, _) = school
        .call(
            Method::PUT,
            &format!("/classes/{}", class_id),
            Some(&admin),
            Some(json!({ "capacity": 20 })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = school
        .call(
            Method::POST,
            "/classes",
            Some(&admin),
            Some(json!({ "name": "empty", "capacity": 0 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn progress_is_tracked_and_summarized() {
    let school = School::open();
    let room = classroom(&school).await;
    let lab = submit_lab(&school, &room, "Lenses").await;
    let track = format!("/students/{}/labs/{}/progress", room.student_id, lab);

    let (status, _) = school
        .call(Method::POST, &track, Some(&room.student), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    set_status(&school, &room.admin, lab, json!({ "status": "approved" })).await;

    let (status, started) = school
        .call(Method::POST, &track, Some(&room.student), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", started);
    assert_eq!(started["status"], "in_progress");

    let (status, _) = school
        .call(Method::POST, &track, Some(&room.student), Some(json!({ "score": 100.0 })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, done) = school
        .call(
            Method::POST,
            &track,
            Some(&room.student),
            Some(json!({ "status": "completed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(done["completed_at"].is_string());

    let (status, graded) = school
        .call(Method::POST, &track, Some(&room.teacher), Some(json!({ "score": 87.5 })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(graded["score"], 87.5);
    assert_eq!(graded["status"], "completed");

    let (_, other) = school.member("other@school.test", Role::Student).await;
    let (status, _) = school
        .call(
            Method::GET,
            &format!("/students/{}/progress", room.student_id),
            Some(&other),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, summary) = school
        .call(
            Method::GET,
            &format!("/classes/{}/progress", room.class_id),
            Some(&room.teacher),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", summary);
    assert_eq!(summary["student_count"], 1);
    assert_eq!(summary["student_stats"][0]["completed"], 1);
    assert_eq!(summary["student_stats"][0]["avg_score"], 87.5);
    assert_eq!(summary["lab_completion"][0]["lab_id"], lab);
}

#[tokio::test]
async fn attachments_follow_the_lab() {
    let school = School::open();
    let room = classroom(&school).await;
    let lab = submit_lab(&school, &room, "Circuits").await;
    let file = format!("/labs/{}/files/sheet.txt", lab);

    let upload = |uri: &str, token: &str| {
        Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::from("ohm's law"))
            .unwrap()
    };

    let (status, body) = school.raw(upload(&file, &room.teacher)).await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
    let (status, _) = school.raw(upload(&file, &room.teacher)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = school
        .raw(upload(&format!("/labs/{}/files/.hidden", lab), &room.teacher))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let download = Request::builder()
        .uri(&file)
        .header(header::AUTHORIZATION, format!("Bearer {}", room.teacher))
        .body(Body::empty())
        .unwrap();
    let (status, bytes) = school.raw(download).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"ohm's law");

    set_status(&school, &room.admin, lab, json!({ "status": "approved" })).await;
    let (status, _) = school
        .raw(upload(&format!("/labs/{}/files/late.txt", lab), &room.teacher))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = school
        .call(Method::DELETE, &format!("/labs/{}", lab), Some(&room.admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = school
        .call(Method::GET, &format!("/labs/{}", lab), Some(&room.admin), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_changes_are_judged_by_the_transition_table_not_visibility() {
    let school = School::open();
    let room = classroom(&school).await;
    let lab = submit_lab(&school, &room, "Waves").await;
    let (_, rival) = school.member("rival@school.test", Role::Teacher).await;
    let (_, outsider) = school.member("outsider@school.test", Role::Student).await;

    let (status, body) = set_status(&school, &rival, lab, json!({ "status": "approved" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{}", body);
    assert_eq!(body["error"], "Forbidden");

    let (status, _) = set_status(&school, &room.admin, lab, json!({ "status": "approved" })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = set_status(
        &school,
        &outsider,
        lab,
        json!({ "status": "rejected", "admin_comment": "not for me" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", body);
    assert_eq!(body["error"], "InvalidTransition");

    let (status, _) = set_status(&school, &outsider, lab, json!({ "status": "approved" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = set_status(&school, &room.admin, lab + 100, json!({ "status": "approved" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["entity"], "lab");

    let (_, stored) = school
        .call(Method::GET, &format!("/labs/{}", lab), Some(&room.admin), None)
        .await;
    assert_eq!(stored["status"], "approved");
}

#[tokio::test]
async fn deleting_a_teacher_removes_their_lab_files() {
    let school = School::open();
    let room = classroom(&school).await;
    let lab = submit_lab(&school, &room, "Magnets").await;

    let upload = Request::builder()
        .method(Method::PUT)
        .uri(format!("/labs/{}/files/notes.txt", lab))
        .header(header::AUTHORIZATION, format!("Bearer {}", room.teacher))
        .body(Body::from("north and south"))
        .unwrap();
    let (status, _) = school.raw(upload).await;
    assert_eq!(status, StatusCode::OK);
    let dir = school.data.path().join("labs").join(lab.to_string());
    assert!(dir.join("notes.txt").exists());

    let (status, body) = school
        .call(
            Method::DELETE,
            &format!("/users/{}", room.teacher_id),
            Some(&room.admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(!dir.exists());

    let (status, _) = school
        .call(Method::GET, &format!("/labs/{}", lab), Some(&room.admin), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
