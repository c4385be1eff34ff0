use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{attach_refused, content_refused, status_refused, Store, StoreResult};
use crate::enrollment;
use crate::err::Error;
use crate::lifecycle;
use crate::models::{
    Class, ClassSubject, Lab, LabFilter, LabProgress, LabStatus, NewClass, NewLab, NewUser, Subject,
    User, UserSession,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<i64, User>,
    sessions: HashMap<String, UserSession>,
    subjects: BTreeMap<i64, Subject>,
    classes: BTreeMap<i64, Class>,
    /// (class_id, student_id)
    enrollments: BTreeSet<(i64, i64)>,
    class_subjects: BTreeMap<(i64, i64), ClassSubject>,
    labs: BTreeMap<i64, Lab>,
    progress: BTreeMap<(i64, i64), LabProgress>,
}

impl Tables {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(email) && Some(u.id) != except)
    }

    fn drop_lab(&mut self, id: i64) -> bool {
        self.progress.retain(|(_, lab), _| *lab != id);
        self.labs.remove(&id).is_some()
    }
}

/// Keeps every table in process memory. Used by tests and by deployments
/// without a `database_url`.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let mut tables = self.tables.lock().await;
        if tables.email_taken(&user.email, None) {
            return Err(Error::conflict("Email already registered"));
        }
        let user = User {
            id: tables.id(),
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            role: user.role,
            password_hash: user.password_hash,
            created_at: Utc::now(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        Ok(self.tables.lock().await.users.values().cloned().collect())
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.email_taken(&user.email, Some(user.id)) {
            return Err(Error::conflict("Email already in use"));
        }
        match tables.users.get_mut(&user.id) {
            Some(row) => {
                *row = user.clone();
                Ok(())
            }
            None => Err(Error::not_found("user", format!("User `{}` not found", user.id))),
        }
    }

    async fn delete_user(&self, id: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        if tables.users.remove(&id).is_none() {
            return Ok(false);
        }
        tables.sessions.retain(|_, s| s.belongs_to != id);
        tables.enrollments.retain(|(_, student)| *student != id);
        for link in tables.class_subjects.values_mut() {
            if link.teacher_id == Some(id) {
                link.teacher_id = None;
            }
        }
        let authored: Vec<i64> = tables
            .labs
            .values()
            .filter(|lab| lab.creator_id == id)
            .map(|lab| lab.id)
            .collect();
        for lab in authored {
            tables.drop_lab(lab);
        }
        tables.progress.retain(|(student, _), _| *student != id);
        Ok(true)
    }

    async fn insert_session(&self, session: &UserSession) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.sessions.insert(session.ssid.clone(), session.clone());
        Ok(())
    }

    async fn session_by_id(&self, ssid: &str) -> StoreResult<Option<UserSession>> {
        Ok(self.tables.lock().await.sessions.get(ssid).cloned())
    }

    async fn delete_session(&self, ssid: &str) -> StoreResult<bool> {
        Ok(self.tables.lock().await.sessions.remove(ssid).is_some())
    }

    async fn insert_subject(&self, name: &str, description: Option<String>) -> StoreResult<Subject> {
        let mut tables = self.tables.lock().await;
        if tables.subjects.values().any(|s| s.name == name) {
            return Err(Error::conflict("Subject with this name already exists"));
        }
        let subject = Subject {
            id: tables.id(),
            name: name.to_string(),
            description,
        };
        tables.subjects.insert(subject.id, subject.clone());
        Ok(subject)
    }

    async fn subject_by_id(&self, id: i64) -> StoreResult<Option<Subject>> {
        Ok(self.tables.lock().await.subjects.get(&id).cloned())
    }

    async fn list_subjects(&self) -> StoreResult<Vec<Subject>> {
        Ok(self.tables.lock().await.subjects.values().cloned().collect())
    }

    async fn update_subject(&self, subject: &Subject) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables
            .subjects
            .values()
            .any(|s| s.name == subject.name && s.id != subject.id)
        {
            return Err(Error::conflict("Subject with this name already exists"));
        }
        match tables.subjects.get_mut(&subject.id) {
            Some(row) => {
                *row = subject.clone();
                Ok(())
            }
            None => Err(Error::not_found("subject", format!("Subject `{}` not found", subject.id))),
        }
    }

    async fn delete_subject(&self, id: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        if tables.labs.values().any(|lab| lab.subject_id == id) {
            return Err(Error::conflict("Subject still has labs"));
        }
        tables.class_subjects.retain(|(_, subject), _| *subject != id);
        Ok(tables.subjects.remove(&id).is_some())
    }

    async fn insert_class(&self, class: NewClass) -> StoreResult<Class> {
        let mut tables = self.tables.lock().await;
        if tables.classes.values().any(|c| c.name == class.name) {
            return Err(Error::conflict("Class with this name already exists"));
        }
        let class = Class {
            id: tables.id(),
            name: class.name,
            capacity: class.capacity,
            description: class.description,
        };
        tables.classes.insert(class.id, class.clone());
        Ok(class)
    }

    async fn class_by_id(&self, id: i64) -> StoreResult<Option<Class>> {
        Ok(self.tables.lock().await.classes.get(&id).cloned())
    }

    async fn list_classes(&self) -> StoreResult<Vec<Class>> {
        Ok(self.tables.lock().await.classes.values().cloned().collect())
    }

    async fn update_class(&self, class: &Class) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables
            .classes
            .values()
            .any(|c| c.name == class.name && c.id != class.id)
        {
            return Err(Error::conflict("Class with this name already exists"));
        }
        let enrolled = tables
            .enrollments
            .iter()
            .filter(|(c, _)| *c == class.id)
            .count();
        let current = tables
            .classes
            .get(&class.id)
            .cloned()
            .ok_or_else(|| Error::not_found("class", format!("Class `{}` not found", class.id)))?;
        enrollment::ensure_resizable(&current, class.capacity, enrolled)?;
        tables.classes.insert(class.id, class.clone());
        Ok(())
    }

    async fn delete_class(&self, id: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        tables.enrollments.retain(|(class, _)| *class != id);
        tables.class_subjects.retain(|(class, _), _| *class != id);
        Ok(tables.classes.remove(&id).is_some())
    }

    async fn enroll(&self, class_id: i64, student_id: i64) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let class = tables
            .classes
            .get(&class_id)
            .ok_or_else(|| Error::not_found("class", format!("Class `{}` not found", class_id)))?;
        if tables.enrollments.contains(&(class_id, student_id)) {
            return Err(Error::conflict("Student already in this class"));
        }
        let enrolled = tables
            .enrollments
            .iter()
            .filter(|(c, _)| *c == class_id)
            .count();
        enrollment::admit(class, enrolled)?;
        tables.enrollments.insert((class_id, student_id));
        Ok(())
    }

    async fn unenroll(&self, class_id: i64, student_id: i64) -> StoreResult<bool> {
        Ok(self
            .tables
            .lock()
            .await
            .enrollments
            .remove(&(class_id, student_id)))
    }

    async fn class_students(&self, class_id: i64) -> StoreResult<Vec<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .enrollments
            .iter()
            .filter(|(c, _)| *c == class_id)
            .filter_map(|(_, student)| tables.users.get(student).cloned())
            .collect())
    }

    async fn student_class_ids(&self, student_id: i64) -> StoreResult<Vec<i64>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .enrollments
            .iter()
            .filter(|(_, s)| *s == student_id)
            .map(|(class, _)| *class)
            .collect())
    }

    async fn add_class_subject(&self, link: &ClassSubject) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let key = (link.class_id, link.subject_id);
        if tables.class_subjects.contains_key(&key) {
            return Err(Error::conflict("Subject already added to this class"));
        }
        tables.class_subjects.insert(key, link.clone());
        Ok(())
    }

    async fn remove_class_subject(&self, class_id: i64, subject_id: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        Ok(tables.class_subjects.remove(&(class_id, subject_id)).is_some())
    }

    async fn class_subjects(&self, class_id: i64) -> StoreResult<Vec<ClassSubject>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .class_subjects
            .values()
            .filter(|link| link.class_id == class_id)
            .cloned()
            .collect())
    }

    async fn assign_teacher(&self, class_id: i64, subject_id: i64, teacher_id: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.class_subjects.get_mut(&(class_id, subject_id)) {
            Some(link) => {
                link.teacher_id = Some(teacher_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn teacher_assignments(&self, teacher_id: i64) -> StoreResult<Vec<ClassSubject>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .class_subjects
            .values()
            .filter(|link| link.teacher_id == Some(teacher_id))
            .cloned()
            .collect())
    }

    async fn insert_lab(&self, lab: NewLab) -> StoreResult<Lab> {
        let mut tables = self.tables.lock().await;
        let lab = Lab {
            id: tables.id(),
            title: lab.title,
            description: lab.description,
            objectives: lab.objectives,
            resources: lab.resources,
            duration_hours: lab.duration_hours,
            subject_id: lab.subject_id,
            creator_id: lab.creator_id,
            status: lab.status,
            admin_comment: None,
            files: Vec::new(),
            created_at: lab.created_at,
            approved_at: None,
        };
        tables.labs.insert(lab.id, lab.clone());
        Ok(lab)
    }

    async fn lab_by_id(&self, id: i64) -> StoreResult<Option<Lab>> {
        Ok(self.tables.lock().await.labs.get(&id).cloned())
    }

    async fn list_labs(&self, filter: &LabFilter) -> StoreResult<Vec<Lab>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .labs
            .values()
            .filter(|lab| filter.matches(lab))
            .cloned()
            .collect())
    }

    async fn update_lab_content(&self, lab: &Lab) -> StoreResult<Lab> {
        let mut tables = self.tables.lock().await;
        let row = match tables.labs.get_mut(&lab.id) {
            Some(row) if lifecycle::is_editable(row.status) => row,
            other => return Err(content_refused(other.as_deref(), lab.id)),
        };
        row.title = lab.title.clone();
        row.description = lab.description.clone();
        row.objectives = lab.objectives.clone();
        row.resources = lab.resources.clone();
        row.duration_hours = lab.duration_hours;
        row.subject_id = lab.subject_id;
        Ok(row.clone())
    }

    async fn update_lab_status(&self, lab: &Lab, from: LabStatus) -> StoreResult<Lab> {
        let mut tables = self.tables.lock().await;
        let row = match tables.labs.get_mut(&lab.id) {
            Some(row) if row.status == from => row,
            other => return Err(status_refused(other.as_deref(), lab.id, from)),
        };
        row.status = lab.status;
        row.admin_comment = lab.admin_comment.clone();
        row.approved_at = lab.approved_at;
        Ok(row.clone())
    }

    async fn attach_lab_file(&self, id: i64, name: &str) -> StoreResult<Lab> {
        let mut tables = self.tables.lock().await;
        let row = match tables.labs.get_mut(&id) {
            Some(row) if lifecycle::is_editable(row.status) && !row.files.iter().any(|f| f == name) => {
                row
            }
            other => return Err(attach_refused(other.as_deref(), id, name)),
        };
        row.files.push(name.to_string());
        Ok(row.clone())
    }

    async fn delete_lab(&self, id: i64) -> StoreResult<bool> {
        Ok(self.tables.lock().await.drop_lab(id))
    }

    async fn upsert_progress(&self, progress: &LabProgress) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables
            .progress
            .insert((progress.student_id, progress.lab_id), progress.clone());
        Ok(())
    }

    async fn progress(&self, student_id: i64, lab_id: i64) -> StoreResult<Option<LabProgress>> {
        Ok(self
            .tables
            .lock()
            .await
            .progress
            .get(&(student_id, lab_id))
            .cloned())
    }

    async fn student_progress(&self, student_id: i64) -> StoreResult<Vec<LabProgress>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .progress
            .values()
            .filter(|p| p.student_id == student_id)
            .cloned()
            .collect())
    }
}
