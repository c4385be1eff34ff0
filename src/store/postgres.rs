use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::{attach_refused, content_refused, status_refused, Store, StoreResult};
use crate::enrollment;
use crate::err::Error;
use crate::models::{
    Class, ClassSubject, Lab, LabFilter, LabProgress, LabStatus, NewClass, NewLab, NewUser, Subject,
    User, UserSession,
};

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Turns constraint violations into `Conflict`, everything else into a database error.
fn constraint(err: sqlx::Error, message: &str) -> Error {
    match &err {
        sqlx::Error::Database(db)
            if matches!(
                db.code().as_deref(),
                Some(UNIQUE_VIOLATION) | Some(FOREIGN_KEY_VIOLATION)
            ) =>
        {
            Error::conflict(message)
        }
        _ => Error::from(err),
    }
}

fn count(n: i64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str) -> Result<PgStore, Error> {
        let pool = PgPoolOptions::new().max_connections(8).connect(url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        log::info!("Connected to Postgres, migrations applied");
        Ok(PgStore { pool })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (first_name, last_name, email, role, password_hash) \
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(user.role)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| constraint(err, "Email already registered"))
    }

    async fn user_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE lower(email) = lower($1) LIMIT 1")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let res = sqlx::query(
            "UPDATE users SET first_name = $2, last_name = $3, email = $4, password_hash = $5 \
             WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .execute(&self.pool)
        .await
        .map_err(|err| constraint(err, "Email already in use"))?;
        if res.rows_affected() < 1 {
            return Err(Error::not_found("user", format!("User `{}` not found", user.id)));
        }
        Ok(())
    }

    async fn delete_user(&self, id: i64) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() >= 1)
    }

    async fn insert_session(&self, session: &UserSession) -> StoreResult<()> {
        let res = sqlx::query("INSERT INTO user_sessions (ssid, belongs_to, expires_at) VALUES ($1, $2, $3)")
            .bind(&session.ssid)
            .bind(session.belongs_to)
            .bind(session.expires_at)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() < 1 {
            return Err(Error::InternalError {
                kind: "DatabaseError",
                message: "Could not store session".to_string(),
            });
        }
        Ok(())
    }

    async fn session_by_id(&self, ssid: &str) -> StoreResult<Option<UserSession>> {
        Ok(
            sqlx::query_as::<_, UserSession>("SELECT * FROM user_sessions WHERE ssid = $1 LIMIT 1")
                .bind(ssid)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn delete_session(&self, ssid: &str) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM user_sessions WHERE ssid = $1")
            .bind(ssid)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() >= 1)
    }

    async fn insert_subject(&self, name: &str, description: Option<String>) -> StoreResult<Subject> {
        sqlx::query_as::<_, Subject>("INSERT INTO subjects (name, description) VALUES ($1, $2) RETURNING *")
            .bind(name)
            .bind(description)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| constraint(err, "Subject with this name already exists"))
    }

    async fn subject_by_id(&self, id: i64) -> StoreResult<Option<Subject>> {
        Ok(sqlx::query_as::<_, Subject>("SELECT * FROM subjects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_subjects(&self) -> StoreResult<Vec<Subject>> {
        Ok(sqlx::query_as::<_, Subject>("SELECT * FROM subjects ORDER BY id")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn update_subject(&self, subject: &Subject) -> StoreResult<()> {
        let res = sqlx::query("UPDATE subjects SET name = $2, description = $3 WHERE id = $1")
            .bind(subject.id)
            .bind(&subject.name)
            .bind(&subject.description)
            .execute(&self.pool)
            .await
            .map_err(|err| constraint(err, "Subject with this name already exists"))?;
        if res.rows_affected() < 1 {
            return Err(Error::not_found("subject", format!("Subject `{}` not found", subject.id)));
        }
        Ok(())
    }

    async fn delete_subject(&self, id: i64) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM subjects WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|err| constraint(err, "Subject still has labs"))?;
        Ok(res.rows_affected() >= 1)
    }

    async fn insert_class(&self, class: NewClass) -> StoreResult<Class> {
        sqlx::query_as::<_, Class>(
            "INSERT INTO classes (name, capacity, description) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(&class.name)
        .bind(class.capacity)
        .bind(&class.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| constraint(err, "Class with this name already exists"))
    }

    async fn class_by_id(&self, id: i64) -> StoreResult<Option<Class>> {
        Ok(sqlx::query_as::<_, Class>("SELECT * FROM classes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_classes(&self) -> StoreResult<Vec<Class>> {
        Ok(sqlx::query_as::<_, Class>("SELECT * FROM classes ORDER BY id")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn update_class(&self, class: &Class) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, Class>("SELECT * FROM classes WHERE id = $1 FOR UPDATE")
            .bind(class.id)
            .fetch_optional(&mut tx)
            .await?
            .ok_or_else(|| Error::not_found("class", format!("Class `{}` not found", class.id)))?;
        let enrolled: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrollments WHERE class_id = $1")
            .bind(class.id)
            .fetch_one(&mut tx)
            .await?;
        enrollment::ensure_resizable(&current, class.capacity, count(enrolled))?;
        sqlx::query("UPDATE classes SET name = $2, capacity = $3, description = $4 WHERE id = $1")
            .bind(class.id)
            .bind(&class.name)
            .bind(class.capacity)
            .bind(&class.description)
            .execute(&mut tx)
            .await
            .map_err(|err| constraint(err, "Class with this name already exists"))?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_class(&self, id: i64) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM classes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() >= 1)
    }

    async fn enroll(&self, class_id: i64, student_id: i64) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        // Row lock serializes concurrent enrollments into the same class.
        let class = sqlx::query_as::<_, Class>("SELECT * FROM classes WHERE id = $1 FOR UPDATE")
            .bind(class_id)
            .fetch_optional(&mut tx)
            .await?
            .ok_or_else(|| Error::not_found("class", format!("Class `{}` not found", class_id)))?;
        let already: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM enrollments WHERE class_id = $1 AND student_id = $2)",
        )
        .bind(class_id)
        .bind(student_id)
        .fetch_one(&mut tx)
        .await?;
        if already {
            return Err(Error::conflict("Student already in this class"));
        }
        let enrolled: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrollments WHERE class_id = $1")
            .bind(class_id)
            .fetch_one(&mut tx)
            .await?;
        enrollment::admit(&class, count(enrolled))?;
        sqlx::query("INSERT INTO enrollments (class_id, student_id) VALUES ($1, $2)")
            .bind(class_id)
            .bind(student_id)
            .execute(&mut tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn unenroll(&self, class_id: i64, student_id: i64) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM enrollments WHERE class_id = $1 AND student_id = $2")
            .bind(class_id)
            .bind(student_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() >= 1)
    }

    async fn class_students(&self, class_id: i64) -> StoreResult<Vec<User>> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT u.* FROM users u JOIN enrollments e ON e.student_id = u.id \
             WHERE e.class_id = $1 ORDER BY u.id",
        )
        .bind(class_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn student_class_ids(&self, student_id: i64) -> StoreResult<Vec<i64>> {
        Ok(
            sqlx::query_scalar("SELECT class_id FROM enrollments WHERE student_id = $1 ORDER BY class_id")
                .bind(student_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn add_class_subject(&self, link: &ClassSubject) -> StoreResult<()> {
        sqlx::query("INSERT INTO class_subjects (class_id, subject_id, teacher_id) VALUES ($1, $2, $3)")
            .bind(link.class_id)
            .bind(link.subject_id)
            .bind(link.teacher_id)
            .execute(&self.pool)
            .await
            .map_err(|err| constraint(err, "Subject already added to this class"))?;
        Ok(())
    }

    async fn remove_class_subject(&self, class_id: i64, subject_id: i64) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM class_subjects WHERE class_id = $1 AND subject_id = $2")
            .bind(class_id)
            .bind(subject_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() >= 1)
    }

    async fn class_subjects(&self, class_id: i64) -> StoreResult<Vec<ClassSubject>> {
        Ok(sqlx::query_as::<_, ClassSubject>(
            "SELECT * FROM class_subjects WHERE class_id = $1 ORDER BY subject_id",
        )
        .bind(class_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn assign_teacher(&self, class_id: i64, subject_id: i64, teacher_id: i64) -> StoreResult<bool> {
        let res = sqlx::query(
            "UPDATE class_subjects SET teacher_id = $3 WHERE class_id = $1 AND subject_id = $2",
        )
        .bind(class_id)
        .bind(subject_id)
        .bind(teacher_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() >= 1)
    }

    async fn teacher_assignments(&self, teacher_id: i64) -> StoreResult<Vec<ClassSubject>> {
        Ok(sqlx::query_as::<_, ClassSubject>(
            "SELECT * FROM class_subjects WHERE teacher_id = $1 ORDER BY class_id, subject_id",
        )
        .bind(teacher_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_lab(&self, lab: NewLab) -> StoreResult<Lab> {
        Ok(sqlx::query_as::<_, Lab>(
            "INSERT INTO labs (title, description, objectives, resources, duration_hours, \
             subject_id, creator_id, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
        )
        .bind(&lab.title)
        .bind(&lab.description)
        .bind(&lab.objectives)
        .bind(&lab.resources)
        .bind(lab.duration_hours)
        .bind(lab.subject_id)
        .bind(lab.creator_id)
        .bind(lab.status)
        .bind(lab.created_at)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn lab_by_id(&self, id: i64) -> StoreResult<Option<Lab>> {
        Ok(sqlx::query_as::<_, Lab>("SELECT * FROM labs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_labs(&self, filter: &LabFilter) -> StoreResult<Vec<Lab>> {
        Ok(sqlx::query_as::<_, Lab>(
            "SELECT * FROM labs \
             WHERE ($1::lab_status IS NULL OR status = $1) \
               AND ($2::BIGINT IS NULL OR subject_id = $2) \
             ORDER BY id",
        )
        .bind(filter.status)
        .bind(filter.subject_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn update_lab_content(&self, lab: &Lab) -> StoreResult<Lab> {
        let row = sqlx::query_as::<_, Lab>(
            "UPDATE labs SET title = $2, description = $3, objectives = $4, resources = $5, \
             duration_hours = $6, subject_id = $7 \
             WHERE id = $1 AND status IN ('pending', 'rejected') RETURNING *",
        )
        .bind(lab.id)
        .bind(&lab.title)
        .bind(&lab.description)
        .bind(&lab.objectives)
        .bind(&lab.resources)
        .bind(lab.duration_hours)
        .bind(lab.subject_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| constraint(err, "Subject does not exist"))?;
        match row {
            Some(row) => Ok(row),
            None => Err(content_refused(self.lab_by_id(lab.id).await?.as_ref(), lab.id)),
        }
    }

    async fn update_lab_status(&self, lab: &Lab, from: LabStatus) -> StoreResult<Lab> {
        let row = sqlx::query_as::<_, Lab>(
            "UPDATE labs SET status = $2, admin_comment = $3, approved_at = $4 \
             WHERE id = $1 AND status = $5 RETURNING *",
        )
        .bind(lab.id)
        .bind(lab.status)
        .bind(&lab.admin_comment)
        .bind(lab.approved_at)
        .bind(from)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(row),
            None => Err(status_refused(self.lab_by_id(lab.id).await?.as_ref(), lab.id, from)),
        }
    }

    async fn attach_lab_file(&self, id: i64, name: &str) -> StoreResult<Lab> {
        let row = sqlx::query_as::<_, Lab>(
            "UPDATE labs SET files = array_append(files, $2) \
             WHERE id = $1 AND status IN ('pending', 'rejected') AND NOT ($2 = ANY (files)) \
             RETURNING *",
        )
        .bind(id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(row),
            None => Err(attach_refused(self.lab_by_id(id).await?.as_ref(), id, name)),
        }
    }

    async fn delete_lab(&self, id: i64) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM labs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() >= 1)
    }

    async fn upsert_progress(&self, progress: &LabProgress) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO lab_progress (student_id, lab_id, status, score, comments, started_at, \
             completed_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (student_id, lab_id) DO UPDATE SET status = EXCLUDED.status, \
             score = EXCLUDED.score, comments = EXCLUDED.comments, started_at = EXCLUDED.started_at, \
             completed_at = EXCLUDED.completed_at, updated_at = EXCLUDED.updated_at",
        )
        .bind(progress.student_id)
        .bind(progress.lab_id)
        .bind(progress.status)
        .bind(progress.score)
        .bind(&progress.comments)
        .bind(progress.started_at)
        .bind(progress.completed_at)
        .bind(progress.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn progress(&self, student_id: i64, lab_id: i64) -> StoreResult<Option<LabProgress>> {
        Ok(sqlx::query_as::<_, LabProgress>(
            "SELECT * FROM lab_progress WHERE student_id = $1 AND lab_id = $2",
        )
        .bind(student_id)
        .bind(lab_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn student_progress(&self, student_id: i64) -> StoreResult<Vec<LabProgress>> {
        Ok(sqlx::query_as::<_, LabProgress>(
            "SELECT * FROM lab_progress WHERE student_id = $1 ORDER BY lab_id",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?)
    }
}
