use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::err::Error;
use crate::models::{LabProgress, ProgressStatus, Role, User};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressUpdate {
    pub status: Option<ProgressStatus>,
    pub score: Option<f64>,
    pub comments: Option<String>,
}

/// Students track only their own work; staff may track anyone's.
pub fn ensure_may_track(actor: &User, student_id: i64) -> Result<(), Error> {
    if actor.role == Role::Student && actor.id != student_id {
        return Err(Error::forbidden("Students may only access their own progress"));
    }
    Ok(())
}

pub fn record(
    existing: Option<LabProgress>,
    student_id: i64,
    lab_id: i64,
    actor: &User,
    update: ProgressUpdate,
    now: DateTime<Utc>,
) -> Result<LabProgress, Error> {
    let mut progress = existing.unwrap_or(LabProgress {
        student_id,
        lab_id,
        status: ProgressStatus::InProgress,
        score: None,
        comments: None,
        started_at: Some(now),
        completed_at: None,
        updated_at: now,
    });

    if let Some(status) = update.status {
        progress.status = status;
        match status {
            ProgressStatus::NotStarted => {}
            ProgressStatus::InProgress => {
                progress.started_at.get_or_insert(now);
            }
            ProgressStatus::Completed => {
                progress.started_at.get_or_insert(now);
                progress.completed_at.get_or_insert(now);
            }
        }
    }

    if let Some(score) = update.score {
        if actor.role == Role::Student {
            return Err(Error::forbidden("Only teachers and administrators grade labs"));
        }
        if !(0.0..=100.0).contains(&score) {
            return Err(Error::invalid("`score` must be between 0 and 100"));
        }
        progress.score = Some(score);
    }

    if update.comments.is_some() {
        progress.comments = update.comments;
    }
    progress.updated_at = now;
    Ok(progress)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StudentStats {
    pub student_id: i64,
    pub name: String,
    pub email: String,
    pub completed: usize,
    pub in_progress: usize,
    pub not_started: usize,
    pub avg_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LabCompletion {
    pub lab_id: i64,
    pub completed: usize,
    pub in_progress: usize,
    pub not_started: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassProgress {
    pub student_count: usize,
    pub student_stats: Vec<StudentStats>,
    pub lab_completion: Vec<LabCompletion>,
}

fn bump(status: ProgressStatus, completed: &mut usize, in_progress: &mut usize, not_started: &mut usize) {
    match status {
        ProgressStatus::Completed => *completed += 1,
        ProgressStatus::InProgress => *in_progress += 1,
        ProgressStatus::NotStarted => *not_started += 1,
    }
}

/// Per-student and per-lab tallies for one class roster.
pub fn summarize(students: &[User], entries: &[LabProgress]) -> ClassProgress {
    let mut labs: BTreeMap<i64, LabCompletion> = BTreeMap::new();
    let mut student_stats = Vec::with_capacity(students.len());

    for student in students {
        let mut stats = StudentStats {
            student_id: student.id,
            name: format!("{} {}", student.first_name, student.last_name),
            email: student.email.clone(),
            ..StudentStats::default()
        };
        let mut scores = Vec::new();
        for entry in entries.iter().filter(|e| e.student_id == student.id) {
            bump(
                entry.status,
                &mut stats.completed,
                &mut stats.in_progress,
                &mut stats.not_started,
            );
            if entry.status == ProgressStatus::Completed {
                scores.extend(entry.score);
            }
            let lab = labs.entry(entry.lab_id).or_insert_with(|| LabCompletion {
                lab_id: entry.lab_id,
                ..LabCompletion::default()
            });
            bump(entry.status, &mut lab.completed, &mut lab.in_progress, &mut lab.not_started);
        }
        if !scores.is_empty() {
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            stats.avg_score = (mean * 100.0).round() / 100.0;
        }
        student_stats.push(stats);
    }

    ClassProgress {
        student_count: students.len(),
        student_stats,
        lab_completion: labs.into_values().collect(),
    }
}
