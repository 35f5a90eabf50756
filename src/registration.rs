use rusqlite::Connection;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::db::{self, Registration, RegistrationStatus, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStep {
    AttendanceRecords,
    Enrollment,
    Registration,
}

impl CascadeStep {
    pub fn as_str(self) -> &'static str {
        match self {
            CascadeStep::AttendanceRecords => "attendance_records",
            CascadeStep::Enrollment => "enrollment",
            CascadeStep::Registration => "registration",
        }
    }
}

impl fmt::Display for CascadeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },
    #[error("registration is {from}, cannot transition to {to}")]
    InvalidTransition {
        from: RegistrationStatus,
        to: RegistrationStatus,
    },
    #[error("unenroll cascade failed at step {step}: {source}")]
    Cascade {
        step: CascadeStep,
        completed: Vec<CascadeStep>,
        source: StoreError,
    },
    #[error("student {student_id} already has an active registration for subject {subject_id}")]
    Duplicate {
        student_id: String,
        subject_id: String,
    },
    #[error("{message}")]
    Validation { message: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RegistrationError {
    pub fn code(&self) -> &'static str {
        match self {
            RegistrationError::NotFound { .. } => "not_found",
            RegistrationError::InvalidTransition { .. } => "invalid_transition",
            RegistrationError::Cascade { .. } => "cascade_failure",
            RegistrationError::Duplicate { .. } => "duplicate_registration",
            RegistrationError::Validation { .. } => "bad_params",
            RegistrationError::Store(e) => e.code(),
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            RegistrationError::InvalidTransition { from, to } => Some(serde_json::json!({
                "status": from.as_str(),
                "requested": to.as_str(),
            })),
            RegistrationError::Cascade {
                step, completed, ..
            } => Some(serde_json::json!({
                "step": step,
                "completed": completed,
            })),
            RegistrationError::Duplicate {
                student_id,
                subject_id,
            } => Some(serde_json::json!({
                "studentId": student_id,
                "subjectId": subject_id,
            })),
            RegistrationError::Store(e) => e.details(),
            _ => None,
        }
    }
}

pub fn request(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
) -> Result<Registration, RegistrationError> {
    let student = db::get_user(conn, student_id)?.ok_or_else(|| RegistrationError::NotFound {
        what: "student",
        id: student_id.to_string(),
    })?;
    if student.role != "student" {
        return Err(RegistrationError::Validation {
            message: format!(
                "user {} has role {}, only students can register",
                student.id, student.role
            ),
        });
    }
    db::get_subject(conn, subject_id)?.ok_or_else(|| RegistrationError::NotFound {
        what: "subject",
        id: subject_id.to_string(),
    })?;
    if db::active_registration_exists(conn, student_id, subject_id)? {
        return Err(RegistrationError::Duplicate {
            student_id: student_id.to_string(),
            subject_id: subject_id.to_string(),
        });
    }
    Ok(db::insert_registration(conn, student_id, subject_id)?)
}

// Only pending -> approved and pending -> rejected are legal. Approval also
// materializes the enrollment row inside the same transaction.
pub fn transition(
    conn: &Connection,
    registration_id: &str,
    target: RegistrationStatus,
) -> Result<Registration, RegistrationError> {
    let mut reg =
        db::get_registration(conn, registration_id)?.ok_or_else(|| RegistrationError::NotFound {
            what: "registration",
            id: registration_id.to_string(),
        })?;

    if reg.status != RegistrationStatus::Pending || target == RegistrationStatus::Pending {
        return Err(RegistrationError::InvalidTransition {
            from: reg.status,
            to: target,
        });
    }

    if target == RegistrationStatus::Approved {
        let tx = conn.unchecked_transaction().map_err(StoreError::Tx)?;
        db::update_registration_status(&tx, &reg.id, RegistrationStatus::Approved)?;
        db::upsert_enrollment(&tx, &reg.student_id, &reg.subject_id, &reg.id)?;
        tx.commit().map_err(StoreError::Commit)?;
    } else {
        db::update_registration_status(conn, &reg.id, target)?;
    }

    reg.status = target;
    Ok(reg)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveOutcome {
    pub removed_id: String,
    pub attendance_deleted: usize,
}

// A pending or rejected row never grew an enrollment, so it gets a plain
// delete. An approved row cascades most dependent first: attendance records,
// then the enrollment row, then the registration itself. The steps run
// outside a transaction and each is idempotent, so after a mid-cascade
// failure the caller retries the same remove and the surviving steps run
// again as no-ops. The registration row goes last, which keeps the id
// resolvable until cleanup is complete.
pub fn remove(
    conn: &Connection,
    registration_id: &str,
) -> Result<RemoveOutcome, RegistrationError> {
    let reg =
        db::get_registration(conn, registration_id)?.ok_or_else(|| RegistrationError::NotFound {
            what: "registration",
            id: registration_id.to_string(),
        })?;

    if reg.status != RegistrationStatus::Approved {
        db::delete_registration(conn, &reg.id)?;
        return Ok(RemoveOutcome {
            removed_id: reg.id,
            attendance_deleted: 0,
        });
    }

    let subject =
        db::get_subject(conn, &reg.subject_id)?.ok_or_else(|| RegistrationError::NotFound {
            what: "subject",
            id: reg.subject_id.clone(),
        })?;

    let mut completed: Vec<CascadeStep> = Vec::new();

    let attendance_deleted = db::delete_attendance_for_pair(conn, &reg.student_id, &subject.name)
        .map_err(|e| cascade_failure(&reg.id, CascadeStep::AttendanceRecords, &completed, e))?;
    completed.push(CascadeStep::AttendanceRecords);

    db::delete_enrollment(conn, &reg.student_id, &reg.subject_id)
        .map_err(|e| cascade_failure(&reg.id, CascadeStep::Enrollment, &completed, e))?;
    completed.push(CascadeStep::Enrollment);

    db::delete_registration(conn, &reg.id)
        .map_err(|e| cascade_failure(&reg.id, CascadeStep::Registration, &completed, e))?;

    Ok(RemoveOutcome {
        removed_id: reg.id,
        attendance_deleted,
    })
}

fn cascade_failure(
    registration_id: &str,
    step: CascadeStep,
    completed: &[CascadeStep],
    source: StoreError,
) -> RegistrationError {
    let done: Vec<&str> = completed.iter().map(|s| s.as_str()).collect();
    tracing::error!(
        registration_id,
        step = step.as_str(),
        completed = ?done,
        error = %source,
        "unenroll cascade interrupted, state is partially deleted; retry the remove to finish"
    );
    RegistrationError::Cascade {
        step,
        completed: completed.to_vec(),
        source,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub id: String,
    pub ok: bool,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// Sequential, in input order. A stale id lands as an error outcome in its own
// row and the loop moves on; only the caller's envelope validation can fail
// the whole call.
pub fn bulk_transition(
    conn: &Connection,
    ids: &[String],
    target: RegistrationStatus,
) -> Vec<BulkOutcome> {
    let mut outcomes = Vec::with_capacity(ids.len());
    for id in ids {
        outcomes.push(match transition(conn, id, target) {
            Ok(reg) => BulkOutcome {
                id: id.clone(),
                ok: true,
                outcome: reg.status.as_str(),
                message: None,
            },
            Err(e) => BulkOutcome {
                id: id.clone(),
                ok: false,
                outcome: e.code(),
                message: Some(e.to_string()),
            },
        });
    }
    outcomes
}
