use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("campus.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            role TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            department TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS registrations(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registrations_student ON registrations(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registrations_subject ON registrations(subject_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registrations_status ON registrations(status)",
        [],
    )?;

    // Enrollment is materialized rather than derived so the unenroll cascade
    // has a middle step that can be observed and retried on its own.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            registration_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY(student_id, subject_id),
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(registration_id) REFERENCES registrations(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_subject ON enrollments(subject_id)",
        [],
    )?;

    // Attendance keys subjects by name (rosters and the cascade both address
    // them that way), hence the UNIQUE constraint on subjects.name above.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            faculty_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            UNIQUE(student_id, subject, date),
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(faculty_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance_records(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_subject_date ON attendance_records(subject, date)",
        [],
    )?;

    Ok(conn)
}

pub fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Query(rusqlite::Error),
    #[error("insert into {table} failed: {source}")]
    Insert {
        table: &'static str,
        source: rusqlite::Error,
    },
    #[error("update of {table} failed: {source}")]
    Update {
        table: &'static str,
        source: rusqlite::Error,
    },
    #[error("delete from {table} failed: {source}")]
    Delete {
        table: &'static str,
        source: rusqlite::Error,
    },
    #[error("failed to begin transaction: {0}")]
    Tx(rusqlite::Error),
    #[error("failed to commit transaction: {0}")]
    Commit(rusqlite::Error),
    #[error("bad {column} value in {table}: {value}")]
    BadColumn {
        table: &'static str,
        column: &'static str,
        value: String,
    },
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Query(_) | StoreError::BadColumn { .. } => "db_query_failed",
            StoreError::Insert { .. } => "db_insert_failed",
            StoreError::Update { .. } => "db_update_failed",
            StoreError::Delete { .. } => "db_delete_failed",
            StoreError::Tx(_) => "db_tx_failed",
            StoreError::Commit(_) => "db_commit_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            StoreError::Insert { table, .. }
            | StoreError::Update { table, .. }
            | StoreError::Delete { table, .. } => Some(serde_json::json!({ "table": table })),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Pending,
    Approved,
    Rejected,
}

impl RegistrationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RegistrationStatus::Pending => "pending",
            RegistrationStatus::Approved => "approved",
            RegistrationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(RegistrationStatus::Pending),
            "approved" => Some(RegistrationStatus::Approved),
            "rejected" => Some(RegistrationStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "late" => Some(AttendanceStatus::Late),
            _ => None,
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub role: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub department: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: String,
    pub student_id: String,
    pub subject_id: String,
    pub status: RegistrationStatus,
    pub created_at: String,
}

// Registration joined with display names for list screens.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationListRow {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub subject_id: String,
    pub subject_name: String,
    pub status: RegistrationStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub subject: String,
    pub faculty_id: String,
    pub date: String,
    pub status: AttendanceStatus,
}

// ---- users ----

pub fn insert_user(conn: &Connection, name: &str, role: &str) -> Result<User, StoreError> {
    let user = User {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        role: role.to_string(),
        created_at: now_iso(),
    };
    conn.execute(
        "INSERT INTO users(id, name, role, created_at) VALUES(?, ?, ?, ?)",
        (&user.id, &user.name, &user.role, &user.created_at),
    )
    .map_err(|e| StoreError::Insert {
        table: "users",
        source: e,
    })?;
    Ok(user)
}

pub fn list_users(conn: &Connection, role: Option<&str>) -> Result<Vec<User>, StoreError> {
    fn map_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
        Ok(User {
            id: r.get(0)?,
            name: r.get(1)?,
            role: r.get(2)?,
            created_at: r.get(3)?,
        })
    }
    let result = match role {
        Some(role) => conn
            .prepare("SELECT id, name, role, created_at FROM users WHERE role = ? ORDER BY name, id")
            .and_then(|mut stmt| {
                stmt.query_map([role], map_row)
                    .and_then(|it| it.collect::<rusqlite::Result<Vec<_>>>())
            }),
        None => conn
            .prepare("SELECT id, name, role, created_at FROM users ORDER BY name, id")
            .and_then(|mut stmt| {
                stmt.query_map([], map_row)
                    .and_then(|it| it.collect::<rusqlite::Result<Vec<_>>>())
            }),
    };
    result.map_err(StoreError::Query)
}

pub fn get_user(conn: &Connection, user_id: &str) -> Result<Option<User>, StoreError> {
    conn.query_row(
        "SELECT id, name, role, created_at FROM users WHERE id = ?",
        [user_id],
        |r| {
            Ok(User {
                id: r.get(0)?,
                name: r.get(1)?,
                role: r.get(2)?,
                created_at: r.get(3)?,
            })
        },
    )
    .optional()
    .map_err(StoreError::Query)
}

// ---- subjects ----

pub fn insert_subject(
    conn: &Connection,
    name: &str,
    department: Option<&str>,
) -> Result<Subject, StoreError> {
    let subject = Subject {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        department: department.map(|d| d.to_string()),
        created_at: now_iso(),
    };
    conn.execute(
        "INSERT INTO subjects(id, name, department, created_at) VALUES(?, ?, ?, ?)",
        (
            &subject.id,
            &subject.name,
            &subject.department,
            &subject.created_at,
        ),
    )
    .map_err(|e| StoreError::Insert {
        table: "subjects",
        source: e,
    })?;
    Ok(subject)
}

pub fn list_subjects(conn: &Connection) -> Result<Vec<Subject>, StoreError> {
    conn.prepare("SELECT id, name, department, created_at FROM subjects ORDER BY name")
        .and_then(|mut stmt| {
            stmt.query_map([], |r| {
                Ok(Subject {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    department: r.get(2)?,
                    created_at: r.get(3)?,
                })
            })
            .and_then(|it| it.collect::<rusqlite::Result<Vec<_>>>())
        })
        .map_err(StoreError::Query)
}

pub fn get_subject(conn: &Connection, subject_id: &str) -> Result<Option<Subject>, StoreError> {
    conn.query_row(
        "SELECT id, name, department, created_at FROM subjects WHERE id = ?",
        [subject_id],
        |r| {
            Ok(Subject {
                id: r.get(0)?,
                name: r.get(1)?,
                department: r.get(2)?,
                created_at: r.get(3)?,
            })
        },
    )
    .optional()
    .map_err(StoreError::Query)
}

pub fn subject_by_name(conn: &Connection, name: &str) -> Result<Option<Subject>, StoreError> {
    conn.query_row(
        "SELECT id, name, department, created_at FROM subjects WHERE name = ?",
        [name],
        |r| {
            Ok(Subject {
                id: r.get(0)?,
                name: r.get(1)?,
                department: r.get(2)?,
                created_at: r.get(3)?,
            })
        },
    )
    .optional()
    .map_err(StoreError::Query)
}

// ---- registrations ----

pub fn insert_registration(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
) -> Result<Registration, StoreError> {
    let registration = Registration {
        id: Uuid::new_v4().to_string(),
        student_id: student_id.to_string(),
        subject_id: subject_id.to_string(),
        status: RegistrationStatus::Pending,
        created_at: now_iso(),
    };
    conn.execute(
        "INSERT INTO registrations(id, student_id, subject_id, status, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &registration.id,
            &registration.student_id,
            &registration.subject_id,
            registration.status.as_str(),
            &registration.created_at,
        ),
    )
    .map_err(|e| StoreError::Insert {
        table: "registrations",
        source: e,
    })?;
    Ok(registration)
}

pub fn get_registration(
    conn: &Connection,
    registration_id: &str,
) -> Result<Option<Registration>, StoreError> {
    let row: Option<(String, String, String, String, String)> = conn
        .query_row(
            "SELECT id, student_id, subject_id, status, created_at
             FROM registrations
             WHERE id = ?",
            [registration_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
        .map_err(StoreError::Query)?;
    let Some((id, student_id, subject_id, status_raw, created_at)) = row else {
        return Ok(None);
    };
    let status = RegistrationStatus::parse(&status_raw).ok_or_else(|| StoreError::BadColumn {
        table: "registrations",
        column: "status",
        value: status_raw.clone(),
    })?;
    Ok(Some(Registration {
        id,
        student_id,
        subject_id,
        status,
        created_at,
    }))
}

pub fn list_registrations(
    conn: &Connection,
    status: Option<RegistrationStatus>,
    student_id: Option<&str>,
) -> Result<Vec<RegistrationListRow>, StoreError> {
    let mut sql = String::from(
        "SELECT r.id, r.student_id, u.name, r.subject_id, s.name, r.status, r.created_at
         FROM registrations r
         JOIN users u ON u.id = r.student_id
         JOIN subjects s ON s.id = r.subject_id",
    );
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<String> = Vec::new();
    if let Some(status) = status {
        clauses.push("r.status = ?");
        binds.push(status.as_str().to_string());
    }
    if let Some(student_id) = student_id {
        clauses.push("r.student_id = ?");
        binds.push(student_id.to_string());
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY r.created_at, r.id");

    let raw: Vec<(String, String, String, String, String, String, String)> = conn
        .prepare(&sql)
        .and_then(|mut stmt| {
            stmt.query_map(rusqlite::params_from_iter(binds.iter()), |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                ))
            })
            .and_then(|it| it.collect::<rusqlite::Result<Vec<_>>>())
        })
        .map_err(StoreError::Query)?;

    let mut rows = Vec::with_capacity(raw.len());
    for (id, student_id, student_name, subject_id, subject_name, status_raw, created_at) in raw {
        let status = RegistrationStatus::parse(&status_raw).ok_or_else(|| StoreError::BadColumn {
            table: "registrations",
            column: "status",
            value: status_raw.clone(),
        })?;
        rows.push(RegistrationListRow {
            id,
            student_id,
            student_name,
            subject_id,
            subject_name,
            status,
            created_at,
        });
    }
    Ok(rows)
}

pub fn update_registration_status(
    conn: &Connection,
    registration_id: &str,
    status: RegistrationStatus,
) -> Result<usize, StoreError> {
    conn.execute(
        "UPDATE registrations SET status = ? WHERE id = ?",
        (status.as_str(), registration_id),
    )
    .map_err(|e| StoreError::Update {
        table: "registrations",
        source: e,
    })
}

pub fn delete_registration(conn: &Connection, registration_id: &str) -> Result<usize, StoreError> {
    conn.execute("DELETE FROM registrations WHERE id = ?", [registration_id])
        .map_err(|e| StoreError::Delete {
            table: "registrations",
            source: e,
        })
}

// A pending or approved registration already claims the (student, subject)
// pair. Rejected rows stay behind for audit and do not block a re-request.
pub fn active_registration_exists(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
) -> Result<bool, StoreError> {
    conn.query_row(
        "SELECT 1 FROM registrations
         WHERE student_id = ? AND subject_id = ? AND status IN ('pending', 'approved')
         LIMIT 1",
        (student_id, subject_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(StoreError::Query)
}

// ---- enrollments ----

pub fn upsert_enrollment(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    registration_id: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO enrollments(student_id, subject_id, registration_id, created_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id) DO NOTHING",
        (student_id, subject_id, registration_id, now_iso()),
    )
    .map_err(|e| StoreError::Insert {
        table: "enrollments",
        source: e,
    })?;
    Ok(())
}

pub fn delete_enrollment(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
) -> Result<usize, StoreError> {
    conn.execute(
        "DELETE FROM enrollments WHERE student_id = ? AND subject_id = ?",
        (student_id, subject_id),
    )
    .map_err(|e| StoreError::Delete {
        table: "enrollments",
        source: e,
    })
}

pub fn enrollment_exists(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
) -> Result<bool, StoreError> {
    conn.query_row(
        "SELECT 1 FROM enrollments WHERE student_id = ? AND subject_id = ?",
        (student_id, subject_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(StoreError::Query)
}

pub fn students_enrolled_in_subject(
    conn: &Connection,
    subject_id: &str,
) -> Result<Vec<User>, StoreError> {
    conn.prepare(
        "SELECT u.id, u.name, u.role, u.created_at
         FROM enrollments e
         JOIN users u ON u.id = e.student_id
         WHERE e.subject_id = ?
         ORDER BY u.name, u.id",
    )
    .and_then(|mut stmt| {
        stmt.query_map([subject_id], |r| {
            Ok(User {
                id: r.get(0)?,
                name: r.get(1)?,
                role: r.get(2)?,
                created_at: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<rusqlite::Result<Vec<_>>>())
    })
    .map_err(StoreError::Query)
}

// Subjects the student is enrolled in, as (id, name) pairs. Attendance rows
// key on the name.
pub fn enrolled_subjects_for_student(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<(String, String)>, StoreError> {
    conn.prepare(
        "SELECT s.id, s.name
         FROM enrollments e
         JOIN subjects s ON s.id = e.subject_id
         WHERE e.student_id = ?
         ORDER BY s.name",
    )
    .and_then(|mut stmt| {
        stmt.query_map([student_id], |r| Ok((r.get(0)?, r.get(1)?)))
            .and_then(|it| it.collect::<rusqlite::Result<Vec<_>>>())
    })
    .map_err(StoreError::Query)
}

// ---- attendance ----

// Upsert keyed on (student, subject, date). Re-marking a day replaces the
// status in place and keeps the original row id.
pub fn upsert_attendance(
    conn: &Connection,
    student_id: &str,
    subject: &str,
    faculty_id: &str,
    date: &str,
    status: AttendanceStatus,
) -> Result<AttendanceRecord, StoreError> {
    let fresh_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO attendance_records(id, student_id, subject, faculty_id, date, status)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject, date) DO UPDATE SET
           status = excluded.status,
           faculty_id = excluded.faculty_id",
        (
            &fresh_id,
            student_id,
            subject,
            faculty_id,
            date,
            status.as_str(),
        ),
    )
    .map_err(|e| StoreError::Insert {
        table: "attendance_records",
        source: e,
    })?;

    // Re-read to return the stored row: on conflict the original id survives.
    let (id, status_raw): (String, String) = conn
        .query_row(
            "SELECT id, status FROM attendance_records
             WHERE student_id = ? AND subject = ? AND date = ?",
            (student_id, subject, date),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(StoreError::Query)?;
    let stored = AttendanceStatus::parse(&status_raw).ok_or_else(|| StoreError::BadColumn {
        table: "attendance_records",
        column: "status",
        value: status_raw.clone(),
    })?;
    Ok(AttendanceRecord {
        id,
        student_id: student_id.to_string(),
        subject: subject.to_string(),
        faculty_id: faculty_id.to_string(),
        date: date.to_string(),
        status: stored,
    })
}

pub fn list_attendance(
    conn: &Connection,
    student_id: Option<&str>,
    subject: Option<&str>,
) -> Result<Vec<AttendanceRecord>, StoreError> {
    let mut sql = String::from(
        "SELECT id, student_id, subject, faculty_id, date, status FROM attendance_records",
    );
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<String> = Vec::new();
    if let Some(student_id) = student_id {
        clauses.push("student_id = ?");
        binds.push(student_id.to_string());
    }
    if let Some(subject) = subject {
        clauses.push("subject = ?");
        binds.push(subject.to_string());
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY date, subject, student_id");

    let raw: Vec<(String, String, String, String, String, String)> = conn
        .prepare(&sql)
        .and_then(|mut stmt| {
            stmt.query_map(rusqlite::params_from_iter(binds.iter()), |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                ))
            })
            .and_then(|it| it.collect::<rusqlite::Result<Vec<_>>>())
        })
        .map_err(StoreError::Query)?;

    let mut records = Vec::with_capacity(raw.len());
    for (id, student_id, subject, faculty_id, date, status_raw) in raw {
        let status = AttendanceStatus::parse(&status_raw).ok_or_else(|| StoreError::BadColumn {
            table: "attendance_records",
            column: "status",
            value: status_raw.clone(),
        })?;
        records.push(AttendanceRecord {
            id,
            student_id,
            subject,
            faculty_id,
            date,
            status,
        });
    }
    Ok(records)
}

// First cascade step of an unenroll. Deleting zero rows is fine.
pub fn delete_attendance_for_pair(
    conn: &Connection,
    student_id: &str,
    subject: &str,
) -> Result<usize, StoreError> {
    conn.execute(
        "DELETE FROM attendance_records WHERE student_id = ? AND subject = ?",
        (student_id, subject),
    )
    .map_err(|e| StoreError::Delete {
        table: "attendance_records",
        source: e,
    })
}
