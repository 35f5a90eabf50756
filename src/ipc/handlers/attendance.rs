use crate::db::{self, AttendanceStatus, StoreError};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_date, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::stats::{self, PeriodScope};
use rusqlite::Connection;
use serde_json::json;

struct MarkEntry {
    student_id: String,
    status: AttendanceStatus,
}

fn parse_marks(params: &serde_json::Value) -> Result<Vec<MarkEntry>, HandlerErr> {
    let Some(arr) = params.get("marks").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing marks"));
    };
    if arr.is_empty() {
        return Err(HandlerErr::bad_params("marks must not be empty"));
    }
    let mut out = Vec::with_capacity(arr.len());
    for entry in arr {
        let student_id = get_required_str(entry, "studentId")?;
        let raw = get_required_str(entry, "status")?;
        let status = AttendanceStatus::parse(&raw).ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "status must be present, absent or late".to_string(),
            details: Some(json!({ "value": raw })),
        })?;
        out.push(MarkEntry { student_id, status });
    }
    Ok(out)
}

fn attendance_session_roster(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let date = get_required_date(params, "date")?;
    let subject = db::get_subject(conn, &subject_id)?
        .ok_or_else(|| HandlerErr::not_found(format!("subject not found: {}", subject_id)))?;
    let roster = stats::session_roster(conn, &subject, &date)?;
    Ok(json!({
        "subjectId": subject.id,
        "subject": subject.name,
        "date": date,
        "roster": roster,
    }))
}

// Batched upsert for one subject session. Entries whose student is not
// enrolled are rejected per entry rather than failing the batch.
fn attendance_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let faculty_id = get_required_str(params, "facultyId")?;
    let date = get_required_date(params, "date")?;
    let marks = parse_marks(params)?;

    let subject = db::get_subject(conn, &subject_id)?
        .ok_or_else(|| HandlerErr::not_found(format!("subject not found: {}", subject_id)))?;
    db::get_user(conn, &faculty_id)?
        .ok_or_else(|| HandlerErr::not_found(format!("faculty not found: {}", faculty_id)))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::from(StoreError::Tx(e)))?;
    let mut records = Vec::new();
    let mut rejected = Vec::new();
    for m in marks {
        if !db::enrollment_exists(&tx, &m.student_id, &subject.id)? {
            rejected.push(json!({
                "studentId": m.student_id,
                "code": "not_enrolled",
                "message": format!("student {} is not enrolled in {}", m.student_id, subject.name),
            }));
            continue;
        }
        let rec =
            db::upsert_attendance(&tx, &m.student_id, &subject.name, &faculty_id, &date, m.status)?;
        records.push(rec);
    }
    tx.commit()
        .map_err(|e| HandlerErr::from(StoreError::Commit(e)))?;

    Ok(json!({
        "updated": records.len(),
        "records": records,
        "rejected": rejected,
    }))
}

fn attendance_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_optional_str(params, "studentId");
    // Rows store the subject name; the filter takes the id like everything else.
    let subject_name = match get_optional_str(params, "subjectId") {
        Some(subject_id) => Some(
            db::get_subject(conn, &subject_id)?
                .ok_or_else(|| {
                    HandlerErr::not_found(format!("subject not found: {}", subject_id))
                })?
                .name,
        ),
        None => None,
    };
    let records = db::list_attendance(conn, student_id.as_deref(), subject_name.as_deref())?;
    Ok(json!({ "records": records }))
}

fn attendance_student_report(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let student = db::get_user(conn, &student_id)?
        .ok_or_else(|| HandlerErr::not_found(format!("student not found: {}", student_id)))?;
    let report = stats::student_report(conn, &student.id)?;
    Ok(json!({ "studentName": student.name, "report": report }))
}

fn attendance_period_stats(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let from = get_required_date(params, "from")?;
    let to = get_required_date(params, "to")?;
    if from > to {
        return Err(HandlerErr::bad_params("from must not be after to"));
    }

    let student_id = get_optional_str(params, "studentId");
    let subject_id = get_optional_str(params, "subjectId");
    match (student_id, subject_id) {
        (Some(student_id), None) => {
            let student = db::get_user(conn, &student_id)?.ok_or_else(|| {
                HandlerErr::not_found(format!("student not found: {}", student_id))
            })?;
            let records = db::list_attendance(conn, Some(&student.id), None)?;
            let scope = PeriodScope::Student(&student.id);
            let window = stats::period_stats(&records, scope, &from, &to);
            let days = stats::daily_breakdown(&records, scope, &from, &to);
            Ok(json!({
                "studentId": student.id,
                "from": from,
                "to": to,
                "stats": window,
                "days": days,
            }))
        }
        (None, Some(subject_id)) => {
            let subject = db::get_subject(conn, &subject_id)?.ok_or_else(|| {
                HandlerErr::not_found(format!("subject not found: {}", subject_id))
            })?;
            let records = db::list_attendance(conn, None, Some(&subject.name))?;
            let scope = PeriodScope::Subject(&subject.name);
            let window = stats::period_stats(&records, scope, &from, &to);
            let days = stats::daily_breakdown(&records, scope, &from, &to);
            Ok(json!({
                "subjectId": subject.id,
                "subject": subject.name,
                "from": from,
                "to": to,
                "stats": window,
                "days": days,
            }))
        }
        _ => Err(HandlerErr::bad_params(
            "provide exactly one of studentId or subjectId",
        )),
    }
}

fn handle_attendance_session_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_session_roster(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_mark(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_student_report(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_student_report(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_period_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_period_stats(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.sessionRoster" => Some(handle_attendance_session_roster(state, req)),
        "attendance.mark" => Some(handle_attendance_mark(state, req)),
        "attendance.list" => Some(handle_attendance_list(state, req)),
        "attendance.studentReport" => Some(handle_attendance_student_report(state, req)),
        "attendance.periodStats" => Some(handle_attendance_period_stats(state, req)),
        _ => None,
    }
}
