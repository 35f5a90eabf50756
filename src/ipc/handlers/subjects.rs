use crate::db;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn subjects_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let department = get_optional_str(params, "department");

    // Attendance records key on the subject name, so names are unique.
    if db::subject_by_name(conn, &name)?.is_some() {
        return Err(HandlerErr::bad_params(format!(
            "subject name already in use: {}",
            name
        )));
    }

    let subject = db::insert_subject(conn, &name, department.as_deref())?;
    Ok(json!({ "subject": subject }))
}

fn subjects_enrolled_students(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let subject = db::get_subject(conn, &subject_id)?
        .ok_or_else(|| HandlerErr::not_found(format!("subject not found: {}", subject_id)))?;
    let students = db::students_enrolled_in_subject(conn, &subject.id)?;
    Ok(json!({ "subjectId": subject.id, "students": students }))
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match subjects_create(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };
    match db::list_subjects(conn) {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

fn handle_subjects_enrolled_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match subjects_enrolled_students(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.enrolledStudents" => Some(handle_subjects_enrolled_students(state, req)),
        _ => None,
    }
}
