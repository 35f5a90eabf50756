use crate::db::{self, RegistrationStatus};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str, get_required_str_array};
use crate::ipc::types::{AppState, Request};
use crate::registration;
use rusqlite::Connection;
use serde_json::json;

// `pending` is where registrations start, never where a decision lands.
fn parse_decision(raw: &str) -> Result<RegistrationStatus, HandlerErr> {
    match raw {
        "approved" => Ok(RegistrationStatus::Approved),
        "rejected" => Ok(RegistrationStatus::Rejected),
        _ => Err(HandlerErr::bad_params(
            "status must be approved or rejected",
        )),
    }
}

fn registrations_request(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let reg = registration::request(conn, &student_id, &subject_id)?;
    Ok(json!({ "registration": reg }))
}

fn registrations_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let status = match get_optional_str(params, "status") {
        Some(raw) => Some(RegistrationStatus::parse(&raw).ok_or_else(|| {
            HandlerErr::bad_params("status must be pending, approved or rejected")
        })?),
        None => None,
    };
    let student_id = get_optional_str(params, "studentId");
    let rows = db::list_registrations(conn, status, student_id.as_deref())?;
    Ok(json!({ "registrations": rows }))
}

fn registrations_transition(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let registration_id = get_required_str(params, "registrationId")?;
    let target = parse_decision(&get_required_str(params, "status")?)?;
    let reg = registration::transition(conn, &registration_id, target)?;
    Ok(json!({ "registration": reg }))
}

fn registrations_bulk_transition(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let ids = get_required_str_array(params, "registrationIds")?;
    if ids.is_empty() {
        return Err(HandlerErr::bad_params("registrationIds must not be empty"));
    }
    let target = parse_decision(&get_required_str(params, "status")?)?;

    let outcomes = registration::bulk_transition(conn, &ids, target);
    let ok_count = outcomes.iter().filter(|o| o.ok).count();
    let error_count = outcomes.len() - ok_count;
    Ok(json!({
        "outcomes": outcomes,
        "okCount": ok_count,
        "errorCount": error_count,
    }))
}

fn registrations_remove(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let registration_id = get_required_str(params, "registrationId")?;
    let out = registration::remove(conn, &registration_id)?;
    Ok(json!({
        "removedId": out.removed_id,
        "attendanceDeleted": out.attendance_deleted,
    }))
}

fn handle_registrations_request(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match registrations_request(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_registrations_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match registrations_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_registrations_transition(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match registrations_transition(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_registrations_bulk_transition(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match registrations_bulk_transition(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_registrations_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match registrations_remove(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "registrations.request" => Some(handle_registrations_request(state, req)),
        "registrations.list" => Some(handle_registrations_list(state, req)),
        "registrations.transition" => Some(handle_registrations_transition(state, req)),
        "registrations.bulkTransition" => Some(handle_registrations_bulk_transition(state, req)),
        "registrations.remove" => Some(handle_registrations_remove(state, req)),
        _ => None,
    }
}
