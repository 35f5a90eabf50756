use crate::db;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

const ROLES: [&str; 3] = ["student", "faculty", "admin"];

fn users_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let role = get_required_str(params, "role")?;
    if !ROLES.contains(&role.as_str()) {
        return Err(HandlerErr::bad_params(
            "role must be student, faculty or admin",
        ));
    }
    let user = db::insert_user(conn, &name, &role)?;
    Ok(json!({ "user": user }))
}

fn users_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let role = get_optional_str(params, "role");
    if let Some(role) = role.as_deref() {
        if !ROLES.contains(&role) {
            return Err(HandlerErr::bad_params(
                "role must be student, faculty or admin",
            ));
        }
    }
    let users = db::list_users(conn, role.as_deref())?;
    Ok(json!({ "users": users }))
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match users_create(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    // The first dashboard paint can land before a workspace is selected.
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "users": [] }));
    };
    match users_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(handle_users_create(state, req)),
        "users.list" => Some(handle_users_list(state, req)),
        _ => None,
    }
}
