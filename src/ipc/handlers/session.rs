use crate::db;
use crate::ipc::helpers::{optional_str, require_db, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::session::{Role, SessionUser};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn load_user(conn: &Connection, user_id: &str) -> Result<Option<SessionUser>, HandlerErr> {
    let row: Option<(String, String, String, String, Option<String>)> = conn
        .query_row(
            "SELECT id, display_name, email, role, student_id FROM users WHERE id = ?",
            [user_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
        .map_err(HandlerErr::query_failed)?;
    let Some((id, display_name, email, role, student_id)) = row else {
        return Ok(None);
    };
    let role = Role::parse(&role).ok_or_else(|| {
        HandlerErr::new("db_query_failed", "stored user has an unknown role")
            .with_details(json!({ "userId": id, "role": role }))
    })?;
    Ok(Some(SessionUser {
        user_id: id,
        display_name,
        email,
        role,
        student_id,
    }))
}

fn session_open(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let user_id = required_str(req, "userId")?;
    let user = {
        let conn = require_db(state)?;
        load_user(conn, &user_id)?
    };
    let Some(user) = user else {
        return Err(HandlerErr::new("not_found", "user not found")
            .with_details(json!({ "userId": user_id })));
    };

    tracing::info!(user_id = %user.user_id, role = user.role.as_str(), "session opened");
    state.session.open(user);
    Ok(json!({
        "session": state.session.summary(),
        "user": state.session.user(),
    }))
}

fn session_close(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let closed = state.session.close();
    if let Some(u) = closed.as_ref() {
        tracing::info!(user_id = %u.user_id, "session closed");
    }
    Ok(json!({ "closed": closed.is_some() }))
}

fn session_get(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({
        "session": state.session.summary(),
        "user": state.session.user(),
    }))
}

fn users_list(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    state.session.require_staff()?;
    let mut stmt = conn
        .prepare(
            "SELECT id, display_name, email, role, student_id, created_at
             FROM users
             ORDER BY display_name",
        )
        .map_err(HandlerErr::query_failed)?;
    let users = stmt
        .query_map([], |r| {
            Ok(json!({
                "userId": r.get::<_, String>(0)?,
                "displayName": r.get::<_, String>(1)?,
                "email": r.get::<_, String>(2)?,
                "role": r.get::<_, String>(3)?,
                "studentId": r.get::<_, Option<String>>(4)?,
                "createdAt": r.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;
    Ok(json!({ "users": users }))
}

fn users_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;

    let user_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
        .map_err(HandlerErr::query_failed)?;
    // The first account can be created without a session.
    if user_count > 0 {
        state.session.require_admin()?;
    }

    let display_name = required_str(req, "displayName")?;
    let email = required_str(req, "email")?.to_lowercase();
    if !email.contains('@') {
        return Err(HandlerErr::bad_params("email must contain @"));
    }
    let role_raw = required_str(req, "role")?;
    let Some(role) = Role::parse(&role_raw) else {
        return Err(HandlerErr::bad_params("role must be one of: admin, teacher, student")
            .with_details(json!({ "role": role_raw })));
    };

    let student_id = optional_str(req, "studentId");
    match (role, student_id.as_deref()) {
        (Role::Student, None) => {
            return Err(HandlerErr::bad_params("student users require studentId"));
        }
        (Role::Student, Some(sid)) => {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM students WHERE id = ?", [sid], |r| r.get(0))
                .optional()
                .map_err(HandlerErr::query_failed)?;
            if found.is_none() {
                return Err(HandlerErr::new("not_found", "student not found")
                    .with_details(json!({ "studentId": sid })));
            }
        }
        (_, Some(_)) => {
            return Err(HandlerErr::bad_params("only student users may link a studentId"));
        }
        (_, None) => {}
    }

    let taken: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE email = ?", [&email], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::query_failed)?;
    if taken.is_some() {
        return Err(HandlerErr::new("conflict", "email already registered")
            .with_details(json!({ "email": email })));
    }

    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, display_name, email, role, student_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            &display_name,
            &email,
            role.as_str(),
            &student_id,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "users" }))
    })?;

    tracing::info!(user_id = %user_id, role = role.as_str(), "user created");
    Ok(json!({
        "userId": user_id,
        "displayName": display_name,
        "email": email,
        "role": role,
        "studentId": student_id,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "session.open" => session_open(state, req),
        "session.get" => session_get(state, req),
        "session.close" => session_close(state, req),
        "users.list" => users_list(state, req),
        "users.create" => users_create(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
