use crate::db;
use crate::ipc::helpers::{class_exists, parse_scope, require_db, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::scope::{self, CURRICULUM_DEFAULT_KEY};
use serde_json::json;

fn subjects_param(req: &Request) -> Result<Vec<String>, HandlerErr> {
    let Some(raw) = req.params.get("subjects").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("subjects must be an array of names"));
    };
    scope::clean_subject_names(raw).map_err(HandlerErr::bad_params)
}

fn curriculum_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let class_id = required_str(req, "classId")?;
    let scope = parse_scope(req)?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }
    let (subjects, is_default) =
        scope::effective_curriculum(conn, &class_id, &scope).map_err(HandlerErr::query_failed)?;
    Ok(json!({
        "classId": class_id,
        "scope": scope,
        "subjects": subjects,
        "isDefault": is_default,
    }))
}

fn curriculum_add_subjects(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    state.session.require_staff()?;
    let class_id = required_str(req, "classId")?;
    let scope = parse_scope(req)?;
    let names = subjects_param(req)?;
    let seed_default = req
        .params
        .get("seedDefault")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let added = scope::add_subjects(&tx, &class_id, &scope, &names, seed_default).map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "curriculum_subjects" }))
    })?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let subjects =
        scope::class_curriculum(conn, &class_id, &scope).map_err(HandlerErr::query_failed)?;
    tracing::info!(
        class_id = %class_id,
        semester = scope.semester,
        academic_year = %scope.academic_year,
        added = added.len(),
        "curriculum extended"
    );
    Ok(json!({ "added": added, "subjects": subjects }))
}

fn curriculum_defaults_get(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let configured = db::settings_get_json(conn, CURRICULUM_DEFAULT_KEY)
        .map_err(HandlerErr::query_failed)?
        .is_some();
    let subjects = scope::default_curriculum(conn).map_err(HandlerErr::query_failed)?;
    Ok(json!({
        "subjects": subjects,
        "source": if configured { "settings" } else { "builtin" },
    }))
}

fn curriculum_defaults_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    state.session.require_staff()?;
    let names = subjects_param(req)?;
    if names.is_empty() {
        return Err(HandlerErr::bad_params("subjects must not be empty"));
    }
    db::settings_set_json(conn, CURRICULUM_DEFAULT_KEY, &json!(names)).map_err(|e| {
        HandlerErr::new("db_update_failed", e.to_string())
            .with_details(json!({ "table": "settings" }))
    })?;
    Ok(json!({ "subjects": names }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "curriculum.get" => curriculum_get(state, req),
        "curriculum.addSubjects" => curriculum_add_subjects(state, req),
        "curriculum.defaults.get" => curriculum_defaults_get(state, req),
        "curriculum.defaults.update" => curriculum_defaults_update(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
