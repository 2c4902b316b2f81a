use crate::db;
use crate::ipc::helpers::{class_exists, optional_str, require_db, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn students_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let class_id = required_str(req, "classId")?;
    let include_inactive = req
        .params
        .get("includeInactive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let mut stmt = conn
        .prepare(
            "SELECT id, full_name, student_no, active, sort_order
             FROM students
             WHERE class_id = ? AND (active = 1 OR ?)
             ORDER BY sort_order",
        )
        .map_err(HandlerErr::query_failed)?;
    let students = stmt
        .query_map((&class_id, include_inactive), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "fullName": r.get::<_, String>(1)?,
                "studentNo": r.get::<_, Option<String>>(2)?,
                "active": r.get::<_, i64>(3)? != 0,
                "sortOrder": r.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;
    Ok(json!({ "students": students }))
}

fn students_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    state.session.require_staff()?;

    let class_id = required_str(req, "classId")?;
    let full_name = required_str(req, "fullName")?;
    let student_no = optional_str(req, "studentNo");
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found")
            .with_details(json!({ "classId": class_id })));
    }

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE class_id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query_failed)?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, full_name, student_no, active, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &class_id,
            &full_name,
            &student_no,
            active as i64,
            next_sort,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "students" }))
    })?;

    Ok(json!({ "studentId": student_id, "sortOrder": next_sort }))
}

fn students_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    state.session.require_staff()?;

    let student_id = required_str(req, "studentId")?;
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };

    let current: Option<(String, String, Option<String>, i64)> = conn
        .query_row(
            "SELECT class_id, full_name, student_no, active FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(HandlerErr::query_failed)?;
    let Some((mut class_id, mut full_name, mut student_no, mut active)) = current else {
        return Err(HandlerErr::new("not_found", "student not found"));
    };

    if let Some(v) = patch.get("fullName") {
        let Some(s) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return Err(HandlerErr::bad_params("patch.fullName must be a non-empty string"));
        };
        full_name = s.to_string();
    }
    if let Some(v) = patch.get("studentNo") {
        if v.is_null() {
            student_no = None;
        } else if let Some(s) = v.as_str() {
            let t = s.trim();
            student_no = if t.is_empty() { None } else { Some(t.to_string()) };
        } else {
            return Err(HandlerErr::bad_params("patch.studentNo must be string or null"));
        }
    }
    if let Some(v) = patch.get("active") {
        let Some(b) = v.as_bool() else {
            return Err(HandlerErr::bad_params("patch.active must be boolean"));
        };
        active = b as i64;
    }
    let mut moved = false;
    if let Some(v) = patch.get("classId") {
        let Some(target) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return Err(HandlerErr::bad_params("patch.classId must be a non-empty string"));
        };
        if target != class_id {
            if !class_exists(conn, target)? {
                return Err(HandlerErr::new("not_found", "class not found")
                    .with_details(json!({ "classId": target })));
            }
            class_id = target.to_string();
            moved = true;
        }
    }

    let sort_sql = if moved {
        "UPDATE students
         SET class_id = ?1, full_name = ?2, student_no = ?3, active = ?4, updated_at = ?5,
             sort_order = (SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE class_id = ?1)
         WHERE id = ?6"
    } else {
        "UPDATE students
         SET class_id = ?1, full_name = ?2, student_no = ?3, active = ?4, updated_at = ?5
         WHERE id = ?6"
    };
    conn.execute(
        sort_sql,
        (
            &class_id,
            &full_name,
            &student_no,
            active,
            db::now_rfc3339(),
            &student_id,
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_update_failed", e.to_string())
            .with_details(json!({ "table": "students" }))
    })?;

    Ok(json!({
        "studentId": student_id,
        "classId": class_id,
        "fullName": full_name,
        "studentNo": student_no,
        "active": active != 0,
    }))
}

fn students_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    state.session.require_staff()?;
    let student_id = required_str(req, "studentId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::query_failed)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (table, sql) in [
        ("grade_entries", "DELETE FROM grade_entries WHERE student_id = ?"),
        ("users", "DELETE FROM users WHERE student_id = ?"),
        ("students", "DELETE FROM students WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&student_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr::new("db_delete_failed", e.to_string())
                .with_details(json!({ "table": table })));
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    if state
        .session
        .user()
        .and_then(|u| u.student_id.as_deref())
        == Some(student_id.as_str())
    {
        state.session.close();
    }

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state, req),
        "students.create" => students_create(state, req),
        "students.update" => students_update(state, req),
        "students.delete" => students_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
