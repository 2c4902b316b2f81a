use crate::calc::{aggregate, summarize_class};
use crate::ipc::helpers::{parse_scope, require_db, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::scope::{self, Scope};
use crate::session::SessionUser;
use rusqlite::{params, Connection};
use serde_json::json;

fn count(conn: &Connection, sql: &str) -> Result<i64, HandlerErr> {
    conn.query_row(sql, [], |r| r.get(0))
        .map_err(HandlerErr::query_failed)
}

/// Scope params are optional here; present-but-invalid is still an error.
fn optional_scope(req: &Request) -> Result<Option<Scope>, HandlerErr> {
    let has_semester = req.params.get("semester").is_some_and(|v| !v.is_null());
    let has_year = req.params.get("academicYear").is_some_and(|v| !v.is_null());
    if !has_semester && !has_year {
        return Ok(None);
    }
    parse_scope(req).map(Some)
}

fn staff_dashboard(
    conn: &Connection,
    user: &SessionUser,
    scope: Option<Scope>,
) -> Result<serde_json::Value, HandlerErr> {
    let counts = json!({
        "classes": count(conn, "SELECT COUNT(*) FROM classes")?,
        "students": count(conn, "SELECT COUNT(*) FROM students WHERE active = 1")?,
        "materials": count(conn, "SELECT COUNT(*) FROM materials")?,
        "users": count(conn, "SELECT COUNT(*) FROM users")?,
    });

    let Some(scope) = scope else {
        return Ok(json!({ "role": user.role, "counts": counts, "scope": null }));
    };

    let mut stmt = conn
        .prepare("SELECT id, name FROM classes ORDER BY name")
        .map_err(HandlerErr::query_failed)?;
    let classes = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;

    let mut per_class = Vec::with_capacity(classes.len());
    let mut all_students = Vec::new();
    for (class_id, name) in classes {
        let stats =
            scope::class_statistics(conn, &class_id, &scope).map_err(HandlerErr::query_failed)?;
        let overview = summarize_class(stats.students.iter().map(|(_, st)| st));
        per_class.push(json!({
            "classId": class_id,
            "name": name,
            "subjectCount": stats.curriculum.len(),
            "overview": overview,
        }));
        all_students.extend(stats.students.into_iter().map(|(_, st)| st));
    }

    Ok(json!({
        "role": user.role,
        "counts": counts,
        "scope": scope,
        "classes": per_class,
        "school": summarize_class(&all_students),
    }))
}

fn student_dashboard(
    conn: &Connection,
    user: &SessionUser,
    scope: Option<Scope>,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(student_id) = user.student_id.as_deref() else {
        return Err(HandlerErr::new("forbidden", "student account is not linked to a student"));
    };
    let Some(student) = scope::find_student(conn, student_id).map_err(HandlerErr::query_failed)? else {
        return Err(HandlerErr::new("not_found", "student not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT semester, academic_year
             FROM grade_entries
             WHERE student_id = ?
             GROUP BY semester, academic_year
             ORDER BY academic_year DESC, semester DESC",
        )
        .map_err(HandlerErr::query_failed)?;
    let scopes = stmt
        .query_map(params![student.id], |r| {
            Ok(Scope {
                semester: r.get(0)?,
                academic_year: r.get(1)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;

    // Without an explicit scope, show the most recent one with grades.
    let current = scope.or_else(|| scopes.first().cloned());
    let statistics = match current.as_ref() {
        Some(sc) => {
            let grades =
                scope::load_scope_grades(conn, &student, sc).map_err(HandlerErr::query_failed)?;
            json!(aggregate(&grades.subjects))
        }
        None => serde_json::Value::Null,
    };

    Ok(json!({
        "role": user.role,
        "student": student,
        "scopes": scopes,
        "scope": current,
        "statistics": statistics,
    }))
}

fn dashboard_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let user = state.session.require_user()?;
    let scope = optional_scope(req)?;
    if user.role.is_staff() {
        staff_dashboard(conn, user, scope)
    } else {
        student_dashboard(conn, user, scope)
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "dashboard.get" => dashboard_get(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
