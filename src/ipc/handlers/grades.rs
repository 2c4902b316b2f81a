use crate::calc::{
    self, aggregate, band_table, normalize_value, ScoreTriple, SubjectGrade, UNSET_LABEL,
};
use crate::ipc::helpers::{class_exists, parse_scope, require_db, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::scope::{self, Scope, ScopeGrades, StudentRef};
use rusqlite::Connection;
use serde_json::json;
use std::collections::{HashMap, HashSet};

/// Raw entries as typed by the user: `{subjectName, task, midterm, finalExam}`,
/// each score a number, numeric string, blank or null.
fn parse_entries(req: &Request) -> Result<Vec<(String, ScoreTriple)>, HandlerErr> {
    let Some(raw) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("entries must be an array"));
    };
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for (i, e) in raw.iter().enumerate() {
        let Some(obj) = e.as_object() else {
            return Err(HandlerErr::bad_params(format!("entries[{}] must be an object", i)));
        };
        let Some(name) = obj
            .get("subjectName")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return Err(HandlerErr::bad_params(format!(
                "entries[{}].subjectName must be a non-empty string",
                i
            )));
        };
        if !seen.insert(name.to_lowercase()) {
            return Err(HandlerErr::bad_params("duplicate subjectName in entries")
                .with_details(json!({ "subjectName": name })));
        }
        let field = |k: &str| obj.get(k).and_then(normalize_value);
        out.push((
            name.to_string(),
            ScoreTriple::new(field("task"), field("midterm"), field("finalExam")),
        ));
    }
    Ok(out)
}

fn subject_json(g: &SubjectGrade) -> serde_json::Value {
    let mut v = json!(g);
    v["outOfRange"] = json!(g.scores.out_of_range_fields());
    v
}

fn subjects_json(grades: &[SubjectGrade]) -> Vec<serde_json::Value> {
    grades.iter().map(subject_json).collect()
}

fn scope_payload(
    student: &StudentRef,
    scope: &Scope,
    grades: &ScopeGrades,
    curriculum_is_default: bool,
) -> serde_json::Value {
    json!({
        "student": student,
        "scope": scope,
        "curriculumIsDefault": curriculum_is_default,
        "subjects": subjects_json(&grades.subjects),
        "orphaned": subjects_json(&grades.orphaned),
        "statistics": aggregate(&grades.subjects),
    })
}

fn require_student(conn: &Connection, student_id: &str) -> Result<StudentRef, HandlerErr> {
    scope::find_student(conn, student_id)
        .map_err(HandlerErr::query_failed)?
        .ok_or_else(|| {
            HandlerErr::new("not_found", "student not found")
                .with_details(json!({ "studentId": student_id }))
        })
}

fn load_payload(conn: &Connection, student: &StudentRef, scope: &Scope) -> Result<serde_json::Value, HandlerErr> {
    let (curriculum, is_default) = scope::effective_curriculum(conn, &student.class_id, scope)
        .map_err(HandlerErr::query_failed)?;
    let persisted = scope::load_scores(conn, &student.id, scope).map_err(HandlerErr::query_failed)?;
    let grades = scope::merge_curriculum(&curriculum, persisted);
    Ok(scope_payload(student, scope, &grades, is_default))
}

/// Class name stored with each grade row; students without one get the
/// configured fallback tag.
fn class_tag(state: &AppState, student: &StudentRef) -> String {
    if student.class_name.trim().is_empty() {
        state.config.class_tag_fallback.clone()
    } else {
        student.class_name.clone()
    }
}

fn grades_bands(_state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({
        "bands": band_table(),
        "unsetLabel": UNSET_LABEL,
        "weights": {
            "task": calc::TASK_WEIGHT_PCT,
            "midterm": calc::MIDTERM_WEIGHT_PCT,
            "finalExam": calc::FINAL_EXAM_WEIGHT_PCT,
        },
        "rounding": "half_up",
    }))
}

fn grades_preview(_state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let entries = parse_entries(req)?;
    let grades: Vec<SubjectGrade> = entries
        .into_iter()
        .map(|(name, scores)| SubjectGrade::new(name, scores))
        .collect();
    Ok(json!({
        "subjects": subjects_json(&grades),
        "statistics": aggregate(&grades),
    }))
}

fn grades_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = required_str(req, "studentId")?;
    state.session.require_student_access(&student_id)?;
    let scope = parse_scope(req)?;
    let student = require_student(conn, &student_id)?;
    load_payload(conn, &student, &scope)
}

fn grades_save(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let actor = state.session.require_staff()?.user_id.clone();
    let student_id = required_str(req, "studentId")?;
    let scope = parse_scope(req)?;
    let entries = parse_entries(req)?;
    let student = require_student(conn, &student_id)?;

    let (curriculum, is_default) = scope::effective_curriculum(conn, &student.class_id, &scope)
        .map_err(HandlerErr::query_failed)?;
    let canonical: HashMap<String, &String> =
        curriculum.iter().map(|s| (s.to_lowercase(), s)).collect();

    // Validate everything before writing anything.
    let mut grades: Vec<SubjectGrade> = Vec::with_capacity(entries.len());
    let mut problems: Vec<serde_json::Value> = Vec::new();
    for (name, scores) in entries {
        let Some(subject) = canonical.get(&name.to_lowercase()) else {
            problems.push(json!({ "subjectName": name, "reason": "not_in_curriculum" }));
            continue;
        };
        let bad = scores.out_of_range_fields();
        if !bad.is_empty() {
            problems.push(json!({
                "subjectName": subject,
                "reason": "out_of_range",
                "fields": bad,
            }));
            continue;
        }
        grades.push(SubjectGrade::new((*subject).clone(), scores));
    }
    if !problems.is_empty() {
        tracing::debug!(student_id = %student_id, rejected = problems.len(), "grade save rejected");
        return Err(HandlerErr::bad_params(format!(
            "scores must be within {}..={} and subjects must be in the curriculum",
            calc::SCORE_MIN,
            calc::SCORE_MAX
        ))
        .with_details(json!({ "problems": problems })));
    }

    let tag = class_tag(state, &student);

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    if is_default {
        // Saving pins the scope's curriculum so later default edits cannot
        // reorder or drop its subjects.
        if let Err(e) = scope::add_subjects(&tx, &student.class_id, &scope, &[], true) {
            let _ = tx.rollback();
            return Err(HandlerErr::new("db_insert_failed", e.to_string())
                .with_details(json!({ "table": "curriculum_subjects" })));
        }
    }
    for g in &grades {
        if let Err(e) =
            scope::upsert_subject_grade(&tx, &student.id, &scope, &tag, g, Some(actor.as_str()))
        {
            let _ = tx.rollback();
            return Err(HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({
                "table": "grade_entries",
                "subjectName": g.subject_name,
            })));
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    tracing::info!(
        student_id = %student.id,
        semester = scope.semester,
        academic_year = %scope.academic_year,
        saved = grades.len(),
        "grades saved"
    );
    let mut payload = load_payload(conn, &student, &scope)?;
    payload["saved"] = json!(grades.len());
    Ok(payload)
}

fn grades_clear(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let actor = state.session.require_staff()?.user_id.clone();
    let student_id = required_str(req, "studentId")?;
    let subject_name = required_str(req, "subjectName")?;
    let scope = parse_scope(req)?;
    let student = require_student(conn, &student_id)?;

    let wanted = subject_name.to_lowercase();
    let existing = scope::load_scores(conn, &student.id, &scope)
        .map_err(HandlerErr::query_failed)?
        .into_iter()
        .find(|(name, _)| name.to_lowercase() == wanted);

    let cleared = match existing {
        Some((name, scores)) => {
            let mut grade = SubjectGrade::new(name, scores);
            grade.clear();
            let tag = class_tag(state, &student);
            scope::upsert_subject_grade(conn, &student.id, &scope, &tag, &grade, Some(actor.as_str()))
                .map_err(|e| {
                    HandlerErr::new("db_update_failed", e.to_string())
                        .with_details(json!({ "table": "grade_entries" }))
                })?;
            tracing::info!(student_id = %student.id, subject = %grade.subject_name, "grade cleared");
            true
        }
        None => false,
    };

    let mut payload = load_payload(conn, &student, &scope)?;
    payload["cleared"] = json!(cleared);
    Ok(payload)
}

fn grades_class_summary(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    state.session.require_staff()?;
    let class_id = required_str(req, "classId")?;
    let scope = parse_scope(req)?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    let stats = scope::class_statistics(conn, &class_id, &scope).map_err(HandlerErr::query_failed)?;
    let rows: Vec<serde_json::Value> = stats
        .students
        .iter()
        .map(|(s, st)| {
            json!({
                "studentId": s.id,
                "fullName": s.full_name,
                "studentNo": s.student_no,
                "statistics": st,
            })
        })
        .collect();

    Ok(json!({
        "classId": class_id,
        "scope": scope,
        "subjects": stats.curriculum,
        "curriculumIsDefault": stats.curriculum_is_default,
        "students": rows,
        "overview": calc::summarize_class(stats.students.iter().map(|(_, st)| st)),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "grades.bands" => grades_bands(state, req),
        "grades.preview" => grades_preview(state, req),
        "grades.get" => grades_get(state, req),
        "grades.save" => grades_save(state, req),
        "grades.clear" => grades_clear(state, req),
        "grades.classSummary" => grades_class_summary(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
