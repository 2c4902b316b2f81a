use crate::backup;
use crate::calc::display_label;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{class_exists, parse_scope, require_db, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::scope;
use serde_json::json;
use std::path::{Path, PathBuf};

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_num(v: Option<i64>) -> String {
    v.map(|n| n.to_string()).unwrap_or_default()
}

fn handle_backup_export_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing outPath", None),
    };
    let Some(workspace_path) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Flush WAL pages so the copied file is self-contained.
    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let out = PathBuf::from(&out_path);
    let export = match backup::export_workspace_bundle(&workspace_path, &out) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, path = %out_path, "workspace export failed");
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            );
        }
    };

    tracing::info!(path = %out_path, db_sha256 = %export.db_sha256, "workspace bundle exported");
    ok(
        &req.id,
        json!({
            "ok": true,
            "path": out_path,
            "bundleFormat": export.bundle_format,
            "entryCount": export.entry_count,
            "dbSha256": export.db_sha256,
        }),
    )
}

fn reopen(state: &mut AppState, workspace_path: &Path) -> Result<(), String> {
    match db::open_db(workspace_path) {
        Ok(conn) => {
            state.workspace = Some(workspace_path.to_path_buf());
            state.db = Some(conn);
            Ok(())
        }
        Err(e) => Err(format!("{e:?}")),
    }
}

fn handle_backup_import_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing inPath", None),
    };
    let Some(workspace_path) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }

    // Drop open handle before replacing file.
    state.db = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, path = %in_path, "workspace import failed");
            // The database file is only replaced after verification, so the
            // previous one and its session stay valid.
            if let Err(reopen_err) = reopen(state, &workspace_path) {
                tracing::warn!(error = %reopen_err, "failed to reopen workspace after import error");
                state.session.close();
            }
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": src.to_string_lossy() })),
            );
        }
    };

    if let Some(prev) = state.session.close() {
        tracing::info!(user_id = %prev.user_id, "session closed by workspace import");
    }
    match reopen(state, &workspace_path) {
        Ok(()) => {
            tracing::info!(
                workspace = %workspace_path.display(),
                checksum_verified = import.checksum_verified,
                "workspace bundle imported"
            );
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "workspacePath": workspace_path.to_string_lossy(),
                    "bundleFormatDetected": import.bundle_format_detected,
                    "checksumVerified": import.checksum_verified,
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", e, None),
    }
}

const GRADES_CSV_HEADER: &str = "student_id,student_no,student_name,class_name,semester,academic_year,subject_name,task,midterm,final_exam,final_score,letter_grade\n";

fn exchange_export_grades_csv(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    state.session.require_staff()?;
    let class_id = required_str(req, "classId")?;
    let out_path = required_str(req, "outPath")?;
    let scope = parse_scope(req)?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    let students = scope::class_students(conn, &class_id).map_err(HandlerErr::query_failed)?;
    let mut csv = String::from(GRADES_CSV_HEADER);
    let mut rows_exported = 0usize;
    for student in &students {
        let grades =
            scope::load_scope_grades(conn, student, &scope).map_err(HandlerErr::query_failed)?;
        for g in &grades.subjects {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{},{},{},{},{}\n",
                csv_quote(&student.id),
                csv_quote(student.student_no.as_deref().unwrap_or("")),
                csv_quote(&student.full_name),
                csv_quote(&student.class_name),
                scope.semester,
                csv_quote(&scope.academic_year),
                csv_quote(&g.subject_name),
                csv_num(g.scores.task),
                csv_num(g.scores.midterm),
                csv_num(g.scores.final_exam),
                csv_num(g.final_score),
                csv_quote(display_label(g.letter_grade)),
            ));
            rows_exported += 1;
        }
    }

    let out = PathBuf::from(&out_path);
    let io_err = |e: std::io::Error| {
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path }))
    };
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(&out, csv).map_err(io_err)?;

    tracing::info!(class_id = %class_id, rows = rows_exported, path = %out_path, "grades exported");
    Ok(json!({
        "ok": true,
        "rowsExported": rows_exported,
        "studentCount": students.len(),
        "path": out_path,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_backup_export_workspace_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_backup_import_workspace_bundle(state, req)),
        "exchange.exportGradesCsv" => Some(respond(req, exchange_export_grades_csv(state, req))),
        _ => None,
    }
}
