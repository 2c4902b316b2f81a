use crate::blob;
use crate::db;
use crate::ipc::helpers::{class_exists, optional_str, require_db, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::{Path, PathBuf};
use uuid::Uuid;

fn workspace_of(state: &AppState) -> Result<&Path, HandlerErr> {
    state
        .workspace
        .as_deref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// Removes the blob for `hash` when no material row references it anymore.
/// A leftover file is only wasted space, so removal errors are logged.
fn discard_unreferenced_blob(conn: &Connection, workspace: &Path, hash: &str) -> Result<bool, HandlerErr> {
    let still_used: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM materials WHERE content_hash = ?",
            [hash],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query_failed)?;
    if still_used > 0 {
        return Ok(false);
    }
    match blob::remove_blob(workspace, hash) {
        Ok(v) => Ok(v),
        Err(e) => {
            tracing::warn!(error = %e, content_hash = hash, "failed to remove material blob");
            Ok(false)
        }
    }
}

fn materials_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let workspace = workspace_of(state)?;
    let class_id = optional_str(req, "classId");
    let subject_name = optional_str(req, "subjectName");

    let mut stmt = conn
        .prepare(
            "SELECT m.id, m.class_id, c.name, m.subject_name, m.title, m.description,
                    m.file_name, m.content_hash, m.created_at, m.created_by
             FROM materials m
             LEFT JOIN classes c ON c.id = m.class_id
             WHERE (?1 IS NULL OR m.class_id = ?1)
               AND (?2 IS NULL OR lower(m.subject_name) = lower(?2))
             ORDER BY m.created_at DESC, m.title",
        )
        .map_err(HandlerErr::query_failed)?;
    let materials = stmt
        .query_map((&class_id, &subject_name), |r| {
            let content_hash: Option<String> = r.get(7)?;
            let stored_path = content_hash
                .as_deref()
                .map(|h| blob::blob_path(workspace, h).to_string_lossy().to_string());
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "classId": r.get::<_, Option<String>>(1)?,
                "className": r.get::<_, Option<String>>(2)?,
                "subjectName": r.get::<_, Option<String>>(3)?,
                "title": r.get::<_, String>(4)?,
                "description": r.get::<_, Option<String>>(5)?,
                "fileName": r.get::<_, Option<String>>(6)?,
                "contentHash": content_hash,
                "storedPath": stored_path,
                "createdAt": r.get::<_, String>(8)?,
                "createdBy": r.get::<_, Option<String>>(9)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query_failed)?;
    Ok(json!({ "materials": materials }))
}

fn materials_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let workspace = workspace_of(state)?;
    let actor = state.session.require_staff()?.user_id.clone();

    let title = required_str(req, "title")?;
    let description = optional_str(req, "description");
    let class_id = optional_str(req, "classId");
    let subject_name = optional_str(req, "subjectName");
    let source_path = optional_str(req, "sourcePath").map(PathBuf::from);

    if let Some(cid) = class_id.as_deref() {
        if !class_exists(conn, cid)? {
            return Err(HandlerErr::new("not_found", "class not found")
                .with_details(json!({ "classId": cid })));
        }
    }

    let stored = match source_path.as_deref() {
        Some(src) if !src.is_file() => {
            return Err(HandlerErr::new("not_found", "source file not found")
                .with_details(json!({ "path": src.to_string_lossy() })));
        }
        Some(src) => Some(blob::store_file(workspace, src).map_err(|e| {
            HandlerErr::new("io_failed", format!("{e:#}"))
                .with_details(json!({ "path": src.to_string_lossy() }))
        })?),
        None => None,
    };
    let file_name = source_path
        .as_deref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string());
    let content_hash = stored.as_ref().map(|b| b.content_hash.clone());

    let material_id = Uuid::new_v4().to_string();
    let created_at = db::now_rfc3339();
    let inserted = conn.execute(
        "INSERT INTO materials(
            id, class_id, subject_name, title, description, file_name, content_hash,
            created_at, created_by)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &material_id,
            &class_id,
            &subject_name,
            &title,
            &description,
            &file_name,
            &content_hash,
            &created_at,
            &actor,
        ),
    );
    if let Err(e) = inserted {
        if let Some(hash) = content_hash.as_deref() {
            let _ = discard_unreferenced_blob(conn, workspace, hash);
        }
        return Err(HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "materials" })));
    }

    tracing::info!(
        material_id = %material_id,
        content_hash = content_hash.as_deref().unwrap_or("-"),
        "material created"
    );
    Ok(json!({
        "materialId": material_id,
        "title": title,
        "fileName": file_name,
        "contentHash": content_hash,
        "storedPath": stored.as_ref().map(|b| b.stored_path.to_string_lossy().to_string()),
        "sizeBytes": stored.as_ref().map(|b| b.size_bytes),
        "createdAt": created_at,
    }))
}

fn materials_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let workspace = workspace_of(state)?;
    state.session.require_staff()?;
    let material_id = required_str(req, "materialId")?;

    let found: Option<Option<String>> = conn
        .query_row(
            "SELECT content_hash FROM materials WHERE id = ?",
            [&material_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query_failed)?;
    let Some(content_hash) = found else {
        return Err(HandlerErr::new("not_found", "material not found"));
    };

    conn.execute("DELETE FROM materials WHERE id = ?", [&material_id])
        .map_err(|e| {
            HandlerErr::new("db_delete_failed", e.to_string())
                .with_details(json!({ "table": "materials" }))
        })?;

    let blob_removed = match content_hash.as_deref() {
        Some(hash) => discard_unreferenced_blob(conn, workspace, hash)?,
        None => false,
    };

    Ok(json!({ "ok": true, "blobRemoved": blob_removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "materials.list" => materials_list(state, req),
        "materials.create" => materials_create(state, req),
        "materials.delete" => materials_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
