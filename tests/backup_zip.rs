mod test_support;

use serde_json::json;
use std::io::Write;
use test_support::{open_admin_session, request_err, request_ok, seed_class, spawn_sidecar, temp_dir, SCOPE_YEAR};

#[test]
fn bundle_roundtrip_restores_earlier_state_and_closes_session() {
    let workspace = temp_dir("rapord-backup-ipc");
    let out_dir = temp_dir("rapord-backup-ipc-out");
    let bundle = out_dir.join("rapor.zip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_admin_session(&mut stdin, &mut reader, &workspace);
    let (_class_id, students) = seed_class(&mut stdin, &mut reader, "X-1", &["Gita"]);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "save",
        "grades.save",
        json!({
            "studentId": students[0],
            "semester": 1,
            "academicYear": SCOPE_YEAR,
            "entries": [{ "subjectName": "Kimia", "task": 90, "midterm": 90, "finalExam": 90 }]
        }),
    );

    let export = request_ok(
        &mut stdin,
        &mut reader,
        "export",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(export["bundleFormat"], json!("rapord-workspace-v1"));
    assert_eq!(export["entryCount"], json!(2));
    assert!(bundle.is_file());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "later",
        "classes.create",
        json!({ "name": "X-2" }),
    );

    let import = request_ok(
        &mut stdin,
        &mut reader,
        "import",
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(import["checksumVerified"], json!(true));

    let health = request_ok(&mut stdin, &mut reader, "health", "health", json!({}));
    assert_eq!(health["session"], json!(null));

    let classes = request_ok(&mut stdin, &mut reader, "classes", "classes.list", json!({}));
    let names: Vec<&str> = classes["classes"]
        .as_array()
        .expect("classes")
        .iter()
        .filter_map(|c| c["name"].as_str())
        .collect();
    assert_eq!(names, vec!["X-1"]);

    let conn = rusqlite::Connection::open(workspace.join("rapord.sqlite3")).expect("open db");
    let final_score: i64 = conn
        .query_row(
            "SELECT final_score FROM grade_entries WHERE subject_name = 'Kimia'",
            [],
            |r| r.get(0),
        )
        .expect("restored grade");
    assert_eq!(final_score, 90);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn corrupt_bundle_keeps_current_workspace_open() {
    let workspace = temp_dir("rapord-backup-corrupt");
    let bad = workspace.join("not-a-zip.zip");
    std::fs::File::create(&bad)
        .and_then(|mut f| f.write_all(b"definitely not a zip"))
        .expect("write bad bundle");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_admin_session(&mut stdin, &mut reader, &workspace);
    let _ = seed_class(&mut stdin, &mut reader, "XI-1", &[]);

    let elsewhere = temp_dir("rapord-backup-elsewhere");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "import",
        "backup.importWorkspaceBundle",
        json!({ "inPath": bad.to_string_lossy(), "workspacePath": elsewhere.to_string_lossy() }),
    );
    assert_eq!(code, "io_failed");
    assert!(!elsewhere.join("rapord.sqlite3").exists());

    let health = request_ok(&mut stdin, &mut reader, "health", "health", json!({}));
    assert_eq!(health["workspacePath"], json!(workspace.to_string_lossy()));
    assert_eq!(health["session"]["role"], json!("admin"));

    let classes = request_ok(&mut stdin, &mut reader, "classes", "classes.list", json!({}));
    assert_eq!(classes["classes"].as_array().map(|a| a.len()), Some(1));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "defaults",
        "curriculum.defaults.get",
        json!({}),
    );

    let missing = request_err(
        &mut stdin,
        &mut reader,
        "missing",
        "backup.importWorkspaceBundle",
        json!({ "inPath": workspace.join("nope.zip").to_string_lossy() }),
    );
    assert_eq!(missing, "not_found");

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(elsewhere);
}

#[test]
fn grades_csv_has_one_row_per_student_subject() {
    let workspace = temp_dir("rapord-export-csv");
    let csv_path = workspace.join("out").join("nilai.csv");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_admin_session(&mut stdin, &mut reader, &workspace);
    let (class_id, students) =
        seed_class(&mut stdin, &mut reader, "XII-IPS", &["Siregar, Budi", "Hana"]);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "curriculum",
        "curriculum.addSubjects",
        json!({
            "classId": class_id,
            "semester": 2,
            "academicYear": SCOPE_YEAR,
            "subjects": ["Ekonomi", "Geografi"],
            "seedDefault": false,
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "save",
        "grades.save",
        json!({
            "studentId": students[0],
            "semester": 2,
            "academicYear": SCOPE_YEAR,
            "entries": [{ "subjectName": "Ekonomi", "task": 40, "midterm": 45, "finalExam": 30 }]
        }),
    );

    let export = request_ok(
        &mut stdin,
        &mut reader,
        "export",
        "exchange.exportGradesCsv",
        json!({
            "classId": class_id,
            "semester": 2,
            "academicYear": SCOPE_YEAR,
            "outPath": csv_path.to_string_lossy(),
        }),
    );
    assert_eq!(export["rowsExported"], json!(4));

    let text = std::fs::read_to_string(&csv_path).expect("read csv");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines[0].starts_with("student_id,student_no,student_name"));
    assert!(lines[1].contains("\"Siregar, Budi\""));
    assert!(lines[1].ends_with(",Ekonomi,40,45,30,38,E (Sangat Kurang)"));
    assert!(lines[2].ends_with(",Geografi,,,,,-"));

    let _ = std::fs::remove_dir_all(workspace);
}
