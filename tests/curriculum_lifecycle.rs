mod test_support;

use serde_json::json;
use test_support::{open_admin_session, request_err, request_ok, seed_class, spawn_sidecar, temp_dir, SCOPE_YEAR};

#[test]
fn scope_without_rows_uses_default_then_appends_in_order() {
    let workspace = temp_dir("rapord-curriculum");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_admin_session(&mut stdin, &mut reader, &workspace);
    let (class_id, _) = seed_class(&mut stdin, &mut reader, "VII-C", &[]);

    let defaults = request_ok(&mut stdin, &mut reader, "d", "curriculum.defaults.get", json!({}));
    assert_eq!(defaults["source"], json!("builtin"));
    assert_eq!(defaults["subjects"].as_array().map(|a| a.len()), Some(14));

    let before = request_ok(
        &mut stdin,
        &mut reader,
        "get-1",
        "curriculum.get",
        json!({ "classId": class_id, "semester": 1, "academicYear": SCOPE_YEAR }),
    );
    assert_eq!(before["isDefault"], json!(true));

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "add",
        "curriculum.addSubjects",
        json!({
            "classId": class_id,
            "semester": 1,
            "academicYear": SCOPE_YEAR,
            "subjects": ["Bahasa Sunda", "matematika", "Informatika", "Bahasa Sunda"],
        }),
    );
    let added_names = added["added"].as_array().expect("added");
    assert_eq!(added_names.len(), 16);
    let subjects = added["subjects"].as_array().expect("subjects");
    assert_eq!(subjects.len(), 16);
    assert_eq!(subjects[0], json!("Pendidikan Agama"));
    assert_eq!(subjects[14], json!("Bahasa Sunda"));
    assert_eq!(subjects[15], json!("Informatika"));

    let again = request_ok(
        &mut stdin,
        &mut reader,
        "add-2",
        "curriculum.addSubjects",
        json!({
            "classId": class_id,
            "semester": 1,
            "academicYear": SCOPE_YEAR,
            "subjects": ["informatika"],
        }),
    );
    assert_eq!(again["added"], json!([]));

    // Other scopes are untouched.
    let other = request_ok(
        &mut stdin,
        &mut reader,
        "get-2",
        "curriculum.get",
        json!({ "classId": class_id, "semester": 2, "academicYear": SCOPE_YEAR }),
    );
    assert_eq!(other["isDefault"], json!(true));
    assert_eq!(other["subjects"].as_array().map(|a| a.len()), Some(14));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unseeded_add_and_configured_defaults() {
    let workspace = temp_dir("rapord-curriculum-defaults");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_admin_session(&mut stdin, &mut reader, &workspace);
    let (class_id, _) = seed_class(&mut stdin, &mut reader, "XI-IPA-1", &[]);

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "add",
        "curriculum.addSubjects",
        json!({
            "classId": class_id,
            "semester": 2,
            "academicYear": "2025/2026",
            "subjects": ["Fisika Lanjut"],
            "seedDefault": false,
        }),
    );
    assert_eq!(added["subjects"], json!(["Fisika Lanjut"]));

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "defaults",
        "curriculum.defaults.update",
        json!({ "subjects": ["Matematika", " Bahasa Indonesia ", "matematika"] }),
    );
    assert_eq!(updated["subjects"], json!(["Matematika", "Bahasa Indonesia"]));

    let defaults = request_ok(&mut stdin, &mut reader, "d", "curriculum.defaults.get", json!({}));
    assert_eq!(defaults["source"], json!("settings"));

    let fresh = request_ok(
        &mut stdin,
        &mut reader,
        "get",
        "curriculum.get",
        json!({ "classId": class_id, "semester": 1, "academicYear": "2025/2026" }),
    );
    assert_eq!(fresh["subjects"], json!(["Matematika", "Bahasa Indonesia"]));

    let empty = request_err(
        &mut stdin,
        &mut reader,
        "empty",
        "curriculum.defaults.update",
        json!({ "subjects": [] }),
    );
    assert_eq!(empty, "bad_params");

    let missing = request_err(
        &mut stdin,
        &mut reader,
        "missing-class",
        "curriculum.get",
        json!({ "classId": "no-such-class", "semester": 1, "academicYear": SCOPE_YEAR }),
    );
    assert_eq!(missing, "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}
