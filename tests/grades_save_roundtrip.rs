mod test_support;

use serde_json::json;
use test_support::{
    open_admin_session, request, request_err, request_ok, seed_class, spawn_sidecar, temp_dir,
    SCOPE_YEAR,
};

#[test]
fn save_persists_raw_scores_and_derived_grade() {
    let workspace = temp_dir("rapord-grades-save");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_admin_session(&mut stdin, &mut reader, &workspace);
    let (_class_id, students) = seed_class(&mut stdin, &mut reader, "VIII-B", &["Siti Aminah"]);
    let student_id = &students[0];

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "save",
        "grades.save",
        json!({
            "studentId": student_id,
            "semester": 1,
            "academicYear": SCOPE_YEAR,
            "entries": [
                { "subjectName": "matematika", "task": "80", "midterm": 70, "finalExam": 90 },
                { "subjectName": "Fisika", "task": 60, "midterm": "", "finalExam": 70 },
            ]
        }),
    );
    assert_eq!(saved["saved"], json!(2));
    // Saving against the default list pins it to the scope.
    assert_eq!(saved["curriculumIsDefault"], json!(false));
    assert_eq!(saved["subjects"].as_array().map(|a| a.len()), Some(14));

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "get",
        "grades.get",
        json!({ "studentId": student_id, "semester": 1, "academicYear": SCOPE_YEAR }),
    );
    let subjects = fetched["subjects"].as_array().expect("subjects");
    let math = subjects
        .iter()
        .find(|s| s["subjectName"] == json!("Matematika"))
        .expect("Matematika row");
    assert_eq!(math["finalScore"], json!(81));
    assert_eq!(math["letterGrade"], json!("B (Baik)"));
    let ipa = subjects
        .iter()
        .find(|s| s["subjectName"] == json!("Fisika"))
        .expect("Fisika row");
    assert_eq!(ipa["scores"]["midterm"], json!(null));
    assert_eq!(ipa["finalScore"], json!(null));
    assert_eq!(fetched["statistics"]["completedCount"], json!(1));
    assert_eq!(fetched["statistics"]["subjectCount"], json!(14));

    let conn = rusqlite::Connection::open(workspace.join("rapord.sqlite3")).expect("open db");
    let (task, final_score, letter, class_name): (i64, i64, String, String) = conn
        .query_row(
            "SELECT task, final_score, letter_grade, class_name
             FROM grade_entries
             WHERE student_id = ? AND subject_name = 'Matematika'",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .expect("grade row");
    assert_eq!(task, 80);
    assert_eq!(final_score, 81);
    assert_eq!(letter, "B (Baik)");
    assert_eq!(class_name, "VIII-B");

    let ipa_letter: String = conn
        .query_row(
            "SELECT letter_grade FROM grade_entries WHERE student_id = ? AND subject_name = 'Fisika'",
            [student_id],
            |r| r.get(0),
        )
        .expect("ipa row");
    assert_eq!(ipa_letter, "-");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn save_rejects_whole_batch_on_out_of_range_or_unknown_subject() {
    let workspace = temp_dir("rapord-grades-reject");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_admin_session(&mut stdin, &mut reader, &workspace);
    let (_class_id, students) = seed_class(&mut stdin, &mut reader, "IX-C", &["Andi Wijaya"]);

    let resp = request(
        &mut stdin,
        &mut reader,
        "save",
        "grades.save",
        json!({
            "studentId": students[0],
            "semester": 2,
            "academicYear": SCOPE_YEAR,
            "entries": [
                { "subjectName": "Matematika", "task": 80, "midterm": 80, "finalExam": 80 },
                { "subjectName": "Ekonomi", "task": 101, "midterm": 80, "finalExam": -1 },
                { "subjectName": "Astronomi", "task": 80, "midterm": 80, "finalExam": 80 },
            ]
        }),
    );
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("bad_params"));
    let problems = resp["error"]["details"]["problems"].as_array().expect("problems");
    assert_eq!(problems.len(), 2);
    assert_eq!(problems[0]["fields"], json!(["task", "finalExam"]));
    assert_eq!(problems[1]["reason"], json!("not_in_curriculum"));

    let conn = rusqlite::Connection::open(workspace.join("rapord.sqlite3")).expect("open db");
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM grade_entries", [], |r| r.get(0))
        .expect("count");
    assert_eq!(rows, 0);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "bad-scope",
        "grades.save",
        json!({ "studentId": students[0], "semester": 3, "academicYear": SCOPE_YEAR, "entries": [] }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "bad-year",
        "grades.save",
        json!({ "studentId": students[0], "semester": 1, "academicYear": "2024/2026", "entries": [] }),
    );
    assert_eq!(code, "bad_params");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn clear_unsets_scores_and_keeps_other_subjects() {
    let workspace = temp_dir("rapord-grades-clear");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_admin_session(&mut stdin, &mut reader, &workspace);
    let (_class_id, students) = seed_class(&mut stdin, &mut reader, "VII-A", &["Dewi Lestari"]);
    let scope = |extra: serde_json::Value| {
        let mut p = json!({ "studentId": students[0], "semester": 1, "academicYear": SCOPE_YEAR });
        if let (Some(base), Some(more)) = (p.as_object_mut(), extra.as_object()) {
            for (k, v) in more {
                base.insert(k.clone(), v.clone());
            }
        }
        p
    };

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "save",
        "grades.save",
        scope(json!({
            "entries": [
                { "subjectName": "Matematika", "task": 90, "midterm": 90, "finalExam": 90 },
                { "subjectName": "Fisika", "task": 70, "midterm": 70, "finalExam": 70 },
            ]
        })),
    );

    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "clear",
        "grades.clear",
        scope(json!({ "subjectName": "matematika" })),
    );
    assert_eq!(cleared["cleared"], json!(true));
    let subjects = cleared["subjects"].as_array().expect("subjects");
    let math = subjects
        .iter()
        .find(|s| s["subjectName"] == json!("Matematika"))
        .expect("math");
    assert_eq!(math["finalScore"], json!(null));
    assert_eq!(math["letterGrade"], json!("-"));
    assert_eq!(cleared["statistics"]["completedCount"], json!(1));
    assert_eq!(cleared["statistics"]["meanFinalScore"], json!(70.0));
    assert_eq!(cleared["statistics"]["aggregateLetterGrade"], json!("C (Cukup)"));

    let again = request_ok(
        &mut stdin,
        &mut reader,
        "clear-missing",
        "grades.clear",
        scope(json!({ "subjectName": "Prakarya" })),
    );
    assert_eq!(again["cleared"], json!(false));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn resaving_updates_in_place() {
    let workspace = temp_dir("rapord-grades-resave");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_admin_session(&mut stdin, &mut reader, &workspace);
    let (_class_id, students) = seed_class(&mut stdin, &mut reader, "VII-B", &["Rina Putri"]);

    for (i, task) in [50, 100].into_iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("save-{}", i),
            "grades.save",
            json!({
                "studentId": students[0],
                "semester": 1,
                "academicYear": SCOPE_YEAR,
                "entries": [{ "subjectName": "PPKn", "task": task, "midterm": 100, "finalExam": 100 }]
            }),
        );
    }

    let conn = rusqlite::Connection::open(workspace.join("rapord.sqlite3")).expect("open db");
    let (rows, final_score): (i64, i64) = conn
        .query_row(
            "SELECT COUNT(*), MAX(final_score) FROM grade_entries WHERE subject_name = 'PPKn'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("ppkn rows");
    assert_eq!(rows, 1);
    assert_eq!(final_score, 100);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn moving_a_student_keeps_old_grades_out_of_statistics() {
    let workspace = temp_dir("rapord-grades-move");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_admin_session(&mut stdin, &mut reader, &workspace);
    let (_from, students) = seed_class(&mut stdin, &mut reader, "VII-A", &["Dimas"]);
    let (to, _) = seed_class(&mut stdin, &mut reader, "VII-B", &[]);
    let student_id = &students[0];

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "curriculum-b",
        "curriculum.addSubjects",
        json!({
            "classId": to,
            "semester": 1,
            "academicYear": SCOPE_YEAR,
            "subjects": ["Informatika"],
            "seedDefault": false,
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "save-a",
        "grades.save",
        json!({
            "studentId": student_id,
            "semester": 1,
            "academicYear": SCOPE_YEAR,
            "entries": [{ "subjectName": "Matematika", "task": 20, "midterm": 20, "finalExam": 20 }]
        }),
    );

    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "move",
        "students.update",
        json!({ "studentId": student_id, "patch": { "classId": to } }),
    );
    assert_eq!(moved["classId"], json!(to));

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "get",
        "grades.get",
        json!({ "studentId": student_id, "semester": 1, "academicYear": SCOPE_YEAR }),
    );
    let stats = &got["statistics"];
    assert_eq!(stats["subjectCount"], json!(1));
    assert_eq!(stats["completedCount"], json!(0));
    assert_eq!(stats["aggregateLetterGrade"], json!("-"));
    let subjects = got["subjects"].as_array().expect("subjects");
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0]["subjectName"], json!("Informatika"));
    assert_eq!(got["orphaned"][0]["subjectName"], json!("Matematika"));
    assert_eq!(got["orphaned"][0]["finalScore"], json!(20));

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "summary",
        "grades.classSummary",
        json!({ "classId": to, "semester": 1, "academicYear": SCOPE_YEAR }),
    );
    assert_eq!(summary["students"][0]["statistics"]["subjectCount"], json!(1));
    assert_eq!(summary["students"][0]["statistics"]["completedCount"], json!(0));

    let _ = std::fs::remove_dir_all(workspace);
}
