use crate::calc::{aggregate, display_label, RosterStatistics, ScoreTriple, SubjectGrade};
use crate::config::BUILTIN_CURRICULUM;
use crate::db;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub const CURRICULUM_DEFAULT_KEY: &str = "curriculum.default";

/// One report-card period: semester 1 ("ganjil") or 2 ("genap") of an
/// academic year written `YYYY/YYYY`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub semester: i64,
    pub academic_year: String,
}

impl Scope {
    pub fn parse(semester: Option<i64>, academic_year: Option<&str>) -> Result<Self, String> {
        let Some(semester) = semester else {
            return Err("missing semester".to_string());
        };
        if semester != 1 && semester != 2 {
            return Err("semester must be 1 or 2".to_string());
        }
        let Some(year) = academic_year.map(str::trim) else {
            return Err("missing academicYear".to_string());
        };
        if !valid_academic_year(year) {
            return Err("academicYear must look like 2024/2025".to_string());
        }
        Ok(Self {
            semester,
            academic_year: year.to_string(),
        })
    }
}

pub fn valid_academic_year(s: &str) -> bool {
    let Some((a, b)) = s.split_once('/') else {
        return false;
    };
    if a.len() != 4 || b.len() != 4 {
        return false;
    }
    match (a.parse::<u32>(), b.parse::<u32>()) {
        (Ok(start), Ok(end)) => end == start + 1,
        _ => false,
    }
}

/// Trims names, drops case-insensitive duplicates, keeps first-seen order.
pub fn clean_subject_names(raw: &[serde_json::Value]) -> Result<Vec<String>, String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for (i, v) in raw.iter().enumerate() {
        let Some(s) = v.as_str() else {
            return Err(format!("subjects[{}] must be a string", i));
        };
        let t = s.trim();
        if t.is_empty() {
            return Err(format!("subjects[{}] must not be empty", i));
        }
        if seen.insert(t.to_lowercase()) {
            out.push(t.to_string());
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRef {
    pub id: String,
    pub class_id: String,
    pub class_name: String,
    pub full_name: String,
    pub student_no: Option<String>,
}

pub fn find_student(conn: &Connection, student_id: &str) -> anyhow::Result<Option<StudentRef>> {
    let row = conn
        .query_row(
            "SELECT s.id, s.class_id, c.name, s.full_name, s.student_no
             FROM students s
             JOIN classes c ON c.id = s.class_id
             WHERE s.id = ?",
            [student_id],
            |r| {
                Ok(StudentRef {
                    id: r.get(0)?,
                    class_id: r.get(1)?,
                    class_name: r.get(2)?,
                    full_name: r.get(3)?,
                    student_no: r.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn class_students(conn: &Connection, class_id: &str) -> anyhow::Result<Vec<StudentRef>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.class_id, c.name, s.full_name, s.student_no
         FROM students s
         JOIN classes c ON c.id = s.class_id
         WHERE s.class_id = ? AND s.active = 1
         ORDER BY s.sort_order",
    )?;
    let rows = stmt
        .query_map([class_id], |r| {
            Ok(StudentRef {
                id: r.get(0)?,
                class_id: r.get(1)?,
                class_name: r.get(2)?,
                full_name: r.get(3)?,
                student_no: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn default_curriculum(conn: &Connection) -> anyhow::Result<Vec<String>> {
    if let Some(v) = db::settings_get_json(conn, CURRICULUM_DEFAULT_KEY)? {
        if let Some(arr) = v.as_array() {
            if let Ok(names) = clean_subject_names(arr) {
                if !names.is_empty() {
                    return Ok(names);
                }
            }
        }
        tracing::warn!("ignoring malformed {} setting", CURRICULUM_DEFAULT_KEY);
    }
    Ok(BUILTIN_CURRICULUM.iter().map(|s| s.to_string()).collect())
}

pub fn class_curriculum(conn: &Connection, class_id: &str, scope: &Scope) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT subject_name
         FROM curriculum_subjects
         WHERE class_id = ? AND semester = ? AND academic_year = ?
         ORDER BY sort_order",
    )?;
    let names = stmt
        .query_map(params![class_id, scope.semester, scope.academic_year], |r| {
            r.get::<_, String>(0)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

/// The scope's own curriculum, or the configured default when it has none.
/// The flag tells which one was returned.
pub fn effective_curriculum(
    conn: &Connection,
    class_id: &str,
    scope: &Scope,
) -> anyhow::Result<(Vec<String>, bool)> {
    let own = class_curriculum(conn, class_id, scope)?;
    if own.is_empty() {
        Ok((default_curriculum(conn)?, true))
    } else {
        Ok((own, false))
    }
}

/// Appends subjects that are not already in the scope's curriculum. A scope
/// without rows is first seeded with the default list when `seed_default` is set.
/// Returns the names actually added.
pub fn add_subjects(
    conn: &Connection,
    class_id: &str,
    scope: &Scope,
    names: &[String],
    seed_default: bool,
) -> anyhow::Result<Vec<String>> {
    let mut current = class_curriculum(conn, class_id, scope)?;
    let mut to_add: Vec<String> = Vec::new();
    if current.is_empty() && seed_default {
        to_add.extend(default_curriculum(conn)?);
    }
    to_add.extend(names.iter().cloned());

    let mut seen: HashSet<String> = current.iter().map(|s| s.to_lowercase()).collect();
    let mut added = Vec::new();
    for name in to_add {
        if !seen.insert(name.to_lowercase()) {
            continue;
        }
        conn.execute(
            "INSERT INTO curriculum_subjects(id, class_id, semester, academic_year, subject_name, sort_order)
             VALUES(?, ?, ?, ?, ?, ?)",
            params![
                Uuid::new_v4().to_string(),
                class_id,
                scope.semester,
                scope.academic_year,
                name,
                current.len() as i64
            ],
        )?;
        current.push(name.clone());
        added.push(name);
    }
    Ok(added)
}

pub fn load_scores(
    conn: &Connection,
    student_id: &str,
    scope: &Scope,
) -> anyhow::Result<Vec<(String, ScoreTriple)>> {
    let mut stmt = conn.prepare(
        "SELECT subject_name, task, midterm, final_exam
         FROM grade_entries
         WHERE student_id = ? AND semester = ? AND academic_year = ?
         ORDER BY subject_name",
    )?;
    let rows = stmt
        .query_map(params![student_id, scope.semester, scope.academic_year], |r| {
            Ok((
                r.get::<_, String>(0)?,
                ScoreTriple::new(r.get(1)?, r.get(2)?, r.get(3)?),
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// A student's grades for one scope. Only `subjects` (the curriculum, in
/// order) feed statistics; persisted rows outside the curriculum, e.g. left
/// over from a previous class, are reported in `orphaned`.
#[derive(Debug, Clone, Default)]
pub struct ScopeGrades {
    pub subjects: Vec<SubjectGrade>,
    pub orphaned: Vec<SubjectGrade>,
}

pub fn load_scope_grades(
    conn: &Connection,
    student: &StudentRef,
    scope: &Scope,
) -> anyhow::Result<ScopeGrades> {
    let (curriculum, _) = effective_curriculum(conn, &student.class_id, scope)?;
    let persisted = load_scores(conn, &student.id, scope)?;
    Ok(merge_curriculum(&curriculum, persisted))
}

pub fn merge_curriculum(curriculum: &[String], persisted: Vec<(String, ScoreTriple)>) -> ScopeGrades {
    let mut by_name: HashMap<String, (String, ScoreTriple)> = HashMap::new();
    let mut persisted_order: Vec<String> = Vec::new();
    for (name, scores) in persisted {
        let key = name.to_lowercase();
        persisted_order.push(key.clone());
        by_name.insert(key, (name, scores));
    }

    let subjects: Vec<SubjectGrade> = curriculum
        .iter()
        .map(|name| match by_name.remove(&name.to_lowercase()) {
            Some((_, scores)) => SubjectGrade::new(name.clone(), scores),
            None => SubjectGrade::ungraded(name.clone()),
        })
        .collect();
    let orphaned = persisted_order
        .into_iter()
        .filter_map(|key| by_name.remove(&key))
        .map(|(name, scores)| SubjectGrade::new(name, scores))
        .collect();
    ScopeGrades { subjects, orphaned }
}

/// Curriculum of a class scope plus every active student's statistics over it.
pub struct ClassScopeStats {
    pub curriculum: Vec<String>,
    pub curriculum_is_default: bool,
    pub students: Vec<(StudentRef, RosterStatistics)>,
}

pub fn class_statistics(conn: &Connection, class_id: &str, scope: &Scope) -> anyhow::Result<ClassScopeStats> {
    let (curriculum, curriculum_is_default) = effective_curriculum(conn, class_id, scope)?;
    let mut students = Vec::new();
    for s in class_students(conn, class_id)? {
        let persisted = load_scores(conn, &s.id, scope)?;
        let stats = aggregate(&merge_curriculum(&curriculum, persisted).subjects);
        students.push((s, stats));
    }
    Ok(ClassScopeStats {
        curriculum,
        curriculum_is_default,
        students,
    })
}

pub fn upsert_subject_grade(
    conn: &Connection,
    student_id: &str,
    scope: &Scope,
    class_tag: &str,
    grade: &SubjectGrade,
    updated_by: Option<&str>,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO grade_entries(
            id, student_id, subject_name, semester, academic_year, class_name,
            task, midterm, final_exam, final_score, letter_grade, updated_at, updated_by)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_name, semester, academic_year) DO UPDATE SET
            class_name = excluded.class_name,
            task = excluded.task,
            midterm = excluded.midterm,
            final_exam = excluded.final_exam,
            final_score = excluded.final_score,
            letter_grade = excluded.letter_grade,
            updated_at = excluded.updated_at,
            updated_by = excluded.updated_by",
        params![
            Uuid::new_v4().to_string(),
            student_id,
            grade.subject_name,
            scope.semester,
            scope.academic_year,
            class_tag,
            grade.scores.task,
            grade.scores.midterm,
            grade.scores.final_exam,
            grade.final_score,
            display_label(grade.letter_grade),
            db::now_rfc3339(),
            updated_by,
        ],
    )?;
    Ok(())
}
