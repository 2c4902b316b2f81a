use serde::{Serialize, Serializer};

/// Component weights, in percent, of the final score.
pub const TASK_WEIGHT_PCT: i64 = 30;
pub const MIDTERM_WEIGHT_PCT: i64 = 30;
pub const FINAL_EXAM_WEIGHT_PCT: i64 = 40;

pub const SCORE_MIN: i64 = 0;
pub const SCORE_MAX: i64 = 100;

/// Rendered in place of a final score or letter grade that does not exist yet.
pub const UNSET_LABEL: &str = "-";

/// Half-up rounding to the nearest integer: `Int(x + 0.5)`.
pub fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

/// Half-up rounding to 2 decimals: `Int(100*x + 0.5) / 100`.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Reads one form field. Blank means "not entered"; anything unparseable
/// degrades to "not entered" as well. Decimal input is truncated toward zero.
/// Values are not range checked here.
pub fn normalize(raw: &str) -> Option<i64> {
    let t = raw.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(v) = t.parse::<i64>() {
        return Some(v);
    }
    let v = t.parse::<f64>().ok()?;
    if !v.is_finite() {
        return None;
    }
    Some(v.trunc() as i64)
}

/// Same rules as [`normalize`] for values arriving as JSON (numbers, numeric
/// strings, `null`).
pub fn normalize_value(raw: &serde_json::Value) -> Option<i64> {
    match raw {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|v| v.is_finite())
                .map(|v| v.trunc() as i64)
        }),
        serde_json::Value::String(s) => normalize(s),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreTriple {
    pub task: Option<i64>,
    pub midterm: Option<i64>,
    pub final_exam: Option<i64>,
}

impl ScoreTriple {
    pub fn new(task: Option<i64>, midterm: Option<i64>, final_exam: Option<i64>) -> Self {
        Self {
            task,
            midterm,
            final_exam,
        }
    }

    /// Names (wire spelling) of present fields outside [0, 100].
    pub fn out_of_range_fields(&self) -> Vec<&'static str> {
        let in_range = |v: Option<i64>| v.map(|s| (SCORE_MIN..=SCORE_MAX).contains(&s));
        let mut out = Vec::new();
        if in_range(self.task) == Some(false) {
            out.push("task");
        }
        if in_range(self.midterm) == Some(false) {
            out.push("midterm");
        }
        if in_range(self.final_exam) == Some(false) {
            out.push("finalExam");
        }
        out
    }
}

/// `round(0.3*task + 0.3*midterm + 0.4*final_exam)`, or `None` unless all three
/// components are present.
///
/// Computed exactly in integer percent units and rounded half up, so a result
/// landing on .5 always goes to the next integer (37.5 -> 38).
pub fn compute_final(
    task: Option<i64>,
    midterm: Option<i64>,
    final_exam: Option<i64>,
) -> Option<i64> {
    let (t, m, f) = (task?, midterm?, final_exam?);
    let weighted = (TASK_WEIGHT_PCT as i128) * (t as i128)
        + (MIDTERM_WEIGHT_PCT as i128) * (m as i128)
        + (FINAL_EXAM_WEIGHT_PCT as i128) * (f as i128);
    let rounded = (weighted + 50).div_euclid(100);
    Some(rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
}

/// Presentation tier of a letter grade. Ordered from worst to best so tiers
/// can be compared for severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeTier {
    Failing,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl GradeTier {
    pub fn color(self) -> &'static str {
        match self {
            GradeTier::Failing => "red",
            GradeTier::Poor => "orange",
            GradeTier::Fair => "yellow",
            GradeTier::Good => "blue",
            GradeTier::Excellent => "green",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LetterGrade {
    A,
    B,
    C,
    D,
    E,
}

impl LetterGrade {
    pub const ALL: [LetterGrade; 5] = [
        LetterGrade::A,
        LetterGrade::B,
        LetterGrade::C,
        LetterGrade::D,
        LetterGrade::E,
    ];

    pub fn letter(self) -> &'static str {
        match self {
            LetterGrade::A => "A",
            LetterGrade::B => "B",
            LetterGrade::C => "C",
            LetterGrade::D => "D",
            LetterGrade::E => "E",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            LetterGrade::A => "Sangat Baik",
            LetterGrade::B => "Baik",
            LetterGrade::C => "Cukup",
            LetterGrade::D => "Kurang",
            LetterGrade::E => "Sangat Kurang",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LetterGrade::A => "A (Sangat Baik)",
            LetterGrade::B => "B (Baik)",
            LetterGrade::C => "C (Cukup)",
            LetterGrade::D => "D (Kurang)",
            LetterGrade::E => "E (Sangat Kurang)",
        }
    }

    /// Inclusive lower bound of the band. `E` is open below.
    pub fn min_score(self) -> Option<i64> {
        match self {
            LetterGrade::A => Some(90),
            LetterGrade::B => Some(75),
            LetterGrade::C => Some(60),
            LetterGrade::D => Some(50),
            LetterGrade::E => None,
        }
    }

    /// Inclusive upper bound of the band. `A` is open above.
    pub fn max_score(self) -> Option<i64> {
        match self {
            LetterGrade::A => None,
            LetterGrade::B => Some(89),
            LetterGrade::C => Some(74),
            LetterGrade::D => Some(59),
            LetterGrade::E => Some(49),
        }
    }

    pub fn tier(self) -> GradeTier {
        match self {
            LetterGrade::A => GradeTier::Excellent,
            LetterGrade::B => GradeTier::Good,
            LetterGrade::C => GradeTier::Fair,
            LetterGrade::D => GradeTier::Poor,
            LetterGrade::E => GradeTier::Failing,
        }
    }
}

impl Serialize for LetterGrade {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

fn serialize_letter<S: Serializer>(
    grade: &Option<LetterGrade>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(display_label(*grade))
}

/// Letter grade ("predikat") of a final score; `None` while ungraded.
pub fn classify(score: Option<i64>) -> Option<LetterGrade> {
    let s = score?;
    let grade = if s >= 90 {
        LetterGrade::A
    } else if s >= 75 {
        LetterGrade::B
    } else if s >= 60 {
        LetterGrade::C
    } else if s >= 50 {
        LetterGrade::D
    } else {
        LetterGrade::E
    };
    Some(grade)
}

pub fn display_label(grade: Option<LetterGrade>) -> &'static str {
    grade.map(LetterGrade::label).unwrap_or(UNSET_LABEL)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub letter: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub min_score: Option<i64>,
    pub max_score: Option<i64>,
    pub tier: GradeTier,
    pub color: &'static str,
}

pub fn band_table() -> Vec<GradeBand> {
    LetterGrade::ALL
        .iter()
        .map(|g| GradeBand {
            letter: g.letter(),
            label: g.label(),
            description: g.description(),
            min_score: g.min_score(),
            max_score: g.max_score(),
            tier: g.tier(),
            color: g.tier().color(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectGrade {
    pub subject_name: String,
    pub scores: ScoreTriple,
    pub final_score: Option<i64>,
    #[serde(serialize_with = "serialize_letter")]
    pub letter_grade: Option<LetterGrade>,
}

impl SubjectGrade {
    pub fn new(subject_name: impl Into<String>, scores: ScoreTriple) -> Self {
        let final_score = compute_final(scores.task, scores.midterm, scores.final_exam);
        Self {
            subject_name: subject_name.into(),
            scores,
            final_score,
            letter_grade: classify(final_score),
        }
    }

    pub fn ungraded(subject_name: impl Into<String>) -> Self {
        Self::new(subject_name, ScoreTriple::default())
    }

    pub fn set_scores(&mut self, scores: ScoreTriple) {
        self.scores = scores;
        self.final_score = compute_final(scores.task, scores.midterm, scores.final_exam);
        self.letter_grade = classify(self.final_score);
    }

    pub fn clear(&mut self) {
        self.set_scores(ScoreTriple::default());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStatistics {
    /// Unrounded; use `mean_final_score_rounded` for display.
    pub mean_final_score: f64,
    pub mean_final_score_rounded: f64,
    pub max_final_score: i64,
    pub min_final_score: i64,
    pub subject_count: usize,
    pub completed_count: usize,
    pub completion_ratio: f64,
    #[serde(serialize_with = "serialize_letter")]
    pub aggregate_letter_grade: Option<LetterGrade>,
}

impl RosterStatistics {
    fn empty(subject_count: usize) -> Self {
        Self {
            mean_final_score: 0.0,
            mean_final_score_rounded: 0.0,
            max_final_score: 0,
            min_final_score: 0,
            subject_count,
            completed_count: 0,
            completion_ratio: 0.0,
            aggregate_letter_grade: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.subject_count > 0 && self.completed_count == self.subject_count
    }
}

/// Summary over a scope's subjects. Only subjects with a final score take part
/// in mean/max/min; `subject_count` counts every subject passed in.
pub fn aggregate<'a, I>(subject_grades: I) -> RosterStatistics
where
    I: IntoIterator<Item = &'a SubjectGrade>,
{
    let mut subject_count: usize = 0;
    let mut finals: Vec<i64> = Vec::new();
    for g in subject_grades {
        subject_count += 1;
        if let Some(v) = g.final_score {
            finals.push(v);
        }
    }

    if finals.is_empty() {
        return RosterStatistics::empty(subject_count);
    }

    let sum: f64 = finals.iter().map(|v| *v as f64).sum();
    let mean = sum / (finals.len() as f64);
    let max = finals.iter().copied().max().unwrap_or(0);
    let min = finals.iter().copied().min().unwrap_or(0);

    RosterStatistics {
        mean_final_score: mean,
        mean_final_score_rounded: round_off_2_decimals(mean),
        max_final_score: max,
        min_final_score: min,
        subject_count,
        completed_count: finals.len(),
        completion_ratio: finals.len() as f64 / subject_count as f64,
        aggregate_letter_grade: classify(Some(round_half_up(mean))),
    }
}

/// Class-level rollup of per-student statistics for one scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassOverview {
    pub student_count: usize,
    /// Students with at least one final score.
    pub graded_count: usize,
    /// Students with every curriculum subject graded.
    pub complete_count: usize,
    /// Mean of per-student means over graded students.
    pub class_mean: f64,
    pub class_mean_rounded: f64,
    #[serde(serialize_with = "serialize_letter")]
    pub class_letter_grade: Option<LetterGrade>,
}

pub fn summarize_class<'a, I>(per_student: I) -> ClassOverview
where
    I: IntoIterator<Item = &'a RosterStatistics>,
{
    let mut student_count = 0usize;
    let mut graded_count = 0usize;
    let mut complete_count = 0usize;
    let mut sum = 0.0_f64;
    for s in per_student {
        student_count += 1;
        if s.completed_count > 0 {
            graded_count += 1;
            sum += s.mean_final_score;
        }
        if s.is_complete() {
            complete_count += 1;
        }
    }

    if graded_count == 0 {
        return ClassOverview {
            student_count,
            graded_count: 0,
            complete_count,
            class_mean: 0.0,
            class_mean_rounded: 0.0,
            class_letter_grade: None,
        };
    }

    let class_mean = sum / (graded_count as f64);
    ClassOverview {
        student_count,
        graded_count,
        complete_count,
        class_mean,
        class_mean_rounded: round_off_2_decimals(class_mean),
        class_letter_grade: classify(Some(round_half_up(class_mean))),
    }
}
