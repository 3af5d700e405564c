use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

/// Weight bands for the five grade components. Midterm and final are entered
/// manually and already live in-band; the other three are derived from
/// attendance and submission tables and scaled into their band.
pub const ATTENDANCE_WEIGHT: f64 = 5.0;
pub const CLASS_TEST_WEIGHT: f64 = 10.0;
pub const ASSIGNMENT_WEIGHT: f64 = 5.0;
pub const MIDTERM_WEIGHT: f64 = 30.0;
pub const FINAL_WEIGHT: f64 = 50.0;

/// Threshold below which average attendance starts to drag the GPA
/// prediction down.
pub const ATTENDANCE_PENALTY_FLOOR: f64 = 0.75;

/// Half-up rounding on the first decimal. The epsilon absorbs binary
/// representation error so exact-decimal inputs land on the expected side.
pub fn round_to_1(x: f64) -> f64 {
    ((10.0 * x) + 0.5 + 1e-9).floor() / 10.0
}

/// Half-up rounding on the second decimal, same convention as [`round_to_1`]
/// (2.925 rounds to 2.93).
pub fn round_to_2(x: f64) -> f64 {
    ((100.0 * x) + 0.5 + 1e-9).floor() / 100.0
}

/// Scale a raw percentage into its weight band, clamped at the band ceiling.
/// A missing percentage (no underlying rows) scores zero.
pub fn band_score(raw_percent: Option<f64>, max_weight: f64) -> f64 {
    match raw_percent {
        Some(p) => (p * max_weight / 100.0).min(max_weight),
        None => 0.0,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SubmissionMark {
    pub marks: f64,
    pub out_of: f64,
}

/// Mean of per-item marks/out_of ratios as a percentage. Items with a
/// non-positive denominator are skipped; `None` when nothing was submitted.
pub fn submission_percent(marks: &[SubmissionMark]) -> Option<f64> {
    let mut sum = 0.0_f64;
    let mut counted = 0_usize;
    for m in marks {
        if m.out_of > 0.0 {
            sum += m.marks / m.out_of;
            counted += 1;
        }
    }
    if counted == 0 {
        None
    } else {
        Some(100.0 * sum / counted as f64)
    }
}

/// Share of recorded class days the student was present, as a percentage.
pub fn attendance_percent(present: &[bool]) -> Option<f64> {
    if present.is_empty() {
        return None;
    }
    let attended = present.iter().filter(|p| **p).count();
    Some(100.0 * attended as f64 / present.len() as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LetterGrade {
    pub letter: &'static str,
    pub grade_point: f64,
}

/// Inclusive lower bounds, evaluated highest-to-lowest. Anything below 40
/// is an F at 0.00.
const GRADE_BANDS: [(f64, &str, f64); 9] = [
    (80.0, "A+", 4.00),
    (75.0, "A", 3.75),
    (70.0, "A-", 3.50),
    (65.0, "B+", 3.25),
    (60.0, "B", 3.00),
    (55.0, "B-", 2.75),
    (50.0, "C+", 2.50),
    (45.0, "C", 2.25),
    (40.0, "D", 2.00),
];

pub fn letter_grade(total: f64) -> LetterGrade {
    for (floor, letter, grade_point) in GRADE_BANDS {
        if total >= floor {
            return LetterGrade {
                letter,
                grade_point,
            };
        }
    }
    LetterGrade {
        letter: "F",
        grade_point: 0.0,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CreditedGradePoint {
    pub grade_point: f64,
    pub credit_hour: f64,
}

/// Credit-weighted mean of grade points, rounded to two decimals. Courses
/// without a positive credit hour are skipped; an empty credited set yields
/// 0.0 rather than dividing by zero.
pub fn grade_point_average(entries: &[CreditedGradePoint]) -> f64 {
    let mut points = 0.0_f64;
    let mut credits = 0.0_f64;
    for e in entries {
        if e.credit_hour <= 0.0 {
            continue;
        }
        points += e.grade_point * e.credit_hour;
        credits += e.credit_hour;
    }
    if credits > 0.0 {
        round_to_2(points / credits)
    } else {
        0.0
    }
}

/// Linear attendance penalty on a predicted GPA: below the floor, half of
/// the shortfall comes off, clamped at zero.
pub fn attendance_adjusted(current_gpa: f64, average_attendance: f64) -> f64 {
    if average_attendance < ATTENDANCE_PENALTY_FLOOR {
        (current_gpa - (ATTENDANCE_PENALTY_FLOOR - average_attendance) * 0.5).max(0.0)
    } else {
        current_gpa
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GradeError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl GradeError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GradeContext<'a> {
    pub conn: &'a Connection,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DerivedComponents {
    pub assignment_percent: Option<f64>,
    pub class_test_percent: Option<f64>,
    pub attendance_percent: Option<f64>,
}

impl DerivedComponents {
    pub fn assignment_score(&self) -> f64 {
        band_score(self.assignment_percent, ASSIGNMENT_WEIGHT)
    }

    pub fn class_test_score(&self) -> f64 {
        band_score(self.class_test_percent, CLASS_TEST_WEIGHT)
    }

    pub fn attendance_score(&self) -> f64 {
        band_score(self.attendance_percent, ATTENDANCE_WEIGHT)
    }
}

fn db_err(e: rusqlite::Error) -> GradeError {
    GradeError::new("db_query_failed", e.to_string())
}

/// Fetch the raw collections behind the three derived components and reduce
/// them in memory. Attendance is aggregated over the whole course history,
/// not per semester; submissions are scoped to the semester they belong to.
pub fn derived_components(
    ctx: &GradeContext<'_>,
    student_id: &str,
    course_id: &str,
    semester: &str,
) -> Result<DerivedComponents, GradeError> {
    let conn = ctx.conn;

    let mut stmt = conn
        .prepare(
            "SELECT sa.marks, a.max_marks
             FROM student_assignments sa
             JOIN assignments a ON sa.assignment_id = a.id
             WHERE sa.student_id = ? AND a.course_id = ? AND a.semester = ?",
        )
        .map_err(db_err)?;
    let assignment_marks: Vec<SubmissionMark> = stmt
        .query_map((student_id, course_id, semester), |r| {
            Ok(SubmissionMark {
                marks: r.get(0)?,
                out_of: r.get(1)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut stmt = conn
        .prepare(
            "SELECT sts.marks, ct.max_marks
             FROM student_test_submissions sts
             JOIN class_tests ct ON sts.test_id = ct.id
             WHERE sts.student_id = ? AND ct.course_id = ? AND ct.semester = ?",
        )
        .map_err(db_err)?;
    let test_marks: Vec<SubmissionMark> = stmt
        .query_map((student_id, course_id, semester), |r| {
            Ok(SubmissionMark {
                marks: r.get(0)?,
                out_of: r.get(1)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut stmt = conn
        .prepare("SELECT present FROM attendance WHERE student_id = ? AND course_id = ?")
        .map_err(db_err)?;
    let present: Vec<bool> = stmt
        .query_map((student_id, course_id), |r| {
            Ok(r.get::<_, i64>(0)? != 0)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(DerivedComponents {
        assignment_percent: submission_percent(&assignment_marks),
        class_test_percent: submission_percent(&test_marks),
        attendance_percent: attendance_percent(&present),
    })
}

pub fn student_exists(ctx: &GradeContext<'_>, student_id: &str) -> Result<bool, GradeError> {
    ctx.conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map(|v| v.is_some())
        .map_err(db_err)
}

/// Whether any teaching row for this (course, semester) has had its marks
/// finalized.
pub fn marks_finalized(
    ctx: &GradeContext<'_>,
    course_id: &str,
    semester: &str,
) -> Result<bool, GradeError> {
    let flag: i64 = ctx
        .conn
        .query_row(
            "SELECT COALESCE(MAX(marks_finalized), 0)
             FROM teaching
             WHERE course_id = ? AND semester = ?",
            (course_id, semester),
            |r| r.get(0),
        )
        .map_err(db_err)?;
    Ok(flag != 0)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseStanding {
    pub course_id: String,
    pub course_code: String,
    pub course_title: String,
    pub semester: String,
    pub credit_hour: f64,
    pub mid: f64,
    #[serde(rename = "final")]
    pub final_exam: f64,
    pub assignment_score: f64,
    pub class_test_score: f64,
    pub attendance_score: f64,
    pub total: f64,
}

/// Current standing per graded course for a student, optionally limited to
/// one semester. The five-component total feeds the letter-grade table.
pub fn course_standings(
    ctx: &GradeContext<'_>,
    student_id: &str,
    semester: Option<&str>,
) -> Result<Vec<CourseStanding>, GradeError> {
    let conn = ctx.conn;

    let mut sql = String::from(
        "SELECT g.course_id, c.code, c.title, c.credit_hour, g.semester, g.mid, g.final
         FROM grades g
         JOIN courses c ON g.course_id = c.id
         WHERE g.student_id = ?",
    );
    if semester.is_some() {
        sql.push_str(" AND g.semester = ?");
    }
    sql.push_str(" ORDER BY c.code");

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let raw: Vec<(String, String, String, f64, String, f64, f64)> = match semester {
        Some(s) => stmt
            .query_map((student_id, s), |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?,
        None => stmt
            .query_map([student_id], |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?,
    };

    let mut standings = Vec::with_capacity(raw.len());
    for (course_id, code, title, credit_hour, row_semester, mid, final_exam) in raw {
        let derived = derived_components(ctx, student_id, &course_id, &row_semester)?;
        let assignment_score = derived.assignment_score();
        let class_test_score = derived.class_test_score();
        let attendance_score = derived.attendance_score();
        let total = mid + final_exam + assignment_score + class_test_score + attendance_score;
        standings.push(CourseStanding {
            course_id,
            course_code: code,
            course_title: title,
            semester: row_semester,
            credit_hour,
            mid,
            final_exam,
            assignment_score,
            class_test_score,
            attendance_score,
            total,
        });
    }
    Ok(standings)
}

/// Per-course attendance ratios (attended / held) across the student's whole
/// history. Courses with no attendance rows simply do not appear.
pub fn attendance_ratios(
    ctx: &GradeContext<'_>,
    student_id: &str,
) -> Result<Vec<f64>, GradeError> {
    let mut stmt = ctx
        .conn
        .prepare(
            "SELECT COUNT(*), SUM(CASE WHEN present <> 0 THEN 1 ELSE 0 END)
             FROM attendance
             WHERE student_id = ?
             GROUP BY course_id",
        )
        .map_err(db_err)?;
    let counts: Vec<(i64, i64)> = stmt
        .query_map([student_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(counts
        .into_iter()
        .map(|(held, attended)| attended as f64 / held as f64)
        .collect())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpaPrediction {
    pub current_gpa: f64,
    pub predicted_gpa: f64,
    pub average_attendance: f64,
    pub courses: Vec<CourseStanding>,
}

/// Extrapolate an end-of-semester GPA from the standings so far, then apply
/// the attendance penalty. A student with no attendance history is treated
/// as fully attending.
pub fn predict_gpa(
    ctx: &GradeContext<'_>,
    student_id: &str,
    semester: Option<&str>,
) -> Result<GpaPrediction, GradeError> {
    if !student_exists(ctx, student_id)? {
        return Err(GradeError::new("not_found", "student not found"));
    }

    let courses = course_standings(ctx, student_id, semester)?;
    let entries: Vec<CreditedGradePoint> = courses
        .iter()
        .map(|s| CreditedGradePoint {
            grade_point: letter_grade(s.total).grade_point,
            credit_hour: s.credit_hour,
        })
        .collect();
    let current_gpa = grade_point_average(&entries);

    let ratios = attendance_ratios(ctx, student_id)?;
    let average_attendance = if ratios.is_empty() {
        1.0
    } else {
        ratios.iter().sum::<f64>() / ratios.len() as f64
    };

    let predicted_gpa = round_to_2(attendance_adjusted(current_gpa, average_attendance));

    Ok(GpaPrediction {
        current_gpa,
        predicted_gpa,
        average_attendance,
        courses,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGradeRow {
    pub student_id: String,
    pub student_no: Option<String>,
    pub name: String,
    pub attendance: f64,
    pub class_tests: f64,
    pub assignments: f64,
    pub mid: f64,
    #[serde(rename = "final")]
    pub final_exam: f64,
    pub total: f64,
    pub letter: String,
    pub grade_point: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSummary {
    pub course_id: String,
    pub course_code: String,
    pub semester: String,
    pub marks_finalized: bool,
    pub rows: Vec<StudentGradeRow>,
}

/// The teacher-facing grade sheet for one course offering: every enrolled
/// student with manual marks, derived components, total and letter. Derived
/// components and totals are reported at one decimal; the letter is taken
/// from the unrounded total.
pub fn course_summary(
    ctx: &GradeContext<'_>,
    course_id: &str,
    semester: &str,
) -> Result<CourseSummary, GradeError> {
    let conn = ctx.conn;

    let code: Option<String> = conn
        .query_row("SELECT code FROM courses WHERE id = ?", [course_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    let Some(course_code) = code else {
        return Err(GradeError::new("not_found", "course not found"));
    };

    let finalized = marks_finalized(ctx, course_id, semester)?;

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.student_no, s.name
             FROM students s
             JOIN enrollments e ON e.student_id = s.id
             WHERE e.course_id = ? AND e.semester = ?
             ORDER BY s.name",
        )
        .map_err(db_err)?;
    let enrolled: Vec<(String, Option<String>, String)> = stmt
        .query_map((course_id, semester), |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut rows = Vec::with_capacity(enrolled.len());
    for (student_id, student_no, name) in enrolled {
        let manual: Option<(f64, f64)> = conn
            .query_row(
                "SELECT mid, final FROM grades
                 WHERE student_id = ? AND course_id = ? AND semester = ?",
                (&student_id, course_id, semester),
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;
        let (mid, final_exam) = manual.unwrap_or((0.0, 0.0));

        let derived = derived_components(ctx, &student_id, course_id, semester)?;
        let attendance = derived.attendance_score();
        let class_tests = derived.class_test_score();
        let assignments = derived.assignment_score();
        let total = mid + final_exam + attendance + class_tests + assignments;
        let grade = letter_grade(total);

        rows.push(StudentGradeRow {
            student_id,
            student_no,
            name,
            attendance: round_to_1(attendance),
            class_tests: round_to_1(class_tests),
            assignments: round_to_1(assignments),
            mid,
            final_exam,
            total: round_to_1(total),
            letter: grade.letter.to_string(),
            grade_point: grade.grade_point,
        });
    }

    Ok(CourseSummary {
        course_id: course_id.to_string(),
        course_code,
        semester: semester.to_string(),
        marks_finalized: finalized,
        rows,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptCourse {
    pub course_code: String,
    pub course_title: String,
    pub credit_hour: f64,
    pub total: f64,
    pub letter: String,
    pub grade_point: f64,
    pub points_earned: f64,
    pub marks_finalized: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterReport {
    pub semester: String,
    pub courses: Vec<TranscriptCourse>,
    pub credit_hours: f64,
    pub gpa: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub semesters: Vec<SemesterReport>,
    pub cumulative_gpa: f64,
    pub cumulative_credits: f64,
}

/// Semester-by-semester transcript with a cumulative GPA over every course
/// that has a grade row. Semesters where nothing has been graded yet are
/// omitted. A course contributes to the aggregation even before its marks
/// are finalized; the flag is surfaced so the caller can label it.
pub fn student_transcript(
    ctx: &GradeContext<'_>,
    student_id: &str,
) -> Result<Transcript, GradeError> {
    if !student_exists(ctx, student_id)? {
        return Err(GradeError::new("not_found", "student not found"));
    }
    let conn = ctx.conn;

    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT semester FROM enrollments
             WHERE student_id = ?
             ORDER BY semester DESC",
        )
        .map_err(db_err)?;
    let semesters: Vec<String> = stmt
        .query_map([student_id], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut reports = Vec::new();
    let mut cumulative_points = 0.0_f64;
    let mut cumulative_credits = 0.0_f64;

    for semester in semesters {
        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.code, c.title, c.credit_hour, g.mid, g.final
                 FROM courses c
                 JOIN enrollments e ON e.course_id = c.id
                 LEFT JOIN grades g
                   ON g.student_id = e.student_id
                  AND g.course_id = c.id
                  AND g.semester = e.semester
                 WHERE e.student_id = ? AND e.semester = ?
                 ORDER BY c.code",
            )
            .map_err(db_err)?;
        let raw: Vec<(String, String, String, f64, Option<f64>, Option<f64>)> = stmt
            .query_map((student_id, &semester), |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?;

        let mut courses = Vec::new();
        let mut semester_points = 0.0_f64;
        let mut semester_credits = 0.0_f64;

        for (course_id, code, title, credit_hour, mid, final_exam) in raw {
            if mid.is_none() && final_exam.is_none() {
                continue;
            }
            let derived = derived_components(ctx, student_id, &course_id, &semester)?;
            let total = mid.unwrap_or(0.0)
                + final_exam.unwrap_or(0.0)
                + derived.attendance_score()
                + derived.class_test_score()
                + derived.assignment_score();
            let grade = letter_grade(total);
            let points_earned = grade.grade_point * credit_hour;
            let finalized = marks_finalized(ctx, &course_id, &semester)?;

            if credit_hour > 0.0 {
                semester_points += points_earned;
                semester_credits += credit_hour;
            }
            courses.push(TranscriptCourse {
                course_code: code,
                course_title: title,
                credit_hour,
                total: round_to_1(total),
                letter: grade.letter.to_string(),
                grade_point: grade.grade_point,
                points_earned,
                marks_finalized: finalized,
            });
        }

        if courses.is_empty() {
            continue;
        }
        let gpa = if semester_credits > 0.0 {
            round_to_2(semester_points / semester_credits)
        } else {
            0.0
        };
        cumulative_points += semester_points;
        cumulative_credits += semester_credits;
        reports.push(SemesterReport {
            semester,
            courses,
            credit_hours: semester_credits,
            gpa,
        });
    }

    let cumulative_gpa = if cumulative_credits > 0.0 {
        round_to_2(cumulative_points / cumulative_credits)
    } else {
        0.0
    };

    Ok(Transcript {
        semesters: reports,
        cumulative_gpa,
        cumulative_credits,
    })
}
