use crate::grading::{self, GradeContext, GradeError};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: String,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, &self.code, self.message, self.details)
    }
}

impl From<GradeError> for HandlerErr {
    fn from(e: GradeError) -> Self {
        Self {
            code: e.code,
            message: e.message,
            details: e.details,
        }
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn get_required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

fn query_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed".to_string(),
        message: e.to_string(),
        details: None,
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr {
        code: "serialize_failed".to_string(),
        message: e.to_string(),
        details: None,
    })
}

/// Manual mark entry for the in-band components. Derived components are never
/// written here; they are recomputed from their source tables on every read.
fn upsert_manual(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let course_id = get_required_str(params, "courseId")?;
    let semester = get_required_str(params, "semester")?;
    let mid = get_required_f64(params, "mid")?;
    let final_exam = get_required_f64(params, "final")?;

    if !(0.0..=grading::MIDTERM_WEIGHT).contains(&mid) {
        return Err(HandlerErr::bad_params(format!(
            "mid must be between 0 and {}",
            grading::MIDTERM_WEIGHT
        )));
    }
    if !(0.0..=grading::FINAL_WEIGHT).contains(&final_exam) {
        return Err(HandlerErr::bad_params(format!(
            "final must be between 0 and {}",
            grading::FINAL_WEIGHT
        )));
    }

    let ctx = GradeContext { conn };
    if !grading::student_exists(&ctx, &student_id)? {
        return Err(HandlerErr {
            code: "not_found".to_string(),
            message: "student not found".to_string(),
            details: None,
        });
    }
    let enrolled = conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE student_id = ? AND course_id = ? AND semester = ?",
            (&student_id, &course_id, &semester),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(query_err)?
        .is_some();
    if !enrolled {
        return Err(HandlerErr {
            code: "not_found".to_string(),
            message: "student is not enrolled in this course for the semester".to_string(),
            details: None,
        });
    }
    if grading::marks_finalized(&ctx, &course_id, &semester)? {
        return Err(HandlerErr {
            code: "finalized".to_string(),
            message: "marks for this course have been finalized".to_string(),
            details: None,
        });
    }

    let id = Uuid::new_v4().to_string();
    let updated_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO grades(id, student_id, course_id, semester, mid, final, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, course_id, semester) DO UPDATE SET
           mid = excluded.mid,
           final = excluded.final,
           updated_at = excluded.updated_at",
        (
            &id,
            &student_id,
            &course_id,
            &semester,
            mid,
            final_exam,
            &updated_at,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed".to_string(),
        message: e.to_string(),
        details: Some(json!({ "table": "grades" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn course_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let semester = get_required_str(params, "semester")?;
    let ctx = GradeContext { conn };
    let summary = grading::course_summary(&ctx, &course_id, &semester)?;
    to_value(&summary)
}

fn student_transcript(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let ctx = GradeContext { conn };
    let transcript = grading::student_transcript(&ctx, &student_id)?;
    to_value(&transcript)
}

fn predict_gpa(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let semester = get_optional_str(params, "semester");
    let ctx = GradeContext { conn };
    let prediction = grading::predict_gpa(&ctx, &student_id, semester.as_deref())?;
    to_value(&prediction)
}

fn dispatch(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.upsertManual" => Some(dispatch(state, req, upsert_manual)),
        "grades.courseSummary" => Some(dispatch(state, req, course_summary)),
        "grades.studentTranscript" => Some(dispatch(state, req, student_transcript)),
        "grades.predictGpa" => Some(dispatch(state, req, predict_gpa)),
        _ => None,
    }
}
