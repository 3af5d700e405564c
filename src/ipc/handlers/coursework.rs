use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn get_required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn query_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn not_found(what: &str) -> HandlerErr {
    HandlerErr {
        code: "not_found",
        message: format!("{} not found", what),
        details: None,
    }
}

fn exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(query_err)
}

fn add_assessment(
    conn: &Connection,
    params: &serde_json::Value,
    table: &str,
    date_key: &str,
    date_column: &str,
    id_key: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let semester = get_required_str(params, "semester")?;
    let title = get_required_str(params, "title")?;
    let max_marks = get_required_f64(params, "maxMarks")?;
    if max_marks <= 0.0 {
        return Err(HandlerErr {
            code: "bad_params",
            message: "maxMarks must be positive".to_string(),
            details: None,
        });
    }
    let date = params
        .get(date_key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if !exists(conn, "SELECT 1 FROM courses WHERE id = ?", &course_id)? {
        return Err(not_found("course"));
    }

    let id = Uuid::new_v4().to_string();
    let sql = format!(
        "INSERT INTO {}(id, course_id, semester, title, max_marks, {})
         VALUES(?, ?, ?, ?, ?, ?)",
        table, date_column
    );
    conn.execute(&sql, (&id, &course_id, &semester, &title, max_marks, &date))
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        })?;
    Ok(json!({ id_key: id }))
}

fn submit(
    conn: &Connection,
    params: &serde_json::Value,
    parent_table: &str,
    parent_key: &str,
    parent_what: &str,
    submission_table: &str,
    parent_column: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let parent_id = get_required_str(params, parent_key)?;
    let student_id = get_required_str(params, "studentId")?;
    let marks = get_required_f64(params, "marks")?;
    if marks < 0.0 {
        return Err(HandlerErr {
            code: "bad_params",
            message: "marks must not be negative".to_string(),
            details: None,
        });
    }

    let parent_sql = format!("SELECT 1 FROM {} WHERE id = ?", parent_table);
    if !exists(conn, &parent_sql, &parent_id)? {
        return Err(not_found(parent_what));
    }
    if !exists(conn, "SELECT 1 FROM students WHERE id = ?", &student_id)? {
        return Err(not_found("student"));
    }

    let id = Uuid::new_v4().to_string();
    let submitted_at = chrono::Utc::now().to_rfc3339();
    let sql = format!(
        "INSERT INTO {}(id, {}, student_id, marks, submitted_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT({}, student_id) DO UPDATE SET
           marks = excluded.marks,
           submitted_at = excluded.submitted_at",
        submission_table, parent_column, parent_column
    );
    conn.execute(&sql, (&id, &parent_id, &student_id, marks, &submitted_at))
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": submission_table })),
        })?;
    Ok(json!({ "ok": true }))
}

fn add_assignment(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    add_assessment(
        conn,
        params,
        "assignments",
        "dueDate",
        "due_date",
        "assignmentId",
    )
}

fn submit_assignment(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    submit(
        conn,
        params,
        "assignments",
        "assignmentId",
        "assignment",
        "student_assignments",
        "assignment_id",
    )
}

fn add_class_test(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    add_assessment(
        conn,
        params,
        "class_tests",
        "testDate",
        "test_date",
        "testId",
    )
}

fn submit_class_test(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    submit(
        conn,
        params,
        "class_tests",
        "testId",
        "class test",
        "student_test_submissions",
        "test_id",
    )
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
        "coursework.addAssignment" => Some(dispatch(state, req, add_assignment)),
        "coursework.submitAssignment" => Some(dispatch(state, req, submit_assignment)),
        "coursework.addClassTest" => Some(dispatch(state, req, add_class_test)),
        "coursework.submitClassTest" => Some(dispatch(state, req, submit_class_test)),
        _ => None,
    }
}
