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

fn update_err(table: &str) -> impl Fn(rusqlite::Error) -> HandlerErr + '_ {
    move |e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": table })),
    }
}

fn row_exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(query_err)
}

fn student_exists(conn: &Connection, id: &str) -> Result<bool, HandlerErr> {
    row_exists(conn, "SELECT 1 FROM students WHERE id = ?", id)
}

fn teacher_exists(conn: &Connection, id: &str) -> Result<bool, HandlerErr> {
    row_exists(conn, "SELECT 1 FROM teachers WHERE id = ?", id)
}

fn course_exists(conn: &Connection, id: &str) -> Result<bool, HandlerErr> {
    row_exists(conn, "SELECT 1 FROM courses WHERE id = ?", id)
}

fn add_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let student_no = get_optional_str(params, "studentNo");
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, name, student_no) VALUES(?, ?, ?)",
        (&id, &name, &student_no),
    )
    .map_err(update_err("students"))?;
    Ok(json!({ "studentId": id }))
}

fn add_teacher(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let dept = get_optional_str(params, "dept");
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, name, dept) VALUES(?, ?, ?)",
        (&id, &name, &dept),
    )
    .map_err(update_err("teachers"))?;
    Ok(json!({ "teacherId": id }))
}

fn add_course(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let code = get_required_str(params, "code")?;
    let title = get_required_str(params, "title")?;
    let credit_hour = get_required_f64(params, "creditHour")?;
    if credit_hour < 0.0 {
        return Err(HandlerErr {
            code: "bad_params",
            message: "creditHour must not be negative".to_string(),
            details: None,
        });
    }
    let max_students = params
        .get("maxStudents")
        .and_then(|v| v.as_i64())
        .unwrap_or(50);

    let duplicate = conn
        .query_row("SELECT 1 FROM courses WHERE code = ?", [&code], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(query_err)?
        .is_some();
    if duplicate {
        return Err(HandlerErr {
            code: "conflict",
            message: format!("course code {} already exists", code),
            details: None,
        });
    }

    let id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO courses(id, code, title, credit_hour, max_students, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &code, &title, credit_hour, max_students, &created_at),
    )
    .map_err(update_err("courses"))?;
    Ok(json!({ "courseId": id }))
}

fn enroll(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let course_id = get_required_str(params, "courseId")?;
    let semester = get_required_str(params, "semester")?;

    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }
    if !course_exists(conn, &course_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "course not found".to_string(),
            details: None,
        });
    }

    let duplicate = conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE student_id = ? AND course_id = ? AND semester = ?",
            (&student_id, &course_id, &semester),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(query_err)?
        .is_some();
    if duplicate {
        return Err(HandlerErr {
            code: "conflict",
            message: "student is already enrolled for this semester".to_string(),
            details: None,
        });
    }

    let id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO enrollments(id, student_id, course_id, semester, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &student_id, &course_id, &semester, &created_at),
    )
    .map_err(update_err("enrollments"))?;
    Ok(json!({ "ok": true }))
}

fn assign_teaching(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let course_id = get_required_str(params, "courseId")?;
    let semester = get_required_str(params, "semester")?;

    if !teacher_exists(conn, &teacher_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "teacher not found".to_string(),
            details: None,
        });
    }
    if !course_exists(conn, &course_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "course not found".to_string(),
            details: None,
        });
    }

    let duplicate = conn
        .query_row(
            "SELECT 1 FROM teaching WHERE teacher_id = ? AND course_id = ? AND semester = ?",
            (&teacher_id, &course_id, &semester),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(query_err)?
        .is_some();
    if duplicate {
        return Err(HandlerErr {
            code: "conflict",
            message: "teaching assignment already exists".to_string(),
            details: None,
        });
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teaching(id, teacher_id, course_id, semester) VALUES(?, ?, ?, ?)",
        (&id, &teacher_id, &course_id, &semester),
    )
    .map_err(update_err("teaching"))?;
    Ok(json!({ "ok": true }))
}

fn finalize_marks(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let course_id = get_required_str(params, "courseId")?;
    let semester = get_required_str(params, "semester")?;

    let finalized_at = chrono::Utc::now().to_rfc3339();
    let updated = conn
        .execute(
            "UPDATE teaching SET marks_finalized = 1, finalized_at = ?
             WHERE teacher_id = ? AND course_id = ? AND semester = ?",
            (&finalized_at, &teacher_id, &course_id, &semester),
        )
        .map_err(update_err("teaching"))?;
    if updated == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "teaching assignment not found".to_string(),
            details: None,
        });
    }
    Ok(json!({ "finalizedAt": finalized_at }))
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
        "roster.addStudent" => Some(dispatch(state, req, add_student)),
        "roster.addTeacher" => Some(dispatch(state, req, add_teacher)),
        "roster.addCourse" => Some(dispatch(state, req, add_course)),
        "roster.enroll" => Some(dispatch(state, req, enroll)),
        "roster.assignTeaching" => Some(dispatch(state, req, assign_teaching)),
        "roster.finalizeMarks" => Some(dispatch(state, req, finalize_marks)),
        _ => None,
    }
}
