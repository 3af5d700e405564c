use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
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

fn query_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn parse_date(raw: &str) -> Result<String, HandlerErr> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| HandlerErr {
            code: "bad_params",
            message: "date must be YYYY-MM-DD".to_string(),
            details: None,
        })
}

fn course_exists(conn: &Connection, course_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(query_err)
}

/// Record one class day for a course: a present/absent flag per student,
/// upserted in a single transaction so a partial stamp never persists.
fn stamp_day(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let date = parse_date(&get_required_str(params, "date")?)?;
    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing entries".to_string(),
            details: None,
        });
    };

    if !course_exists(conn, &course_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "course not found".to_string(),
            details: None,
        });
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    let mut stamped = 0_usize;
    for entry in entries {
        let Some(student_id) = entry.get("studentId").and_then(|v| v.as_str()) else {
            return Err(HandlerErr {
                code: "bad_params",
                message: "entries[].studentId must be a string".to_string(),
                details: None,
            });
        };
        let Some(present) = entry.get("present").and_then(|v| v.as_bool()) else {
            return Err(HandlerErr {
                code: "bad_params",
                message: "entries[].present must be a boolean".to_string(),
                details: None,
            });
        };

        let known = tx
            .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()
            .map_err(query_err)?
            .is_some();
        if !known {
            continue;
        }

        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO attendance(id, student_id, course_id, date, present)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(student_id, course_id, date) DO UPDATE SET
               present = excluded.present",
            (&id, student_id, &course_id, &date, present as i64),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance" })),
        })?;
        stamped += 1;
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "stamped": stamped }))
}

fn course_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    if !course_exists(conn, &course_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "course not found".to_string(),
            details: None,
        });
    }

    let mut stmt = conn
        .prepare(
            "SELECT a.student_id, s.name, COUNT(*),
                    SUM(CASE WHEN a.present <> 0 THEN 1 ELSE 0 END)
             FROM attendance a
             JOIN students s ON s.id = a.student_id
             WHERE a.course_id = ?
             GROUP BY a.student_id
             ORDER BY s.name",
        )
        .map_err(query_err)?;
    let rows: Vec<(String, String, i64, i64)> = stmt
        .query_map([&course_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;

    let rows_json: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(student_id, name, held, attended)| {
            json!({
                "studentId": student_id,
                "name": name,
                "classesHeld": held,
                "classesAttended": attended,
                "percent": 100.0 * attended as f64 / held as f64
            })
        })
        .collect();

    Ok(json!({ "courseId": course_id, "rows": rows_json }))
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
        "attendance.stampDay" => Some(dispatch(state, req, stamp_day)),
        "attendance.courseSummary" => Some(dispatch(state, req, course_summary)),
        _ => None,
    }
}
