use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, TeachingRow};
use chrono::{Duration, NaiveDate};
use rusqlite::Connection;
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

fn get_seed(params: &serde_json::Value) -> Result<u64, HandlerErr> {
    match params.get("seed") {
        None => Ok(schedule::DEFAULT_SHUFFLE_SEED),
        Some(v) if v.is_null() => Ok(schedule::DEFAULT_SHUFFLE_SEED),
        Some(v) => v.as_u64().ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "seed must be a non-negative integer".to_string(),
            details: None,
        }),
    }
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

fn teaching_rows(conn: &Connection, session: &str) -> Result<Vec<TeachingRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT t.course_id, t.teacher_id, c.credit_hour
             FROM teaching t
             JOIN courses c ON t.course_id = c.id
             WHERE t.semester = ?
             ORDER BY c.code",
        )
        .map_err(query_err)?;
    stmt.query_map([session], |r| {
        Ok(TeachingRow {
            course_id: r.get(0)?,
            teacher_id: r.get(1)?,
            credit_hour: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_err)
}

fn all_course_ids(conn: &Connection) -> Result<Vec<String>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id FROM courses ORDER BY code")
        .map_err(query_err)?;
    stmt.query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)
}

/// Wipe and regenerate the weekly routine for a session in one transaction,
/// so a crash mid-generation cannot leave a mix of old and new rows.
fn routine_generate(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session = get_required_str(params, "session")?;
    let seed = get_seed(params)?;

    let rows = teaching_rows(conn, &session)?;
    let mut rng = schedule::seeded_rng(seed);
    let outcome = schedule::generate_routine(&mut rng, &rows, &session);

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    tx.execute("DELETE FROM class_routine WHERE session = ?", [&session])
        .map_err(update_err("class_routine"))?;
    for slot in &outcome.assigned {
        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO class_routine(id, course_id, teacher_id, day, time_slot, room, session)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &id,
                &slot.course_id,
                &slot.teacher_id,
                &slot.day,
                &slot.time_slot,
                &slot.room,
                &slot.session,
            ),
        )
        .map_err(update_err("class_routine"))?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({
        "session": session,
        "assignedCount": outcome.assigned.len(),
        "unassignedCount": outcome.unassigned.len(),
        "assigned": outcome.assigned,
        "unassigned": outcome.unassigned,
    }))
}

fn routine_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session = get_required_str(params, "session")?;
    let mut stmt = conn
        .prepare(
            "SELECT course_id, teacher_id, day, time_slot, room
             FROM class_routine
             WHERE session = ?
             ORDER BY rowid",
        )
        .map_err(query_err)?;
    let slots: Vec<serde_json::Value> = stmt
        .query_map([&session], |r| {
            Ok(json!({
                "courseId": r.get::<_, String>(0)?,
                "teacherId": r.get::<_, String>(1)?,
                "day": r.get::<_, String>(2)?,
                "timeSlot": r.get::<_, String>(3)?,
                "room": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "session": session, "slots": slots }))
}

/// Exam timetable regeneration, same wipe-then-insert transaction shape as
/// the routine. Exams start two weeks out unless the caller pins a date.
fn exam_schedule_generate(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session = get_required_str(params, "session")?;
    let seed = get_seed(params)?;
    let start_date = match params.get("startDate").and_then(|v| v.as_str()) {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| HandlerErr {
            code: "bad_params",
            message: "startDate must be YYYY-MM-DD".to_string(),
            details: None,
        })?,
        None => chrono::Local::now().date_naive() + Duration::days(14),
    };

    let course_ids = all_course_ids(conn)?;
    let mut rng = schedule::seeded_rng(seed);
    let outcome = schedule::generate_exam_schedule(&mut rng, &course_ids, start_date, &session);

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    tx.execute("DELETE FROM exam_schedule WHERE session = ?", [&session])
        .map_err(update_err("exam_schedule"))?;
    for slot in &outcome.assigned {
        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO exam_schedule(id, course_id, exam_date, start_time, end_time, room, session)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &id,
                &slot.course_id,
                &slot.exam_date,
                &slot.start_time,
                &slot.end_time,
                &slot.room,
                &slot.session,
            ),
        )
        .map_err(update_err("exam_schedule"))?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({
        "session": session,
        "startDate": start_date.format("%Y-%m-%d").to_string(),
        "assignedCount": outcome.assigned.len(),
        "unassignedCount": outcome.unassigned.len(),
        "assigned": outcome.assigned,
        "unassigned": outcome.unassigned,
    }))
}

fn exam_schedule_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session = get_required_str(params, "session")?;
    let mut stmt = conn
        .prepare(
            "SELECT course_id, exam_date, start_time, end_time, room
             FROM exam_schedule
             WHERE session = ?
             ORDER BY exam_date, start_time, room",
        )
        .map_err(query_err)?;
    let slots: Vec<serde_json::Value> = stmt
        .query_map([&session], |r| {
            Ok(json!({
                "courseId": r.get::<_, String>(0)?,
                "examDate": r.get::<_, String>(1)?,
                "startTime": r.get::<_, String>(2)?,
                "endTime": r.get::<_, String>(3)?,
                "room": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "session": session, "slots": slots }))
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
        "routine.generate" => Some(dispatch(state, req, routine_generate)),
        "routine.get" => Some(dispatch(state, req, routine_get)),
        "examSchedule.generate" => Some(dispatch(state, req, exam_schedule_generate)),
        "examSchedule.get" => Some(dispatch(state, req, exam_schedule_get)),
        _ => None,
    }
}
