use crate::grading::{self, GradeContext, GradeError};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{Datelike, Duration};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: String,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
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

fn query_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed".to_string(),
        message: e.to_string(),
        details: None,
    }
}

const STUDY_WEEK: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

const GENERAL_RECOMMENDATIONS: [&str; 5] = [
    "Balance study time across all courses",
    "Take regular breaks to maintain focus",
    "Form study groups for difficult courses",
    "Reach out to professors during office hours",
    "Review material within 24 hours of each class",
];

struct CourseAnalysis {
    code: String,
    priority_rank: u8, // 0 = high, 1 = medium, 2 = low
    analysis: serde_json::Value,
}

/// Status and recommendations for one course: the midterm band flags risk
/// while the final is still pending, and weak attendance escalates whatever
/// the marks said.
fn analyze_course(
    mid: f64,
    final_exam: f64,
    attendance_pct: Option<f64>,
) -> (String, u8, Vec<&'static str>) {
    let mut status = "On Track";
    let mut rank: u8 = 2;
    let mut recommendations: Vec<&'static str> = Vec::new();

    if mid > 0.0 && final_exam == 0.0 {
        if mid < 15.0 {
            status = "At Risk";
            rank = 0;
            recommendations.push("Focus on understanding core concepts");
            recommendations.push("Attend all remaining classes");
            recommendations.push("Schedule weekly review sessions");
        } else if mid < 20.0 {
            status = "Needs Improvement";
            rank = 1;
            recommendations.push("Review weak areas from midterm");
            recommendations.push("Allocate extra practice time");
        }
    }

    if let Some(pct) = attendance_pct {
        if pct < 75.0 {
            if status == "On Track" {
                status = "At Risk";
            }
            if rank == 2 {
                rank = 0;
            }
            recommendations.push("Improve attendance immediately");
            recommendations.push("Get notes from missed classes");
        }
    }

    (status.to_string(), rank, recommendations)
}

fn generate(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let Some(student_id) = params.get("studentId").and_then(|v| v.as_str()) else {
        return Err(HandlerErr {
            code: "bad_params".to_string(),
            message: "missing studentId".to_string(),
            details: None,
        });
    };

    let student_name: Option<String> = conn
        .query_row("SELECT name FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(query_err)?;
    let Some(student_name) = student_name else {
        return Err(HandlerErr {
            code: "not_found".to_string(),
            message: "student not found".to_string(),
            details: None,
        });
    };

    let today = chrono::Local::now().date_naive();
    let semester = match params.get("semester").and_then(|v| v.as_str()) {
        Some(s) => s.to_string(),
        None => {
            let latest: Option<String> = conn
                .query_row(
                    "SELECT semester FROM enrollments
                     WHERE student_id = ?
                     ORDER BY created_at DESC
                     LIMIT 1",
                    [student_id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(query_err)?;
            latest.unwrap_or_else(|| format!("Fall {}", today.year()))
        }
    };

    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.code, c.title, c.credit_hour, g.mid, g.final
             FROM enrollments e
             JOIN courses c ON e.course_id = c.id
             LEFT JOIN grades g
               ON g.student_id = e.student_id
              AND g.course_id = e.course_id
              AND g.semester = e.semester
             WHERE e.student_id = ? AND e.semester = ?
             ORDER BY c.code",
        )
        .map_err(query_err)?;
    let enrolled: Vec<(String, String, String, f64, Option<f64>, Option<f64>)> = stmt
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
        .map_err(query_err)?;

    let ctx = GradeContext { conn };
    let mut analyses: Vec<CourseAnalysis> = Vec::with_capacity(enrolled.len());
    let mut credited: Vec<grading::CreditedGradePoint> = Vec::new();

    for (course_id, code, title, credit_hour, mid, final_exam) in enrolled {
        let graded = mid.is_some() || final_exam.is_some();
        let mid = mid.unwrap_or(0.0);
        let final_exam = final_exam.unwrap_or(0.0);

        let derived = grading::derived_components(&ctx, student_id, &course_id, &semester)?;
        let total = mid
            + final_exam
            + derived.attendance_score()
            + derived.class_test_score()
            + derived.assignment_score();

        if graded {
            credited.push(grading::CreditedGradePoint {
                grade_point: grading::letter_grade(total).grade_point,
                credit_hour,
            });
        }

        let (status, rank, recommendations) =
            analyze_course(mid, final_exam, derived.attendance_percent);
        let priority = match rank {
            0 => "High",
            1 => "Medium",
            _ => "Low",
        };

        analyses.push(CourseAnalysis {
            code: code.clone(),
            priority_rank: rank,
            analysis: json!({
                "courseId": course_id,
                "code": code,
                "title": title,
                "creditHour": credit_hour,
                "mid": mid,
                "final": final_exam,
                "assignmentScore": derived.assignment_score(),
                "classTestScore": derived.class_test_score(),
                "attendanceScore": derived.attendance_score(),
                "attendancePercent": derived.attendance_percent,
                "total": total,
                "status": status,
                "priority": priority,
                "recommendations": recommendations,
            }),
        });
    }

    let current_gpa = grading::grade_point_average(&credited);

    // Seven-day block timetable starting from Monday of the current week:
    // mornings go to high-priority courses, afternoons to medium, evenings
    // rotate through everything.
    let high: Vec<&CourseAnalysis> = analyses.iter().filter(|c| c.priority_rank == 0).collect();
    let medium: Vec<&CourseAnalysis> = analyses.iter().filter(|c| c.priority_rank == 1).collect();
    let start_of_week = today - Duration::days(today.weekday().num_days_from_monday() as i64);

    let mut weekly_plan = Vec::with_capacity(STUDY_WEEK.len());
    for (i, day) in STUDY_WEEK.iter().enumerate() {
        let date = start_of_week + Duration::days(i as i64);
        let mut blocks = Vec::new();

        if !high.is_empty() && i < 5 {
            let course = high[i % high.len()];
            let focus = course
                .analysis
                .get("recommendations")
                .and_then(|v| v.as_array())
                .and_then(|a| a.first())
                .and_then(|v| v.as_str())
                .unwrap_or("Review content");
            blocks.push(json!({
                "time": "9:00 AM - 11:00 AM",
                "course": course.code,
                "focus": focus,
            }));
        }
        if !medium.is_empty() && i < 6 {
            let course = medium[i % medium.len()];
            let focus = course
                .analysis
                .get("recommendations")
                .and_then(|v| v.as_array())
                .and_then(|a| a.first())
                .and_then(|v| v.as_str())
                .unwrap_or("Practice problems");
            blocks.push(json!({
                "time": "2:00 PM - 4:00 PM",
                "course": course.code,
                "focus": focus,
            }));
        }
        if !analyses.is_empty() && i < 6 {
            let course = &analyses[i % analyses.len()];
            blocks.push(json!({
                "time": "7:00 PM - 8:30 PM",
                "course": course.code,
                "focus": "Review and practice",
            }));
        }

        weekly_plan.push(json!({
            "day": day,
            "date": date.format("%Y-%m-%d").to_string(),
            "studyBlocks": blocks,
        }));
    }

    let plan = json!({
        "studentId": student_id,
        "studentName": student_name,
        "semester": semester,
        "currentGpa": current_gpa,
        "generatedDate": today.format("%Y-%m-%d").to_string(),
        "courseAnalysis": analyses.iter().map(|c| c.analysis.clone()).collect::<Vec<_>>(),
        "weeklyPlan": weekly_plan,
        "generalRecommendations": GENERAL_RECOMMENDATIONS,
    });

    let plan_json = plan.to_string();
    let id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO study_plans(id, student_id, semester, plan_json, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&id, student_id, &semester, &plan_json, &created_at),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed".to_string(),
        message: e.to_string(),
        details: Some(json!({ "table": "study_plans" })),
    })?;

    Ok(json!({ "planId": id, "plan": plan }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "studyPlan.generate" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match generate(conn, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(error) => error.response(&req.id),
            })
        }
        _ => None,
    }
}
