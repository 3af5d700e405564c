use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .expect("error code")
        .to_string()
}

#[test]
fn course_summary_combines_manual_and_derived_components() {
    let workspace = temp_dir("campusd-course-summary");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let semester = "Spring 2026";

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.addCourse",
        json!({ "code": "CSE101", "title": "Intro to Programming", "creditHour": 3.0 }),
    );
    let course_id = course["courseId"].as_str().expect("courseId").to_string();

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "roster.addTeacher",
        json!({ "name": "R. Ahmed", "dept": "CSE" }),
    );
    let teacher_id = teacher["teacherId"].as_str().expect("teacherId").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "roster.assignTeaching",
        json!({ "teacherId": teacher_id, "courseId": course_id, "semester": semester }),
    );

    let mut student_ids = Vec::new();
    for (i, name) in ["Anika Rahman", "Farhan Kabir"].iter().enumerate() {
        let res = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "roster.addStudent",
            json!({ "name": name, "studentNo": format!("2026-{:03}", i + 1) }),
        );
        let id = res["studentId"].as_str().expect("studentId").to_string();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("e{}", i),
            "roster.enroll",
            json!({ "studentId": id, "courseId": course_id, "semester": semester }),
        );
        student_ids.push(id);
    }
    let (anika, farhan) = (student_ids[0].clone(), student_ids[1].clone());

    // Four class days: Anika attends all four, Farhan one of two stamped.
    let days = [
        ("2026-02-02", vec![(&anika, true), (&farhan, true)]),
        ("2026-02-04", vec![(&anika, true), (&farhan, false)]),
        ("2026-02-09", vec![(&anika, true)]),
        ("2026-02-11", vec![(&anika, true)]),
    ];
    for (i, (date, entries)) in days.iter().enumerate() {
        let entries_json: Vec<serde_json::Value> = entries
            .iter()
            .map(|(id, present)| json!({ "studentId": id, "present": present }))
            .collect();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("a{}", i),
            "attendance.stampDay",
            json!({ "courseId": course_id, "date": date, "entries": entries_json }),
        );
    }

    // One assignment out of 10; Anika is marked above the ceiling, which
    // must clamp the band at exactly 5.0.
    let assignment = request_ok(
        &mut stdin,
        &mut reader,
        "w1",
        "coursework.addAssignment",
        json!({ "courseId": course_id, "semester": semester, "title": "Lab 1", "maxMarks": 10.0, "dueDate": "2026-02-20" }),
    );
    let assignment_id = assignment["assignmentId"].as_str().expect("assignmentId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "w2",
        "coursework.submitAssignment",
        json!({ "assignmentId": assignment_id, "studentId": anika, "marks": 12.0 }),
    );

    let test = request_ok(
        &mut stdin,
        &mut reader,
        "w3",
        "coursework.addClassTest",
        json!({ "courseId": course_id, "semester": semester, "title": "Quiz 1", "maxMarks": 20.0, "testDate": "2026-02-25" }),
    );
    let test_id = test["testId"].as_str().expect("testId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "w4",
        "coursework.submitClassTest",
        json!({ "testId": test_id, "studentId": anika, "marks": 15.0 }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "grades.upsertManual",
        json!({ "studentId": anika, "courseId": course_id, "semester": semester, "mid": 25.0, "final": 40.0 }),
    );

    // Out-of-band manual marks are rejected at the boundary.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "g2",
        "grades.upsertManual",
        json!({ "studentId": farhan, "courseId": course_id, "semester": semester, "mid": 31.0, "final": 0.0 }),
    );
    assert_eq!(code, "bad_params");

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "g3",
        "grades.courseSummary",
        json!({ "courseId": course_id, "semester": semester }),
    );
    assert_eq!(summary["courseCode"].as_str(), Some("CSE101"));
    assert_eq!(summary["marksFinalized"].as_bool(), Some(false));
    let rows = summary["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 2);

    let anika_row = rows
        .iter()
        .find(|r| r["studentId"].as_str() == Some(anika.as_str()))
        .expect("anika row");
    assert!((anika_row["attendance"].as_f64().unwrap() - 5.0).abs() < 1e-9);
    assert!((anika_row["assignments"].as_f64().unwrap() - 5.0).abs() < 1e-9);
    assert!((anika_row["classTests"].as_f64().unwrap() - 7.5).abs() < 1e-9);
    assert!((anika_row["total"].as_f64().unwrap() - 82.5).abs() < 1e-9);
    assert_eq!(anika_row["letter"].as_str(), Some("A+"));
    assert!((anika_row["gradePoint"].as_f64().unwrap() - 4.0).abs() < 1e-9);

    let farhan_row = rows
        .iter()
        .find(|r| r["studentId"].as_str() == Some(farhan.as_str()))
        .expect("farhan row");
    assert!((farhan_row["attendance"].as_f64().unwrap() - 2.5).abs() < 1e-9);
    assert!((farhan_row["total"].as_f64().unwrap() - 2.5).abs() < 1e-9);
    assert_eq!(farhan_row["letter"].as_str(), Some("F"));
    assert!((farhan_row["gradePoint"].as_f64().unwrap() - 0.0).abs() < 1e-9);

    // Once the teacher finalizes the course, further mark entry is refused.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "f1",
        "roster.finalizeMarks",
        json!({ "teacherId": teacher_id, "courseId": course_id, "semester": semester }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "f2",
        "grades.upsertManual",
        json!({ "studentId": anika, "courseId": course_id, "semester": semester, "mid": 28.0, "final": 45.0 }),
    );
    assert_eq!(code, "finalized");

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "f3",
        "grades.courseSummary",
        json!({ "courseId": course_id, "semester": semester }),
    );
    assert_eq!(summary["marksFinalized"].as_bool(), Some(true));

    let _ = child.kill();
}
