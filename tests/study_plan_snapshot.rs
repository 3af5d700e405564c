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

fn request_ok(
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Sidecar {
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = format!("r{}", self.next_id);
        request_ok(&mut self.stdin, &mut self.reader, &id, method, params)
    }
}

#[test]
fn study_plan_flags_risk_and_persists_a_snapshot() {
    let workspace = temp_dir("campusd-study-plan");
    let (mut child, stdin, reader) = spawn_sidecar();
    let mut sidecar = Sidecar {
        stdin,
        reader,
        next_id: 0,
    };
    let semester = "Spring 2026";

    let _ = sidecar.call(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let student = sidecar.call("roster.addStudent", json!({ "name": "Raisa Noor" }));
    let student_id = student["studentId"].as_str().expect("studentId").to_string();

    // ALG201: weak midterm, no final yet, no attendance taken.
    let alg = sidecar.call(
        "roster.addCourse",
        json!({ "code": "ALG201", "title": "Algorithms", "creditHour": 3.0 }),
    );
    let alg_id = alg["courseId"].as_str().expect("courseId").to_string();
    let _ = sidecar.call(
        "roster.enroll",
        json!({ "studentId": student_id, "courseId": alg_id, "semester": semester }),
    );
    let _ = sidecar.call(
        "grades.upsertManual",
        json!({ "studentId": student_id, "courseId": alg_id, "semester": semester, "mid": 10.0, "final": 0.0 }),
    );

    // HIS105: decent marks but one of two class days missed.
    let his = sidecar.call(
        "roster.addCourse",
        json!({ "code": "HIS105", "title": "History", "creditHour": 3.0 }),
    );
    let his_id = his["courseId"].as_str().expect("courseId").to_string();
    let _ = sidecar.call(
        "roster.enroll",
        json!({ "studentId": student_id, "courseId": his_id, "semester": semester }),
    );
    let _ = sidecar.call(
        "grades.upsertManual",
        json!({ "studentId": student_id, "courseId": his_id, "semester": semester, "mid": 25.0, "final": 30.0 }),
    );
    let _ = sidecar.call(
        "attendance.stampDay",
        json!({ "courseId": his_id, "date": "2026-02-02", "entries": [{ "studentId": student_id, "present": true }] }),
    );
    let _ = sidecar.call(
        "attendance.stampDay",
        json!({ "courseId": his_id, "date": "2026-02-04", "entries": [{ "studentId": student_id, "present": false }] }),
    );

    let result = sidecar.call(
        "studyPlan.generate",
        json!({ "studentId": student_id, "semester": semester }),
    );
    let first_plan_id = result["planId"].as_str().expect("planId").to_string();
    let plan = &result["plan"];

    assert_eq!(plan["studentName"].as_str(), Some("Raisa Noor"));
    assert_eq!(plan["semester"].as_str(), Some(semester));
    // ALG201 is an F at 0.00 over 3 credits; HIS105 totals 57.5 for a B-
    // at 2.75 over 3 credits: (0 + 8.25) / 6 = 1.375 -> 1.38.
    assert!((plan["currentGpa"].as_f64().unwrap() - 1.38).abs() < 1e-9);

    let analysis = plan["courseAnalysis"].as_array().expect("courseAnalysis");
    assert_eq!(analysis.len(), 2);

    let alg_row = analysis
        .iter()
        .find(|c| c["code"].as_str() == Some("ALG201"))
        .expect("ALG201 analysis");
    assert_eq!(alg_row["status"].as_str(), Some("At Risk"));
    assert_eq!(alg_row["priority"].as_str(), Some("High"));
    let recs = alg_row["recommendations"].as_array().expect("recs");
    assert!(recs
        .iter()
        .any(|r| r.as_str() == Some("Focus on understanding core concepts")));

    let his_row = analysis
        .iter()
        .find(|c| c["code"].as_str() == Some("HIS105"))
        .expect("HIS105 analysis");
    assert_eq!(his_row["status"].as_str(), Some("At Risk"));
    assert_eq!(his_row["priority"].as_str(), Some("High"));
    let recs = his_row["recommendations"].as_array().expect("recs");
    assert!(recs
        .iter()
        .any(|r| r.as_str() == Some("Improve attendance immediately")));
    assert!((his_row["total"].as_f64().unwrap() - 57.5).abs() < 1e-9);

    let week = plan["weeklyPlan"].as_array().expect("weeklyPlan");
    assert_eq!(week.len(), 7);
    assert_eq!(week[0]["day"].as_str(), Some("Monday"));
    let monday_blocks = week[0]["studyBlocks"].as_array().expect("studyBlocks");
    assert!(
        monday_blocks
            .iter()
            .any(|b| b["time"].as_str() == Some("9:00 AM - 11:00 AM")),
        "high-priority courses get a weekday morning block"
    );

    // Each generation stores its own snapshot row.
    let again = sidecar.call(
        "studyPlan.generate",
        json!({ "studentId": student_id, "semester": semester }),
    );
    let second_plan_id = again["planId"].as_str().expect("planId");
    assert_ne!(first_plan_id, second_plan_id);

    let _ = child.kill();
}
