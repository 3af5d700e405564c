use serde_json::json;
use std::collections::{HashMap, HashSet};
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
fn twelve_exams_fill_exactly_two_weekdays() {
    let workspace = temp_dir("campusd-exams");
    let (mut child, stdin, reader) = spawn_sidecar();
    let mut sidecar = Sidecar {
        stdin,
        reader,
        next_id: 0,
    };
    let session = "Spring 2026";

    let _ = sidecar.call(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    for i in 0..12 {
        let _ = sidecar.call(
            "roster.addCourse",
            json!({ "code": format!("EX{:03}", i), "title": format!("Course {}", i), "creditHour": 3.0 }),
        );
    }

    // 2026-03-02 is a Monday.
    let outcome = sidecar.call(
        "examSchedule.generate",
        json!({ "session": session, "seed": 42, "startDate": "2026-03-02" }),
    );
    assert_eq!(outcome["assignedCount"].as_u64(), Some(12));
    assert_eq!(outcome["unassignedCount"].as_u64(), Some(0));

    let stored = sidecar.call("examSchedule.get", json!({ "session": session }));
    let slots = stored["slots"].as_array().expect("slots").clone();
    assert_eq!(slots.len(), 12);

    let mut per_day: HashMap<String, usize> = HashMap::new();
    let mut room_keys = HashSet::new();
    let mut dates = HashSet::new();
    for slot in &slots {
        let date = slot["examDate"].as_str().expect("examDate").to_string();
        let start = slot["startTime"].as_str().expect("startTime").to_string();
        let room = slot["room"].as_str().expect("room").to_string();
        assert!(date.as_str() >= "2026-03-02");
        dates.insert(date.clone());
        *per_day.entry(date.clone()).or_insert(0) += 1;
        assert!(
            room_keys.insert((room.clone(), date.clone(), start.clone())),
            "hall {} double-booked on {} at {}",
            room,
            date,
            start
        );
    }
    assert_eq!(dates.len(), 2, "six exams per day over twelve courses");
    for (date, count) in per_day {
        assert!(count <= 6, "{} holds {} exams", date, count);
    }

    let _ = child.kill();
}

#[test]
fn regeneration_replaces_rows_and_matches_with_same_seed() {
    let workspace = temp_dir("campusd-exams-regen");
    let (mut child, stdin, reader) = spawn_sidecar();
    let mut sidecar = Sidecar {
        stdin,
        reader,
        next_id: 0,
    };
    let session = "Spring 2026";

    let _ = sidecar.call(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    for i in 0..8 {
        let _ = sidecar.call(
            "roster.addCourse",
            json!({ "code": format!("RG{:03}", i), "title": format!("Course {}", i), "creditHour": 2.0 }),
        );
    }

    // A Saturday start: everything must slide to the following Monday or
    // later.
    let first = sidecar.call(
        "examSchedule.generate",
        json!({ "session": session, "seed": 42, "startDate": "2026-03-07" }),
    );
    assert_eq!(first["assignedCount"].as_u64(), Some(8));
    let first_rows = sidecar.call("examSchedule.get", json!({ "session": session }));
    let first_slots = first_rows["slots"].as_array().expect("slots").clone();
    for slot in &first_slots {
        assert!(slot["examDate"].as_str().expect("examDate") >= "2026-03-09");
    }

    let second = sidecar.call(
        "examSchedule.generate",
        json!({ "session": session, "seed": 42, "startDate": "2026-03-07" }),
    );
    assert_eq!(second["assignedCount"].as_u64(), Some(8));
    let second_rows = sidecar.call("examSchedule.get", json!({ "session": session }));
    let second_slots = second_rows["slots"].as_array().expect("slots").clone();

    // Wipe-then-insert: still eight rows, and the same rows for the same
    // seed and inputs.
    assert_eq!(second_slots.len(), 8);
    assert_eq!(first_slots, second_slots);

    let _ = child.kill();
}
