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

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn create_user(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
    role: &str,
) -> String {
    request_ok(
        stdin,
        reader,
        id,
        "users.create",
        json!({ "name": name, "role": role }),
    )["user"]["id"]
        .as_str()
        .expect("user id")
        .to_string()
}

fn enroll(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id_prefix: &str,
    student_id: &str,
    subject_name: &str,
) -> String {
    let subject = request_ok(
        stdin,
        reader,
        &format!("{id_prefix}-subject"),
        "subjects.create",
        json!({ "name": subject_name }),
    )["subject"]["id"]
        .as_str()
        .expect("subject id")
        .to_string();
    enroll_existing(stdin, reader, id_prefix, student_id, &subject);
    subject
}

fn enroll_existing(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id_prefix: &str,
    student_id: &str,
    subject_id: &str,
) {
    let reg = request_ok(
        stdin,
        reader,
        &format!("{id_prefix}-request"),
        "registrations.request",
        json!({ "studentId": student_id, "subjectId": subject_id }),
    )["registration"]["id"]
        .as_str()
        .expect("registration id")
        .to_string();
    let _ = request_ok(
        stdin,
        reader,
        &format!("{id_prefix}-approve"),
        "registrations.transition",
        json!({ "registrationId": reg, "status": "approved" }),
    );
}

fn mark_one(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    subject_id: &str,
    faculty_id: &str,
    date: &str,
    student_id: &str,
    status: &str,
) {
    let _ = request_ok(
        stdin,
        reader,
        id,
        "attendance.mark",
        json!({
            "subjectId": subject_id,
            "facultyId": faculty_id,
            "date": date,
            "marks": [{ "studentId": student_id, "status": status }],
        }),
    );
}

#[test]
fn period_window_includes_both_endpoints() {
    let workspace = temp_dir("campusd-window");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = create_user(&mut stdin, &mut reader, "2", "Priya Joshi", "student");
    let faculty = create_user(&mut stdin, &mut reader, "3", "Dr. Rahman", "faculty");
    let subject = enroll(&mut stdin, &mut reader, "4", &student, "Signals");

    mark_one(
        &mut stdin, &mut reader, "5", &subject, &faculty, "2026-04-01", &student, "present",
    );
    mark_one(
        &mut stdin, &mut reader, "6", &subject, &faculty, "2026-04-05", &student, "absent",
    );
    mark_one(
        &mut stdin, &mut reader, "7", &subject, &faculty, "2026-04-10", &student, "present",
    );

    let full = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.periodStats",
        json!({ "studentId": student, "from": "2026-04-01", "to": "2026-04-10" }),
    );
    assert_eq!(full["stats"]["total"], 3);
    assert_eq!(full["stats"]["present"], 2);
    let days = full["days"].as_array().expect("days array");
    assert_eq!(days.len(), 3);
    assert_eq!(days[0]["date"], "2026-04-01");
    assert_eq!(days[0]["present"], 1);
    assert_eq!(days[1]["date"], "2026-04-05");
    assert_eq!(days[1]["absent"], 1);
    assert_eq!(days[2]["date"], "2026-04-10");

    // Shrinking the window by one day on each side drops both boundary marks.
    let interior = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.periodStats",
        json!({ "studentId": student, "from": "2026-04-02", "to": "2026-04-09" }),
    );
    assert_eq!(interior["stats"]["total"], 1);
    assert_eq!(interior["stats"]["absent"], 1);

    let single = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "attendance.periodStats",
        json!({ "studentId": student, "from": "2026-04-01", "to": "2026-04-01" }),
    );
    assert_eq!(single["stats"]["total"], 1);
    assert_eq!(single["stats"]["present"], 1);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn subject_scope_aggregates_across_students() {
    let workspace = temp_dir("campusd-subject-scope");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let first = create_user(&mut stdin, &mut reader, "2", "Qadir Shaikh", "student");
    let second = create_user(&mut stdin, &mut reader, "3", "Rhea D'Souza", "student");
    let faculty = create_user(&mut stdin, &mut reader, "4", "Dr. Sen", "faculty");
    let subject = enroll(&mut stdin, &mut reader, "5", &first, "Graph Theory");
    enroll_existing(&mut stdin, &mut reader, "6", &second, &subject);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.mark",
        json!({
            "subjectId": subject,
            "facultyId": faculty,
            "date": "2026-04-03",
            "marks": [
                { "studentId": first, "status": "present" },
                { "studentId": second, "status": "late" },
            ],
        }),
    );

    let scoped = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.periodStats",
        json!({ "subjectId": subject, "from": "2026-04-01", "to": "2026-04-30" }),
    );
    assert_eq!(scoped["subject"], "Graph Theory");
    assert_eq!(scoped["stats"]["total"], 2);
    assert_eq!(scoped["stats"]["present"], 1);
    assert_eq!(scoped["stats"]["late"], 1);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn student_report_covers_subjects_with_no_sessions_yet() {
    let workspace = temp_dir("campusd-report");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = create_user(&mut stdin, &mut reader, "2", "Sana Kapoor", "student");
    let faculty = create_user(&mut stdin, &mut reader, "3", "Dr. Thomas", "faculty");
    let risky = enroll(&mut stdin, &mut reader, "4", &student, "Quantum Mechanics");
    let _silent = enroll(&mut stdin, &mut reader, "5", &student, "Seminar");
    let steady = enroll(&mut stdin, &mut reader, "6", &student, "Statistics");

    for (rid, date, status) in [
        ("7", "2026-05-01", "present"),
        ("8", "2026-05-02", "absent"),
        ("9", "2026-05-03", "absent"),
        ("10", "2026-05-04", "absent"),
    ] {
        mark_one(
            &mut stdin, &mut reader, rid, &risky, &faculty, date, &student, status,
        );
    }
    for (rid, date, status) in [
        ("11", "2026-05-01", "present"),
        ("12", "2026-05-02", "present"),
        ("13", "2026-05-03", "present"),
        ("14", "2026-05-04", "absent"),
    ] {
        mark_one(
            &mut stdin, &mut reader, rid, &steady, &faculty, date, &student, status,
        );
    }

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "attendance.studentReport",
        json!({ "studentId": student }),
    );
    assert_eq!(result["studentName"], "Sana Kapoor");
    let report = &result["report"];
    assert_eq!(report["overall"]["total"], 8);
    assert_eq!(report["overall"]["percentage"], 50);
    assert_eq!(report["overall"]["risk"], true);

    let subjects = report["subjects"].as_array().expect("subjects array");
    assert_eq!(subjects.len(), 3);

    let quantum = subjects
        .iter()
        .find(|s| s["subject"] == "Quantum Mechanics")
        .expect("quantum report");
    assert_eq!(quantum["stats"]["percentage"], 25);
    assert_eq!(quantum["stats"]["risk"], true);
    // 1 of 4 attended needs eight straight present sessions: 9 of 12 is 75%.
    assert_eq!(quantum["requiredStreak"], 8);

    let seminar = subjects
        .iter()
        .find(|s| s["subject"] == "Seminar")
        .expect("seminar report");
    assert_eq!(seminar["stats"]["total"], 0);
    assert!(
        seminar["stats"].get("percentage").is_none(),
        "no sessions means no percentage, not zero"
    );
    assert!(seminar["stats"].get("ratio").is_none());
    assert_eq!(seminar["stats"]["risk"], false);
    assert_eq!(seminar["requiredStreak"], 0);

    let statistics = subjects
        .iter()
        .find(|s| s["subject"] == "Statistics")
        .expect("statistics report");
    assert_eq!(statistics["stats"]["percentage"], 75);
    assert_eq!(
        statistics["stats"]["risk"], false,
        "exactly 75 percent is not at risk"
    );
    assert_eq!(statistics["requiredStreak"], 0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn period_stats_validates_scope_and_range() {
    let workspace = temp_dir("campusd-window-shape");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = create_user(&mut stdin, &mut reader, "2", "Tara Basu", "student");
    let subject = enroll(&mut stdin, &mut reader, "3", &student, "Optics");

    let backwards = request(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.periodStats",
        json!({ "studentId": student, "from": "2026-04-10", "to": "2026-04-01" }),
    );
    assert_eq!(error_code(&backwards), "bad_params");

    let both = request(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.periodStats",
        json!({ "studentId": student, "subjectId": subject, "from": "2026-04-01", "to": "2026-04-10" }),
    );
    assert_eq!(error_code(&both), "bad_params");

    let neither = request(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.periodStats",
        json!({ "from": "2026-04-01", "to": "2026-04-10" }),
    );
    assert_eq!(error_code(&neither), "bad_params");

    let bad_date = request(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.periodStats",
        json!({ "studentId": student, "from": "April 1", "to": "2026-04-10" }),
    );
    assert_eq!(error_code(&bad_date), "bad_params");

    let ghost_student = request(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.periodStats",
        json!({ "studentId": "no-such-student", "from": "2026-04-01", "to": "2026-04-10" }),
    );
    assert_eq!(error_code(&ghost_student), "not_found");

    let ghost_subject = request(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.periodStats",
        json!({ "subjectId": "no-such-subject", "from": "2026-04-01", "to": "2026-04-10" }),
    );
    assert_eq!(error_code(&ghost_subject), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
