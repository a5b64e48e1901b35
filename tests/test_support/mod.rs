#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
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

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        Self::spawn_with_env(&[])
    }

    pub fn spawn_with_env(env: &[(&str, &str)]) -> Self {
        let exe = env!("CARGO_BIN_EXE_competencyd");
        let mut cmd = Command::new(exe);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .env_remove("COMPETENCYD_WORKSPACE");
        for (k, v) in env {
            cmd.env(k, v);
        }
        let mut child = cmd.spawn().expect("spawn competencyd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    /// Opens a fresh workspace in a temp dir.
    pub fn with_workspace(prefix: &str) -> (Self, PathBuf) {
        let workspace = temp_dir(prefix);
        let mut sidecar = Self::spawn();
        sidecar.ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        (sidecar, workspace)
    }

    pub fn send_raw(&mut self, line: &str) -> serde_json::Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    /// Asserts the call fails and returns the error code.
    pub fn err_code(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Letter result type: A=10, B=7.5, C=5, D=2.5, N/A without pivot.
pub fn letters_result_type() -> serde_json::Value {
    json!({
        "id": "rt-letters",
        "name": "Lettres",
        "config": { "values": [
            { "value": "A", "label": "Très bonne maîtrise", "pivot_value": 10 },
            { "value": "B", "label": "Maîtrise satisfaisante", "pivot_value": 7.5 },
            { "value": "C", "label": "Maîtrise fragile", "pivot_value": 5 },
            { "value": "D", "label": "Maîtrise insuffisante", "pivot_value": 2.5 },
            { "value": "N/A", "label": "Non évalué", "pivot_value": null }
        ]}
    })
}

/// Two domains; `comp-oral` holds `spec-ecouter` and `spec-dire`,
/// `comp-ecrit` holds `spec-ecrire`, `comp-calcul` holds `spec-calcul`.
pub fn sample_framework() -> serde_json::Value {
    json!({
        "id": "fw-cycle3",
        "name": "Socle cycle 3",
        "version": "2024",
        "domains": [
            {
                "id": "dom-langues",
                "name": "Langages",
                "fields": [{
                    "id": "field-francais",
                    "name": "Français",
                    "competencies": [
                        { "id": "comp-oral", "name": "Oral", "specificCompetencies": [
                            { "id": "spec-ecouter", "name": "Écouter", "resultTypeConfigId": "rt-letters" },
                            { "id": "spec-dire", "name": "Dire", "resultTypeConfigId": "rt-letters" }
                        ]},
                        { "id": "comp-ecrit", "name": "Écrit", "specificCompetencies": [
                            { "id": "spec-ecrire", "name": "Écrire", "resultTypeConfigId": "rt-letters" }
                        ]}
                    ]
                }]
            },
            {
                "id": "dom-maths",
                "name": "Mathématiques",
                "fields": [{
                    "id": "field-nombres",
                    "name": "Nombres",
                    "competencies": [
                        { "id": "comp-calcul", "name": "Calcul", "specificCompetencies": [
                            { "id": "spec-calcul", "name": "Calculer", "resultTypeConfigId": "rt-letters" }
                        ]}
                    ]
                }]
            }
        ]
    })
}

pub fn import_sample_framework(sidecar: &mut Sidecar) {
    sidecar.ok(
        "frameworks.import",
        json!({
            "framework": sample_framework(),
            "resultTypes": [letters_result_type()],
        }),
    );
}

pub fn create_student(sidecar: &mut Sidecar, first: &str, last: &str, class_id: &str) -> String {
    let res = sidecar.ok(
        "students.create",
        json!({ "firstName": first, "lastName": last, "classId": class_id }),
    );
    res["student"]["id"]
        .as_str()
        .expect("student id")
        .to_string()
}

pub fn create_evaluation(sidecar: &mut Sidecar, name: &str, class_id: &str) -> String {
    let res = sidecar.ok(
        "evaluations.create",
        json!({ "name": name, "frameworkId": "fw-cycle3", "classId": class_id }),
    );
    res["evaluation"]["id"]
        .as_str()
        .expect("evaluation id")
        .to_string()
}

pub fn competency_for(specific: &str) -> &'static str {
    match specific {
        "spec-ecouter" | "spec-dire" => "comp-oral",
        "spec-ecrire" => "comp-ecrit",
        _ => "comp-calcul",
    }
}

pub fn put_result(
    sidecar: &mut Sidecar,
    evaluation_id: &str,
    student_id: &str,
    specific: &str,
    value: &str,
    evaluated_at: &str,
) {
    sidecar.ok(
        "results.upsert",
        json!({
            "evaluationId": evaluation_id,
            "result": {
                "studentId": student_id,
                "competencyId": competency_for(specific),
                "specificCompetencyId": specific,
                "value": value,
                "evaluatedAt": evaluated_at,
            }
        }),
    );
}
