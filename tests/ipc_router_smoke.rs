mod test_support;

use serde_json::json;
use test_support::{create_evaluation, create_student, import_sample_framework, Sidecar};

#[test]
fn router_dispatches_every_handler_family() {
    let (mut sidecar, _ws) = Sidecar::with_workspace("competencyd-router-smoke");
    import_sample_framework(&mut sidecar);
    let student = create_student(&mut sidecar, "Alice", "Martin", "cm2");
    let eval = create_evaluation(&mut sidecar, "Période 1", "cm2");

    let calls = [
        ("health", json!({})),
        ("frameworks.list", json!({})),
        ("frameworks.open", json!({ "frameworkId": "fw-cycle3" })),
        ("resultTypes.list", json!({})),
        ("students.list", json!({ "classId": "cm2" })),
        ("evaluations.list", json!({})),
        ("evaluations.open", json!({ "evaluationId": eval })),
        ("analytics.student.averages", json!({ "evaluationId": eval, "studentId": student })),
        ("analytics.student.completion", json!({ "evaluationId": eval, "studentId": student })),
        ("analytics.class.averages", json!({ "evaluationId": eval })),
        ("analytics.compare", json!({ "evaluationId": eval })),
        ("analytics.charts.radar", json!({ "evaluationId": eval })),
        ("analytics.charts.distribution", json!({ "evaluationId": eval })),
        ("analytics.charts.timeline", json!({ "evaluationId": eval })),
        ("analytics.charts.progression", json!({ "evaluationId": eval })),
        ("setup.get", json!({})),
    ];
    for (method, params) in calls {
        sidecar.ok(method, params);
    }

    let unknown = sidecar.request("grid.get", json!({}));
    assert_eq!(unknown["error"]["code"], "not_implemented");
}

#[test]
fn malformed_lines_get_bad_json_and_loop_continues() {
    let mut sidecar = Sidecar::spawn();
    let resp = sidecar.send_raw("{not json");
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "bad_json");
    assert!(resp.get("id").is_none());

    let health = sidecar.ok("health", json!({}));
    assert!(health["workspacePath"].is_null());
    assert_eq!(sidecar.err_code("workspace.select", json!({})), "bad_params");
}
