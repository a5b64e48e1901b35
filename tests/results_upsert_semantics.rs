mod test_support;

use serde_json::json;
use test_support::{create_evaluation, create_student, import_sample_framework, put_result, Sidecar};

fn results_of(sidecar: &mut Sidecar, evaluation_id: &str) -> Vec<serde_json::Value> {
    let opened = sidecar.ok("evaluations.open", json!({ "evaluationId": evaluation_id }));
    opened["evaluation"]["results"]
        .as_array()
        .cloned()
        .expect("results array")
}

#[test]
fn later_write_for_same_key_replaces_earlier() {
    let (mut sidecar, _ws) = Sidecar::with_workspace("competencyd-results-overwrite");
    import_sample_framework(&mut sidecar);
    let alice = create_student(&mut sidecar, "Alice", "Martin", "cm2");
    let eval = create_evaluation(&mut sidecar, "Période 1", "cm2");

    let first = sidecar.ok(
        "results.upsert",
        json!({
            "evaluationId": eval,
            "result": {
                "studentId": alice,
                "competencyId": "comp-oral",
                "specificCompetencyId": "spec-ecouter",
                "value": "C",
                "comment": "à revoir",
                "evaluatedAt": "2024-03-04T09:00:00Z"
            }
        }),
    );
    let second = sidecar.ok(
        "results.upsert",
        json!({
            "evaluationId": eval,
            "result": {
                "studentId": alice,
                "competencyId": "comp-oral",
                "specificCompetencyId": "spec-ecouter",
                "value": "A",
                "evaluatedAt": "2024-03-18T09:00:00Z"
            }
        }),
    );
    assert_eq!(first["resultId"], second["resultId"]);
    assert_eq!(second["resultKey"], "spec-ecouter");

    let results = results_of(&mut sidecar, &eval);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["value"], "A");
    assert_eq!(results[0]["resolvedValue"], "A");
    assert_eq!(results[0]["evaluatedAt"], "2024-03-18T09:00:00Z");
    assert!(results[0].get("comment").is_none());

    // value wins over level; a blank value falls back to level.
    sidecar.ok(
        "results.upsert",
        json!({
            "evaluationId": eval,
            "result": {
                "studentId": alice,
                "competencyId": "comp-oral",
                "specificCompetencyId": "spec-dire",
                "value": "  ",
                "level": "B",
                "evaluatedAt": "2024-03-18"
            }
        }),
    );
    let results = results_of(&mut sidecar, &eval);
    let dire = results
        .iter()
        .find(|r| r["specificCompetencyId"] == "spec-dire")
        .expect("spec-dire result");
    assert_eq!(dire["level"], "B");
    assert_eq!(dire["resolvedValue"], "B");

    let code = sidecar.err_code(
        "results.upsert",
        json!({
            "evaluationId": eval,
            "result": { "studentId": alice, "competencyId": "comp-oral", "level": "Z" }
        }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn bulk_upsert_reports_per_entry_errors() {
    let (mut sidecar, _ws) = Sidecar::with_workspace("competencyd-results-bulk");
    import_sample_framework(&mut sidecar);
    let alice = create_student(&mut sidecar, "Alice", "Martin", "cm2");
    let eval = create_evaluation(&mut sidecar, "Période 1", "cm2");

    let res = sidecar.ok(
        "results.bulkUpsert",
        json!({
            "evaluationId": eval,
            "results": [
                { "studentId": alice, "competencyId": "comp-oral", "specificCompetencyId": "spec-ecouter", "value": "A" },
                { "competencyId": "comp-oral", "value": "B" },
                { "studentId": "ghost", "competencyId": "comp-oral", "specificCompetencyId": "spec-dire", "value": "B" },
                { "studentId": alice, "competencyId": "comp-calcul", "specificCompetencyId": "spec-calcul", "value": "C" }
            ]
        }),
    );
    assert_eq!(res["upserted"], 2);
    assert_eq!(res["rejected"], 2);
    assert_eq!(res["errors"][0]["index"], 1);
    assert_eq!(res["errors"][0]["code"], "bad_params");
    assert_eq!(res["errors"][1]["index"], 2);
    assert_eq!(res["errors"][1]["code"], "not_found");
    assert_eq!(results_of(&mut sidecar, &eval).len(), 2);

    let oversized: Vec<serde_json::Value> = (0..5001)
        .map(|_| json!({ "studentId": alice, "competencyId": "comp-oral", "value": "A" }))
        .collect();
    let res = sidecar.ok(
        "results.bulkUpsert",
        json!({ "evaluationId": eval, "results": oversized }),
    );
    assert_eq!(res["limitExceeded"], true);
    assert_eq!(res["upserted"], 0);
    assert_eq!(res["rejected"], 5001);
}

#[test]
fn deletes_cascade_to_results() {
    let (mut sidecar, _ws) = Sidecar::with_workspace("competencyd-results-cascade");
    import_sample_framework(&mut sidecar);
    let alice = create_student(&mut sidecar, "Alice", "Martin", "cm2");
    let bob = create_student(&mut sidecar, "Bob", "Durand", "cm2");
    let eval = create_evaluation(&mut sidecar, "Période 1", "cm2");
    put_result(&mut sidecar, &eval, &alice, "spec-ecouter", "A", "2024-03-04");
    put_result(&mut sidecar, &eval, &alice, "spec-dire", "B", "2024-03-04");
    put_result(&mut sidecar, &eval, &bob, "spec-ecouter", "C", "2024-03-04");

    let res = sidecar.ok(
        "results.delete",
        json!({ "evaluationId": eval, "studentId": alice, "specificCompetencyId": "spec-dire" }),
    );
    assert_eq!(res["deleted"], true);
    let res = sidecar.ok(
        "results.delete",
        json!({ "evaluationId": eval, "studentId": alice, "specificCompetencyId": "spec-dire" }),
    );
    assert_eq!(res["deleted"], false);

    let res = sidecar.ok("students.delete", json!({ "studentId": bob }));
    assert_eq!(res["removedResults"], 1);
    assert_eq!(results_of(&mut sidecar, &eval).len(), 1);

    // The framework stays while an evaluation uses it.
    let code = sidecar.err_code("frameworks.delete", json!({ "frameworkId": "fw-cycle3" }));
    assert_eq!(code, "conflict");

    let listed = sidecar.ok("evaluations.list", json!({ "frameworkId": "fw-cycle3" }));
    assert_eq!(listed["evaluations"][0]["resultCount"], 1);

    let res = sidecar.ok("evaluations.delete", json!({ "evaluationId": eval }));
    assert_eq!(res["removedResults"], 1);
    let code = sidecar.err_code("evaluations.open", json!({ "evaluationId": eval }));
    assert_eq!(code, "not_found");

    sidecar.ok("frameworks.delete", json!({ "frameworkId": "fw-cycle3" }));
    let listed = sidecar.ok("frameworks.list", json!({}));
    assert_eq!(listed["frameworks"], json!([]));
}

#[test]
fn evaluation_and_student_updates() {
    let (mut sidecar, _ws) = Sidecar::with_workspace("competencyd-results-updates");
    import_sample_framework(&mut sidecar);
    let alice = create_student(&mut sidecar, "alice", "martin", "cm2");
    let eval = create_evaluation(&mut sidecar, "Période 1", "cm2");

    sidecar.ok(
        "evaluations.update",
        json!({ "evaluationId": eval, "patch": { "name": "Trimestre 1", "description": "bilan" } }),
    );
    let opened = sidecar.ok("evaluations.open", json!({ "evaluationId": eval }));
    assert_eq!(opened["evaluation"]["name"], "Trimestre 1");
    assert_eq!(opened["evaluation"]["description"], "bilan");

    let code = sidecar.err_code(
        "evaluations.update",
        json!({ "evaluationId": eval, "patch": { "frameworkId": "other" } }),
    );
    assert_eq!(code, "bad_params");

    let updated = sidecar.ok(
        "students.update",
        json!({ "studentId": alice, "patch": { "lastName": "Zola", "classId": null } }),
    );
    assert_eq!(updated["student"]["displayName"], "alice Z.");
    assert!(updated["student"]["classId"].is_null());

    let in_class = sidecar.ok("students.list", json!({ "classId": "cm2" }));
    assert_eq!(in_class["students"], json!([]));
    let all = sidecar.ok("students.list", json!({}));
    assert_eq!(all["students"].as_array().map(|a| a.len()), Some(1));

    let code = sidecar.err_code(
        "evaluations.create",
        json!({ "name": "X", "frameworkId": "missing-framework" }),
    );
    assert_eq!(code, "not_found");
}
