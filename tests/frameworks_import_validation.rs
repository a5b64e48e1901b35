mod test_support;

use serde_json::json;
use test_support::{import_sample_framework, letters_result_type, sample_framework, Sidecar};

#[test]
fn import_then_open_keeps_tree_order() {
    let (mut sidecar, _ws) = Sidecar::with_workspace("competencyd-frameworks-import");
    let res = sidecar.ok(
        "frameworks.import",
        json!({ "framework": sample_framework(), "resultTypes": [letters_result_type()] }),
    );
    assert_eq!(res["frameworkId"], "fw-cycle3");
    assert_eq!(res["domainCount"], 2);
    assert_eq!(res["specificCompetencyCount"], 4);

    let listed = sidecar.ok("frameworks.list", json!({}));
    assert_eq!(listed["frameworks"][0]["name"], "Socle cycle 3");
    assert_eq!(listed["frameworks"][0]["evaluationCount"], 0);

    let opened = sidecar.ok("frameworks.open", json!({ "frameworkId": "fw-cycle3" }));
    let fw = &opened["framework"];
    assert_eq!(fw["version"], "2024");
    assert_eq!(fw["domains"][0]["id"], "dom-langues");
    let specifics: Vec<&str> = fw["domains"][0]["fields"][0]["competencies"][0]["specificCompetencies"]
        .as_array()
        .expect("specifics")
        .iter()
        .filter_map(|s| s["id"].as_str())
        .collect();
    assert_eq!(specifics, vec!["spec-ecouter", "spec-dire"]);
    assert_eq!(opened["resultTypes"][0]["id"], "rt-letters");
    assert_eq!(opened["resultTypes"][0]["values"][1]["pivotValue"], 7.5);

    // Re-importing replaces the tree instead of duplicating it.
    let mut smaller = sample_framework();
    smaller["domains"]
        .as_array_mut()
        .expect("domains")
        .truncate(1);
    sidecar.ok("frameworks.import", json!({ "framework": smaller }));
    let opened = sidecar.ok("frameworks.open", json!({ "frameworkId": "fw-cycle3" }));
    assert_eq!(opened["framework"]["domains"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn invalid_frameworks_are_rejected_before_writing() {
    let (mut sidecar, _ws) = Sidecar::with_workspace("competencyd-frameworks-invalid");

    // The letters config is neither stored nor supplied.
    let code = sidecar.err_code("frameworks.import", json!({ "framework": sample_framework() }));
    assert_eq!(code, "invalid_framework");
    let listed = sidecar.ok("frameworks.list", json!({}));
    assert_eq!(listed["frameworks"], json!([]));
    let types = sidecar.ok("resultTypes.list", json!({}));
    assert_eq!(types["resultTypes"], json!([]));

    let mut dup = sample_framework();
    let first_domain = dup["domains"][0].clone();
    dup["domains"]
        .as_array_mut()
        .expect("domains")
        .push(first_domain);
    let code = sidecar.err_code(
        "frameworks.import",
        json!({ "framework": dup, "resultTypes": [letters_result_type()] }),
    );
    assert_eq!(code, "invalid_framework");

    // A specific id reused under another competency would collide on results.
    let mut shared_specific = sample_framework();
    shared_specific["domains"][1]["fields"][0]["competencies"][0]["specificCompetencies"][0]["id"] =
        json!("spec-ecouter");
    let res = sidecar.request(
        "frameworks.import",
        json!({ "framework": shared_specific, "resultTypes": [letters_result_type()] }),
    );
    assert_eq!(res["ok"], false);
    assert_eq!(res["error"]["code"], "invalid_framework");
    let message = res["error"]["message"].as_str().unwrap_or_default();
    assert!(message.contains("spec-ecouter"), "message: {}", message);
    let listed = sidecar.ok("frameworks.list", json!({}));
    assert_eq!(listed["frameworks"], json!([]));

    let mut out_of_range = letters_result_type();
    out_of_range["config"]["values"][0]["pivot_value"] = json!(11);
    let code = sidecar.err_code(
        "frameworks.import",
        json!({ "framework": sample_framework(), "resultTypes": [out_of_range] }),
    );
    assert_eq!(code, "invalid_framework");

    let code = sidecar.err_code("frameworks.import", json!({ "framework": { "id": "x" } }));
    assert_eq!(code, "bad_params");
}

#[test]
fn result_types_lifecycle() {
    let (mut sidecar, _ws) = Sidecar::with_workspace("competencyd-result-types");
    let res = sidecar.ok(
        "resultTypes.upsert",
        json!({ "resultType": {
            "id": "rt-numeric",
            "name": "Sur 10",
            "values": [
                { "value": "10", "label": "10", "pivotValue": 10 },
                { "value": "5", "label": "5", "pivotValue": 5 }
            ]
        }}),
    );
    assert_eq!(res["valueCount"], 2);

    let code = sidecar.err_code(
        "resultTypes.upsert",
        json!({ "resultType": {
            "id": "rt-dup",
            "name": "Doublons",
            "values": [{ "value": "A" }, { "value": "A" }]
        }}),
    );
    assert_eq!(code, "invalid_framework");

    import_sample_framework(&mut sidecar);
    let types = sidecar.ok("resultTypes.list", json!({}));
    assert_eq!(types["resultTypes"].as_array().map(|a| a.len()), Some(2));

    let code = sidecar.err_code("resultTypes.delete", json!({ "resultTypeId": "rt-letters" }));
    assert_eq!(code, "conflict");
    sidecar.ok("resultTypes.delete", json!({ "resultTypeId": "rt-numeric" }));
    let code = sidecar.err_code("resultTypes.delete", json!({ "resultTypeId": "rt-numeric" }));
    assert_eq!(code, "not_found");
}
