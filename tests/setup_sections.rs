mod test_support;

use serde_json::json;
use test_support::Sidecar;

#[test]
fn setup_defaults_and_validated_updates_persist() {
    let (mut sidecar, workspace) = Sidecar::with_workspace("competencyd-setup-sections");

    let setup = sidecar.ok("setup.get", json!({}));
    assert_eq!(setup["analysis"]["legacyLevelFallback"], true);
    assert_eq!(setup["analysis"]["topBottomCount"], 5);
    assert_eq!(setup["charts"]["defaultBucket"], "week");
    assert_eq!(setup["charts"]["radarLevel"], "competency");
    assert_eq!(setup["charts"]["normalizeMaxScale"], 100);

    let res = sidecar.ok(
        "setup.update",
        json!({ "section": "charts", "patch": { "defaultBucket": "Month", "normalizeMaxScale": 10 } }),
    );
    assert_eq!(res["charts"]["defaultBucket"], "month");

    for (section, patch) in [
        ("analysis", json!({ "topBottomCount": 0 })),
        ("analysis", json!({ "legacyLevelFallback": "yes" })),
        ("charts", json!({ "radarLevel": "student" })),
        ("charts", json!({ "normalizeMaxScale": 5000 })),
        ("charts", json!({ "theme": "dark" })),
    ] {
        let code = sidecar.err_code("setup.update", json!({ "section": section, "patch": patch }));
        assert_eq!(code, "bad_params", "{} {}", section, patch);
    }
    let code = sidecar.err_code("setup.update", json!({ "section": "printer", "patch": {} }));
    assert_eq!(code, "bad_params");

    // A restarted sidecar opening the same workspace sees the saved values.
    drop(sidecar);
    let ws = workspace.to_string_lossy().to_string();
    let mut again = Sidecar::spawn_with_env(&[("COMPETENCYD_WORKSPACE", ws.as_str())]);
    let health = again.ok("health", json!({}));
    assert_eq!(health["workspacePath"], ws.as_str());
    let setup = again.ok("setup.get", json!({}));
    assert_eq!(setup["charts"]["defaultBucket"], "month");
    assert_eq!(setup["charts"]["normalizeMaxScale"], 10);
    assert_eq!(setup["analysis"]["topBottomCount"], 5);
}

#[test]
fn setup_requires_workspace() {
    let mut sidecar = Sidecar::spawn();
    assert_eq!(sidecar.err_code("setup.get", json!({})), "no_workspace");
}
