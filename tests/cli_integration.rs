//! CLI integration tests for migraph
//!
//! These tests run the binary against inventories written to temporary
//! directories and check the plan, deps, migrate and rewrite commands.

use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Get a command instance for the migraph binary
fn migraph_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("migraph"));
    cmd.env_remove("RUST_LOG").env_remove("MIGRAPH_CONFIG");
    cmd
}

const LAYER: &str = "0000000000000000000000000000000a";
const MAP: &str = "0000000000000000000000000000000b";
const APP: &str = "0000000000000000000000000000000c";
const LAYER_URL: &str = "https://src.example.com/arcgis/rest/services/Parcels/FeatureServer";

fn write_inventory(dir: &Path, records: &[Value]) -> PathBuf {
    let path = dir.join("inventory.jsonl");
    let lines: Vec<String> = records.iter().map(|r| r.to_string()).collect();
    fs::write(&path, lines.join("\n") + "\n").unwrap();
    path
}

/// Layer <- map <- app
fn chain_inventory(dir: &Path) -> PathBuf {
    write_inventory(
        dir,
        &[
            json!({
                "id": APP,
                "type": "Web Mapping Application",
                "title": "Parcel Viewer",
                "data": {"values": {"webmap": MAP}}
            }),
            json!({
                "id": MAP,
                "type": "Web Map",
                "title": "Parcels Map",
                "data": {"operationalLayers": [{"itemId": LAYER, "url": format!("{}/0", LAYER_URL)}]}
            }),
            json!({
                "id": LAYER,
                "type": "Feature Service",
                "title": "Parcels",
                "url": LAYER_URL
            }),
        ],
    )
}

fn parse_stdout(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("stdout is JSON")
}

// =============================================================================
// plan
// =============================================================================

#[test]
fn test_plan_lists_levels() {
    let dir = TempDir::new().unwrap();
    let inventory = chain_inventory(dir.path());

    migraph_cmd()
        .current_dir(dir.path())
        .arg("plan")
        .arg(&inventory)
        .assert()
        .success()
        .stdout(predicate::str::contains("3 items in 3 levels"))
        .stdout(predicate::str::contains("Level 0 (1 items)"))
        .stdout(predicate::str::contains(LAYER));
}

#[test]
fn test_plan_json_orders_dependencies_first() {
    let dir = TempDir::new().unwrap();
    let inventory = chain_inventory(dir.path());

    let output = migraph_cmd()
        .current_dir(dir.path())
        .args(["--format", "json", "plan"])
        .arg(&inventory)
        .output()
        .unwrap();
    assert!(output.status.success());

    let plan = parse_stdout(&output.stdout);
    let order: Vec<&str> = plan["levels"]
        .as_array()
        .unwrap()
        .iter()
        .map(|level| level["items"][0]["id"].as_str().unwrap())
        .collect();
    assert_eq!(order, vec![LAYER, MAP, APP]);
    assert_eq!(plan["cycles"], json!([]));
}

#[test]
fn test_plan_reports_cycles_and_external_references() {
    let dir = TempDir::new().unwrap();
    let inventory = write_inventory(
        dir.path(),
        &[
            json!({"id": LAYER, "type": "Dashboard", "title": "North",
                   "data": {"widgets": [{"itemId": MAP}]}}),
            json!({"id": MAP, "type": "Dashboard", "title": "South",
                   "data": {"widgets": [{"itemId": LAYER}, {"itemId": "ffffffffffffffffffffffffffffffff"}]}}),
        ],
    );

    migraph_cmd()
        .current_dir(dir.path())
        .arg("plan")
        .arg(&inventory)
        .assert()
        .success()
        .stdout(predicate::str::contains("cyclic"))
        .stdout(predicate::str::contains("Cycles"))
        .stdout(predicate::str::contains(
            "outside the migrated set: ffffffffffffffffffffffffffffffff",
        ));
}

#[test]
fn test_plan_fails_on_missing_inventory() {
    let dir = TempDir::new().unwrap();

    migraph_cmd()
        .current_dir(dir.path())
        .args(["plan", "missing.jsonl"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to open inventory"));
}

#[test]
fn test_plan_fails_on_bad_line() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("inventory.jsonl");
    fs::write(&path, "{\"id\": \"not-an-id\", \"type\": \"Web Map\"}\n").unwrap();

    migraph_cmd()
        .current_dir(dir.path())
        .arg("plan")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 1"));
}

// =============================================================================
// deps
// =============================================================================

#[test]
fn test_deps_shows_both_directions() {
    let dir = TempDir::new().unwrap();
    let inventory = chain_inventory(dir.path());

    migraph_cmd()
        .current_dir(dir.path())
        .arg("deps")
        .arg(&inventory)
        .arg(MAP)
        .assert()
        .success()
        .stdout(predicate::str::contains("Depends on (1)"))
        .stdout(predicate::str::contains("Needed by (1)"))
        .stdout(predicate::str::contains("Parcel Viewer"));
}

#[test]
fn test_deps_transitive_json() {
    let dir = TempDir::new().unwrap();
    let inventory = chain_inventory(dir.path());

    let output = migraph_cmd()
        .current_dir(dir.path())
        .args(["deps", "--transitive", "--format", "json"])
        .arg(&inventory)
        .arg(LAYER)
        .output()
        .unwrap();
    assert!(output.status.success());

    let deps = parse_stdout(&output.stdout);
    assert_eq!(deps["dependencies"], json!([]));
    assert_eq!(deps["dependents"], json!([MAP, APP]));
    assert_eq!(deps["level"], json!(0));
}

#[test]
fn test_deps_rejects_unknown_and_malformed_ids() {
    let dir = TempDir::new().unwrap();
    let inventory = chain_inventory(dir.path());

    migraph_cmd()
        .current_dir(dir.path())
        .arg("deps")
        .arg(&inventory)
        .arg("ffffffffffffffffffffffffffffffff")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Item not found"));

    migraph_cmd()
        .current_dir(dir.path())
        .arg("deps")
        .arg(&inventory)
        .arg("xyz")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid item ID"));
}

// =============================================================================
// migrate
// =============================================================================

fn created_items(dest: &Path) -> Vec<Value> {
    let mut items: Vec<Value> = fs::read_dir(dest.join("items"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| serde_json::from_str(&fs::read_to_string(e.path()).unwrap()).unwrap())
        .collect();
    items.sort_by_key(|item| item["source"].as_str().unwrap_or_default().to_string());
    items
}

#[test]
fn test_migrate_creates_rewritten_items() {
    let dir = TempDir::new().unwrap();
    let inventory = chain_inventory(dir.path());
    let dest = dir.path().join("dest");

    migraph_cmd()
        .current_dir(dir.path())
        .args(["migrate", "--no-artifacts", "--hostname", "dst.example.com", "--dest"])
        .arg(&dest)
        .arg(&inventory)
        .assert()
        .success()
        .stdout(predicate::str::contains("3 finalized, 0 failed, 0 blocked, 0 warnings"));

    let items = created_items(&dest);
    assert_eq!(items.len(), 3);

    let (layer, map, app) = (&items[0], &items[1], &items[2]);
    assert_eq!(layer["source"], LAYER);
    assert_eq!(
        layer["url"],
        "https://dst.example.com/arcgis/rest/services/Parcels/FeatureServer"
    );
    assert_eq!(map["data"]["operationalLayers"][0]["itemId"], layer["id"]);
    assert_eq!(
        map["data"]["operationalLayers"][0]["url"],
        "https://dst.example.com/arcgis/rest/services/Parcels/FeatureServer/0"
    );
    assert_eq!(app["data"]["values"]["webmap"], map["id"]);
}

#[test]
fn test_migrate_writes_artifacts() {
    let dir = TempDir::new().unwrap();
    let inventory = chain_inventory(dir.path());
    let dest = dir.path().join("dest");
    let artifacts = dir.path().join("runs");

    migraph_cmd()
        .current_dir(dir.path())
        .args(["migrate", "--dest"])
        .arg(&dest)
        .arg("--artifacts-dir")
        .arg(&artifacts)
        .arg(&inventory)
        .assert()
        .success()
        .stdout(predicate::str::contains("Artifacts:"));

    let runs: Vec<_> = fs::read_dir(&artifacts)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    assert_eq!(runs.len(), 1);
    let run = &runs[0];

    let ids: Value = serde_json::from_str(&fs::read_to_string(run.join("id_mapping.json")).unwrap()).unwrap();
    assert_eq!(ids.as_object().unwrap().len(), 3);
    assert!(run.join("mappings.json").is_file());
    assert!(run.join("report.json").is_file());
    assert!(run.join("pending.json").is_file());

    let definitions = fs::read_dir(run.join("definitions")).unwrap().count();
    assert_eq!(definitions, 6);
}

#[test]
fn test_migrate_resolves_cycles() {
    let dir = TempDir::new().unwrap();
    let inventory = write_inventory(
        dir.path(),
        &[
            json!({"id": LAYER, "type": "Dashboard", "title": "North",
                   "data": {"widgets": [{"itemId": MAP}]}}),
            json!({"id": MAP, "type": "Dashboard", "title": "South",
                   "data": {"widgets": [{"itemId": LAYER}]}}),
        ],
    );
    let dest = dir.path().join("dest");

    let output = migraph_cmd()
        .current_dir(dir.path())
        .args(["--format", "json", "migrate", "--no-artifacts", "--dest"])
        .arg(&dest)
        .arg(&inventory)
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = parse_stdout(&output.stdout);
    assert_eq!(report["items"][LAYER]["state"], "finalized");
    assert_eq!(report["items"][MAP]["state"], "finalized");
    assert_eq!(report["unresolved_references"], json!([]));

    let items = created_items(&dest);
    assert_eq!(items[0]["data"]["widgets"][0]["itemId"], items[1]["id"]);
    assert_eq!(items[1]["data"]["widgets"][0]["itemId"], items[0]["id"]);
}

#[test]
fn test_migrate_reads_project_config() {
    let dir = TempDir::new().unwrap();
    let inventory = chain_inventory(dir.path());
    let dest = dir.path().join("dest");

    fs::create_dir_all(dir.path().join(".migraph")).unwrap();
    fs::write(
        dir.path().join(".migraph/config.toml"),
        "[artifacts]\nenabled = false\n\n[destination]\naccount = \"parks\"\nhostname = \"dst.example.com\"\n",
    )
    .unwrap();

    migraph_cmd()
        .current_dir(dir.path())
        .args(["migrate", "--dest"])
        .arg(&dest)
        .arg(&inventory)
        .assert()
        .success()
        .stdout(predicate::str::contains("Artifacts:").not());

    let items = created_items(&dest);
    assert_eq!(
        items[0]["url"],
        "https://dst.example.com/arcgis/rest/services/Parcels/FeatureServer"
    );
}

#[test]
fn test_migrate_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let inventory = chain_inventory(dir.path());
    let config = dir.path().join("bad.toml");
    fs::write(&config, "max_update_attempts = 0\n").unwrap();

    migraph_cmd()
        .current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["migrate", "--dest", "dest"])
        .arg(&inventory)
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_update_attempts"));
}

// =============================================================================
// rewrite
// =============================================================================

#[test]
fn test_rewrite_applies_saved_mappings() {
    let dir = TempDir::new().unwrap();
    let new_id = "1111111111111111111111111111111a";

    let mappings = dir.path().join("mappings.json");
    fs::write(
        &mappings,
        json!({"identifiers": {LAYER: new_id}}).to_string(),
    )
    .unwrap();

    let definition = dir.path().join("definition.json");
    fs::write(
        &definition,
        json!({"operationalLayers": [{"itemId": LAYER}, {"itemId": MAP}]}).to_string(),
    )
    .unwrap();

    let output = migraph_cmd()
        .current_dir(dir.path())
        .args(["--format", "json", "rewrite"])
        .arg(&definition)
        .arg("--mappings")
        .arg(&mappings)
        .output()
        .unwrap();
    assert!(output.status.success());

    let rewrite = parse_stdout(&output.stdout);
    assert_eq!(rewrite["value"]["operationalLayers"][0]["itemId"], new_id);
    assert_eq!(rewrite["value"]["operationalLayers"][1]["itemId"], MAP);
    assert_eq!(rewrite["replaced"], 1);
    assert_eq!(rewrite["unresolved"][0]["value"], MAP);
}
