#![forbid(unsafe_code)]

use rm_core::enablement::{EnablePolicy, EnableViolation};
use rm_core::model::{ControlCategory, ControlKind};
use rm_core::scope::Scope;
use rm_storage::{
    ControlCreateRequest, ElementTypeCreateRequest, ScenarioCreateRequest, SetCellRequest,
    SqliteStore, StoreError, ThreatCreateRequest,
};
use std::path::PathBuf;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let dir = base.join(format!("rm_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn threat(store: &mut SqliteStore, description: &str) -> String {
    let scenario = store
        .create_scenario(ScenarioCreateRequest {
            description: format!("scenario for {description}"),
            scope: Scope::Master,
        })
        .expect("create scenario");
    store
        .create_threat(ThreatCreateRequest {
            description: description.to_string(),
            scenario_id: scenario.id,
            scope: Scope::Master,
        })
        .expect("create threat")
        .id
}

fn control(
    store: &mut SqliteStore,
    name: &str,
    category: ControlCategory,
    element_type: &str,
) -> String {
    store
        .create_control(ControlCreateRequest {
            name: name.to_string(),
            description: String::new(),
            kind: ControlKind::Process,
            category,
            macro_area: String::new(),
            best_practice_ref: String::new(),
            regulatory_ref: String::new(),
            itil_process_ref: String::new(),
            element_type: Some(element_type.to_string()),
            scope: Scope::Master,
        })
        .expect("create control")
        .id
}

fn element_type(store: &mut SqliteStore, name: &str) -> String {
    store
        .create_element_type(ElementTypeCreateRequest {
            name: name.to_string(),
            description: String::new(),
            scope: Scope::Master,
        })
        .expect("create element type")
        .id
}

fn cell(store: &mut SqliteStore, et: &str, t: &str, c: &str, value: f64) {
    store
        .set_cell(SetCellRequest {
            element_type: et.to_string(),
            threat: t.to_string(),
            control: c.to_string(),
            value: Some(value),
        })
        .expect("set cell");
}

#[test]
fn empty_type_reports_missing_rows_and_columns() {
    let storage_dir = temp_dir("empty_type_reports_missing_rows_and_columns");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");

    let et = element_type(&mut store, "Proxy");
    let reasons = store
        .can_enable(&et, EnablePolicy::BasicCoverage)
        .expect("can enable");
    assert!(reasons.contains(&EnableViolation::NoThreats));
    assert!(reasons.contains(&EnableViolation::NoControls));
}

#[test]
fn basic_policy_accepts_single_coverage_per_threat() {
    let storage_dir = temp_dir("basic_policy_accepts_single_coverage_per_threat");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");

    let et = element_type(&mut store, "Load balancer");
    let t1 = threat(&mut store, "TLS downgrade");
    store.assign_threat(&et, &t1).expect("assign threat");
    let c1 = control(&mut store, "Protocol floor", ControlCategory::Preventive, &et);
    cell(&mut store, &et, &t1, &c1, 0.6);

    assert!(
        store
            .can_enable(&et, EnablePolicy::BasicCoverage)
            .expect("can enable")
            .is_empty()
    );
    store
        .set_element_type_enabled(&et, true, EnablePolicy::BasicCoverage)
        .expect("enable");
    let row = store.get_element_type(&et).expect("get").expect("row");
    assert!(row.is_enabled);
}

#[test]
fn balanced_policy_requires_minimums_per_threat() {
    let storage_dir = temp_dir("balanced_policy_requires_minimums_per_threat");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");

    let et = element_type(&mut store, "Message broker");
    let t1 = threat(&mut store, "Queue poisoning");
    store.assign_threat(&et, &t1).expect("assign threat");

    let p1 = control(&mut store, "Schema validation", ControlCategory::Preventive, &et);
    let p2 = control(&mut store, "Producer authn", ControlCategory::Preventive, &et);
    let d1 = control(&mut store, "Payload inspection", ControlCategory::Detective, &et);
    let d2 = control(&mut store, "Consumer alerting", ControlCategory::Detective, &et);

    cell(&mut store, &et, &t1, &p1, 0.5);
    cell(&mut store, &et, &t1, &p2, 0.5);
    cell(&mut store, &et, &t1, &d1, 0.4);

    // One detective short of the 2/2 default.
    let err = store
        .set_element_type_enabled(&et, true, EnablePolicy::default())
        .expect_err("below minimums");
    match err {
        StoreError::EnableValidationFailed { reasons } => {
            // The offender is reported by its description, not its id.
            assert!(reasons.iter().any(|reason| matches!(
                reason,
                EnableViolation::ThreatBelowMinimums {
                    threat,
                    preventive: 2,
                    detective: 1,
                } if threat == "Queue poisoning"
            )));
        }
        other => panic!("unexpected error: {other}"),
    }
    // The flag must stay down after a failed enable.
    let row = store.get_element_type(&et).expect("get").expect("row");
    assert!(!row.is_enabled);

    cell(&mut store, &et, &t1, &d2, 0.4);
    store
        .set_element_type_enabled(&et, true, EnablePolicy::default())
        .expect("enable");
    let row = store.get_element_type(&et).expect("get").expect("row");
    assert!(row.is_enabled);
}

#[test]
fn balanced_policy_flags_controls_absent_from_the_matrix() {
    let storage_dir = temp_dir("balanced_policy_flags_controls_absent_from_the_matrix");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");

    let et = element_type(&mut store, "Directory service");
    let t1 = threat(&mut store, "Credential stuffing");
    store.assign_threat(&et, &t1).expect("assign threat");

    let p1 = control(&mut store, "Lockout policy", ControlCategory::Preventive, &et);
    control(&mut store, "MFA enrollment", ControlCategory::Preventive, &et);
    cell(&mut store, &et, &t1, &p1, 0.7);

    let reasons = store
        .can_enable(
            &et,
            EnablePolicy::BalancedCoverage {
                min_preventive: 1,
                min_detective: 0,
            },
        )
        .expect("can enable");
    assert!(reasons.contains(&EnableViolation::ControlNotInMatrix {
        control: "MFA enrollment".to_string()
    }));

    // The basic policy does not care about unused bound controls.
    assert!(
        store
            .can_enable(&et, EnablePolicy::BasicCoverage)
            .expect("can enable")
            .is_empty()
    );
}

#[test]
fn every_uncovered_threat_is_reported_not_just_the_first() {
    let storage_dir = temp_dir("every_uncovered_threat_is_reported_not_just_the_first");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");

    let et = element_type(&mut store, "VPN concentrator");
    let t1 = threat(&mut store, "Split tunneling abuse");
    let t2 = threat(&mut store, "Stale accounts");
    store.assign_threat(&et, &t1).expect("assign t1");
    store.assign_threat(&et, &t2).expect("assign t2");
    control(&mut store, "Posture check", ControlCategory::Preventive, &et);

    let reasons = store
        .can_enable(&et, EnablePolicy::BasicCoverage)
        .expect("can enable");
    assert!(reasons.contains(&EnableViolation::ThreatWithoutCoverage {
        threat: "Split tunneling abuse".to_string()
    }));
    assert!(reasons.contains(&EnableViolation::ThreatWithoutCoverage {
        threat: "Stale accounts".to_string()
    }));
}

#[test]
fn derived_types_enable_without_policy_checks() {
    let storage_dir = temp_dir("derived_types_enable_without_policy_checks");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");

    let parent = element_type(&mut store, "Workplace");
    let child = element_type(&mut store, "Laptop fleet");
    store.add_component(&parent, &child).expect("add component");

    assert!(
        store
            .can_enable(&parent, EnablePolicy::default())
            .expect("can enable")
            .is_empty()
    );
    store
        .set_element_type_enabled(&parent, true, EnablePolicy::default())
        .expect("enable derived");
    let row = store.get_element_type(&parent).expect("get").expect("row");
    assert!(row.is_enabled);

    // Disabling never validates.
    store
        .set_element_type_enabled(&parent, false, EnablePolicy::default())
        .expect("disable");
}
