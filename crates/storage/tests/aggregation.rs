#![forbid(unsafe_code)]

use rm_core::model::{ControlCategory, ControlKind};
use rm_core::scope::Scope;
use rm_storage::{
    ControlCreateRequest, ElementTypeCreateRequest, ScenarioCreateRequest, SetCellRequest,
    SqliteStore, ThreatCreateRequest,
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

struct Fixture {
    a: String,
    b: String,
    t1: String,
    t2: String,
    ca: String,
    cb: String,
    cc: String,
}

/// Base type A: threats {T1, T2}, T1->Ca=0.5, T2->Cb=0.8.
/// Base type B: threat {T2}, T2->Cc=0.3.
fn two_base_types(store: &mut SqliteStore) -> Fixture {
    let scenario = store
        .create_scenario(ScenarioCreateRequest {
            description: "Unavailability of services".to_string(),
            scope: Scope::Master,
        })
        .expect("create scenario");
    let mut threat = |description: &str, store: &mut SqliteStore| {
        store
            .create_threat(ThreatCreateRequest {
                description: description.to_string(),
                scenario_id: scenario.id.clone(),
                scope: Scope::Master,
            })
            .expect("create threat")
            .id
    };
    let t1 = threat("Hardware failure", store);
    let t2 = threat("Misconfiguration", store);

    let a = store
        .create_element_type(ElementTypeCreateRequest {
            name: "Hypervisor".to_string(),
            description: String::new(),
            scope: Scope::Master,
        })
        .expect("create A")
        .id;
    let b = store
        .create_element_type(ElementTypeCreateRequest {
            name: "Orchestrator".to_string(),
            description: String::new(),
            scope: Scope::Master,
        })
        .expect("create B")
        .id;

    let mut control = |name: &str, et: &str, store: &mut SqliteStore| {
        store
            .create_control(ControlCreateRequest {
                name: name.to_string(),
                description: String::new(),
                kind: ControlKind::Process,
                category: ControlCategory::Preventive,
                macro_area: String::new(),
                best_practice_ref: String::new(),
                regulatory_ref: String::new(),
                itil_process_ref: String::new(),
                element_type: Some(et.to_string()),
                scope: Scope::Master,
            })
            .expect("create control")
            .id
    };
    let ca = control("Redundant PSUs", &a, store);
    let cb = control("Config baseline", &a, store);
    let cc = control("Drift detection", &b, store);

    store.assign_threat(&a, &t1).expect("assign t1 to A");
    store.assign_threat(&a, &t2).expect("assign t2 to A");
    store.assign_threat(&b, &t2).expect("assign t2 to B");

    let mut cell = |et: &str, t: &str, c: &str, v: f64, store: &mut SqliteStore| {
        store
            .set_cell(SetCellRequest {
                element_type: et.to_string(),
                threat: t.to_string(),
                control: c.to_string(),
                value: Some(v),
            })
            .expect("set cell");
    };
    cell(&a, &t1, &ca, 0.5, store);
    cell(&a, &t2, &cb, 0.8, store);
    cell(&b, &t2, &cc, 0.3, store);

    Fixture { a, b, t1, t2, ca, cb, cc }
}

#[test]
fn derived_type_unions_threats_and_takes_the_max() {
    let storage_dir = temp_dir("derived_type_unions_threats_and_takes_the_max");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");
    let fx = two_base_types(&mut store);

    let d = store
        .create_element_type(ElementTypeCreateRequest {
            name: "Virtualization stack".to_string(),
            description: String::new(),
            scope: Scope::Master,
        })
        .expect("create D")
        .id;
    store.add_component(&d, &fx.a).expect("D <- A");
    store.add_component(&d, &fx.b).expect("D <- B");

    let mut threats = store.all_threats(&d).expect("all threats");
    threats.sort();
    let mut expected = vec![fx.t1.clone(), fx.t2.clone()];
    expected.sort();
    assert_eq!(threats, expected);

    let mut controls = store.all_controls(&d).expect("all controls");
    controls.sort();
    let mut expected = vec![fx.ca.clone(), fx.cb.clone(), fx.cc.clone()];
    expected.sort();
    assert_eq!(controls, expected);

    assert_eq!(store.value_at(&d, &fx.t2, &fx.cb).expect("value"), 0.8);
    assert_eq!(store.value_at(&d, &fx.t2, &fx.cc).expect("value"), 0.3);
    assert_eq!(store.value_at(&d, &fx.t1, &fx.ca).expect("value"), 0.5);
    assert_eq!(store.value_at(&d, &fx.t1, &fx.cc).expect("value"), 0.0);
}

#[test]
fn aggregate_materializes_and_is_idempotent() {
    let storage_dir = temp_dir("aggregate_materializes_and_is_idempotent");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");
    let fx = two_base_types(&mut store);

    let d = store
        .create_element_type(ElementTypeCreateRequest {
            name: "Compute platform".to_string(),
            description: String::new(),
            scope: Scope::Master,
        })
        .expect("create D")
        .id;
    store.add_component(&d, &fx.a).expect("D <- A");
    store.add_component(&d, &fx.b).expect("D <- B");

    let components = vec![fx.a.clone(), fx.b.clone()];
    store.aggregate(&d, &components).expect("aggregate");
    let first = store.list_cells(&d).expect("list cells");
    assert_eq!(first.len(), 3, "only strictly positive pairs persist");

    store.aggregate(&d, &components).expect("aggregate again");
    let second = store.list_cells(&d).expect("list cells");
    assert_eq!(first, second);

    // The strongest coverage among the parts is the one credited.
    let stored = first
        .iter()
        .find(|cell| cell.threat == fx.t2 && cell.control == fx.cb)
        .expect("T2/Cb cell");
    assert_eq!(stored.value, 0.8);
}

#[test]
fn aggregation_recurses_to_arbitrary_depth() {
    let storage_dir = temp_dir("aggregation_recurses_to_arbitrary_depth");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");
    let fx = two_base_types(&mut store);

    let mid = store
        .create_element_type(ElementTypeCreateRequest {
            name: "Cluster".to_string(),
            description: String::new(),
            scope: Scope::Master,
        })
        .expect("create mid")
        .id;
    let top = store
        .create_element_type(ElementTypeCreateRequest {
            name: "Datacenter".to_string(),
            description: String::new(),
            scope: Scope::Master,
        })
        .expect("create top")
        .id;
    store.add_component(&mid, &fx.a).expect("mid <- A");
    store.add_component(&mid, &fx.b).expect("mid <- B");
    store.add_component(&top, &mid).expect("top <- mid");

    // No intermediate aggregate call is needed for the recursive read.
    assert_eq!(store.value_at(&top, &fx.t2, &fx.cb).expect("value"), 0.8);
    assert_eq!(store.value_at(&top, &fx.t2, &fx.cc).expect("value"), 0.3);

    let mut threats = store.all_threats(&top).expect("all threats");
    threats.sort();
    let mut expected = vec![fx.t1.clone(), fx.t2.clone()];
    expected.sort();
    assert_eq!(threats, expected);
}

#[test]
fn parent_prior_cells_and_own_threats_blend_into_the_result() {
    let storage_dir = temp_dir("parent_prior_cells_and_own_threats_blend_into_the_result");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");
    let fx = two_base_types(&mut store);

    // Give the parent a directly assigned threat and a hand-written cell
    // before it becomes derived.
    let d = store
        .create_element_type(ElementTypeCreateRequest {
            name: "Hosting service".to_string(),
            description: String::new(),
            scope: Scope::Master,
        })
        .expect("create D")
        .id;
    store.assign_threat(&d, &fx.t2).expect("assign t2 to D");
    store
        .set_cell(SetCellRequest {
            element_type: d.clone(),
            threat: fx.t2.clone(),
            control: fx.cc.clone(),
            value: Some(0.9),
        })
        .expect("own cell");
    store.add_component(&d, &fx.a).expect("D <- A");
    store.add_component(&d, &fx.b).expect("D <- B");

    let components = vec![fx.a.clone(), fx.b.clone()];
    store.aggregate(&d, &components).expect("aggregate");

    // The parent's own 0.9 beats the component's 0.3 for (T2, Cc).
    let cells = store.list_cells(&d).expect("list cells");
    let blended = cells
        .iter()
        .find(|cell| cell.threat == fx.t2 && cell.control == fx.cc)
        .expect("T2/Cc cell");
    assert_eq!(blended.value, 0.9);

    let mut threats = store.all_threats(&d).expect("all threats");
    threats.sort();
    let mut expected = vec![fx.t1.clone(), fx.t2.clone()];
    expected.sort();
    assert_eq!(threats, expected);
}

#[test]
fn component_cycles_are_rejected() {
    let storage_dir = temp_dir("component_cycles_are_rejected");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");
    let fx = two_base_types(&mut store);

    let d = store
        .create_element_type(ElementTypeCreateRequest {
            name: "Stack".to_string(),
            description: String::new(),
            scope: Scope::Master,
        })
        .expect("create D")
        .id;
    store.add_component(&d, &fx.a).expect("D <- A");

    let err = store.add_component(&d, &d).expect_err("self edge");
    assert!(matches!(err, rm_storage::StoreError::ComponentCycle));

    let err = store.add_component(&fx.a, &d).expect_err("back edge");
    assert!(matches!(err, rm_storage::StoreError::ComponentCycle));

    // Removing the last component turns the type back into a base one.
    store.remove_component(&d, &fx.a).expect("remove component");
    let row = store.get_element_type(&d).expect("get").expect("row");
    assert!(row.is_base);
}
