#![forbid(unsafe_code)]

use rm_core::model::{AssetStatus, CampaignStatus, ControlCategory, ControlKind};
use rm_core::scope::Scope;
use rm_storage::{
    AssetCreateRequest, CampaignCreateRequest, ControlCreateRequest, ElementTypeCreateRequest,
    NodeAddRequest, ScenarioCreateRequest, SetCellRequest, SqliteStore, StoreError,
    TemplateCreateRequest, ThreatCreateRequest, TreeKind,
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

struct Master {
    threat: String,
    base: String,
    derived: String,
    control: String,
}

/// Master dataset: one scenario/threat, a scored base type inside a derived
/// one, a template with a two-node tree, and one asset pointing at it.
fn build_master(store: &mut SqliteStore) -> Master {
    let scenario = store
        .create_scenario(ScenarioCreateRequest {
            description: "Data exfiltration".to_string(),
            scope: Scope::Master,
        })
        .expect("create scenario");
    let threat = store
        .create_threat(ThreatCreateRequest {
            description: "Bulk export abuse".to_string(),
            scenario_id: scenario.id,
            scope: Scope::Master,
        })
        .expect("create threat")
        .id;

    let base = store
        .create_element_type(ElementTypeCreateRequest {
            name: "Reporting engine".to_string(),
            description: String::new(),
            scope: Scope::Master,
        })
        .expect("create base")
        .id;
    let derived = store
        .create_element_type(ElementTypeCreateRequest {
            name: "Analytics platform".to_string(),
            description: String::new(),
            scope: Scope::Master,
        })
        .expect("create derived")
        .id;
    store.add_component(&derived, &base).expect("add component");

    let control = store
        .create_control(ControlCreateRequest {
            name: "Export rate limits".to_string(),
            description: String::new(),
            kind: ControlKind::Technological,
            category: ControlCategory::Preventive,
            macro_area: String::new(),
            best_practice_ref: String::new(),
            regulatory_ref: String::new(),
            itil_process_ref: String::new(),
            element_type: Some(base.clone()),
            scope: Scope::Master,
        })
        .expect("create control")
        .id;
    store.assign_threat(&base, &threat).expect("assign threat");
    store
        .set_cell(SetCellRequest {
            element_type: base.clone(),
            threat: threat.clone(),
            control: control.clone(),
            value: Some(0.6),
        })
        .expect("set cell");

    let root_et = store
        .ensure_root_element_type(&Scope::Master)
        .expect("root element type");
    let template = store
        .create_template(TemplateCreateRequest {
            name: "Analytics template".to_string(),
            description: String::new(),
            scope: Scope::Master,
        })
        .expect("create template")
        .id;
    let troot = store
        .add_node(
            TreeKind::Template,
            NodeAddRequest {
                owner: template.clone(),
                element_type: root_et.id,
                parent: None,
                display_name: None,
            },
        )
        .expect("template root");
    store
        .add_node(
            TreeKind::Template,
            NodeAddRequest {
                owner: template.clone(),
                element_type: base.clone(),
                parent: Some(troot.id),
                display_name: None,
            },
        )
        .expect("template child");

    store
        .create_asset(AssetCreateRequest {
            name: "BI stack".to_string(),
            description: String::new(),
            cmdb: "CI-1001".to_string(),
            legal_entity: "HQ".to_string(),
            status: AssetStatus::InProduction,
            template_to_apply: Some(template),
            scope: Scope::Master,
        })
        .expect("create asset");

    Master {
        threat,
        base,
        derived,
        control,
    }
}

#[test]
fn population_clones_the_whole_master_dataset() {
    let storage_dir = temp_dir("population_clones_the_whole_master_dataset");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");
    let master = build_master(&mut store);

    let campaign = store
        .create_campaign(CampaignCreateRequest {
            year: 2026,
            description: "FY26 assessment".to_string(),
            starts_on: "2026-01-01".to_string(),
            ends_on: "2026-12-31".to_string(),
        })
        .expect("create campaign");
    assert_eq!(campaign.status, CampaignStatus::Open);

    let report = store
        .populate_from_master(&campaign.id)
        .expect("populate");
    assert_eq!(report.scenarios, 1);
    assert_eq!(report.threats, 1);
    // base + derived + the master root element type
    assert_eq!(report.element_types, 3);
    assert_eq!(report.controls, 1);
    assert_eq!(report.templates, 1);
    assert_eq!(report.template_nodes, 2);
    assert_eq!(report.assets, 1);
    // The base type's cell plus the aggregated cell on the master root.
    assert_eq!(report.cells, 2);

    let scope = Scope::campaign(campaign.id.clone());
    let types = store.list_element_types(&scope).expect("list types");
    assert_eq!(types.len(), 3);
    for row in &types {
        assert!(row.cloned_from.is_some(), "{} lacks provenance", row.id);
        assert_ne!(row.cloned_from.as_deref(), Some(row.id.as_str()));
    }

    // The cloned base type carries the remapped cell and relationships.
    let cloned_base = types
        .iter()
        .find(|row| row.cloned_from.as_deref() == Some(master.base.as_str()))
        .expect("cloned base");
    let cells = store.list_cells(&cloned_base.id).expect("cloned cells");
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].value, 0.6);
    assert_ne!(cells[0].threat, master.threat);
    assert_ne!(cells[0].control, master.control);

    // Component edges survive the id remap.
    let cloned_derived = types
        .iter()
        .find(|row| row.cloned_from.as_deref() == Some(master.derived.as_str()))
        .expect("cloned derived");
    let components = store.components(&cloned_derived.id).expect("components");
    assert_eq!(components.len(), 1);
    assert_eq!(components[0].id, cloned_base.id);
    assert!(!cloned_derived.is_base);

    // Assets clone without structure; their trees come later.
    let assets = store.list_assets(&scope).expect("list assets");
    assert_eq!(assets.len(), 1);
    assert!(
        store
            .list_nodes(TreeKind::Asset, &assets[0].id)
            .expect("asset nodes")
            .is_empty()
    );
    // The asset's template pointer was remapped into the campaign.
    let template_ref = assets[0].template_to_apply.as_deref().expect("template ref");
    let template = store
        .get_template(template_ref)
        .expect("get template")
        .expect("cloned template");
    assert_eq!(template.scope, scope);
}

#[test]
fn campaigns_are_isolated_from_the_master_scope() {
    let storage_dir = temp_dir("campaigns_are_isolated_from_the_master_scope");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");
    let master = build_master(&mut store);

    let campaign = store
        .create_campaign(CampaignCreateRequest {
            year: 2026,
            description: "FY26 assessment".to_string(),
            starts_on: "2026-01-01".to_string(),
            ends_on: "2026-12-31".to_string(),
        })
        .expect("create campaign");
    store.populate_from_master(&campaign.id).expect("populate");

    let scope = Scope::campaign(campaign.id.clone());
    let cloned_base = store
        .list_element_types(&scope)
        .expect("list types")
        .into_iter()
        .find(|row| row.cloned_from.as_deref() == Some(master.base.as_str()))
        .expect("cloned base");

    // Editing the clone leaves the master cell untouched.
    let cloned_cells = store.list_cells(&cloned_base.id).expect("cloned cells");
    store
        .set_cell(SetCellRequest {
            element_type: cloned_base.id.clone(),
            threat: cloned_cells[0].threat.clone(),
            control: cloned_cells[0].control.clone(),
            value: Some(0.9),
        })
        .expect("edit clone");
    let master_cells = store.list_cells(&master.base).expect("master cells");
    assert_eq!(master_cells[0].value, 0.6);

    // A second population of the same campaign is refused.
    let err = store
        .populate_from_master(&campaign.id)
        .expect_err("already populated");
    assert!(matches!(err, StoreError::CampaignNotEmpty));
}

#[test]
fn deleting_a_campaign_removes_its_whole_scope() {
    let storage_dir = temp_dir("deleting_a_campaign_removes_its_whole_scope");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");
    build_master(&mut store);

    let campaign = store
        .create_campaign(CampaignCreateRequest {
            year: 2026,
            description: "FY26 assessment".to_string(),
            starts_on: "2026-01-01".to_string(),
            ends_on: "2026-12-31".to_string(),
        })
        .expect("create campaign");
    store.populate_from_master(&campaign.id).expect("populate");

    let scope = Scope::campaign(campaign.id.clone());
    assert!(!store.list_element_types(&scope).expect("types").is_empty());

    store.delete_campaign(&campaign.id).expect("delete campaign");
    assert!(store.get_campaign(&campaign.id).expect("get").is_none());
    assert!(store.list_element_types(&scope).expect("types").is_empty());
    assert!(store.list_scenarios(&scope).expect("scenarios").is_empty());
    assert!(store.list_threats(&scope).expect("threats").is_empty());
    assert!(store.list_controls(&scope).expect("controls").is_empty());
    assert!(store.list_templates(&scope).expect("templates").is_empty());
    assert!(store.list_assets(&scope).expect("assets").is_empty());

    // The master dataset is untouched.
    assert!(!store.list_element_types(&Scope::Master).expect("types").is_empty());
}

#[test]
fn population_requires_an_existing_empty_campaign() {
    let storage_dir = temp_dir("population_requires_an_existing_empty_campaign");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");
    build_master(&mut store);

    let err = store
        .populate_from_master("CMP-404")
        .expect_err("unknown campaign");
    assert!(matches!(err, StoreError::UnknownId));

    let campaign = store
        .create_campaign(CampaignCreateRequest {
            year: 2026,
            description: "FY26 assessment".to_string(),
            starts_on: "2026-01-01".to_string(),
            ends_on: "2026-12-31".to_string(),
        })
        .expect("create campaign");
    // Any record already owned by the campaign blocks the clone.
    store
        .create_scenario(ScenarioCreateRequest {
            description: "Early scenario".to_string(),
            scope: Scope::campaign(campaign.id.clone()),
        })
        .expect("campaign scenario");
    let err = store
        .populate_from_master(&campaign.id)
        .expect_err("not empty");
    assert!(matches!(err, StoreError::CampaignNotEmpty));

    store
        .set_campaign_status(&campaign.id, CampaignStatus::Closed)
        .expect("close campaign");
    let row = store.get_campaign(&campaign.id).expect("get").expect("row");
    assert_eq!(row.status, CampaignStatus::Closed);
}
