#![forbid(unsafe_code)]

//! One-shot seeding of the master dataset from a JSON file. Entities are
//! referenced by name inside the file; ids are assigned by the store.

use rm_core::matrix::validate_cell_value;
use rm_core::model::{AssetStatus, ControlKind};
use rm_core::scope::Scope;
use rusqlite::{Connection, params};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use super::campaign::scope_record_count;
use super::error::StoreError;
use super::tree::{
    TreeKind, clone_nodes_tx, ensure_root_element_type_tx, insert_raw_node, refresh_root_tx,
};
use super::{SqliteStore, next_id, now_ms};

#[derive(Debug, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub scenarios: Vec<SeedScenario>,
    #[serde(default)]
    pub element_types: Vec<SeedElementType>,
    #[serde(default)]
    pub templates: Vec<SeedTemplate>,
    #[serde(default)]
    pub assets: Vec<SeedAsset>,
}

#[derive(Debug, Deserialize)]
pub struct SeedScenario {
    pub description: String,
    #[serde(default)]
    pub threats: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeedElementType {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Threat descriptions assigned to this type.
    #[serde(default)]
    pub threats: Vec<String>,
    #[serde(default)]
    pub controls: Vec<SeedControl>,
    /// Names of component element types; a non-empty list makes the type
    /// derived and triggers aggregation after the cells load.
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub cells: Vec<SeedCell>,
}

#[derive(Debug, Deserialize)]
pub struct SeedControl {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: String,
    pub category: String,
    #[serde(default)]
    pub macro_area: String,
    #[serde(default)]
    pub best_practice_ref: String,
    #[serde(default)]
    pub regulatory_ref: String,
    #[serde(default)]
    pub itil_process_ref: String,
}

#[derive(Debug, Deserialize)]
pub struct SeedCell {
    pub threat: String,
    pub control: String,
    pub value: f64,
}

#[derive(Debug, Deserialize)]
pub struct SeedTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nodes: Vec<SeedNode>,
}

#[derive(Debug, Deserialize)]
pub struct SeedNode {
    pub element_type: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub children: Vec<SeedNode>,
}

#[derive(Debug, Deserialize)]
pub struct SeedAsset {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cmdb: String,
    #[serde(default)]
    pub legal_entity: String,
    #[serde(default = "default_asset_status")]
    pub status: String,
    #[serde(default)]
    pub template: Option<String>,
}

fn default_asset_status() -> String {
    "in_production".to_string()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub scenarios: usize,
    pub threats: usize,
    pub element_types: usize,
    pub controls: usize,
    pub cells: usize,
    pub templates: usize,
    pub template_nodes: usize,
    pub assets: usize,
    pub asset_nodes: usize,
}

impl SqliteStore {
    /// Loads a seed file into the master scope. Refuses to run once the
    /// master scope owns any record; everything loads in one transaction.
    pub fn seed_master(&mut self, path: impl AsRef<Path>) -> Result<SeedReport, StoreError> {
        let raw = std::fs::read_to_string(path)?;
        let file: SeedFile = serde_json::from_str(&raw)?;

        let tx = self.conn.transaction()?;
        if scope_record_count(&tx, "")? > 0 {
            return Err(StoreError::MasterNotEmpty);
        }
        let report = seed_tx(&tx, &file)?;
        tx.commit()?;
        Ok(report)
    }
}

fn seed_tx(conn: &Connection, file: &SeedFile) -> Result<SeedReport, StoreError> {
    let mut report = SeedReport::default();
    let mut threat_ids: HashMap<&str, String> = HashMap::new();
    let mut et_ids: HashMap<&str, String> = HashMap::new();
    let mut control_ids: HashMap<&str, String> = HashMap::new();
    let mut template_ids: HashMap<&str, String> = HashMap::new();

    for scenario in &file.scenarios {
        let scenario_id = next_id(conn, "scenario", "SCN")?;
        conn.execute(
            "INSERT INTO scenarios(id, description, scope, cloned_from, created_at_ms) \
             VALUES (?1, ?2, '', NULL, ?3)",
            params![scenario_id, scenario.description, now_ms()],
        )?;
        report.scenarios += 1;
        for threat in &scenario.threats {
            let threat_id = next_id(conn, "threat", "THR")?;
            conn.execute(
                "INSERT INTO threats(id, description, scenario_id, scope, cloned_from, \
                 created_at_ms) VALUES (?1, ?2, ?3, '', NULL, ?4)",
                params![threat_id, threat, scenario_id, now_ms()],
            )?;
            threat_ids.insert(threat.as_str(), threat_id);
            report.threats += 1;
        }
    }

    // First pass creates the types so component and control references can
    // point anywhere in the file regardless of declaration order.
    for et in &file.element_types {
        let et_id = next_id(conn, "element_type", "ET")?;
        let is_base = et.components.is_empty();
        conn.execute(
            "INSERT INTO element_types(id, name, description, is_base, is_enabled, is_root, \
             scope, cloned_from, created_at_ms) VALUES (?1, ?2, ?3, ?4, 0, 0, '', NULL, ?5)",
            params![et_id, et.name, et.description, is_base, now_ms()],
        )?;
        et_ids.insert(et.name.as_str(), et_id);
        report.element_types += 1;
    }

    for et in &file.element_types {
        let et_id = &et_ids[et.name.as_str()];
        for threat in &et.threats {
            let threat_id = threat_ids
                .get(threat.as_str())
                .ok_or(StoreError::InvalidInput("seed references an unknown threat"))?;
            conn.execute(
                "INSERT OR IGNORE INTO element_type_threats(element_type, threat) \
                 VALUES (?1, ?2)",
                params![et_id, threat_id],
            )?;
        }
        for control in &et.controls {
            let kind = ControlKind::parse(&control.kind)
                .ok_or(StoreError::InvalidInput("seed control has an unknown kind"))?;
            rm_core::model::ControlCategory::parse(&control.category)
                .ok_or(StoreError::InvalidInput("seed control has an unknown category"))?;
            let control_id = next_id(conn, "control", "CTL")?;
            conn.execute(
                "INSERT INTO controls(id, name, description, kind, weight, category, \
                 macro_area, best_practice_ref, regulatory_ref, itil_process_ref, \
                 element_type, scope, cloned_from, created_at_ms) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, '', NULL, ?12)",
                params![
                    control_id,
                    control.name,
                    control.description,
                    control.kind,
                    kind.weight(),
                    control.category,
                    control.macro_area,
                    control.best_practice_ref,
                    control.regulatory_ref,
                    control.itil_process_ref,
                    et_id,
                    now_ms()
                ],
            )?;
            control_ids.insert(control.name.as_str(), control_id);
            report.controls += 1;
        }
        for component in &et.components {
            let component_id = et_ids.get(component.as_str()).ok_or(StoreError::InvalidInput(
                "seed references an unknown component element type",
            ))?;
            conn.execute(
                "INSERT OR IGNORE INTO element_type_components(parent, component) \
                 VALUES (?1, ?2)",
                params![et_id, component_id],
            )?;
        }
    }

    for et in &file.element_types {
        let et_id = &et_ids[et.name.as_str()];
        for cell in &et.cells {
            let threat_id = threat_ids
                .get(cell.threat.as_str())
                .ok_or(StoreError::InvalidInput("seed cell references an unknown threat"))?;
            let control_id = control_ids
                .get(cell.control.as_str())
                .ok_or(StoreError::InvalidInput("seed cell references an unknown control"))?;
            validate_cell_value(cell.value)
                .map_err(|_| StoreError::InvalidValue { value: cell.value })?;
            conn.execute(
                "INSERT INTO matrix_cells(element_type, threat, control, value) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(element_type, threat, control) DO UPDATE SET value=excluded.value",
                params![et_id, threat_id, control_id, cell.value],
            )?;
            report.cells += 1;
        }
    }

    // Derived types aggregate once everything below them is loaded. The
    // recursive valueAt makes the visit order irrelevant.
    for et in &file.element_types {
        if et.components.is_empty() {
            continue;
        }
        let et_id = et_ids[et.name.as_str()].clone();
        let components: Vec<String> = et
            .components
            .iter()
            .map(|name| et_ids[name.as_str()].clone())
            .collect();
        super::aggregate::aggregate_tx(conn, &et_id, &components)?;
    }

    for template in &file.templates {
        let template_id = next_id(conn, "template", "TPL")?;
        conn.execute(
            "INSERT INTO templates(id, name, description, scope, cloned_from, created_at_ms) \
             VALUES (?1, ?2, ?3, '', NULL, ?4)",
            params![template_id, template.name, template.description, now_ms()],
        )?;
        template_ids.insert(template.name.as_str(), template_id.clone());
        report.templates += 1;

        // Every tree anchors on the scope's synthetic root type; the file's
        // nodes hang beneath it.
        let root_et = ensure_root_element_type_tx(conn, &Scope::Master)?;
        let root_node = insert_raw_node(
            conn,
            TreeKind::Template,
            &template_id,
            &root_et.id,
            None,
            &template.name,
            0,
            &Scope::Master,
        )?;
        report.template_nodes += 1;
        for node in &template.nodes {
            report.template_nodes +=
                seed_node(conn, &template_id, node, Some(&root_node), 1, &et_ids)?;
        }
        refresh_root_tx(conn, TreeKind::Template, &template_id)?;
    }

    for asset in &file.assets {
        let status = AssetStatus::parse(&asset.status)
            .ok_or(StoreError::InvalidInput("seed asset has an unknown status"))?;
        let template_id = match &asset.template {
            Some(name) => Some(
                template_ids
                    .get(name.as_str())
                    .cloned()
                    .ok_or(StoreError::InvalidInput("seed asset references an unknown template"))?,
            ),
            None => None,
        };
        let asset_id = next_id(conn, "asset", "AST")?;
        conn.execute(
            "INSERT INTO assets(id, name, description, cmdb, legal_entity, status, \
             template_to_apply, scope, cloned_from, created_at_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, '', NULL, ?8)",
            params![
                asset_id,
                asset.name,
                asset.description,
                asset.cmdb,
                asset.legal_entity,
                status.as_str(),
                template_id,
                now_ms()
            ],
        )?;
        report.assets += 1;

        if let Some(template_id) = template_id {
            report.asset_nodes += clone_nodes_tx(
                conn,
                TreeKind::Template,
                &template_id,
                TreeKind::Asset,
                &asset_id,
                Some(&asset.name),
            )?;
            refresh_root_tx(conn, TreeKind::Asset, &asset_id)?;
        }
    }

    Ok(report)
}

/// Seed trees are explicit; nodes insert exactly as written beneath the
/// template's root node, without the component auto-expansion used for
/// interactive edits.
fn seed_node(
    conn: &Connection,
    template_id: &str,
    node: &SeedNode,
    parent: Option<&str>,
    depth: i64,
    et_ids: &HashMap<&str, String>,
) -> Result<usize, StoreError> {
    let et_id = et_ids.get(node.element_type.as_str()).ok_or(StoreError::InvalidInput(
        "seed node references an unknown element type",
    ))?;
    let display_name = node
        .display_name
        .clone()
        .unwrap_or_else(|| node.element_type.clone());
    let node_id = insert_raw_node(
        conn,
        TreeKind::Template,
        template_id,
        et_id,
        parent,
        &display_name,
        depth,
        &Scope::Master,
    )?;
    let mut inserted = 1usize;
    for child in &node.children {
        inserted += seed_node(conn, template_id, child, Some(&node_id), depth + 1, et_ids)?;
    }
    Ok(inserted)
}
