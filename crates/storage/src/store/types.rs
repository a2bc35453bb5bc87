#![forbid(unsafe_code)]

use rm_core::model::{AssetStatus, CampaignStatus, ControlCategory, ControlKind};
use rm_core::scope::Scope;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScenarioRow {
    pub id: String,
    pub description: String,
    pub scope: Scope,
    pub cloned_from: Option<String>,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreatRow {
    pub id: String,
    pub description: String,
    pub scenario_id: String,
    pub scope: Scope,
    pub cloned_from: Option<String>,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ControlRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub kind: ControlKind,
    pub weight: f64,
    pub category: ControlCategory,
    pub macro_area: String,
    pub best_practice_ref: String,
    pub regulatory_ref: String,
    pub itil_process_ref: String,
    pub element_type: Option<String>,
    pub scope: Scope,
    pub cloned_from: Option<String>,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementTypeRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub is_base: bool,
    pub is_enabled: bool,
    pub is_root: bool,
    pub scope: Scope,
    pub cloned_from: Option<String>,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub scope: Scope,
    pub cloned_from: Option<String>,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub cmdb: String,
    pub legal_entity: String,
    pub status: AssetStatus,
    pub template_to_apply: Option<String>,
    pub scope: Scope,
    pub cloned_from: Option<String>,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CampaignRow {
    pub id: String,
    pub year: i64,
    pub description: String,
    pub starts_on: String,
    pub ends_on: String,
    pub status: CampaignStatus,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRow {
    pub id: String,
    pub owner: String,
    pub element_type: String,
    pub parent: Option<String>,
    pub display_name: String,
    pub depth: i64,
    pub scope: Scope,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CellRow {
    pub element_type: String,
    pub threat: String,
    pub control: String,
    pub value: f64,
}

/// Per-entity counts of what one campaign population created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CloneReport {
    pub scenarios: usize,
    pub threats: usize,
    pub element_types: usize,
    pub controls: usize,
    pub templates: usize,
    pub template_nodes: usize,
    pub assets: usize,
    pub cells: usize,
}
