#![forbid(unsafe_code)]

use rm_core::model::{AssetStatus, ControlCategory, ControlKind};
use rm_core::scope::Scope;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScenarioCreateRequest {
    pub description: String,
    pub scope: Scope,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreatCreateRequest {
    pub description: String,
    pub scenario_id: String,
    pub scope: Scope,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlCreateRequest {
    pub name: String,
    pub description: String,
    pub kind: ControlKind,
    pub category: ControlCategory,
    pub macro_area: String,
    pub best_practice_ref: String,
    pub regulatory_ref: String,
    pub itil_process_ref: String,
    pub element_type: Option<String>,
    pub scope: Scope,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementTypeCreateRequest {
    pub name: String,
    pub description: String,
    pub scope: Scope,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateCreateRequest {
    pub name: String,
    pub description: String,
    pub scope: Scope,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetCreateRequest {
    pub name: String,
    pub description: String,
    pub cmdb: String,
    pub legal_entity: String,
    pub status: AssetStatus,
    pub template_to_apply: Option<String>,
    pub scope: Scope,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CampaignCreateRequest {
    pub year: i64,
    pub description: String,
    pub starts_on: String,
    pub ends_on: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SetCellRequest {
    pub element_type: String,
    pub threat: String,
    pub control: String,
    /// `None` and `Some(0.0)` both delete the cell.
    pub value: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeAddRequest {
    pub owner: String,
    pub element_type: String,
    pub parent: Option<String>,
    /// Defaults to the element type's name; the first asset node takes the
    /// asset's name instead.
    pub display_name: Option<String>,
}
