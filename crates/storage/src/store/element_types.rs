#![forbid(unsafe_code)]

//! Element types and the component graph between them. A type starts as a
//! base type; giving it components turns it into a derived type whose
//! matrix is computed by aggregation instead of edited by hand.

use rm_core::enablement::{EnablePolicy, EnableViolation};
use rm_core::model::ControlCategory;
use rm_core::scope::Scope;
use rusqlite::{Connection, OptionalExtension, params};

use super::error::StoreError;
use super::requests::ElementTypeCreateRequest;
use super::types::{ControlRow, ElementTypeRow, ThreatRow};
use super::{
    CONTROL_COLUMNS, ELEMENT_TYPE_COLUMNS, SqliteStore, THREAT_COLUMNS, bound_control_ids,
    component_ids, control_from_row, direct_threat_ids, element_type_from_row,
    is_foreign_key_violation, map_name_conflict, next_id, now_ms, require_element_type,
    require_threat, threat_from_row,
};

impl SqliteStore {
    pub fn create_element_type(
        &mut self,
        req: ElementTypeCreateRequest,
    ) -> Result<ElementTypeRow, StoreError> {
        if req.name.trim().is_empty() {
            return Err(StoreError::InvalidInput("element type name is empty"));
        }
        let tx = self.conn.transaction()?;
        let id = next_id(&tx, "element_type", "ET")?;
        let created_at_ms = now_ms();
        tx.execute(
            "INSERT INTO element_types(id, name, description, is_base, is_enabled, is_root, \
             scope, cloned_from, created_at_ms) \
             VALUES (?1, ?2, ?3, 1, 0, 0, ?4, NULL, ?5)",
            params![id, req.name, req.description, req.scope.as_key(), created_at_ms],
        )
        .map_err(map_name_conflict)?;
        tx.commit()?;
        Ok(ElementTypeRow {
            id,
            name: req.name,
            description: req.description,
            is_base: true,
            is_enabled: false,
            is_root: false,
            scope: req.scope,
            cloned_from: None,
            created_at_ms,
        })
    }

    pub fn get_element_type(&self, id: &str) -> Result<Option<ElementTypeRow>, StoreError> {
        super::element_type_get(&self.conn, id)
    }

    pub fn list_element_types(&self, scope: &Scope) -> Result<Vec<ElementTypeRow>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ELEMENT_TYPE_COLUMNS} FROM element_types WHERE scope=?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![scope.as_key()], element_type_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Fails with [`StoreError::ElementTypeInUse`] while any structure node
    /// or component edge still references the type.
    pub fn delete_element_type(&mut self, id: &str) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let changed = tx
            .execute("DELETE FROM element_types WHERE id=?1", params![id])
            .map_err(|err| {
                if is_foreign_key_violation(&err) {
                    StoreError::ElementTypeInUse
                } else {
                    StoreError::Sql(err)
                }
            })?;
        if changed == 0 {
            return Err(StoreError::UnknownId);
        }
        tx.commit()?;
        Ok(())
    }

    pub fn assign_threat(&mut self, element_type: &str, threat: &str) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let et = require_element_type(&tx, element_type)?;
        let thr = require_threat(&tx, threat)?;
        if et.scope != thr.scope {
            return Err(StoreError::ScopeMismatch);
        }
        tx.execute(
            "INSERT OR IGNORE INTO element_type_threats(element_type, threat) VALUES (?1, ?2)",
            params![element_type, threat],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Removing a threat assignment also drops the matrix row it backed.
    pub fn unassign_threat(&mut self, element_type: &str, threat: &str) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "DELETE FROM element_type_threats WHERE element_type=?1 AND threat=?2",
            params![element_type, threat],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownId);
        }
        tx.execute(
            "DELETE FROM matrix_cells WHERE element_type=?1 AND threat=?2",
            params![element_type, threat],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn element_type_threats(&self, element_type: &str) -> Result<Vec<ThreatRow>, StoreError> {
        require_element_type(&self.conn, element_type)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {THREAT_COLUMNS} FROM threats \
             WHERE id IN (SELECT threat FROM element_type_threats WHERE element_type=?1) \
             ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![element_type], threat_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn element_type_controls(&self, element_type: &str) -> Result<Vec<ControlRow>, StoreError> {
        require_element_type(&self.conn, element_type)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONTROL_COLUMNS} FROM controls WHERE element_type=?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![element_type], control_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Adds a component edge and marks the parent as derived. The edge is
    /// rejected when it would close a cycle through the component graph.
    pub fn add_component(&mut self, parent: &str, component: &str) -> Result<(), StoreError> {
        if parent == component {
            return Err(StoreError::ComponentCycle);
        }
        let tx = self.conn.transaction()?;
        let parent_row = require_element_type(&tx, parent)?;
        let component_row = require_element_type(&tx, component)?;
        if parent_row.scope != component_row.scope {
            return Err(StoreError::ScopeMismatch);
        }
        if reaches(&tx, component, parent)? {
            return Err(StoreError::ComponentCycle);
        }
        tx.execute(
            "INSERT OR IGNORE INTO element_type_components(parent, component) VALUES (?1, ?2)",
            params![parent, component],
        )?;
        tx.execute(
            "UPDATE element_types SET is_base=0 WHERE id=?1",
            params![parent],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Removes a component edge. Dropping the last one turns the parent back
    /// into a base type; its previously aggregated cells stay editable.
    pub fn remove_component(&mut self, parent: &str, component: &str) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "DELETE FROM element_type_components WHERE parent=?1 AND component=?2",
            params![parent, component],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownId);
        }
        if component_ids(&tx, parent)?.is_empty() {
            tx.execute(
                "UPDATE element_types SET is_base=1 WHERE id=?1",
                params![parent],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn components(&self, parent: &str) -> Result<Vec<ElementTypeRow>, StoreError> {
        require_element_type(&self.conn, parent)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ELEMENT_TYPE_COLUMNS} FROM element_types \
             WHERE id IN (SELECT component FROM element_type_components WHERE parent=?1) \
             ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![parent], element_type_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Dry-run of the enable check: every violation, none applied.
    pub fn can_enable(
        &self,
        element_type: &str,
        policy: EnablePolicy,
    ) -> Result<Vec<EnableViolation>, StoreError> {
        let et = require_element_type(&self.conn, element_type)?;
        if !et.is_base {
            return Ok(Vec::new());
        }
        enable_violations(&self.conn, element_type, policy)
    }

    /// Flips the enabled flag. Enabling a base type runs the policy checks
    /// first and leaves the flag untouched when any of them fail; derived
    /// types inherit their coverage from components and enable freely.
    pub fn set_element_type_enabled(
        &mut self,
        element_type: &str,
        enabled: bool,
        policy: EnablePolicy,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let et = require_element_type(&tx, element_type)?;
        if enabled && et.is_base {
            let reasons = enable_violations(&tx, element_type, policy)?;
            if !reasons.is_empty() {
                return Err(StoreError::EnableValidationFailed { reasons });
            }
        }
        tx.execute(
            "UPDATE element_types SET is_enabled=?2 WHERE id=?1",
            params![element_type, enabled],
        )?;
        tx.commit()?;
        Ok(())
    }
}

/// True when `to` is reachable from `from` by following component edges.
fn reaches(conn: &Connection, from: &str, to: &str) -> Result<bool, StoreError> {
    let mut pending = vec![from.to_string()];
    let mut seen = std::collections::HashSet::new();
    while let Some(current) = pending.pop() {
        if current == to {
            return Ok(true);
        }
        if !seen.insert(current.clone()) {
            continue;
        }
        pending.extend(component_ids(conn, &current)?);
    }
    Ok(false)
}

/// Violations name offenders by the text operators see: threat descriptions
/// and control names, not ids.
pub(crate) fn enable_violations(
    conn: &Connection,
    element_type: &str,
    policy: EnablePolicy,
) -> Result<Vec<EnableViolation>, StoreError> {
    let mut reasons = Vec::new();

    let threats = direct_threat_ids(conn, element_type)?;
    if threats.is_empty() {
        reasons.push(EnableViolation::NoThreats);
    }
    let controls = bound_control_ids(conn, element_type)?;
    if controls.is_empty() {
        reasons.push(EnableViolation::NoControls);
    }

    for threat in &threats {
        let (preventive, detective) = coverage_counts(conn, element_type, threat)?;
        if preventive + detective == 0 {
            reasons.push(EnableViolation::ThreatWithoutCoverage {
                threat: threat_description(conn, threat)?,
            });
            continue;
        }
        if let EnablePolicy::BalancedCoverage {
            min_preventive,
            min_detective,
        } = policy
            && (preventive < min_preventive || detective < min_detective)
        {
            reasons.push(EnableViolation::ThreatBelowMinimums {
                threat: threat_description(conn, threat)?,
                preventive,
                detective,
            });
        }
    }

    if let EnablePolicy::BalancedCoverage { .. } = policy {
        for control in &controls {
            let used: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM matrix_cells WHERE element_type=?1 AND control=?2 LIMIT 1",
                    params![element_type, control],
                    |row| row.get(0),
                )
                .optional()?;
            if used.is_none() {
                reasons.push(EnableViolation::ControlNotInMatrix {
                    control: control_name(conn, control)?,
                });
            }
        }
    }

    Ok(reasons)
}

fn threat_description(conn: &Connection, id: &str) -> Result<String, StoreError> {
    Ok(conn.query_row(
        "SELECT description FROM threats WHERE id=?1",
        params![id],
        |row| row.get(0),
    )?)
}

fn control_name(conn: &Connection, id: &str) -> Result<String, StoreError> {
    Ok(conn.query_row("SELECT name FROM controls WHERE id=?1", params![id], |row| {
        row.get(0)
    })?)
}

/// Distinct preventive and detective controls with a positive cell for one
/// threat row of the matrix.
fn coverage_counts(
    conn: &Connection,
    element_type: &str,
    threat: &str,
) -> Result<(usize, usize), StoreError> {
    let mut stmt = conn.prepare(
        "SELECT c.category, COUNT(DISTINCT mc.control) \
         FROM matrix_cells mc JOIN controls c ON c.id = mc.control \
         WHERE mc.element_type=?1 AND mc.threat=?2 \
         GROUP BY c.category",
    )?;
    let rows = stmt.query_map(params![element_type, threat], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut preventive = 0usize;
    let mut detective = 0usize;
    for row in rows {
        let (category, count) = row?;
        let count = usize::try_from(count).unwrap_or(0);
        match ControlCategory::parse(&category) {
            Some(ControlCategory::Preventive) => preventive = count,
            Some(ControlCategory::Detective) => detective = count,
            None => return Err(StoreError::InvalidInput("invalid control category in row")),
        }
    }
    Ok((preventive, detective))
}
