#![forbid(unsafe_code)]

//! Recursive MAX aggregation: a derived element type's matrix is computed
//! from its components, crediting the strongest coverage any part provides
//! for each (threat, control) pair.

use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{BTreeSet, HashMap};

use super::error::StoreError;
use super::{SqliteStore, bound_control_ids, component_ids, direct_threat_ids, require_element_type};

impl SqliteStore {
    /// Effective threat set of a type: its own assignments unioned,
    /// recursively, with everything its components carry. For a base type
    /// this is just the direct assignments.
    pub fn all_threats(&self, element_type: &str) -> Result<Vec<String>, StoreError> {
        require_element_type(&self.conn, element_type)?;
        Ok(effective_threat_set(&self.conn, element_type)?
            .into_iter()
            .collect())
    }

    /// Symmetric to [`Self::all_threats`] over the control binding.
    pub fn all_controls(&self, element_type: &str) -> Result<Vec<String>, StoreError> {
        require_element_type(&self.conn, element_type)?;
        Ok(effective_control_set(&self.conn, element_type)?
            .into_iter()
            .collect())
    }

    /// Coverage at one (threat, control) pair. Base types answer from their
    /// stored cells; derived types take the maximum over their components,
    /// to arbitrary depth.
    pub fn value_at(
        &self,
        element_type: &str,
        threat: &str,
        control: &str,
    ) -> Result<f64, StoreError> {
        require_element_type(&self.conn, element_type)?;
        value_at(&self.conn, element_type, threat, control)
    }

    /// Recomputes and replaces the parent's stored matrix from the given
    /// components, in one transaction. The parent's own threats and prior
    /// cell values blend into the result, so a derived type can carry
    /// coverage of its own on top of what it inherits.
    pub fn aggregate(&mut self, parent: &str, components: &[String]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        aggregate_tx(&tx, parent, components)?;
        tx.commit()?;
        Ok(())
    }
}

pub(crate) fn aggregate_tx(
    conn: &Connection,
    parent: &str,
    components: &[String],
) -> Result<(), StoreError> {
    let parent_row = require_element_type(conn, parent)?;
    for component in components {
        let row = require_element_type(conn, component)?;
        if row.scope != parent_row.scope {
            return Err(StoreError::ScopeMismatch);
        }
    }

    // Prior cells participate in the MAX, so capture them before the wipe.
    let mut prior: HashMap<(String, String), f64> = HashMap::new();
    {
        let mut stmt = conn
            .prepare("SELECT threat, control, value FROM matrix_cells WHERE element_type=?1")?;
        let rows = stmt.query_map(params![parent], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
            ))
        })?;
        for row in rows {
            let (threat, control, value) = row?;
            prior.insert((threat, control), value);
        }
    }

    let mut threats: BTreeSet<String> = direct_threat_ids(conn, parent)?.into_iter().collect();
    let mut controls: BTreeSet<String> = bound_control_ids(conn, parent)?.into_iter().collect();
    for component in components {
        threats.append(&mut effective_threat_set(conn, component)?);
        controls.append(&mut effective_control_set(conn, component)?);
    }

    conn.execute(
        "DELETE FROM matrix_cells WHERE element_type=?1",
        params![parent],
    )?;
    conn.execute(
        "DELETE FROM element_type_threats WHERE element_type=?1",
        params![parent],
    )?;
    {
        let mut link = conn.prepare(
            "INSERT OR IGNORE INTO element_type_threats(element_type, threat) VALUES (?1, ?2)",
        )?;
        for threat in &threats {
            link.execute(params![parent, threat])?;
        }
    }

    let mut insert = conn.prepare(
        "INSERT INTO matrix_cells(element_type, threat, control, value) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for threat in &threats {
        for control in &controls {
            let mut value = prior.get(&(threat.clone(), control.clone())).copied().unwrap_or(0.0);
            for component in components {
                value = value.max(value_at(conn, component, threat, control)?);
            }
            if value > 0.0 {
                insert.execute(params![parent, threat, control, value])?;
            }
        }
    }
    Ok(())
}

pub(crate) fn value_at(
    conn: &Connection,
    element_type: &str,
    threat: &str,
    control: &str,
) -> Result<f64, StoreError> {
    let components = component_ids(conn, element_type)?;
    if components.is_empty() {
        let stored: Option<f64> = conn
            .query_row(
                "SELECT value FROM matrix_cells \
                 WHERE element_type=?1 AND threat=?2 AND control=?3",
                params![element_type, threat, control],
                |row| row.get(0),
            )
            .optional()?;
        return Ok(stored.unwrap_or(0.0));
    }
    let mut best = 0.0f64;
    for component in components {
        best = best.max(value_at(conn, &component, threat, control)?);
    }
    Ok(best)
}

/// Every threat directly assigned anywhere in the component closure of a
/// type, the type itself included.
pub(crate) fn effective_threat_set(
    conn: &Connection,
    element_type: &str,
) -> Result<BTreeSet<String>, StoreError> {
    let mut out = BTreeSet::new();
    let mut pending = vec![element_type.to_string()];
    let mut seen = BTreeSet::new();
    while let Some(current) = pending.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        out.extend(direct_threat_ids(conn, &current)?);
        pending.extend(component_ids(conn, &current)?);
    }
    Ok(out)
}

pub(crate) fn effective_control_set(
    conn: &Connection,
    element_type: &str,
) -> Result<BTreeSet<String>, StoreError> {
    let mut out = BTreeSet::new();
    let mut pending = vec![element_type.to_string()];
    let mut seen = BTreeSet::new();
    while let Some(current) = pending.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        out.extend(bound_control_ids(conn, &current)?);
        pending.extend(component_ids(conn, &current)?);
    }
    Ok(out)
}
