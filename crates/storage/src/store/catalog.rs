#![forbid(unsafe_code)]

//! Scenario, threat and control catalogs. Threats always hang off a
//! scenario; controls carry a fixed weight derived from their kind and may
//! be bound to one element type.

use rm_core::scope::Scope;
use rusqlite::{OptionalExtension, params};

use super::error::StoreError;
use super::requests::{ControlCreateRequest, ScenarioCreateRequest, ThreatCreateRequest};
use super::types::{ControlRow, ScenarioRow, ThreatRow};
use super::{
    CONTROL_COLUMNS, SCENARIO_COLUMNS, SqliteStore, THREAT_COLUMNS, control_from_row, control_get,
    map_name_conflict, next_id, now_ms, require_element_type, scenario_from_row, threat_from_row,
    threat_get,
};

impl SqliteStore {
    pub fn create_scenario(
        &mut self,
        req: ScenarioCreateRequest,
    ) -> Result<ScenarioRow, StoreError> {
        if req.description.trim().is_empty() {
            return Err(StoreError::InvalidInput("scenario description is empty"));
        }
        let tx = self.conn.transaction()?;
        let id = next_id(&tx, "scenario", "SCN")?;
        let created_at_ms = now_ms();
        tx.execute(
            "INSERT INTO scenarios(id, description, scope, cloned_from, created_at_ms) \
             VALUES (?1, ?2, ?3, NULL, ?4)",
            params![id, req.description, req.scope.as_key(), created_at_ms],
        )
        .map_err(map_name_conflict)?;
        tx.commit()?;
        Ok(ScenarioRow {
            id,
            description: req.description,
            scope: req.scope,
            cloned_from: None,
            created_at_ms,
        })
    }

    pub fn get_scenario(&self, id: &str) -> Result<Option<ScenarioRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {SCENARIO_COLUMNS} FROM scenarios WHERE id=?1"),
                params![id],
                scenario_from_row,
            )
            .optional()?)
    }

    pub fn list_scenarios(&self, scope: &Scope) -> Result<Vec<ScenarioRow>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SCENARIO_COLUMNS} FROM scenarios WHERE scope=?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![scope.as_key()], scenario_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Deletes a scenario and, through the foreign keys, its threats and
    /// every matrix cell and threat assignment pointing at them.
    pub fn delete_scenario(&mut self, id: &str) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute("DELETE FROM scenarios WHERE id=?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::UnknownId);
        }
        tx.commit()?;
        Ok(())
    }

    pub fn create_threat(&mut self, req: ThreatCreateRequest) -> Result<ThreatRow, StoreError> {
        if req.description.trim().is_empty() {
            return Err(StoreError::InvalidInput("threat description is empty"));
        }
        let tx = self.conn.transaction()?;
        let scenario = tx
            .query_row(
                &format!("SELECT {SCENARIO_COLUMNS} FROM scenarios WHERE id=?1"),
                params![req.scenario_id],
                scenario_from_row,
            )
            .optional()?
            .ok_or(StoreError::UnknownId)?;
        if scenario.scope != req.scope {
            return Err(StoreError::ScopeMismatch);
        }
        let id = next_id(&tx, "threat", "THR")?;
        let created_at_ms = now_ms();
        tx.execute(
            "INSERT INTO threats(id, description, scenario_id, scope, cloned_from, created_at_ms) \
             VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
            params![
                id,
                req.description,
                req.scenario_id,
                req.scope.as_key(),
                created_at_ms
            ],
        )
        .map_err(map_name_conflict)?;
        tx.commit()?;
        Ok(ThreatRow {
            id,
            description: req.description,
            scenario_id: req.scenario_id,
            scope: req.scope,
            cloned_from: None,
            created_at_ms,
        })
    }

    pub fn get_threat(&self, id: &str) -> Result<Option<ThreatRow>, StoreError> {
        threat_get(&self.conn, id)
    }

    pub fn list_threats(&self, scope: &Scope) -> Result<Vec<ThreatRow>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {THREAT_COLUMNS} FROM threats WHERE scope=?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![scope.as_key()], threat_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_scenario_threats(&self, scenario_id: &str) -> Result<Vec<ThreatRow>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {THREAT_COLUMNS} FROM threats WHERE scenario_id=?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![scenario_id], threat_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn delete_threat(&mut self, id: &str) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute("DELETE FROM threats WHERE id=?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::UnknownId);
        }
        tx.commit()?;
        Ok(())
    }

    pub fn create_control(&mut self, req: ControlCreateRequest) -> Result<ControlRow, StoreError> {
        if req.name.trim().is_empty() {
            return Err(StoreError::InvalidInput("control name is empty"));
        }
        let tx = self.conn.transaction()?;
        if let Some(et_id) = &req.element_type {
            let et = require_element_type(&tx, et_id)?;
            if et.scope != req.scope {
                return Err(StoreError::ScopeMismatch);
            }
        }
        let id = next_id(&tx, "control", "CTL")?;
        let weight = req.kind.weight();
        let created_at_ms = now_ms();
        tx.execute(
            "INSERT INTO controls(id, name, description, kind, weight, category, macro_area, \
             best_practice_ref, regulatory_ref, itil_process_ref, element_type, scope, \
             cloned_from, created_at_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, NULL, ?13)",
            params![
                id,
                req.name,
                req.description,
                req.kind.as_str(),
                weight,
                req.category.as_str(),
                req.macro_area,
                req.best_practice_ref,
                req.regulatory_ref,
                req.itil_process_ref,
                req.element_type,
                req.scope.as_key(),
                created_at_ms
            ],
        )
        .map_err(map_name_conflict)?;
        tx.commit()?;
        Ok(ControlRow {
            id,
            name: req.name,
            description: req.description,
            kind: req.kind,
            weight,
            category: req.category,
            macro_area: req.macro_area,
            best_practice_ref: req.best_practice_ref,
            regulatory_ref: req.regulatory_ref,
            itil_process_ref: req.itil_process_ref,
            element_type: req.element_type,
            scope: req.scope,
            cloned_from: None,
            created_at_ms,
        })
    }

    pub fn get_control(&self, id: &str) -> Result<Option<ControlRow>, StoreError> {
        control_get(&self.conn, id)
    }

    pub fn list_controls(&self, scope: &Scope) -> Result<Vec<ControlRow>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONTROL_COLUMNS} FROM controls WHERE scope=?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![scope.as_key()], control_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn delete_control(&mut self, id: &str) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute("DELETE FROM controls WHERE id=?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::UnknownId);
        }
        tx.commit()?;
        Ok(())
    }

    /// Binds a control to an element type. The binding drives which columns
    /// the type's matrix shows and which controls enablement validates.
    pub fn assign_control(
        &mut self,
        control_id: &str,
        element_type_id: &str,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let control = control_get(&tx, control_id)?.ok_or(StoreError::UnknownId)?;
        let et = require_element_type(&tx, element_type_id)?;
        if control.scope != et.scope {
            return Err(StoreError::ScopeMismatch);
        }
        tx.execute(
            "UPDATE controls SET element_type=?2 WHERE id=?1",
            params![control_id, element_type_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn unassign_control(&mut self, control_id: &str) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "UPDATE controls SET element_type=NULL WHERE id=?1",
            params![control_id],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownId);
        }
        tx.commit()?;
        Ok(())
    }
}
