#![forbid(unsafe_code)]

//! Campaign lifecycle and the master-to-campaign deep clone. Population
//! replicates every master-scoped record into the campaign's scope in
//! dependency order, remapping ids as it goes, all inside one transaction.

use rm_core::model::CampaignStatus;
use rm_core::scope::Scope;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;

use super::error::StoreError;
use super::requests::CampaignCreateRequest;
use super::tree::ensure_root_element_type_tx;
use super::types::{CampaignRow, CloneReport};
use super::{
    ASSET_COLUMNS, CAMPAIGN_COLUMNS, CONTROL_COLUMNS, ELEMENT_TYPE_COLUMNS, SCENARIO_COLUMNS,
    SqliteStore, TEMPLATE_COLUMNS, THREAT_COLUMNS, asset_from_row, campaign_from_row,
    control_from_row, element_type_from_row, next_id, now_ms, scenario_from_row,
    template_from_row, threat_from_row,
};

impl SqliteStore {
    pub fn create_campaign(
        &mut self,
        req: CampaignCreateRequest,
    ) -> Result<CampaignRow, StoreError> {
        if req.description.trim().is_empty() {
            return Err(StoreError::InvalidInput("campaign description is empty"));
        }
        let tx = self.conn.transaction()?;
        let id = next_id(&tx, "campaign", "CMP")?;
        let created_at_ms = now_ms();
        tx.execute(
            "INSERT INTO campaigns(id, year, description, starts_on, ends_on, status, \
             created_at_ms) VALUES (?1, ?2, ?3, ?4, ?5, 'open', ?6)",
            params![id, req.year, req.description, req.starts_on, req.ends_on, created_at_ms],
        )?;
        tx.commit()?;
        Ok(CampaignRow {
            id,
            year: req.year,
            description: req.description,
            starts_on: req.starts_on,
            ends_on: req.ends_on,
            status: CampaignStatus::Open,
            created_at_ms,
        })
    }

    pub fn get_campaign(&self, id: &str) -> Result<Option<CampaignRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id=?1"),
                params![id],
                campaign_from_row,
            )
            .optional()?)
    }

    pub fn list_campaigns(&self) -> Result<Vec<CampaignRow>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns ORDER BY id"))?;
        let rows = stmt.query_map([], campaign_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn set_campaign_status(
        &mut self,
        id: &str,
        status: CampaignStatus,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE campaigns SET status=?2 WHERE id=?1",
            params![id, status.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownId);
        }
        Ok(())
    }

    pub fn close_campaign(&mut self, id: &str) -> Result<(), StoreError> {
        self.set_campaign_status(id, CampaignStatus::Closed)
    }

    pub fn reopen_campaign(&mut self, id: &str) -> Result<(), StoreError> {
        self.set_campaign_status(id, CampaignStatus::Open)
    }

    /// Deletes a campaign and every record in its scope. Scope is a column,
    /// not a foreign key, so the cascade is spelled out in dependency order.
    pub fn delete_campaign(&mut self, id: &str) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let exists: Option<String> = tx
            .query_row(
                "SELECT id FROM campaigns WHERE id=?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::UnknownId);
        }

        tx.execute("DELETE FROM asset_nodes WHERE scope=?1", params![id])?;
        tx.execute("DELETE FROM template_nodes WHERE scope=?1", params![id])?;
        tx.execute("DELETE FROM assets WHERE scope=?1", params![id])?;
        tx.execute("DELETE FROM templates WHERE scope=?1", params![id])?;
        tx.execute(
            "DELETE FROM element_type_components \
             WHERE parent IN (SELECT id FROM element_types WHERE scope=?1)",
            params![id],
        )?;
        tx.execute("DELETE FROM controls WHERE scope=?1", params![id])?;
        tx.execute("DELETE FROM element_types WHERE scope=?1", params![id])?;
        tx.execute("DELETE FROM threats WHERE scope=?1", params![id])?;
        tx.execute("DELETE FROM scenarios WHERE scope=?1", params![id])?;
        tx.execute("DELETE FROM campaigns WHERE id=?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    /// Replicates the whole master dataset into a campaign's scope. The
    /// campaign must own no records yet; any failure mid-clone rolls the
    /// whole population back.
    pub fn populate_from_master(&mut self, campaign_id: &str) -> Result<CloneReport, StoreError> {
        let tx = self.conn.transaction()?;
        let exists: Option<String> = tx
            .query_row(
                "SELECT id FROM campaigns WHERE id=?1",
                params![campaign_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::UnknownId);
        }
        if scope_record_count(&tx, campaign_id)? > 0 {
            return Err(StoreError::CampaignNotEmpty);
        }

        let report = clone_master_tx(&tx, campaign_id).map_err(|err| match err {
            aborted @ StoreError::CloneAborted { .. } => aborted,
            other => StoreError::CloneAborted {
                cause: Box::new(other),
            },
        })?;
        tx.commit()?;
        Ok(report)
    }
}

pub(crate) fn scope_record_count(conn: &Connection, scope_key: &str) -> Result<i64, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM scenarios WHERE scope=?1) \
              + (SELECT COUNT(*) FROM threats WHERE scope=?1) \
              + (SELECT COUNT(*) FROM element_types WHERE scope=?1) \
              + (SELECT COUNT(*) FROM controls WHERE scope=?1) \
              + (SELECT COUNT(*) FROM templates WHERE scope=?1) \
              + (SELECT COUNT(*) FROM assets WHERE scope=?1)",
        params![scope_key],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn clone_master_tx(conn: &Connection, campaign_id: &str) -> Result<CloneReport, StoreError> {
    let scope = Scope::campaign(campaign_id);
    let mut report = CloneReport::default();

    // 1. Scenarios.
    let mut scenario_map: HashMap<String, String> = HashMap::new();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCENARIO_COLUMNS} FROM scenarios WHERE scope='' ORDER BY id"
        ))?;
        let rows = stmt.query_map([], scenario_from_row)?;
        for row in rows {
            let row = row?;
            let new_id = next_id(conn, "scenario", "SCN")?;
            conn.execute(
                "INSERT INTO scenarios(id, description, scope, cloned_from, created_at_ms) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![new_id, row.description, scope.as_key(), row.id, now_ms()],
            )?;
            scenario_map.insert(row.id, new_id);
            report.scenarios += 1;
        }
    }

    // 2. Threats.
    let mut threat_map: HashMap<String, String> = HashMap::new();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT {THREAT_COLUMNS} FROM threats WHERE scope='' ORDER BY id"
        ))?;
        let rows = stmt.query_map([], threat_from_row)?;
        for row in rows {
            let row = row?;
            let scenario = scenario_map
                .get(&row.scenario_id)
                .ok_or(StoreError::UnknownId)?;
            let new_id = next_id(conn, "threat", "THR")?;
            conn.execute(
                "INSERT INTO threats(id, description, scenario_id, scope, cloned_from, \
                 created_at_ms) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![new_id, row.description, scenario, scope.as_key(), row.id, now_ms()],
            )?;
            threat_map.insert(row.id, new_id);
            report.threats += 1;
        }
    }

    // 3. Element types as bare objects; memberships come back in step 8.
    let mut et_map: HashMap<String, String> = HashMap::new();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT {ELEMENT_TYPE_COLUMNS} FROM element_types WHERE scope='' ORDER BY id"
        ))?;
        let rows = stmt.query_map([], element_type_from_row)?;
        for row in rows {
            let row = row?;
            let new_id = next_id(conn, "element_type", "ET")?;
            conn.execute(
                "INSERT INTO element_types(id, name, description, is_base, is_enabled, \
                 is_root, scope, cloned_from, created_at_ms) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    new_id,
                    row.name,
                    row.description,
                    row.is_base,
                    row.is_enabled,
                    row.is_root,
                    scope.as_key(),
                    row.id,
                    now_ms()
                ],
            )?;
            et_map.insert(row.id, new_id);
            report.element_types += 1;
        }
    }

    // 4. Controls, re-pointed at the cloned element types.
    let mut control_map: HashMap<String, String> = HashMap::new();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONTROL_COLUMNS} FROM controls WHERE scope='' ORDER BY id"
        ))?;
        let rows = stmt.query_map([], control_from_row)?;
        for row in rows {
            let row = row?;
            let element_type = row
                .element_type
                .as_ref()
                .and_then(|old| et_map.get(old).cloned());
            let new_id = next_id(conn, "control", "CTL")?;
            conn.execute(
                "INSERT INTO controls(id, name, description, kind, weight, category, \
                 macro_area, best_practice_ref, regulatory_ref, itil_process_ref, \
                 element_type, scope, cloned_from, created_at_ms) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    new_id,
                    row.name,
                    row.description,
                    row.kind.as_str(),
                    row.weight,
                    row.category.as_str(),
                    row.macro_area,
                    row.best_practice_ref,
                    row.regulatory_ref,
                    row.itil_process_ref,
                    element_type,
                    scope.as_key(),
                    row.id,
                    now_ms()
                ],
            )?;
            control_map.insert(row.id, new_id);
            report.controls += 1;
        }
    }

    // 5. The campaign needs its own aggregation root even when the master
    // scope never had one.
    ensure_root_element_type_tx(conn, &scope)?;

    // 6. Templates with their node trees, breadth order, ids remapped.
    let mut template_map: HashMap<String, String> = HashMap::new();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE scope='' ORDER BY id"
        ))?;
        let rows = stmt.query_map([], template_from_row)?;
        for row in rows {
            let row = row?;
            let new_id = next_id(conn, "template", "TPL")?;
            conn.execute(
                "INSERT INTO templates(id, name, description, scope, cloned_from, \
                 created_at_ms) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![new_id, row.name, row.description, scope.as_key(), row.id, now_ms()],
            )?;
            template_map.insert(row.id.clone(), new_id.clone());
            report.templates += 1;

            report.template_nodes +=
                clone_template_nodes(conn, &row.id, &new_id, &et_map, &scope)?;
        }
    }

    // 7. Assets, without structure; their trees are built later against the
    // cloned templates.
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE scope='' ORDER BY id"
        ))?;
        let rows = stmt.query_map([], asset_from_row)?;
        for row in rows {
            let row = row?;
            let template = row
                .template_to_apply
                .as_ref()
                .and_then(|old| template_map.get(old).cloned());
            let new_id = next_id(conn, "asset", "AST")?;
            conn.execute(
                "INSERT INTO assets(id, name, description, cmdb, legal_entity, status, \
                 template_to_apply, scope, cloned_from, created_at_ms) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    new_id,
                    row.name,
                    row.description,
                    row.cmdb,
                    row.legal_entity,
                    row.status.as_str(),
                    template,
                    scope.as_key(),
                    row.id,
                    now_ms()
                ],
            )?;
            report.assets += 1;
        }
    }

    // 8. Relationships, now that every id has a clone.
    {
        let mut stmt =
            conn.prepare("SELECT element_type, threat FROM element_type_threats ORDER BY element_type, threat")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut insert = conn.prepare(
            "INSERT OR IGNORE INTO element_type_threats(element_type, threat) VALUES (?1, ?2)",
        )?;
        for row in rows {
            let (et, threat) = row?;
            if let (Some(et), Some(threat)) = (et_map.get(&et), threat_map.get(&threat)) {
                insert.execute(params![et, threat])?;
            }
        }
    }
    {
        let mut stmt = conn
            .prepare("SELECT parent, component FROM element_type_components ORDER BY parent, component")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut insert = conn.prepare(
            "INSERT OR IGNORE INTO element_type_components(parent, component) VALUES (?1, ?2)",
        )?;
        for row in rows {
            let (parent, component) = row?;
            if let (Some(parent), Some(component)) =
                (et_map.get(&parent), et_map.get(&component))
            {
                insert.execute(params![parent, component])?;
            }
        }
    }
    {
        let mut stmt = conn.prepare(
            "SELECT mc.element_type, mc.threat, mc.control, mc.value \
             FROM matrix_cells mc JOIN element_types et ON et.id = mc.element_type \
             WHERE et.scope='' ORDER BY mc.element_type, mc.threat, mc.control",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?;
        let mut insert = conn.prepare(
            "INSERT INTO matrix_cells(element_type, threat, control, value) \
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for row in rows {
            let (et, threat, control, value) = row?;
            let (Some(et), Some(threat), Some(control)) = (
                et_map.get(&et),
                threat_map.get(&threat),
                control_map.get(&control),
            ) else {
                continue;
            };
            insert.execute(params![et, threat, control, value])?;
            report.cells += 1;
        }
    }

    Ok(report)
}

fn clone_template_nodes(
    conn: &Connection,
    source_template: &str,
    target_template: &str,
    et_map: &HashMap<String, String>,
    scope: &Scope,
) -> Result<usize, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, element_type, parent, display_name, depth FROM template_nodes \
         WHERE template=?1 ORDER BY depth, id",
    )?;
    let rows = stmt.query_map(params![source_template], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
        ))
    })?;
    let mut node_map: HashMap<String, String> = HashMap::new();
    let mut copied = 0usize;
    for row in rows {
        let (old_id, element_type, parent, display_name, depth) = row?;
        let element_type = et_map.get(&element_type).ok_or(StoreError::UnknownId)?;
        let parent = match parent {
            Some(old) => Some(node_map.get(&old).cloned().ok_or(StoreError::InvalidParent)?),
            None => None,
        };
        let new_id = next_id(conn, "template_node", "TN")?;
        conn.execute(
            "INSERT INTO template_nodes(id, template, element_type, parent, display_name, \
             depth, scope, created_at_ms) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new_id,
                target_template,
                element_type,
                parent,
                display_name,
                depth,
                scope.as_key(),
                now_ms()
            ],
        )?;
        node_map.insert(old_id, new_id);
        copied += 1;
    }
    Ok(copied)
}
