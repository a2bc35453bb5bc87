#![forbid(unsafe_code)]

//! Template and asset structure trees. Both kinds share one node shape and
//! one set of rules: trees anchor on the scope's synthetic root type, base
//! element types are leaves, derived types expand into their components on
//! insert, and every mutation re-derives the root matrix from the root's
//! live children.

use rm_core::scope::Scope;
use rusqlite::{Connection, OptionalExtension, params};

use super::aggregate::aggregate_tx;
use super::error::StoreError;
use super::requests::{AssetCreateRequest, NodeAddRequest, TemplateCreateRequest};
use super::types::{AssetRow, ElementTypeRow, NodeRow, TemplateRow};
use super::{
    ASSET_COLUMNS, ELEMENT_TYPE_COLUMNS, SqliteStore, TEMPLATE_COLUMNS, asset_from_row,
    component_ids, element_type_from_row, map_name_conflict, next_id, now_ms,
    require_element_type, template_from_row,
};

/// Which of the two structure trees an operation addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeKind {
    Template,
    Asset,
}

impl TreeKind {
    pub(crate) fn node_table(self) -> &'static str {
        match self {
            Self::Template => "template_nodes",
            Self::Asset => "asset_nodes",
        }
    }

    pub(crate) fn owner_table(self) -> &'static str {
        match self {
            Self::Template => "templates",
            Self::Asset => "assets",
        }
    }

    pub(crate) fn owner_column(self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Asset => "asset",
        }
    }

    pub(crate) fn counter(self) -> &'static str {
        match self {
            Self::Template => "template_node",
            Self::Asset => "asset_node",
        }
    }

    pub(crate) fn id_prefix(self) -> &'static str {
        match self {
            Self::Template => "TN",
            Self::Asset => "AN",
        }
    }
}

impl SqliteStore {
    pub fn create_template(
        &mut self,
        req: TemplateCreateRequest,
    ) -> Result<TemplateRow, StoreError> {
        if req.name.trim().is_empty() {
            return Err(StoreError::InvalidInput("template name is empty"));
        }
        let tx = self.conn.transaction()?;
        let id = next_id(&tx, "template", "TPL")?;
        let created_at_ms = now_ms();
        tx.execute(
            "INSERT INTO templates(id, name, description, scope, cloned_from, created_at_ms) \
             VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
            params![id, req.name, req.description, req.scope.as_key(), created_at_ms],
        )
        .map_err(map_name_conflict)?;
        tx.commit()?;
        Ok(TemplateRow {
            id,
            name: req.name,
            description: req.description,
            scope: req.scope,
            cloned_from: None,
            created_at_ms,
        })
    }

    pub fn get_template(&self, id: &str) -> Result<Option<TemplateRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id=?1"),
                params![id],
                template_from_row,
            )
            .optional()?)
    }

    pub fn list_templates(&self, scope: &Scope) -> Result<Vec<TemplateRow>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE scope=?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![scope.as_key()], template_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn delete_template(&mut self, id: &str) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute("DELETE FROM templates WHERE id=?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::UnknownId);
        }
        tx.commit()?;
        Ok(())
    }

    pub fn create_asset(&mut self, req: AssetCreateRequest) -> Result<AssetRow, StoreError> {
        if req.name.trim().is_empty() {
            return Err(StoreError::InvalidInput("asset name is empty"));
        }
        let tx = self.conn.transaction()?;
        if let Some(template_id) = &req.template_to_apply {
            let template = tx
                .query_row(
                    &format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id=?1"),
                    params![template_id],
                    template_from_row,
                )
                .optional()?
                .ok_or(StoreError::UnknownId)?;
            if template.scope != req.scope {
                return Err(StoreError::ScopeMismatch);
            }
        }
        let id = next_id(&tx, "asset", "AST")?;
        let created_at_ms = now_ms();
        tx.execute(
            "INSERT INTO assets(id, name, description, cmdb, legal_entity, status, \
             template_to_apply, scope, cloned_from, created_at_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9)",
            params![
                id,
                req.name,
                req.description,
                req.cmdb,
                req.legal_entity,
                req.status.as_str(),
                req.template_to_apply,
                req.scope.as_key(),
                created_at_ms
            ],
        )
        .map_err(map_name_conflict)?;
        tx.commit()?;
        Ok(AssetRow {
            id,
            name: req.name,
            description: req.description,
            cmdb: req.cmdb,
            legal_entity: req.legal_entity,
            status: req.status,
            template_to_apply: req.template_to_apply,
            scope: req.scope,
            cloned_from: None,
            created_at_ms,
        })
    }

    pub fn get_asset(&self, id: &str) -> Result<Option<AssetRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id=?1"),
                params![id],
                asset_from_row,
            )
            .optional()?)
    }

    pub fn list_assets(&self, scope: &Scope) -> Result<Vec<AssetRow>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE scope=?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![scope.as_key()], asset_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn delete_asset(&mut self, id: &str) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute("DELETE FROM assets WHERE id=?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::UnknownId);
        }
        tx.commit()?;
        Ok(())
    }

    /// Renames an asset and propagates the new name to the root node of its
    /// structure tree.
    pub fn rename_asset(&mut self, id: &str, new_name: &str) -> Result<(), StoreError> {
        if new_name.trim().is_empty() {
            return Err(StoreError::InvalidInput("asset name is empty"));
        }
        let tx = self.conn.transaction()?;
        let changed = tx
            .execute(
                "UPDATE assets SET name=?2 WHERE id=?1",
                params![id, new_name],
            )
            .map_err(map_name_conflict)?;
        if changed == 0 {
            return Err(StoreError::UnknownId);
        }
        tx.execute(
            "UPDATE asset_nodes SET display_name=?2 WHERE asset=?1 AND parent IS NULL",
            params![id, new_name],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// The synthetic aggregation root of a scope, created on first use. It
    /// is flagged explicitly rather than looked up by a magic name.
    pub fn ensure_root_element_type(&mut self, scope: &Scope) -> Result<ElementTypeRow, StoreError> {
        let tx = self.conn.transaction()?;
        let row = ensure_root_element_type_tx(&tx, scope)?;
        tx.commit()?;
        Ok(row)
    }

    /// Inserts a node, auto-expanding derived element types one component
    /// per child, recursively, then re-derives the root matrix.
    pub fn add_node(&mut self, kind: TreeKind, req: NodeAddRequest) -> Result<NodeRow, StoreError> {
        let tx = self.conn.transaction()?;
        let (owner_scope, owner_name) = owner_info(&tx, kind, &req.owner)?;
        let et = require_element_type(&tx, &req.element_type)?;
        if et.scope != owner_scope {
            return Err(StoreError::ScopeMismatch);
        }

        let (parent_id, depth) = match &req.parent {
            None => {
                // Only the synthetic root type anchors a tree; its matrix
                // is aggregation output, so the root refresh may rewrite it
                // without destroying anything hand-entered.
                if !et.is_root {
                    return Err(StoreError::InvalidInput(
                        "tree roots use the scope's root element type",
                    ));
                }
                let existing: Option<String> = tx
                    .query_row(
                        &format!(
                            "SELECT id FROM {table} WHERE {owner}=?1 AND parent IS NULL",
                            table = kind.node_table(),
                            owner = kind.owner_column(),
                        ),
                        params![req.owner],
                        |row| row.get(0),
                    )
                    .optional()?;
                if existing.is_some() {
                    return Err(StoreError::RootAlreadyExists);
                }
                (None, 0i64)
            }
            Some(parent) => {
                if et.is_root {
                    return Err(StoreError::InvalidInput(
                        "the root element type cannot appear below the root",
                    ));
                }
                let parent_node =
                    node_get(&tx, kind, parent)?.filter(|node| node.owner == req.owner);
                let parent_node = parent_node.ok_or(StoreError::InvalidParent)?;
                let parent_et = require_element_type(&tx, &parent_node.element_type)?;
                if parent_et.is_base {
                    return Err(StoreError::BaseTypeHasNoChildren);
                }
                (Some(parent_node.id), parent_node.depth + 1)
            }
        };

        let display_name = match req.display_name {
            Some(name) => name,
            // A new asset tree is labeled by the asset itself at the root.
            None if parent_id.is_none() && kind == TreeKind::Asset => owner_name,
            None => et.name.clone(),
        };

        let node = insert_expanded(
            &tx,
            kind,
            &req.owner,
            &et,
            parent_id.as_deref(),
            depth,
            display_name,
            &owner_scope,
        )?;
        refresh_root_tx(&tx, kind, &req.owner)?;
        tx.commit()?;
        Ok(node)
    }

    /// Removes a node and its entire subtree.
    pub fn remove_node(&mut self, kind: TreeKind, node_id: &str) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let node = node_get(&tx, kind, node_id)?.ok_or(StoreError::UnknownId)?;
        tx.execute(
            &format!("DELETE FROM {} WHERE id=?1", kind.node_table()),
            params![node_id],
        )?;
        if node.parent.is_none() {
            // The whole tree is gone; nothing left for a refresh to see.
            // Only the synthetic root's matrix belongs to the tree, so only
            // that gets cleared.
            let root_et = require_element_type(&tx, &node.element_type)?;
            if root_et.is_root {
                tx.execute(
                    "DELETE FROM matrix_cells WHERE element_type=?1",
                    params![node.element_type],
                )?;
                tx.execute(
                    "DELETE FROM element_type_threats WHERE element_type=?1",
                    params![node.element_type],
                )?;
            }
        }
        refresh_root_tx(&tx, kind, &node.owner)?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_nodes(&self, kind: TreeKind, owner: &str) -> Result<Vec<NodeRow>, StoreError> {
        owner_info(&self.conn, kind, owner)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, {owner}, element_type, parent, display_name, depth, scope \
             FROM {table} WHERE {owner}=?1 ORDER BY depth, id",
            table = kind.node_table(),
            owner = kind.owner_column(),
        ))?;
        let rows = stmt.query_map(params![owner], node_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn node_children(&self, kind: TreeKind, node_id: &str) -> Result<Vec<NodeRow>, StoreError> {
        node_get(&self.conn, kind, node_id)?.ok_or(StoreError::UnknownId)?;
        node_children(&self.conn, kind, node_id)
    }

    pub fn node_depth(&self, kind: TreeKind, node_id: &str) -> Result<i64, StoreError> {
        let node = node_get(&self.conn, kind, node_id)?.ok_or(StoreError::UnknownId)?;
        Ok(node.depth)
    }

    /// Ancestors of a node, nearest parent first.
    pub fn node_ancestors(&self, kind: TreeKind, node_id: &str) -> Result<Vec<NodeRow>, StoreError> {
        let mut current = node_get(&self.conn, kind, node_id)?.ok_or(StoreError::UnknownId)?;
        let mut out = Vec::new();
        while let Some(parent) = current.parent.clone() {
            let parent_node =
                node_get(&self.conn, kind, &parent)?.ok_or(StoreError::InvalidParent)?;
            out.push(parent_node.clone());
            current = parent_node;
        }
        Ok(out)
    }

    /// Copies a whole tree between two owners of the same kind and scope.
    /// Nodes arrive as stored, without re-running component expansion, so
    /// the target gets an exact structural copy.
    pub fn clone_tree(
        &mut self,
        kind: TreeKind,
        source_owner: &str,
        target_owner: &str,
    ) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let (source_scope, _) = owner_info(&tx, kind, source_owner)?;
        let (target_scope, _) = owner_info(&tx, kind, target_owner)?;
        if source_scope != target_scope {
            return Err(StoreError::ScopeMismatch);
        }
        let copied = clone_nodes_tx(&tx, kind, source_owner, kind, target_owner, None)?;
        refresh_root_tx(&tx, kind, target_owner)?;
        tx.commit()?;
        Ok(copied)
    }

    /// Rebuilds an asset's structure from a template's tree. Display names
    /// reset to each element type's own name, except the root node which
    /// takes the asset's name.
    pub fn apply_template(&mut self, asset_id: &str, template_id: &str) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let asset = tx
            .query_row(
                &format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id=?1"),
                params![asset_id],
                asset_from_row,
            )
            .optional()?
            .ok_or(StoreError::UnknownId)?;
        let (template_scope, _) = owner_info(&tx, TreeKind::Template, template_id)?;
        if asset.scope != template_scope {
            return Err(StoreError::ScopeMismatch);
        }
        let copied = clone_nodes_tx(
            &tx,
            TreeKind::Template,
            template_id,
            TreeKind::Asset,
            asset_id,
            Some(&asset.name),
        )?;
        refresh_root_tx(&tx, TreeKind::Asset, asset_id)?;
        tx.commit()?;
        Ok(copied)
    }
}

fn owner_info(
    conn: &Connection,
    kind: TreeKind,
    owner: &str,
) -> Result<(Scope, String), StoreError> {
    let row: Option<(String, String)> = conn
        .query_row(
            &format!("SELECT scope, name FROM {} WHERE id=?1", kind.owner_table()),
            params![owner],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (scope, name) = row.ok_or(StoreError::UnknownId)?;
    Ok((Scope::from_key(&scope), name))
}

fn node_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRow> {
    let scope: String = row.get(6)?;
    Ok(NodeRow {
        id: row.get(0)?,
        owner: row.get(1)?,
        element_type: row.get(2)?,
        parent: row.get(3)?,
        display_name: row.get(4)?,
        depth: row.get(5)?,
        scope: Scope::from_key(&scope),
    })
}

pub(crate) fn node_get(
    conn: &Connection,
    kind: TreeKind,
    node_id: &str,
) -> Result<Option<NodeRow>, StoreError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT id, {owner}, element_type, parent, display_name, depth, scope \
                 FROM {table} WHERE id=?1",
                table = kind.node_table(),
                owner = kind.owner_column(),
            ),
            params![node_id],
            node_from_row,
        )
        .optional()?)
}

fn node_children(
    conn: &Connection,
    kind: TreeKind,
    node_id: &str,
) -> Result<Vec<NodeRow>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, {owner}, element_type, parent, display_name, depth, scope \
         FROM {table} WHERE parent=?1 ORDER BY id",
        table = kind.node_table(),
        owner = kind.owner_column(),
    ))?;
    let rows = stmt.query_map(params![node_id], node_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Raw node insert followed by one-level component expansion, which itself
/// recurses through any derived components.
#[allow(clippy::too_many_arguments)]
fn insert_expanded(
    conn: &Connection,
    kind: TreeKind,
    owner: &str,
    et: &ElementTypeRow,
    parent: Option<&str>,
    depth: i64,
    display_name: String,
    scope: &Scope,
) -> Result<NodeRow, StoreError> {
    let id = insert_raw_node(conn, kind, owner, &et.id, parent, &display_name, depth, scope)?;
    for component_id in component_ids(conn, &et.id)? {
        let component = require_element_type(conn, &component_id)?;
        let name = component.name.clone();
        insert_expanded(conn, kind, owner, &component, Some(&id), depth + 1, name, scope)?;
    }
    Ok(NodeRow {
        id,
        owner: owner.to_string(),
        element_type: et.id.clone(),
        parent: parent.map(str::to_string),
        display_name,
        depth,
        scope: scope.clone(),
    })
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn insert_raw_node(
    conn: &Connection,
    kind: TreeKind,
    owner: &str,
    element_type: &str,
    parent: Option<&str>,
    display_name: &str,
    depth: i64,
    scope: &Scope,
) -> Result<String, StoreError> {
    let id = next_id(conn, kind.counter(), kind.id_prefix())?;
    conn.execute(
        &format!(
            "INSERT INTO {table}(id, {owner}, element_type, parent, display_name, depth, \
             scope, created_at_ms) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            table = kind.node_table(),
            owner = kind.owner_column(),
        ),
        params![
            id,
            owner,
            element_type,
            parent,
            display_name,
            depth,
            scope.as_key(),
            now_ms()
        ],
    )?;
    Ok(id)
}

/// Breadth-order copy of one owner's nodes into another owner's tree. The
/// target tree is wiped first; `root_rename` overrides the root node's
/// display name.
pub(crate) fn clone_nodes_tx(
    conn: &Connection,
    source_kind: TreeKind,
    source_owner: &str,
    target_kind: TreeKind,
    target_owner: &str,
    root_rename: Option<&str>,
) -> Result<usize, StoreError> {
    conn.execute(
        &format!(
            "DELETE FROM {table} WHERE {owner}=?1",
            table = target_kind.node_table(),
            owner = target_kind.owner_column(),
        ),
        params![target_owner],
    )?;

    let source: Vec<NodeRow> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, {owner}, element_type, parent, display_name, depth, scope \
             FROM {table} WHERE {owner}=?1 ORDER BY depth, id",
            table = source_kind.node_table(),
            owner = source_kind.owner_column(),
        ))?;
        let rows = stmt.query_map(params![source_owner], node_from_row)?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    let renaming = root_rename.is_some();
    let mut id_map: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    for node in &source {
        let new_parent = match &node.parent {
            // Parents precede children in depth order, so the map resolves.
            Some(old) => Some(id_map.get(old).cloned().ok_or(StoreError::InvalidParent)?),
            None => None,
        };
        let display_name = if renaming {
            match (&node.parent, root_rename) {
                (None, Some(name)) => name.to_string(),
                _ => require_element_type(conn, &node.element_type)?.name,
            }
        } else {
            node.display_name.clone()
        };
        let new_id = insert_raw_node(
            conn,
            target_kind,
            target_owner,
            &node.element_type,
            new_parent.as_deref(),
            &display_name,
            node.depth,
            &node.scope,
        )?;
        id_map.insert(node.id.clone(), new_id);
    }
    Ok(source.len())
}

pub(crate) fn ensure_root_element_type_tx(
    conn: &Connection,
    scope: &Scope,
) -> Result<ElementTypeRow, StoreError> {
    let existing = conn
        .query_row(
            &format!(
                "SELECT {ELEMENT_TYPE_COLUMNS} FROM element_types WHERE is_root=1 AND scope=?1"
            ),
            params![scope.as_key()],
            element_type_from_row,
        )
        .optional()?;
    if let Some(row) = existing {
        return Ok(row);
    }
    let id = next_id(conn, "element_type", "ET")?;
    let created_at_ms = now_ms();
    // Derived from birth so root nodes may take children, even though its
    // component set is always empty; its matrix is aggregation output only.
    conn.execute(
        "INSERT INTO element_types(id, name, description, is_base, is_enabled, is_root, \
         scope, cloned_from, created_at_ms) \
         VALUES (?1, 'Root', 'Synthetic aggregation root', 0, 1, 1, ?2, NULL, ?3)",
        params![id, scope.as_key(), created_at_ms],
    )?;
    Ok(ElementTypeRow {
        id,
        name: "Root".to_string(),
        description: "Synthetic aggregation root".to_string(),
        is_base: false,
        is_enabled: true,
        is_root: true,
        scope: scope.clone(),
        cloned_from: None,
        created_at_ms,
    })
}

/// Re-derives the root matrix after any tree mutation: aggregate over the
/// root's direct children when it has any, otherwise clear the root element
/// type's matrix and threat links.
pub(crate) fn refresh_root_tx(
    conn: &Connection,
    kind: TreeKind,
    owner: &str,
) -> Result<(), StoreError> {
    let root: Option<NodeRow> = conn
        .query_row(
            &format!(
                "SELECT id, {owner_col}, element_type, parent, display_name, depth, scope \
                 FROM {table} WHERE {owner_col}=?1 AND parent IS NULL",
                table = kind.node_table(),
                owner_col = kind.owner_column(),
            ),
            params![owner],
            node_from_row,
        )
        .optional()?;
    let Some(root) = root else {
        return Ok(());
    };
    // A tree rooted on anything but the synthetic root type keeps that
    // type's state untouched.
    let root_et = require_element_type(conn, &root.element_type)?;
    if !root_et.is_root {
        return Ok(());
    }

    let children = node_children(conn, kind, &root.id)?;
    if children.is_empty() {
        conn.execute(
            "DELETE FROM matrix_cells WHERE element_type=?1",
            params![root.element_type],
        )?;
        conn.execute(
            "DELETE FROM element_type_threats WHERE element_type=?1",
            params![root.element_type],
        )?;
        return Ok(());
    }

    // The root's threat links exist only as aggregation output; reset them
    // so the frame tracks the live children instead of accumulating.
    conn.execute(
        "DELETE FROM element_type_threats WHERE element_type=?1",
        params![root.element_type],
    )?;

    let mut component_types: Vec<String> = children
        .into_iter()
        .map(|child| child.element_type)
        .collect();
    component_types.sort();
    component_types.dedup();
    aggregate_tx(conn, &root.element_type, &component_types)
}
