#![forbid(unsafe_code)]

mod aggregate;
mod campaign;
mod catalog;
mod element_types;
mod error;
mod matrix;
mod requests;
mod seed;
mod tree;
mod types;

pub use error::StoreError;
pub use requests::*;
pub use seed::{
    SeedAsset, SeedCell, SeedControl, SeedElementType, SeedFile, SeedNode, SeedReport,
    SeedScenario, SeedTemplate,
};
pub use tree::TreeKind;
pub use types::*;

use rm_core::model::{AssetStatus, CampaignStatus, ControlCategory, ControlKind};
use rm_core::scope::Scope;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCHEMA_VERSION: i64 = 1;

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let db_path = storage_dir.join("riskmat.db");
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        install_schema(&conn)?;

        Ok(Self { conn, storage_dir })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }
}

fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS counters (
          name TEXT PRIMARY KEY,
          value INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS campaigns (
          id TEXT PRIMARY KEY,
          year INTEGER NOT NULL,
          description TEXT NOT NULL,
          starts_on TEXT NOT NULL,
          ends_on TEXT NOT NULL,
          status TEXT NOT NULL CHECK(status IN ('open','closed')),
          created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS scenarios (
          id TEXT PRIMARY KEY,
          description TEXT NOT NULL,
          scope TEXT NOT NULL,
          cloned_from TEXT,
          created_at_ms INTEGER NOT NULL,
          UNIQUE(description, scope)
        );

        CREATE TABLE IF NOT EXISTS threats (
          id TEXT PRIMARY KEY,
          description TEXT NOT NULL,
          scenario_id TEXT NOT NULL
            REFERENCES scenarios(id) ON DELETE CASCADE,
          scope TEXT NOT NULL,
          cloned_from TEXT,
          created_at_ms INTEGER NOT NULL,
          UNIQUE(description, scope)
        );

        CREATE TABLE IF NOT EXISTS element_types (
          id TEXT PRIMARY KEY,
          name TEXT NOT NULL,
          description TEXT NOT NULL,
          is_base INTEGER NOT NULL,
          is_enabled INTEGER NOT NULL,
          is_root INTEGER NOT NULL,
          scope TEXT NOT NULL,
          cloned_from TEXT,
          created_at_ms INTEGER NOT NULL,
          UNIQUE(name, scope)
        );

        CREATE TABLE IF NOT EXISTS element_type_threats (
          element_type TEXT NOT NULL
            REFERENCES element_types(id) ON DELETE CASCADE,
          threat TEXT NOT NULL
            REFERENCES threats(id) ON DELETE CASCADE,
          PRIMARY KEY (element_type, threat)
        );

        CREATE TABLE IF NOT EXISTS element_type_components (
          parent TEXT NOT NULL
            REFERENCES element_types(id) ON DELETE CASCADE,
          component TEXT NOT NULL
            REFERENCES element_types(id) ON DELETE RESTRICT,
          PRIMARY KEY (parent, component),
          CHECK(parent <> component)
        );

        CREATE TABLE IF NOT EXISTS controls (
          id TEXT PRIMARY KEY,
          name TEXT NOT NULL,
          description TEXT NOT NULL,
          kind TEXT NOT NULL,
          weight REAL NOT NULL,
          category TEXT NOT NULL CHECK(category IN ('preventive','detective')),
          macro_area TEXT NOT NULL,
          best_practice_ref TEXT NOT NULL,
          regulatory_ref TEXT NOT NULL,
          itil_process_ref TEXT NOT NULL,
          element_type TEXT
            REFERENCES element_types(id) ON DELETE SET NULL,
          scope TEXT NOT NULL,
          cloned_from TEXT,
          created_at_ms INTEGER NOT NULL,
          UNIQUE(name, scope)
        );

        CREATE INDEX IF NOT EXISTS idx_controls_element_type
          ON controls(element_type);

        CREATE TABLE IF NOT EXISTS matrix_cells (
          element_type TEXT NOT NULL
            REFERENCES element_types(id) ON DELETE CASCADE,
          threat TEXT NOT NULL
            REFERENCES threats(id) ON DELETE CASCADE,
          control TEXT NOT NULL
            REFERENCES controls(id) ON DELETE CASCADE,
          value REAL NOT NULL CHECK(value > 0.0 AND value <= 1.0),
          PRIMARY KEY (element_type, threat, control)
        );

        CREATE TABLE IF NOT EXISTS templates (
          id TEXT PRIMARY KEY,
          name TEXT NOT NULL,
          description TEXT NOT NULL,
          scope TEXT NOT NULL,
          cloned_from TEXT,
          created_at_ms INTEGER NOT NULL,
          UNIQUE(name, scope)
        );

        CREATE TABLE IF NOT EXISTS template_nodes (
          id TEXT PRIMARY KEY,
          template TEXT NOT NULL
            REFERENCES templates(id) ON DELETE CASCADE,
          element_type TEXT NOT NULL
            REFERENCES element_types(id) ON DELETE RESTRICT,
          parent TEXT
            REFERENCES template_nodes(id) ON DELETE CASCADE,
          display_name TEXT NOT NULL,
          depth INTEGER NOT NULL,
          scope TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_template_nodes_owner
          ON template_nodes(template, depth, id);

        CREATE TABLE IF NOT EXISTS assets (
          id TEXT PRIMARY KEY,
          name TEXT NOT NULL,
          description TEXT NOT NULL,
          cmdb TEXT NOT NULL,
          legal_entity TEXT NOT NULL,
          status TEXT NOT NULL
            CHECK(status IN ('in_production','in_development','decommissioned')),
          template_to_apply TEXT
            REFERENCES templates(id) ON DELETE SET NULL,
          scope TEXT NOT NULL,
          cloned_from TEXT,
          created_at_ms INTEGER NOT NULL,
          UNIQUE(name, scope)
        );

        CREATE TABLE IF NOT EXISTS asset_nodes (
          id TEXT PRIMARY KEY,
          asset TEXT NOT NULL
            REFERENCES assets(id) ON DELETE CASCADE,
          element_type TEXT NOT NULL
            REFERENCES element_types(id) ON DELETE RESTRICT,
          parent TEXT
            REFERENCES asset_nodes(id) ON DELETE CASCADE,
          display_name TEXT NOT NULL,
          depth INTEGER NOT NULL,
          scope TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_asset_nodes_owner
          ON asset_nodes(asset, depth, id);
        "#,
    )?;

    conn.execute(
        "INSERT INTO meta(key, value) VALUES ('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        params![SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

pub(crate) const SCENARIO_COLUMNS: &str = "id, description, scope, cloned_from, created_at_ms";
pub(crate) const THREAT_COLUMNS: &str =
    "id, description, scenario_id, scope, cloned_from, created_at_ms";
pub(crate) const ELEMENT_TYPE_COLUMNS: &str =
    "id, name, description, is_base, is_enabled, is_root, scope, cloned_from, created_at_ms";
pub(crate) const CONTROL_COLUMNS: &str = "id, name, description, kind, weight, category, \
     macro_area, best_practice_ref, regulatory_ref, itil_process_ref, element_type, scope, \
     cloned_from, created_at_ms";
pub(crate) const TEMPLATE_COLUMNS: &str = "id, name, description, scope, cloned_from, created_at_ms";
pub(crate) const ASSET_COLUMNS: &str = "id, name, description, cmdb, legal_entity, status, \
     template_to_apply, scope, cloned_from, created_at_ms";
pub(crate) const CAMPAIGN_COLUMNS: &str =
    "id, year, description, starts_on, ends_on, status, created_at_ms";

fn text_enum_err(index: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        format!("unrecognized enum text: {value}").into(),
    )
}

pub(crate) fn scenario_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScenarioRow> {
    let scope: String = row.get(2)?;
    Ok(ScenarioRow {
        id: row.get(0)?,
        description: row.get(1)?,
        scope: Scope::from_key(&scope),
        cloned_from: row.get(3)?,
        created_at_ms: row.get(4)?,
    })
}

pub(crate) fn threat_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreatRow> {
    let scope: String = row.get(3)?;
    Ok(ThreatRow {
        id: row.get(0)?,
        description: row.get(1)?,
        scenario_id: row.get(2)?,
        scope: Scope::from_key(&scope),
        cloned_from: row.get(4)?,
        created_at_ms: row.get(5)?,
    })
}

pub(crate) fn element_type_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ElementTypeRow> {
    let scope: String = row.get(6)?;
    Ok(ElementTypeRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        is_base: row.get(3)?,
        is_enabled: row.get(4)?,
        is_root: row.get(5)?,
        scope: Scope::from_key(&scope),
        cloned_from: row.get(7)?,
        created_at_ms: row.get(8)?,
    })
}

pub(crate) fn control_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ControlRow> {
    let kind_text: String = row.get(3)?;
    let kind = ControlKind::parse(&kind_text).ok_or_else(|| text_enum_err(3, &kind_text))?;
    let category_text: String = row.get(5)?;
    let category =
        ControlCategory::parse(&category_text).ok_or_else(|| text_enum_err(5, &category_text))?;
    let scope: String = row.get(11)?;
    Ok(ControlRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        kind,
        weight: row.get(4)?,
        category,
        macro_area: row.get(6)?,
        best_practice_ref: row.get(7)?,
        regulatory_ref: row.get(8)?,
        itil_process_ref: row.get(9)?,
        element_type: row.get(10)?,
        scope: Scope::from_key(&scope),
        cloned_from: row.get(12)?,
        created_at_ms: row.get(13)?,
    })
}

pub(crate) fn template_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TemplateRow> {
    let scope: String = row.get(3)?;
    Ok(TemplateRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        scope: Scope::from_key(&scope),
        cloned_from: row.get(4)?,
        created_at_ms: row.get(5)?,
    })
}

pub(crate) fn asset_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AssetRow> {
    let status_text: String = row.get(5)?;
    let status = AssetStatus::parse(&status_text).ok_or_else(|| text_enum_err(5, &status_text))?;
    let scope: String = row.get(7)?;
    Ok(AssetRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        cmdb: row.get(3)?,
        legal_entity: row.get(4)?,
        status,
        template_to_apply: row.get(6)?,
        scope: Scope::from_key(&scope),
        cloned_from: row.get(8)?,
        created_at_ms: row.get(9)?,
    })
}

pub(crate) fn campaign_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CampaignRow> {
    let status_text: String = row.get(5)?;
    let status =
        CampaignStatus::parse(&status_text).ok_or_else(|| text_enum_err(5, &status_text))?;
    Ok(CampaignRow {
        id: row.get(0)?,
        year: row.get(1)?,
        description: row.get(2)?,
        starts_on: row.get(3)?,
        ends_on: row.get(4)?,
        status,
        created_at_ms: row.get(6)?,
    })
}

pub(crate) fn element_type_get(
    conn: &Connection,
    id: &str,
) -> Result<Option<ElementTypeRow>, StoreError> {
    Ok(conn
        .query_row(
            &format!("SELECT {ELEMENT_TYPE_COLUMNS} FROM element_types WHERE id=?1"),
            params![id],
            element_type_from_row,
        )
        .optional()?)
}

pub(crate) fn require_element_type(
    conn: &Connection,
    id: &str,
) -> Result<ElementTypeRow, StoreError> {
    element_type_get(conn, id)?.ok_or(StoreError::UnknownId)
}

pub(crate) fn threat_get(conn: &Connection, id: &str) -> Result<Option<ThreatRow>, StoreError> {
    Ok(conn
        .query_row(
            &format!("SELECT {THREAT_COLUMNS} FROM threats WHERE id=?1"),
            params![id],
            threat_from_row,
        )
        .optional()?)
}

pub(crate) fn require_threat(conn: &Connection, id: &str) -> Result<ThreatRow, StoreError> {
    threat_get(conn, id)?.ok_or(StoreError::UnknownId)
}

pub(crate) fn control_get(conn: &Connection, id: &str) -> Result<Option<ControlRow>, StoreError> {
    Ok(conn
        .query_row(
            &format!("SELECT {CONTROL_COLUMNS} FROM controls WHERE id=?1"),
            params![id],
            control_from_row,
        )
        .optional()?)
}

pub(crate) fn require_control(conn: &Connection, id: &str) -> Result<ControlRow, StoreError> {
    control_get(conn, id)?.ok_or(StoreError::UnknownId)
}

/// Ids of the threats directly assigned to an element type.
pub(crate) fn direct_threat_ids(conn: &Connection, id: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT threat FROM element_type_threats WHERE element_type=?1 ORDER BY threat",
    )?;
    let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Ids of the controls whose element-type binding points at this type.
pub(crate) fn bound_control_ids(conn: &Connection, id: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare("SELECT id FROM controls WHERE element_type=?1 ORDER BY id")?;
    let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn component_ids(conn: &Connection, parent: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn
        .prepare("SELECT component FROM element_type_components WHERE parent=?1 ORDER BY component")?;
    let rows = stmt.query_map(params![parent], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn next_id(conn: &Connection, counter: &str, prefix: &str) -> Result<String, StoreError> {
    let current: i64 = conn
        .query_row(
            "SELECT value FROM counters WHERE name=?1",
            params![counter],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);
    let next = current + 1;
    conn.execute(
        "INSERT INTO counters(name, value) VALUES (?1, ?2) \
         ON CONFLICT(name) DO UPDATE SET value=excluded.value",
        params![counter, next],
    )?;
    Ok(format!("{prefix}-{next:03}"))
}

pub(crate) fn map_name_conflict(err: rusqlite::Error) -> StoreError {
    if is_unique_violation(&err) {
        return StoreError::NameTaken;
    }
    StoreError::Sql(err)
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                && message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}

pub(crate) fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                && message
                    .as_deref()
                    .is_some_and(|value| value.contains("FOREIGN KEY constraint failed"))
        }
        _ => false,
    }
}

pub(crate) fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration,
        Err(_) => return 0,
    };

    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
