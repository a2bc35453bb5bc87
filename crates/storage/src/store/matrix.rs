#![forbid(unsafe_code)]

//! The risk matrix of a single element type: threat rows, control columns,
//! coverage values in the cells.

use rm_core::matrix::{MatrixDimensions, validate_cell_value};
use rusqlite::{OptionalExtension, params};

use super::aggregate::{effective_control_set, effective_threat_set};
use super::error::StoreError;
use super::requests::SetCellRequest;
use super::types::CellRow;
use super::{SqliteStore, bound_control_ids, direct_threat_ids, require_control, require_element_type, require_threat};

impl SqliteStore {
    /// Writes, replaces or deletes one cell. A missing or zero value means
    /// "no coverage" and removes the cell; anything else must pass the
    /// (0, 1] two-decimal rule.
    pub fn set_cell(&mut self, req: SetCellRequest) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let et = require_element_type(&tx, &req.element_type)?;
        if !et.is_base {
            return Err(StoreError::InvalidInput(
                "derived matrices are computed by aggregation",
            ));
        }
        let threat = require_threat(&tx, &req.threat)?;
        let control = require_control(&tx, &req.control)?;
        if threat.scope != et.scope || control.scope != et.scope {
            return Err(StoreError::ScopeMismatch);
        }
        let assigned: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM element_type_threats WHERE element_type=?1 AND threat=?2",
                params![req.element_type, req.threat],
                |row| row.get(0),
            )
            .optional()?;
        if assigned.is_none() {
            return Err(StoreError::InvalidInput(
                "threat is not assigned to the element type",
            ));
        }

        match req.value {
            None => {
                tx.execute(
                    "DELETE FROM matrix_cells WHERE element_type=?1 AND threat=?2 AND control=?3",
                    params![req.element_type, req.threat, req.control],
                )?;
            }
            Some(value) if value == 0.0 => {
                tx.execute(
                    "DELETE FROM matrix_cells WHERE element_type=?1 AND threat=?2 AND control=?3",
                    params![req.element_type, req.threat, req.control],
                )?;
            }
            Some(value) => {
                validate_cell_value(value).map_err(|_| StoreError::InvalidValue { value })?;
                tx.execute(
                    "INSERT INTO matrix_cells(element_type, threat, control, value) \
                     VALUES (?1, ?2, ?3, ?4) \
                     ON CONFLICT(element_type, threat, control) DO UPDATE SET value=excluded.value",
                    params![req.element_type, req.threat, req.control, value],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Stored value of one cell; 0.0 when the cell is absent.
    pub fn get_cell(
        &self,
        element_type: &str,
        threat: &str,
        control: &str,
    ) -> Result<f64, StoreError> {
        require_element_type(&self.conn, element_type)?;
        let value: Option<f64> = self
            .conn
            .query_row(
                "SELECT value FROM matrix_cells \
                 WHERE element_type=?1 AND threat=?2 AND control=?3",
                params![element_type, threat, control],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(0.0))
    }

    pub fn list_cells(&self, element_type: &str) -> Result<Vec<CellRow>, StoreError> {
        require_element_type(&self.conn, element_type)?;
        let mut stmt = self.conn.prepare(
            "SELECT element_type, threat, control, value FROM matrix_cells \
             WHERE element_type=?1 ORDER BY threat, control",
        )?;
        let rows = stmt.query_map(params![element_type], |row| {
            Ok(CellRow {
                element_type: row.get(0)?,
                threat: row.get(1)?,
                control: row.get(2)?,
                value: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Displayed matrix size. Base types count their direct assignments,
    /// falling back to the distinct controls present in cells when no
    /// control is bound; derived types count the recursive unions.
    pub fn matrix_dimensions(&self, element_type: &str) -> Result<MatrixDimensions, StoreError> {
        let et = require_element_type(&self.conn, element_type)?;
        let (threats, mut controls, aggregated) = if et.is_base {
            let threats = direct_threat_ids(&self.conn, element_type)?.len();
            let controls = bound_control_ids(&self.conn, element_type)?.len();
            (threats, controls, false)
        } else {
            let threats = effective_threat_set(&self.conn, element_type)?.len();
            let controls = effective_control_set(&self.conn, element_type)?.len();
            (threats, controls, true)
        };
        // No control binding anywhere: fall back to the controls that
        // actually appear in cells, which is all an aggregation root has.
        if controls == 0 {
            let distinct: i64 = self.conn.query_row(
                "SELECT COUNT(DISTINCT control) FROM matrix_cells WHERE element_type=?1",
                params![element_type],
                |row| row.get(0),
            )?;
            controls = usize::try_from(distinct).unwrap_or(0);
        }
        if threats == 0 && controls == 0 {
            return Ok(MatrixDimensions::Empty);
        }
        Ok(MatrixDimensions::Size {
            threats,
            controls,
            aggregated,
        })
    }
}
