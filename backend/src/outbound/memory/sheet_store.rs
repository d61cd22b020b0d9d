//! Process-local sheet store.
//!
//! Each call yields to the scheduler before touching the grid so concurrent
//! callers interleave the way they would against a remote service.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::ports::{CellRef, Extent, Row, SheetRange, SheetStore, SheetStoreError};

/// Grid of sheets held in memory; row `n` lives at index `n - 1`.
#[derive(Debug, Default)]
pub struct InMemorySheetStore {
    sheets: Mutex<HashMap<String, Vec<Row>>>,
}

impl InMemorySheetStore {
    /// Create a store with no sheets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents of `sheet` with `rows`, starting at row 1.
    pub fn with_sheet(self, sheet: impl Into<String>, rows: Vec<Row>) -> Self {
        self.lock_sheets().insert(sheet.into(), rows);
        self
    }

    /// Copy of every row currently stored on `sheet`.
    pub fn snapshot(&self, sheet: &str) -> Vec<Row> {
        self.lock_sheets().get(sheet).cloned().unwrap_or_default()
    }

    fn lock_sheets(&self) -> MutexGuard<'_, HashMap<String, Vec<Row>>> {
        self.sheets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn index(value: u32) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX).saturating_sub(1)
}

fn is_blank(row: &Row) -> bool {
    row.iter().all(|cell| match cell {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        _ => false,
    })
}

fn slice_columns(row: &Row, first: usize, last: usize) -> Row {
    row.iter()
        .skip(first)
        .take(last.saturating_sub(first) + 1)
        .cloned()
        .collect()
}

fn write_cell(
    rows: &mut Vec<Row>,
    at: (usize, usize),
    value: Value,
) -> Result<(), SheetStoreError> {
    let (row, column) = at;
    let out_of_grid = || {
        SheetStoreError::invalid_request(format!(
            "cell at row {} column {} is outside the grid",
            row.saturating_add(1),
            column.saturating_add(1)
        ))
    };
    if rows.len() <= row {
        rows.resize_with(row.checked_add(1).ok_or_else(out_of_grid)?, Vec::new);
    }
    let cells = rows.get_mut(row).ok_or_else(out_of_grid)?;
    if cells.len() <= column {
        cells.resize(
            column.checked_add(1).ok_or_else(out_of_grid)?,
            Value::String(String::new()),
        );
    }
    let cell = cells.get_mut(column).ok_or_else(out_of_grid)?;
    *cell = value;
    Ok(())
}

#[async_trait]
impl SheetStore for InMemorySheetStore {
    async fn read_range(&self, range: &SheetRange) -> Result<Vec<Row>, SheetStoreError> {
        tokio::task::yield_now().await;
        let sheets = self.lock_sheets();
        let Some(rows) = sheets.get(range.sheet_name()) else {
            return Ok(Vec::new());
        };
        let selected = match range.extent() {
            Extent::Sheet => rows.clone(),
            Extent::Cell(CellRef { row, column }) => rows
                .get(index(row))
                .and_then(|cells| cells.get(index(column)))
                .map(|cell| vec![vec![cell.clone()]])
                .unwrap_or_default(),
            Extent::Span { start, end } => rows
                .iter()
                .skip(index(start.row))
                .take(index(end.row).saturating_sub(index(start.row)) + 1)
                .map(|cells| slice_columns(cells, index(start.column), index(end.column)))
                .collect(),
        };
        Ok(selected)
    }

    async fn write_rows(&self, range: &SheetRange, rows: &[Row]) -> Result<(), SheetStoreError> {
        tokio::task::yield_now().await;
        let (origin, limit) = match range.extent() {
            Extent::Sheet => (CellRef { row: 1, column: 1 }, None),
            Extent::Cell(cell) => (cell, Some(cell)),
            Extent::Span { start, end } => (start, Some(end)),
        };
        if let Some(end) = limit {
            let height = index(end.row).saturating_sub(index(origin.row)) + 1;
            let width = index(end.column).saturating_sub(index(origin.column)) + 1;
            if rows.len() > height || rows.iter().any(|row| row.len() > width) {
                return Err(SheetStoreError::invalid_request(format!(
                    "values exceed range {range}"
                )));
            }
        }

        let mut sheets = self.lock_sheets();
        let grid = sheets.entry(range.sheet_name().to_owned()).or_default();
        for (row_offset, row) in rows.iter().enumerate() {
            for (column_offset, cell) in row.iter().enumerate() {
                write_cell(
                    grid,
                    (
                        index(origin.row) + row_offset,
                        index(origin.column) + column_offset,
                    ),
                    cell.clone(),
                )?;
            }
        }
        Ok(())
    }

    async fn append_row(&self, sheet: &str, row: &Row) -> Result<(), SheetStoreError> {
        tokio::task::yield_now().await;
        let mut sheets = self.lock_sheets();
        let grid = sheets.entry(sheet.to_owned()).or_default();
        let next = grid
            .iter()
            .rposition(|cells| !is_blank(cells))
            .map_or(0, |last| last + 1);
        match grid.get_mut(next) {
            Some(slot) => *slot = row.clone(),
            None => grid.push(row.clone()),
        }
        Ok(())
    }
}
