//! Users sheet access through the resilient executor.
//!
//! Row 1 holds headers; every later non-blank row is one record. Rows are
//! never removed, so a record keeps its row number for life.

use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use crate::domain::Error;
use crate::domain::budget::ExecutionBudget;
use crate::domain::ports::{Row, SheetRange, SheetStore, SheetStoreError};
use crate::domain::resilience::{ExecuteOptions, ResilientExecutor, RetryPolicy};
use crate::domain::user_record::{
    Email, RecordId, USER_COLUMNS, UserRecord, decode_row, encode_row, is_blank_row,
};

const HEADER_ROWS: usize = 1;

/// A record and the sheet row it lives on.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedRecord {
    /// 1-based sheet row.
    pub row: u32,
    /// Decoded record.
    pub record: UserRecord,
}

/// Reads and writes the users sheet.
#[derive(Clone)]
pub struct UsersTable {
    store: Arc<dyn SheetStore>,
    executor: Arc<ResilientExecutor>,
    sheet: String,
    policy: RetryPolicy,
}

impl UsersTable {
    /// Bind to `sheet` in `store`.
    pub fn new(
        store: Arc<dyn SheetStore>,
        executor: Arc<ResilientExecutor>,
        sheet: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            executor,
            sheet: sheet.into(),
            policy,
        }
    }

    /// Every decodable record, in row order. Undecodable rows are logged and
    /// skipped.
    pub async fn load(&self, budget: &ExecutionBudget) -> Result<Vec<LocatedRecord>, Error> {
        let range = self.whole_sheet()?;
        let store = Arc::clone(&self.store);
        let rows = self
            .executor
            .execute(
                &ExecuteOptions::idempotent("sheets.read", self.policy),
                budget,
                move |_| {
                    let store = Arc::clone(&store);
                    let range = range.clone();
                    async move { store.read_range(&range).await }
                },
            )
            .await?;
        Ok(self.decode_rows(rows))
    }

    /// Record with `id`, read fresh from the store.
    pub async fn find_by_id(
        &self,
        id: &RecordId,
        budget: &ExecutionBudget,
    ) -> Result<Option<LocatedRecord>, Error> {
        let records = self.load(budget).await?;
        Ok(records.into_iter().find(|located| located.record.id() == id))
    }

    /// Record with `email`, read fresh from the store.
    pub async fn find_by_email(
        &self,
        email: &Email,
        budget: &ExecutionBudget,
    ) -> Result<Option<LocatedRecord>, Error> {
        let records = self.load(budget).await?;
        Ok(records
            .into_iter()
            .find(|located| located.record.email() == email))
    }

    /// Overwrite the full row of an existing record.
    ///
    /// A full-row overwrite leaves the same result however often it lands,
    /// so it is retried as idempotent.
    pub async fn write(
        &self,
        row: u32,
        record: &UserRecord,
        budget: &ExecutionBudget,
    ) -> Result<(), Error> {
        let range = SheetRange::row(self.sheet.as_str(), row, USER_COLUMNS)
            .map_err(|error| Error::internal(format!("invalid users row {row}: {error}")))?;
        let rows = vec![encode_row(record)];
        let store = Arc::clone(&self.store);
        self.executor
            .execute(
                &ExecuteOptions::idempotent("sheets.write", self.policy),
                budget,
                move |_| {
                    let store = Arc::clone(&store);
                    let range = range.clone();
                    let rows = rows.clone();
                    async move { store.write_rows(&range, &rows).await }
                },
            )
            .await?;
        Ok(())
    }

    /// Append a new record.
    ///
    /// Appends are not naturally repeatable, so every retry first re-reads
    /// the sheet and skips the append when an earlier ambiguous attempt
    /// already landed the row.
    pub async fn append(&self, record: &UserRecord, budget: &ExecutionBudget) -> Result<(), Error> {
        let sheet = self.whole_sheet()?;
        let row = encode_row(record);
        let id = record.id().clone();
        let store = Arc::clone(&self.store);
        let sheet_name = self.sheet.clone();
        self.executor
            .execute(
                &ExecuteOptions::idempotent("sheets.append", self.policy),
                budget,
                move |attempt| {
                    let store = Arc::clone(&store);
                    let sheet = sheet.clone();
                    let sheet_name = sheet_name.clone();
                    let row = row.clone();
                    let id = id.clone();
                    async move {
                        if attempt > 1 && already_appended(store.as_ref(), &sheet, &id).await? {
                            return Ok(());
                        }
                        store.append_row(&sheet_name, &row).await
                    }
                },
            )
            .await?;
        Ok(())
    }

    fn whole_sheet(&self) -> Result<SheetRange, Error> {
        SheetRange::sheet(self.sheet.as_str()).map_err(|error| {
            Error::internal(format!("invalid users sheet name: {error}"))
                .with_details(json!({ "sheet": self.sheet }))
        })
    }

    fn decode_rows(&self, rows: Vec<Row>) -> Vec<LocatedRecord> {
        rows.into_iter()
            .enumerate()
            .skip(HEADER_ROWS)
            .filter(|(_, cells)| !is_blank_row(cells))
            .filter_map(|(index, cells)| {
                let row = u32::try_from(index + 1).ok()?;
                match decode_row(&cells) {
                    Ok(record) => Some(LocatedRecord { row, record }),
                    Err(error) => {
                        warn!(sheet = %self.sheet, row, error = %error, "skipping undecodable user row");
                        None
                    }
                }
            })
            .collect()
    }
}

async fn already_appended(
    store: &dyn SheetStore,
    sheet: &SheetRange,
    id: &RecordId,
) -> Result<bool, SheetStoreError> {
    let rows = store.read_range(sheet).await?;
    Ok(rows
        .iter()
        .skip(HEADER_ROWS)
        .filter_map(|cells| decode_row(cells).ok())
        .any(|record| record.id() == id))
}
