//! Port abstraction for the tabular record store.
//!
//! The store is a grid of sheets addressed by 1-based row and column
//! numbers. Cells carry JSON values so adapters can pass through whatever
//! scalar the backing service returns.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::define_port_error;
use crate::domain::resilience::{FailureClass, RemoteFailure};

/// One cell value.
pub type Cell = Value;

/// One row of cells, leftmost column first.
pub type Row = Vec<Cell>;

/// Position of a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef {
    /// 1-based row number.
    pub row: u32,
    /// 1-based column number.
    pub column: u32,
}

/// Portion of a sheet addressed by a store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extent {
    /// Every populated row.
    Sheet,
    /// One cell.
    Cell(CellRef),
    /// Inclusive rectangle.
    Span {
        /// Top-left corner.
        start: CellRef,
        /// Bottom-right corner.
        end: CellRef,
    },
}

/// Sheet name plus extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRange {
    sheet: String,
    extent: Extent,
}

impl SheetRange {
    /// Address a whole sheet.
    pub fn sheet(sheet: impl Into<String>) -> Result<Self, SheetRangeError> {
        Self::build(sheet.into(), Extent::Sheet)
    }

    /// Address a single cell.
    pub fn cell(sheet: impl Into<String>, row: u32, column: u32) -> Result<Self, SheetRangeError> {
        Self::build(sheet.into(), Extent::Cell(CellRef { row, column }))
    }

    /// Address `width` cells of one row starting at column 1.
    pub fn row(sheet: impl Into<String>, row: u32, width: u32) -> Result<Self, SheetRangeError> {
        Self::build(
            sheet.into(),
            Extent::Span {
                start: CellRef { row, column: 1 },
                end: CellRef { row, column: width },
            },
        )
    }

    fn build(sheet: String, extent: Extent) -> Result<Self, SheetRangeError> {
        if sheet.trim().is_empty() {
            return Err(SheetRangeError::EmptySheetName);
        }
        let corners = match extent {
            Extent::Sheet => vec![],
            Extent::Cell(cell) => vec![cell],
            Extent::Span { start, end } => {
                if end.row < start.row || end.column < start.column {
                    return Err(SheetRangeError::Inverted);
                }
                vec![start, end]
            }
        };
        if corners.iter().any(|cell| cell.row == 0 || cell.column == 0) {
            return Err(SheetRangeError::ZeroIndex);
        }
        Ok(Self { sheet, extent })
    }

    /// Sheet the range lives on.
    pub fn sheet_name(&self) -> &str {
        self.sheet.as_str()
    }

    /// Addressed extent.
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Render the range in A1 notation, e.g. `'Users'!A7:E7`.
    pub fn to_a1(&self) -> String {
        let sheet = format!("'{}'", self.sheet.replace('\'', "''"));
        match self.extent {
            Extent::Sheet => sheet,
            Extent::Cell(cell) => format!("{sheet}!{}", a1_cell(cell)),
            Extent::Span { start, end } => {
                format!("{sheet}!{}:{}", a1_cell(start), a1_cell(end))
            }
        }
    }
}

impl std::fmt::Display for SheetRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_a1())
    }
}

fn a1_cell(cell: CellRef) -> String {
    format!("{}{}", column_letters(cell.column), cell.row)
}

/// Convert a 1-based column number into spreadsheet letters (`1` is `A`,
/// `27` is `AA`).
pub fn column_letters(column: u32) -> String {
    let mut letters = Vec::new();
    let mut remaining = column;
    while remaining > 0 {
        let offset = (remaining - 1) % 26;
        letters.push(char::from(b'A' + u8::try_from(offset).unwrap_or(0)));
        remaining = (remaining - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Validation errors raised when building a [`SheetRange`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SheetRangeError {
    /// Sheet name is blank.
    #[error("sheet name must not be empty")]
    EmptySheetName,
    /// A row or column number is zero.
    #[error("rows and columns are 1-based")]
    ZeroIndex,
    /// The end corner precedes the start corner.
    #[error("range end precedes range start")]
    Inverted,
}

define_port_error! {
    /// Errors raised by sheet store adapters.
    pub enum SheetStoreError {
        /// The connection failed after the request may have been sent.
        Transport { message: String } => "sheet store transport failure: {message}",
        /// The request timed out; the write may or may not have landed.
        Timeout { message: String } => "sheet store timed out: {message}",
        /// The service asked the caller to slow down.
        RateLimited { message: String } => "sheet store rate limited: {message}",
        /// The service is temporarily unavailable.
        Unavailable { message: String } => "sheet store unavailable: {message}",
        /// Credentials were refused.
        PermissionDenied { message: String } => "sheet store denied access: {message}",
        /// The request was malformed.
        InvalidRequest { message: String } => "sheet store rejected request: {message}",
        /// The response could not be decoded.
        Decode { message: String } => "sheet store response malformed: {message}",
    }
}

impl RemoteFailure for SheetStoreError {
    fn class(&self) -> FailureClass {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => FailureClass::Ambiguous,
            Self::RateLimited { .. } | Self::Unavailable { .. } => FailureClass::Transient,
            Self::PermissionDenied { .. } => FailureClass::PermissionDenied,
            Self::InvalidRequest { .. } | Self::Decode { .. } => FailureClass::Permanent,
        }
    }
}

/// Tabular record store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SheetStore: Send + Sync {
    /// Read the rows covered by `range`. Trailing empty cells and rows may be
    /// omitted by the backing service.
    async fn read_range(&self, range: &SheetRange) -> Result<Vec<Row>, SheetStoreError>;

    /// Overwrite the cells covered by `range` with `rows`.
    async fn write_rows(&self, range: &SheetRange, rows: &[Row]) -> Result<(), SheetStoreError>;

    /// Append `row` after the last populated row of `sheet`.
    async fn append_row(&self, sheet: &str, row: &Row) -> Result<(), SheetStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, "A")]
    #[case(5, "E")]
    #[case(26, "Z")]
    #[case(27, "AA")]
    #[case(703, "AAA")]
    fn column_letters_follow_spreadsheet_numbering(#[case] column: u32, #[case] expected: &str) {
        assert_eq!(column_letters(column), expected);
    }

    #[rstest]
    fn a1_rendering_quotes_sheet_names() {
        let whole = SheetRange::sheet("Users").expect("valid");
        let cell = SheetRange::cell("Board Posts", 7, 3).expect("valid");
        let row = SheetRange::row("Owner's", 4, 5).expect("valid");

        assert_eq!(whole.to_a1(), "'Users'");
        assert_eq!(cell.to_a1(), "'Board Posts'!C7");
        assert_eq!(row.to_a1(), "'Owner''s'!A4:E4");
    }

    #[rstest]
    fn ranges_reject_zero_indices_and_blank_sheets() {
        assert_eq!(
            SheetRange::cell("Users", 0, 1).expect_err("zero row"),
            SheetRangeError::ZeroIndex
        );
        assert_eq!(
            SheetRange::sheet(" ").expect_err("blank"),
            SheetRangeError::EmptySheetName
        );
    }

    #[rstest]
    #[case(SheetStoreError::timeout("t"), true, true)]
    #[case(SheetStoreError::transport("t"), true, true)]
    #[case(SheetStoreError::rate_limited("t"), true, false)]
    #[case(SheetStoreError::unavailable("t"), true, false)]
    #[case(SheetStoreError::permission_denied("t"), false, false)]
    #[case(SheetStoreError::invalid_request("t"), false, false)]
    fn classification_matches_retry_semantics(
        #[case] error: SheetStoreError,
        #[case] retryable: bool,
        #[case] ambiguous: bool,
    ) {
        assert_eq!(error.is_retryable(), retryable);
        assert_eq!(error.is_ambiguous(), ambiguous);
    }
}
