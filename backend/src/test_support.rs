//! Test utilities for the formboard crate.
//!
//! This module provides shared helpers for both unit tests (in `src/`) and
//! integration tests (in `tests/`). It is only compiled for tests and when the
//! `test-support` feature is enabled.

mod clock;
mod harness;
mod resilience;
mod sheet_store;

pub use clock::MutableClock;
pub use harness::{BOARD_SHEET, Harness, USERS_SHEET};
pub use resilience::{ClockAdvancingSleeper, NoJitter, RecordingSleeper};
pub use sheet_store::{ScriptedSheetStore, ScriptedStep, StoreCall};
