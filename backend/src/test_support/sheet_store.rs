//! Sheet store wrapper that injects scripted failures.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::ports::{Row, SheetRange, SheetStore, SheetStoreError};
use crate::outbound::memory::InMemorySheetStore;

/// Store operation a script step applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreCall {
    /// `read_range`.
    Read,
    /// `write_rows`.
    Write,
    /// `append_row`.
    Append,
}

/// What the next matching call does instead of succeeding normally.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    /// Fail without touching the grid.
    Fail(SheetStoreError),
    /// Apply the call to the grid, then report a failure, as a timeout
    /// after the write landed would.
    LandThenFail(SheetStoreError),
}

/// Delegates to an [`InMemorySheetStore`] after consuming scripted steps.
pub struct ScriptedSheetStore {
    inner: Arc<InMemorySheetStore>,
    steps: Mutex<HashMap<StoreCall, VecDeque<ScriptedStep>>>,
    calls: Mutex<HashMap<StoreCall, u32>>,
}

impl ScriptedSheetStore {
    /// Wrap `inner` with an empty script.
    pub fn new(inner: Arc<InMemorySheetStore>) -> Self {
        Self {
            inner,
            steps: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Queue `step` for the next unscripted `call`.
    pub fn script(&self, call: StoreCall, step: ScriptedStep) {
        lock(&self.steps).entry(call).or_default().push_back(step);
    }

    /// Queue `times` plain failures for `call`.
    pub fn fail_times(&self, call: StoreCall, times: usize, error: &SheetStoreError) {
        for _ in 0..times {
            self.script(call, ScriptedStep::Fail(error.clone()));
        }
    }

    /// Number of `call` invocations so far, scripted ones included.
    pub fn calls(&self, call: StoreCall) -> u32 {
        lock(&self.calls).get(&call).copied().unwrap_or(0)
    }

    /// Underlying grid.
    pub fn inner(&self) -> &Arc<InMemorySheetStore> {
        &self.inner
    }

    fn next_step(&self, call: StoreCall) -> Option<ScriptedStep> {
        *lock(&self.calls).entry(call).or_default() += 1;
        lock(&self.steps).get_mut(&call).and_then(VecDeque::pop_front)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(_) => panic!("scripted store mutex poisoned"),
    }
}

#[async_trait]
impl SheetStore for ScriptedSheetStore {
    async fn read_range(&self, range: &SheetRange) -> Result<Vec<Row>, SheetStoreError> {
        match self.next_step(StoreCall::Read) {
            Some(ScriptedStep::Fail(error)) => Err(error),
            Some(ScriptedStep::LandThenFail(error)) => {
                self.inner.read_range(range).await?;
                Err(error)
            }
            None => self.inner.read_range(range).await,
        }
    }

    async fn write_rows(&self, range: &SheetRange, rows: &[Row]) -> Result<(), SheetStoreError> {
        match self.next_step(StoreCall::Write) {
            Some(ScriptedStep::Fail(error)) => Err(error),
            Some(ScriptedStep::LandThenFail(error)) => {
                self.inner.write_rows(range, rows).await?;
                Err(error)
            }
            None => self.inner.write_rows(range, rows).await,
        }
    }

    async fn append_row(&self, sheet: &str, row: &Row) -> Result<(), SheetStoreError> {
        match self.next_step(StoreCall::Append) {
            Some(ScriptedStep::Fail(error)) => Err(error),
            Some(ScriptedStep::LandThenFail(error)) => {
                self.inner.append_row(sheet, row).await?;
                Err(error)
            }
            None => self.inner.append_row(sheet, row).await,
        }
    }
}
