//! Data source readers
//!
//! A reader turns bindings into `(value, structural fingerprint, read time)`.
//! Source-level failures (missing, locked) fail the whole read; a binding
//! that names a cell the source does not have fails only that assertion.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guardian_gates::Observation;
use guardian_types::{AssertionId, DataBinding, StructuralFingerprint};
use parking_lot::Mutex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, warn};

use crate::config::RetryPolicy;
use crate::error::SourceError;

/// Fingerprint of a cell holding a literal rather than a formula.
pub const STATIC_VALUE_FINGERPRINT: &str = "static_value";

/// Value held by a cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Empty,
}

/// One successful binding read
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReading {
    pub value: CellValue,
    pub fingerprint: StructuralFingerprint,
    pub read_at: DateTime<Utc>,
}

impl SourceReading {
    /// Convert into what the gates consume. Non-numeric cells keep their
    /// fingerprint so the structure gate still runs.
    pub fn into_observation(self, binding: &DataBinding) -> Observation {
        let error = match &self.value {
            CellValue::Number(v) if v.is_finite() => None,
            CellValue::Number(_) => Some(format!("cell {binding} holds a non-finite number")),
            CellValue::Text(_) => Some(format!("cell {binding} is not numeric")),
            CellValue::Empty => Some(format!("cell {binding} is empty")),
        };
        let value = match self.value {
            CellValue::Number(v) if error.is_none() => Some(v),
            _ => None,
        };
        Observation {
            value,
            fingerprint: Some(self.fingerprint),
            read_at: Some(self.read_at),
            error,
        }
    }
}

/// Per-binding results of one consistent read of the source.
pub type BindingReadings = HashMap<AssertionId, Result<SourceReading, SourceError>>;

/// External data source
#[async_trait]
pub trait DataSourceReader: Send + Sync {
    /// Read one binding.
    async fn read(&self, binding: &DataBinding) -> Result<SourceReading, SourceError>;

    /// Read every binding. `Err` means the source itself could not be read.
    async fn read_all(
        &self,
        bindings: &[(AssertionId, DataBinding)],
    ) -> Result<BindingReadings, SourceError> {
        let mut readings = HashMap::with_capacity(bindings.len());
        for (id, binding) in bindings {
            match self.read(binding).await {
                Err(e @ SourceError::BindingInvalid(_)) => {
                    readings.insert(id.clone(), Err(e));
                }
                Err(e) => return Err(e),
                Ok(reading) => {
                    readings.insert(id.clone(), Ok(reading));
                }
            }
        }
        Ok(readings)
    }
}

/// Fingerprint a cell's formula text.
pub fn formula_fingerprint(formula: Option<&str>) -> StructuralFingerprint {
    match formula.map(str::trim) {
        Some(f) if f.starts_with('=') => {
            StructuralFingerprint::new(hex::encode(Sha256::digest(f.as_bytes())))
        }
        _ => StructuralFingerprint::new(STATIC_VALUE_FINGERPRINT),
    }
}

#[derive(Debug, Deserialize)]
struct Workbook {
    sheets: BTreeMap<String, BTreeMap<String, WorkbookCell>>,
    #[serde(default)]
    active_sheet: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkbookCell {
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    formula: Option<String>,
}

impl Workbook {
    fn sheet(
        &self,
        binding: &DataBinding,
    ) -> Result<&BTreeMap<String, WorkbookCell>, SourceError> {
        let name = match (&binding.sheet, &self.active_sheet) {
            (Some(name), _) | (None, Some(name)) => name.as_str(),
            (None, None) if self.sheets.len() == 1 => {
                return self
                    .sheets
                    .values()
                    .next()
                    .ok_or_else(|| SourceError::BindingInvalid("workbook has no sheets".into()));
            }
            (None, None) => {
                return Err(SourceError::BindingInvalid(format!(
                    "{binding} names no sheet and the workbook has no active sheet"
                )))
            }
        };
        self.sheets
            .get(name)
            .ok_or_else(|| SourceError::BindingInvalid(format!("sheet '{name}' does not exist")))
    }

    fn read(&self, binding: &DataBinding, read_at: DateTime<Utc>) -> Result<SourceReading, SourceError> {
        let sheet = self.sheet(binding)?;
        let cell = sheet
            .get(&binding.cell)
            .or_else(|| sheet.get(&binding.cell.to_ascii_uppercase()))
            .ok_or_else(|| SourceError::BindingInvalid(format!("cell {binding} does not exist")))?;

        let value = match &cell.value {
            serde_json::Value::Null => CellValue::Empty,
            serde_json::Value::Number(n) => n.as_f64().map_or(CellValue::Empty, CellValue::Number),
            serde_json::Value::String(s) => match s.trim().parse::<f64>() {
                Ok(v) => CellValue::Number(v),
                Err(_) => CellValue::Text(s.clone()),
            },
            other => CellValue::Text(other.to_string()),
        };

        Ok(SourceReading {
            value,
            fingerprint: formula_fingerprint(cell.formula.as_deref()),
            read_at,
        })
    }
}

/// Reads a JSON workbook file
///
/// ```json
/// {"active_sheet": "Model",
///  "sheets": {"Model": {"B5": {"value": 1250000, "formula": "=SUM(B1:B4)"}}}}
/// ```
#[derive(Debug, Clone)]
pub struct JsonWorkbookSource {
    path: PathBuf,
}

impl JsonWorkbookSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Workbook, SourceError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            let location = self.path.display();
            match e.kind() {
                ErrorKind::NotFound => SourceError::Unavailable(format!("{location} does not exist")),
                ErrorKind::PermissionDenied | ErrorKind::WouldBlock => {
                    SourceError::Locked(format!("{location}: {e}"))
                }
                _ => SourceError::Unavailable(format!("{location}: {e}")),
            }
        })?;

        // A writer mid-save leaves a truncated document behind.
        serde_json::from_slice(&bytes).map_err(|e| {
            SourceError::Locked(format!("{} is not a complete workbook: {}", self.path.display(), e))
        })
    }
}

#[async_trait]
impl DataSourceReader for JsonWorkbookSource {
    async fn read(&self, binding: &DataBinding) -> Result<SourceReading, SourceError> {
        let workbook = self.load().await?;
        workbook.read(binding, Utc::now())
    }

    async fn read_all(
        &self,
        bindings: &[(AssertionId, DataBinding)],
    ) -> Result<BindingReadings, SourceError> {
        let workbook = self.load().await?;
        let read_at = Utc::now();
        Ok(bindings
            .iter()
            .map(|(id, binding)| (id.clone(), workbook.read(binding, read_at)))
            .collect())
    }
}

/// In-memory source for tests and embedding
///
/// Cells are keyed by the binding's display form (`Sheet!B5` or `B5`).
#[derive(Default)]
pub struct MemorySource {
    cells: Mutex<HashMap<String, (CellValue, StructuralFingerprint)>>,
    failure: Mutex<Option<SourceError>>,
    reads: AtomicU64,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_value(&self, binding: &DataBinding, value: f64) {
        self.set_cell(binding, CellValue::Number(value), None);
    }

    pub fn set_cell(&self, binding: &DataBinding, value: CellValue, formula: Option<&str>) {
        self.cells
            .lock()
            .insert(binding.to_string(), (value, formula_fingerprint(formula)));
    }

    /// Fail every subsequent read with `failure`, or stop failing with `None`.
    pub fn set_failure(&self, failure: Option<SourceError>) {
        *self.failure.lock() = failure;
    }

    /// Number of source reads performed
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    fn lookup(&self, binding: &DataBinding, read_at: DateTime<Utc>) -> Result<SourceReading, SourceError> {
        self.cells
            .lock()
            .get(&binding.to_string())
            .map(|(value, fingerprint)| SourceReading {
                value: value.clone(),
                fingerprint: fingerprint.clone(),
                read_at,
            })
            .ok_or_else(|| SourceError::BindingInvalid(format!("cell {binding} does not exist")))
    }

    fn begin_read(&self) -> Result<(), SourceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DataSourceReader for MemorySource {
    async fn read(&self, binding: &DataBinding) -> Result<SourceReading, SourceError> {
        self.begin_read()?;
        self.lookup(binding, Utc::now())
    }

    async fn read_all(
        &self,
        bindings: &[(AssertionId, DataBinding)],
    ) -> Result<BindingReadings, SourceError> {
        self.begin_read()?;
        let read_at = Utc::now();
        Ok(bindings
            .iter()
            .map(|(id, binding)| (id.clone(), self.lookup(binding, read_at)))
            .collect())
    }
}

/// Read every binding, backing off while the source is locked.
///
/// Gives up after `policy.max_attempts`; any other source error fails at once.
pub async fn read_with_retry(
    source: &dyn DataSourceReader,
    bindings: &[(AssertionId, DataBinding)],
    policy: &RetryPolicy,
) -> Result<BindingReadings, SourceError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match source.read_all(bindings).await {
            Ok(readings) => {
                if attempt > 1 {
                    debug!(attempt, "Source read succeeded after retry");
                }
                return Ok(readings);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Source locked, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) if e.is_retryable() => {
                error!(attempts = attempt, error = %e, "Source still locked, giving up");
                return Err(SourceError::RetriesExhausted {
                    attempts: attempt,
                    last: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }
}
