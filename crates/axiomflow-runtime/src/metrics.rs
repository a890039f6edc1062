use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::{debug, warn};

use axiomflow_core::error::Result;
use axiomflow_core::types::RoutingMetrics;

/// Where the router's outcome ledger lives between runs.
///
/// The ledger is always rewritten whole; stores never see partial updates.
pub trait MetricsStore: Send + Sync {
    fn load(&self) -> Result<RoutingMetrics>;
    fn persist(&self, metrics: &RoutingMetrics) -> Result<()>;
}

/// Ledger kept as a JSON document: `{"agent": {"success": n, "failure": n}}`.
#[derive(Debug, Clone)]
pub struct JsonFileMetricsStore {
    path: PathBuf,
}

impl JsonFileMetricsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsStore for JsonFileMetricsStore {
    /// A missing or unreadable document loads as an empty ledger.
    fn load(&self) -> Result<RoutingMetrics> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RoutingMetrics::new());
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Cannot read metrics, starting empty"
                );
                return Ok(RoutingMetrics::new());
            }
        };
        match serde_json::from_str(&content) {
            Ok(metrics) => Ok(metrics),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Corrupt metrics file, starting empty"
                );
                Ok(RoutingMetrics::new())
            }
        }
    }

    fn persist(&self, metrics: &RoutingMetrics) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let body = serde_json::to_vec(metrics)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), agents = metrics.len(), "Persisted routing metrics");
        Ok(())
    }
}

/// In-process ledger store. Counts how often it was written.
#[derive(Debug, Default)]
pub struct MemoryMetricsStore {
    metrics: Mutex<RoutingMetrics>,
    writes: AtomicUsize,
}

impl MemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(metrics: RoutingMetrics) -> Self {
        Self {
            metrics: Mutex::new(metrics),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> RoutingMetrics {
        self.metrics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl MetricsStore for MemoryMetricsStore {
    fn load(&self) -> Result<RoutingMetrics> {
        Ok(self.snapshot())
    }

    fn persist(&self, metrics: &RoutingMetrics) -> Result<()> {
        *self.metrics.lock().unwrap_or_else(|e| e.into_inner()) = metrics.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
