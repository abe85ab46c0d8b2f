//! Worker-pool batch rendering.
//!
//! Rows are fed through a bounded job queue to `concurrency` workers. Each
//! worker owns one rasterizer invocation at a time and reports the row's
//! outcome on a results channel; the report is assembled in row order once
//! every worker has drained the queue.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use varia_core::{BatchConfig, RasterizerConfig, VariaConfig, VariaError, VariaResult};
use varia_ir::DataRow;
use varia_render::DocumentStore;
use varia_web::{RasterRequest, Rasterizer};

use crate::naming::object_name;
use crate::url::build_row_url;

const RETRY_BACKOFF_MS: u64 = 50;
const MAX_WORKERS: usize = 256;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Number of rows rendered at once. Clamped to `1..=256`.
    pub concurrency: usize,
    /// Column used to name uploaded images.
    pub id_column: String,
    /// Extra attempts for transient render and upload failures.
    pub retries: u32,
    pub retry_backoff: Duration,
    /// Time past the rasterizer's own timeout before the pipeline gives up
    /// on a row.
    pub render_grace: Duration,
    pub raster: RasterizerConfig,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&VariaConfig::default())
    }
}

impl BatchOptions {
    pub fn from_config(config: &VariaConfig) -> Self {
        let BatchConfig {
            concurrency,
            id_column,
            retries,
            render_grace_ms,
        } = config.batch.clone();
        Self {
            concurrency,
            id_column,
            retries,
            retry_backoff: Duration::from_millis(RETRY_BACKOFF_MS),
            render_grace: Duration::from_millis(render_grace_ms),
            raster: config.rasterizer.clone(),
        }
    }
}

/// Step of a row that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStage {
    Render,
    Upload,
}

impl std::fmt::Display for RowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowStage::Render => write!(f, "render"),
            RowStage::Upload => write!(f, "upload"),
        }
    }
}

/// One row that produced no result.
#[derive(Debug, thiserror::Error)]
#[error("row {row_index} failed during {stage}: {source}")]
pub struct RowProcessingError {
    pub row_index: usize,
    pub url: String,
    pub stage: RowStage,
    pub source: VariaError,
}

/// One row that rendered and uploaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowResult {
    pub row_index: usize,
    pub url: String,
    pub object_name: String,
    pub reference: String,
    pub width: u32,
    pub height: u32,
}

/// Outcome of a batch. Both lists are sorted by row index.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<RowResult>,
    pub failures: Vec<RowProcessingError>,
}

impl BatchReport {
    /// Public references of the successful rows, in input row order.
    pub fn references(&self) -> Vec<String> {
        self.results.iter().map(|r| r.reference.clone()).collect()
    }

    pub fn total_rows(&self) -> usize {
        self.results.len() + self.failures.len()
    }
}

type RowOutcome = Result<RowResult, RowProcessingError>;

#[derive(Clone)]
struct Worker {
    rasterizer: Arc<dyn Rasterizer>,
    store: Arc<dyn DocumentStore>,
    options: Arc<BatchOptions>,
    template: url::Url,
}

pub struct BatchPipeline {
    rasterizer: Arc<dyn Rasterizer>,
    store: Arc<dyn DocumentStore>,
    options: Arc<BatchOptions>,
}

impl BatchPipeline {
    pub fn new(
        rasterizer: Arc<dyn Rasterizer>,
        store: Arc<dyn DocumentStore>,
        options: BatchOptions,
    ) -> Self {
        Self {
            rasterizer,
            store,
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Render every row against `url_template`.
    ///
    /// Fails only when the template is not a valid URL; row failures are
    /// collected in the report.
    pub async fn render_batch<I>(&self, rows: I, url_template: &str) -> VariaResult<BatchReport>
    where
        I: IntoIterator<Item = DataRow>,
    {
        let template = url::Url::parse(url_template)
            .map_err(|e| VariaError::invalid_url(url_template, e.to_string()))?;
        let concurrency = self.options.concurrency.clamp(1, MAX_WORKERS);
        info!("starting batch with {} workers for {}", concurrency, template);

        let (job_tx, job_rx) = mpsc::channel::<(usize, DataRow)>(concurrency.saturating_mul(2));
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<RowOutcome>();

        let mut handles = Vec::with_capacity(concurrency);
        for worker_id in 0..concurrency {
            let worker = Worker {
                rasterizer: Arc::clone(&self.rasterizer),
                store: Arc::clone(&self.store),
                options: Arc::clone(&self.options),
                template: template.clone(),
            };
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let job = job_rx.lock().await.recv().await;
                    let Some((row_index, row)) = job else { break };
                    let outcome = worker.process_isolated(row_index, row).await;
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
                debug!("batch worker {} finished", worker_id);
            }));
        }
        drop(result_tx);

        for job in rows.into_iter().enumerate() {
            if job_tx.send(job).await.is_err() {
                warn!("all batch workers exited early, remaining rows skipped");
                break;
            }
        }
        drop(job_tx);

        let mut report = BatchReport::default();
        while let Some(outcome) = result_rx.recv().await {
            match outcome {
                Ok(result) => report.results.push(result),
                Err(failure) => report.failures.push(failure),
            }
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("batch worker panicked: {}", e);
            }
        }

        report.results.sort_by_key(|r| r.row_index);
        report.failures.sort_by_key(|f| f.row_index);
        info!(
            "batch complete: {} rendered, {} failed",
            report.results.len(),
            report.failures.len()
        );
        Ok(report)
    }
}

impl Worker {
    /// Run one row on its own task so a panic inside the rasterizer or store
    /// becomes a render failure for that row instead of losing it.
    async fn process_isolated(&self, row_index: usize, row: DataRow) -> RowOutcome {
        let url = build_row_url(&self.template, &row).to_string();
        let worker = self.clone();
        match tokio::spawn(async move { worker.process(row_index, row).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let failure = RowProcessingError {
                    row_index,
                    url,
                    stage: RowStage::Render,
                    source: VariaError::Other(format!("row task aborted: {}", e)),
                };
                warn!("{}", failure);
                Err(failure)
            }
        }
    }

    async fn process(&self, row_index: usize, row: DataRow) -> RowOutcome {
        let url = build_row_url(&self.template, &row).to_string();
        let fail = |stage, source| {
            let failure = RowProcessingError {
                row_index,
                url: url.clone(),
                stage,
                source,
            };
            warn!("{}", failure);
            failure
        };

        let request = RasterRequest::new(url.clone(), &self.options.raster);
        let image = self
            .with_retries(|| self.render_guarded(&request))
            .await
            .map_err(|e| fail(RowStage::Render, e))?;

        let name = object_name(
            &row,
            &self.options.id_column,
            row_index,
            chrono::Utc::now().timestamp_millis(),
        );
        let reference = self
            .with_retries(|| self.store.put(&name, image.bytes.clone()))
            .await
            .map_err(|e| fail(RowStage::Upload, e))?;

        info!("row {} rendered to {}", row_index, reference);
        Ok(RowResult {
            row_index,
            url,
            object_name: name,
            reference,
            width: image.width,
            height: image.height,
        })
    }

    /// Render with a hard deadline, in case the rasterizer does not honor
    /// its own timeout.
    async fn render_guarded(&self, request: &RasterRequest) -> VariaResult<varia_web::RasterImage> {
        let deadline = request.timeout + self.options.render_grace;
        match tokio::time::timeout(deadline, self.rasterizer.render(request)).await {
            Ok(result) => result,
            Err(_) => Err(VariaError::RenderTimeout {
                url: request.url.clone(),
                marker: request.ready_selector.clone(),
                timeout_ms: request.timeout.as_millis() as u64,
            }),
        }
    }

    async fn with_retries<T, F, Fut>(&self, mut op: F) -> VariaResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = VariaResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.options.retries => {
                    attempt += 1;
                    debug!("attempt {} failed ({}), retrying", attempt, e);
                    let backoff = self.options.retry_backoff.saturating_mul(attempt);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
