use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use varia_batch::{BatchOptions, BatchPipeline, RowStage};
use varia_core::{VariaError, VariaResult};
use varia_ir::{DataRow, DataSet};
use varia_render::{DocumentStore, MemoryDocumentStore};
use varia_web::{RasterImage, RasterRequest, Rasterizer};

/// Records every URL and fails or stalls on URLs containing a trigger.
#[derive(Default)]
struct MockRasterizer {
    seen: Mutex<Vec<String>>,
    timeout_on: Option<&'static str>,
    hang_on: Option<&'static str>,
    panic_on: Option<&'static str>,
    /// Number of leading calls that fail with a capture error.
    flaky_calls: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl Rasterizer for MockRasterizer {
    async fn render(&self, request: &RasterRequest) -> VariaResult<RasterImage> {
        self.seen.lock().push(request.url.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self
            .flaky_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(VariaError::Capture("flaky".into()));
        }
        if self.panic_on.is_some_and(|t| request.url.contains(t)) {
            panic!("rasterizer crashed on {}", request.url);
        }
        if self.hang_on.is_some_and(|t| request.url.contains(t)) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.timeout_on.is_some_and(|t| request.url.contains(t)) {
            return Err(VariaError::RenderTimeout {
                url: request.url.clone(),
                marker: request.ready_selector.clone(),
                timeout_ms: request.timeout.as_millis() as u64,
            });
        }
        Ok(RasterImage {
            bytes: request.url.as_bytes().to_vec(),
            width: 4,
            height: 2,
        })
    }
}

struct FailingStore;

#[async_trait]
impl DocumentStore for FailingStore {
    async fn get(&self, reference: &str) -> VariaResult<Vec<u8>> {
        Err(VariaError::document_load(reference, "unavailable"))
    }

    async fn put(&self, name: &str, _bytes: Vec<u8>) -> VariaResult<String> {
        Err(VariaError::upload(name, "bucket is read-only"))
    }
}

fn rows() -> Vec<DataRow> {
    DataSet::from_csv_str("id,title\na,Hi\nb,Bye\n")
        .unwrap()
        .rows()
        .collect()
}

fn options(concurrency: usize) -> BatchOptions {
    let mut options = BatchOptions::default();
    options.concurrency = concurrency;
    options.id_column = "id".into();
    options.retry_backoff = Duration::from_millis(1);
    options
}

const TEMPLATE: &str = "http://localhost:3000/generate?projectId=p&text=title";

#[tokio::test]
async fn test_rows_fill_url_and_upload() {
    let rasterizer = Arc::new(MockRasterizer::default());
    let store = Arc::new(MemoryDocumentStore::new().with_public_base("https://cdn.test"));
    let pipeline = BatchPipeline::new(rasterizer.clone(), store.clone(), options(1));

    let report = pipeline.render_batch(rows(), TEMPLATE).await.unwrap();

    let seen = rasterizer.seen.lock().clone();
    assert_eq!(
        seen,
        vec![
            "http://localhost:3000/generate?projectId=p&text=Hi",
            "http://localhost:3000/generate?projectId=p&text=Bye",
        ]
    );
    assert_eq!(report.results.len(), 2);
    assert!(report.failures.is_empty());

    let refs = report.references();
    assert!(refs[0].starts_with("https://cdn.test/a_image_"));
    assert!(refs[0].ends_with("_0.png"));
    assert!(refs[1].starts_with("https://cdn.test/b_image_"));
    assert_eq!(store.names().len(), 2);
    assert_eq!(report.results[0].width, 4);
}

#[tokio::test]
async fn test_timeout_on_one_row_keeps_the_other() {
    let rasterizer = Arc::new(MockRasterizer {
        timeout_on: Some("text=Bye"),
        ..Default::default()
    });
    let store = Arc::new(MemoryDocumentStore::new());
    let pipeline = BatchPipeline::new(rasterizer, store, options(2));

    let report = pipeline.render_batch(rows(), TEMPLATE).await.unwrap();

    assert_eq!(report.references().len(), 1);
    assert_eq!(report.results[0].row_index, 0);
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.row_index, 1);
    assert_eq!(failure.stage, RowStage::Render);
    assert!(matches!(failure.source, VariaError::RenderTimeout { .. }));
}

#[tokio::test]
async fn test_hung_rasterizer_is_cut_off_by_guard() {
    let rasterizer = Arc::new(MockRasterizer {
        hang_on: Some("text=Hi"),
        ..Default::default()
    });
    let mut opts = options(2);
    opts.raster.timeout_ms = 20;
    opts.render_grace = Duration::from_millis(20);
    let pipeline = BatchPipeline::new(rasterizer, Arc::new(MemoryDocumentStore::new()), opts);

    let report = pipeline.render_batch(rows(), TEMPLATE).await.unwrap();
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].row_index, 1);
    assert!(matches!(
        report.failures[0].source,
        VariaError::RenderTimeout { timeout_ms: 20, .. }
    ));
}

#[tokio::test]
async fn test_results_sorted_by_row_under_concurrency() {
    let rasterizer = Arc::new(MockRasterizer {
        delay: Duration::from_millis(5),
        ..Default::default()
    });
    let csv: String = std::iter::once("id,title".to_string())
        .chain((0..12).map(|i| format!("r{},t{}", i, i)))
        .collect::<Vec<_>>()
        .join("\n");
    let data = DataSet::from_csv_str(csv).unwrap();
    let pipeline = BatchPipeline::new(rasterizer, Arc::new(MemoryDocumentStore::new()), options(4));

    let report = pipeline.render_batch(data.rows(), TEMPLATE).await.unwrap();
    let indices: Vec<usize> = report.results.iter().map(|r| r.row_index).collect();
    assert_eq!(indices, (0..12).collect::<Vec<_>>());
    assert!(report.results[5].url.ends_with("text=t5"));
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let flaky = || {
        Arc::new(MockRasterizer {
            flaky_calls: AtomicUsize::new(1),
            ..Default::default()
        })
    };
    let one_row: Vec<DataRow> = rows().into_iter().take(1).collect();

    let pipeline = BatchPipeline::new(flaky(), Arc::new(MemoryDocumentStore::new()), options(1));
    let report = pipeline.render_batch(one_row.clone(), TEMPLATE).await.unwrap();
    assert_eq!(report.failures.len(), 1);

    let mut opts = options(1);
    opts.retries = 1;
    let rasterizer = flaky();
    let pipeline = BatchPipeline::new(rasterizer.clone(), Arc::new(MemoryDocumentStore::new()), opts);
    let report = pipeline.render_batch(one_row, TEMPLATE).await.unwrap();
    assert_eq!(report.results.len(), 1);
    assert_eq!(rasterizer.seen.lock().len(), 2);
}

#[tokio::test]
async fn test_upload_failure_is_isolated() {
    let pipeline = BatchPipeline::new(
        Arc::new(MockRasterizer::default()),
        Arc::new(FailingStore),
        options(2),
    );
    let report = pipeline.render_batch(rows(), TEMPLATE).await.unwrap();
    assert!(report.references().is_empty());
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures.iter().all(|f| f.stage == RowStage::Upload));
}

#[tokio::test]
async fn test_invalid_template_url_fails_batch() {
    let pipeline = BatchPipeline::new(
        Arc::new(MockRasterizer::default()),
        Arc::new(MemoryDocumentStore::new()),
        options(1),
    );
    let err = pipeline.render_batch(rows(), "not a url").await.unwrap_err();
    assert!(matches!(err, VariaError::InvalidUrl { .. }));
}

#[tokio::test]
async fn test_empty_input() {
    let pipeline = BatchPipeline::new(
        Arc::new(MockRasterizer::default()),
        Arc::new(MemoryDocumentStore::new()),
        options(3),
    );
    let report = pipeline.render_batch(Vec::new(), TEMPLATE).await.unwrap();
    assert_eq!(report.total_rows(), 0);
}

#[tokio::test]
async fn test_panicking_row_is_reported_as_render_failure() {
    let rasterizer = Arc::new(MockRasterizer {
        panic_on: Some("text=Hi"),
        ..Default::default()
    });
    let pipeline = BatchPipeline::new(rasterizer, Arc::new(MemoryDocumentStore::new()), options(1));
    let report = pipeline.render_batch(rows(), TEMPLATE).await.unwrap();

    assert_eq!(report.total_rows(), 2);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].row_index, 1);
    assert_eq!(report.failures[0].row_index, 0);
    assert_eq!(report.failures[0].stage, RowStage::Render);
    assert!(report.failures[0].url.ends_with("text=Hi"));
}

#[tokio::test]
async fn test_oversized_concurrency_is_clamped() {
    let pipeline = BatchPipeline::new(
        Arc::new(MockRasterizer::default()),
        Arc::new(MemoryDocumentStore::new()),
        options(usize::MAX),
    );
    let report = pipeline.render_batch(rows(), TEMPLATE).await.unwrap();
    assert_eq!(report.results.len(), 2);
}
