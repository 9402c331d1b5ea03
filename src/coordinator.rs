//! # Batch Coordinator Module
//!
//! Questo è il modulo principale che orchestra il run di compressione batch.
//!
//! ## Responsabilità:
//! - Partiziona i prodotti in slice a dimensione fissa (default: 3)
//! - Esegue i job di una slice concorrentemente e attende l'intera slice
//! - Applica un cooldown fisso tra una slice e la successiva
//! - Aggrega gli outcome in `BatchProgress` (snapshot via watch channel)
//! - Registra lo storico per ogni swap riuscito
//! - Gestisce cancellazione cooperativa e single-flight per istanza
//!
//! ## Gestione concorrenza:
//! - Una sola slice in volo alla volta: limita il picco di carico rete/CPU
//!   restando più veloce dell'elaborazione sequenziale
//! - I job non condividono stato tra loro; l'aggregato è posseduto dal
//!   coordinator e aggiornato man mano che i job si concludono
//! - Gli outcome sono registrati in ordine di completamento, non di
//!   sottomissione: i chiamanti che vogliono l'ordine di input devono
//!   indicizzare per `product_id`
//!
//! ## Semantica di cancellazione:
//! Il flag condiviso è osservato (a) prima di avviare ogni slice, (b) nei job
//! prima di ogni chiamata di rete. I job già dispatchati nella slice corrente
//! finiscono; i loro outcome vengono registrati come `Cancelled`, tranne
//! quelli già oltre il point of no return che mantengono lo stato vero.
//!
//! ## Stato per run:
//! `Idle → Running → {Completed, Cancelled}`. Un secondo `run()` concorrente
//! sulla stessa istanza è rifiutato senza toccare il run in corso.
//!
//! ## Failure pre-flight:
//! Input malformato (id prodotto duplicati) è fatale per `run()` e viene
//! riportato al chiamante prima che qualunque job parta; i fallimenti dei
//! singoli job non abortiscono mai i fratelli né il run.

use crate::{
    catalog::Product,
    history::{CompressionHistoryRecord, HistoryStore},
    job::{CompressionJob, CompressionOutcome, OutcomeStatus},
};
use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Aggregate view of one batch run
///
/// Counters are monotonically non-decreasing for the duration of a run, and
/// `completed == successful + failed + skipped` holds at every snapshot;
/// cancelled jobs are listed in `outcomes` but did not complete their work.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub outcomes: Vec<CompressionOutcome>,
}

impl BatchProgress {
    fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            successful: 0,
            failed: 0,
            skipped: 0,
            cancelled: 0,
            outcomes: Vec::new(),
        }
    }
}

/// Final report of one batch run
#[derive(Debug)]
pub struct BatchRunReport {
    pub progress: BatchProgress,
    /// At least one swap landed: the caller should refresh its catalog view
    pub catalog_refresh_needed: bool,
    pub was_cancelled: bool,
}

/// Clears the single-flight flag when a run exits, on any path
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs compression jobs over a product list with bounded concurrency
pub struct BatchCoordinator {
    job: CompressionJob,
    batch_size: usize,
    cooldown: Duration,
    dry_run: bool,
    history: Option<Arc<Mutex<HistoryStore>>>,
    running: AtomicBool,
    cancel: StdMutex<CancellationToken>,
    progress_tx: watch::Sender<BatchProgress>,
}

impl BatchCoordinator {
    pub fn new(
        job: CompressionJob,
        batch_size: usize,
        cooldown: Duration,
        dry_run: bool,
        history: Option<Arc<Mutex<HistoryStore>>>,
    ) -> Self {
        let (progress_tx, _) = watch::channel(BatchProgress::new(0));
        Self {
            job,
            batch_size,
            cooldown,
            dry_run,
            history,
            running: AtomicBool::new(false),
            cancel: StdMutex::new(CancellationToken::new()),
            progress_tx,
        }
    }

    /// Observe progress snapshots of the current (or next) run
    pub fn subscribe(&self) -> watch::Receiver<BatchProgress> {
        self.progress_tx.subscribe()
    }

    /// Request cooperative cancellation of the run in progress
    pub fn cancel(&self) {
        self.cancel.lock().unwrap().cancel();
    }

    /// Process all products, slice by slice, until done or cancelled
    pub async fn run(&self, products: Vec<Product>) -> Result<BatchRunReport> {
        // Single-flight per coordinator instance
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(anyhow::anyhow!("a batch run is already active"));
        }
        let _guard = RunGuard(&self.running);

        // Pre-flight: a duplicate id would record two outcomes for one product
        let mut seen = HashSet::new();
        for product in &products {
            if !seen.insert(product.id.as_str()) {
                return Err(anyhow::anyhow!(
                    "duplicate product id in input: {}",
                    product.id
                ));
            }
        }

        // Fresh token per run; cancel() reaches the active one
        let token = {
            let mut cancel = self.cancel.lock().unwrap();
            *cancel = CancellationToken::new();
            cancel.clone()
        };

        info!(
            "Starting batch run: {} products, slices of {}",
            products.len(),
            self.batch_size
        );

        let mut progress = BatchProgress::new(products.len());
        self.progress_tx.send_replace(progress.clone());

        for (index, slice) in products.chunks(self.batch_size).enumerate() {
            if token.is_cancelled() {
                info!("Cancellation observed, not starting slice {}", index + 1);
                break;
            }

            if index > 0 {
                tokio::time::sleep(self.cooldown).await;
                if token.is_cancelled() {
                    info!("Cancellation observed during cooldown");
                    break;
                }
            }

            debug!("Dispatching slice {} ({} products)", index + 1, slice.len());

            let mut jobs: FuturesUnordered<_> = slice
                .iter()
                .map(|product| self.job.execute(product, &token))
                .collect();

            while let Some(mut outcome) = jobs.next().await {
                // An outcome settling after a cancellation request is
                // recorded as cancelled, unless a remote mutation already
                // committed - then its true status stands.
                if token.is_cancelled()
                    && outcome.status != OutcomeStatus::Cancelled
                    && !outcome.is_past_point_of_no_return()
                {
                    outcome.status = OutcomeStatus::Cancelled;
                    outcome.error = Some("cancelled".to_string());
                }
                self.record(&mut progress, outcome).await;
            }
        }

        let was_cancelled = token.is_cancelled();
        let catalog_refresh_needed = progress.successful > 0;

        info!(
            "Batch run {}: {}/{} completed, {} successful, {} failed, {} skipped, {} cancelled",
            if was_cancelled { "cancelled" } else { "finished" },
            progress.completed,
            progress.total,
            progress.successful,
            progress.failed,
            progress.skipped,
            progress.cancelled
        );

        Ok(BatchRunReport {
            progress,
            catalog_refresh_needed,
            was_cancelled,
        })
    }

    /// Fold one settled job into the aggregate and publish a snapshot
    async fn record(&self, progress: &mut BatchProgress, outcome: CompressionOutcome) {
        match outcome.status {
            OutcomeStatus::Success => {
                progress.successful += 1;
                progress.completed += 1;
            }
            OutcomeStatus::Failed => {
                progress.failed += 1;
                progress.completed += 1;
            }
            OutcomeStatus::Skipped => {
                progress.skipped += 1;
                progress.completed += 1;
            }
            OutcomeStatus::Cancelled => {
                progress.cancelled += 1;
            }
        }
        debug_assert_eq!(
            progress.completed,
            progress.successful + progress.failed + progress.skipped
        );
        debug_assert!(progress.completed <= progress.total);

        if outcome.status == OutcomeStatus::Success && !self.dry_run {
            if let Some(history) = &self.history {
                let record = CompressionHistoryRecord::new(
                    outcome.product_id.clone(),
                    outcome.original_image_id.clone().unwrap_or_default(),
                    outcome.new_image_id.clone().unwrap_or_default(),
                    outcome.original_size,
                    outcome.compressed_size,
                    outcome.saved_percentage,
                );
                if let Err(e) = history.lock().await.append_record(record).await {
                    warn!(
                        "Could not record history for product {}: {}",
                        outcome.product_id, e
                    );
                }
            }
        }

        progress.outcomes.push(outcome);
        self.progress_tx.send_replace(progress.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogGateway, Image, ProductPage};
    use crate::codec::{CodecSettings, ImageCodec};
    use crate::error::CompressError;
    use crate::job::SwapPhase;
    use crate::size_fetcher::ImageDownloader;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    /// Gateway double with per-product failure injection and an optional
    /// gate holding create calls open until the test releases them
    #[derive(Default)]
    struct TestGateway {
        calls: StdMutex<Vec<String>>,
        fail_create_for: HashSet<String>,
        create_gate: Option<Arc<Semaphore>>,
        create_entered: AtomicUsize,
        current: StdMutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl CatalogGateway for TestGateway {
        async fn list_products(&self, _cursor: Option<&str>, _page_size: u32) -> Result<ProductPage> {
            unimplemented!("not used by the coordinator")
        }

        async fn delete_image(&self, product_id: &str, image_id: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("delete:{}:{}", product_id, image_id));
            Ok(())
        }

        async fn create_image(&self, product_id: &str, _bytes: &[u8]) -> Result<Image> {
            self.create_entered.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.create_gate {
                gate.acquire().await.unwrap().forget();
            }
            self.calls
                .lock()
                .unwrap()
                .push(format!("create:{}", product_id));
            if self.fail_create_for.contains(product_id) {
                return Err(anyhow::anyhow!("create rejected by service"));
            }
            let image_id = format!("{}-img-new", product_id);
            self.current
                .lock()
                .unwrap()
                .insert(product_id.to_string(), image_id.clone());
            Ok(Image {
                id: image_id,
                url: format!("https://cdn/{}/new.jpg", product_id),
            })
        }

        async fn get_current_image(&self, product_id: &str) -> Result<Option<Image>> {
            Ok(self
                .current
                .lock()
                .unwrap()
                .get(product_id)
                .map(|id| Image {
                    id: id.clone(),
                    url: format!("https://cdn/{}/current.jpg", product_id),
                }))
        }
    }

    /// Downloader double with failure injection, a concurrency probe and an
    /// optional gate the test opens by adding permits
    struct TestDownloader {
        default_size: usize,
        size_overrides: HashMap<String, usize>,
        fail_urls: HashSet<String>,
        gate: Option<Arc<Semaphore>>,
        delay: Duration,
        hits: AtomicUsize,
        current: AtomicUsize,
        max_concurrent: AtomicUsize,
    }

    impl TestDownloader {
        fn new(default_size: usize) -> Self {
            Self {
                default_size,
                size_overrides: HashMap::new(),
                fail_urls: HashSet::new(),
                gate: None,
                delay: Duration::ZERO,
                hits: AtomicUsize::new(0),
                current: AtomicUsize::new(0),
                max_concurrent: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ImageDownloader for TestDownloader {
        async fn download(&self, url: &str) -> Result<Vec<u8>> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }

            self.current.fetch_sub(1, Ordering::SeqCst);

            if self.fail_urls.contains(url) {
                return Err(anyhow::anyhow!("connection reset"));
            }
            let size = self.size_overrides.get(url).copied().unwrap_or(self.default_size);
            Ok(vec![0u8; size])
        }
    }

    /// Codec double: halves the input, except the marker size that inflates
    struct HalvingCodec;

    impl ImageCodec for HalvingCodec {
        fn compress(&self, bytes: &[u8], _settings: &CodecSettings) -> Result<Vec<u8>, CompressError> {
            if bytes.len() == 1111 {
                return Ok(vec![0u8; 2222]);
            }
            Ok(vec![0u8; bytes.len() / 2])
        }
    }

    fn product(id: &str, with_image: bool) -> Product {
        Product {
            id: id.to_string(),
            title: format!("Product {}", id),
            primary_image: with_image.then(|| Image {
                id: format!("{}-img-old", id),
                url: image_url(id),
            }),
        }
    }

    fn image_url(id: &str) -> String {
        format!("https://cdn/{}/old.jpg", id)
    }

    fn settings() -> CodecSettings {
        CodecSettings {
            quality: 80,
            max_dimension: 2048,
            max_bytes: u64::MAX,
            preserve_metadata: false,
        }
    }

    fn coordinator(
        gateway: Arc<TestGateway>,
        downloader: Arc<TestDownloader>,
        batch_size: usize,
        history: Option<Arc<Mutex<HistoryStore>>>,
    ) -> BatchCoordinator {
        let job = CompressionJob::new(
            gateway,
            Arc::new(HalvingCodec),
            downloader,
            settings(),
            true,
            false,
        );
        BatchCoordinator::new(job, batch_size, Duration::from_millis(1), false, history)
    }

    #[tokio::test]
    async fn test_seven_products_slices_of_three_with_create_failure() {
        let gateway = Arc::new(TestGateway {
            fail_create_for: HashSet::from(["p5".to_string()]),
            ..Default::default()
        });
        let mut downloader = TestDownloader::new(2_000_000);
        downloader.delay = Duration::from_millis(10);
        let downloader = Arc::new(downloader);

        let coordinator = coordinator(Arc::clone(&gateway), Arc::clone(&downloader), 3, None);
        let products = (1..=7).map(|i| product(&format!("p{}", i), true)).collect();

        let report = coordinator.run(products).await.unwrap();

        // Slices [3,3,1]: never more than 3 jobs in flight
        assert_eq!(downloader.max_concurrent.load(Ordering::SeqCst), 3);
        assert_eq!(downloader.hits.load(Ordering::SeqCst), 7);

        let progress = &report.progress;
        assert_eq!(progress.total, 7);
        assert_eq!(progress.completed, 7);
        assert_eq!(progress.successful, 6);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.skipped, 0);
        assert_eq!(progress.completed, progress.successful + progress.failed + progress.skipped);
        assert!(report.catalog_refresh_needed);
        assert!(!report.was_cancelled);

        // Product #5: delete committed, create refused, transiently imageless
        let p5 = progress
            .outcomes
            .iter()
            .find(|o| o.product_id == "p5")
            .unwrap();
        assert_eq!(p5.status, OutcomeStatus::Failed);
        assert_eq!(p5.phase, SwapPhase::Deleted);
        assert!(p5.error.as_ref().unwrap().contains("create rejected by service"));
        assert!(gateway
            .calls
            .lock()
            .unwrap()
            .contains(&"delete:p5:p5-img-old".to_string()));
    }

    #[tokio::test]
    async fn test_duplicate_product_ids_rejected_before_any_job() {
        let gateway = Arc::new(TestGateway::default());
        let downloader = Arc::new(TestDownloader::new(2_000_000));
        let coordinator = coordinator(Arc::clone(&gateway), Arc::clone(&downloader), 3, None);

        let err = coordinator
            .run(vec![product("p1", true), product("p1", true)])
            .await
            .unwrap_err();

        assert!(err.to_string().contains("duplicate product id"));
        assert_eq!(downloader.hits.load(Ordering::SeqCst), 0);
        assert!(gateway.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_run_rejected_while_one_is_active() {
        let gateway = Arc::new(TestGateway::default());
        let gate = Arc::new(Semaphore::new(0));
        let mut downloader = TestDownloader::new(2_000_000);
        downloader.gate = Some(Arc::clone(&gate));
        let downloader = Arc::new(downloader);

        let coordinator = Arc::new(coordinator(gateway, Arc::clone(&downloader), 3, None));

        let first = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.run(vec![product("p1", true)]).await })
        };

        // Wait for the first run to be inside a download
        while downloader.hits.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let err = coordinator
            .run(vec![product("p2", true)])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already active"));

        // The in-progress run is unaffected and completes normally
        gate.add_permits(100);
        let report = first.await.unwrap().unwrap();
        assert_eq!(report.progress.successful, 1);

        // And the coordinator accepts a new run afterwards
        let report = coordinator.run(vec![product("p3", true)]).await.unwrap();
        assert_eq!(report.progress.completed, 1);
    }

    #[tokio::test]
    async fn test_cancellation_drains_current_slice_and_stops() {
        let gateway = Arc::new(TestGateway::default());
        let gate = Arc::new(Semaphore::new(0));
        let mut downloader = TestDownloader::new(2_000_000);
        downloader.gate = Some(Arc::clone(&gate));
        let downloader = Arc::new(downloader);

        let coordinator = Arc::new(coordinator(
            Arc::clone(&gateway),
            Arc::clone(&downloader),
            3,
            None,
        ));

        let run = {
            let coordinator = Arc::clone(&coordinator);
            let products = (1..=6).map(|i| product(&format!("p{}", i), true)).collect();
            tokio::spawn(async move { coordinator.run(products).await })
        };

        // First slice is in flight; cancel, then let the downloads finish
        while downloader.hits.load(Ordering::SeqCst) < 3 {
            tokio::task::yield_now().await;
        }
        coordinator.cancel();
        gate.add_permits(100);

        let report = run.await.unwrap().unwrap();
        let progress = &report.progress;

        // No second slice was started
        assert_eq!(downloader.hits.load(Ordering::SeqCst), 3);
        // Dispatched jobs observed the flag before their first mutation
        assert_eq!(progress.outcomes.len(), 3);
        assert_eq!(progress.cancelled, 3);
        assert_eq!(progress.completed, 0);
        assert_eq!(progress.completed, progress.successful + progress.failed + progress.skipped);
        assert!(gateway.calls.lock().unwrap().is_empty());
        assert!(report.was_cancelled);
        assert!(!report.catalog_refresh_needed);
    }

    #[tokio::test]
    async fn test_cancel_after_delete_keeps_true_outcome() {
        let create_gate = Arc::new(Semaphore::new(0));
        let gateway = Arc::new(TestGateway {
            create_gate: Some(Arc::clone(&create_gate)),
            ..Default::default()
        });
        let downloader = Arc::new(TestDownloader::new(2_000_000));

        let coordinator = Arc::new(coordinator(
            Arc::clone(&gateway),
            downloader,
            3,
            None,
        ));

        let run = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.run(vec![product("p1", true)]).await })
        };

        // The job is past its delete, blocked inside create: point of no return
        while gateway.create_entered.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        coordinator.cancel();
        create_gate.add_permits(1);

        let report = run.await.unwrap().unwrap();
        let progress = &report.progress;

        // The in-flight swap ran to completion and kept its true status
        assert_eq!(progress.successful, 1);
        assert_eq!(progress.cancelled, 0);
        assert_eq!(progress.outcomes[0].status, OutcomeStatus::Success);
        assert!(report.was_cancelled);
        assert!(report.catalog_refresh_needed);
    }

    #[tokio::test]
    async fn test_progress_snapshots_hold_the_counter_invariant() {
        let gateway = Arc::new(TestGateway::default());
        let mut downloader = TestDownloader::new(2_000_000);
        downloader.fail_urls.insert(image_url("p3"));
        downloader.size_overrides.insert(image_url("p5"), 1111);
        let downloader = Arc::new(downloader);

        let coordinator = coordinator(gateway, downloader, 2, None);
        let mut rx = coordinator.subscribe();

        let watcher = tokio::spawn(async move {
            loop {
                if rx.changed().await.is_err() {
                    break;
                }
                let progress = rx.borrow().clone();
                assert!(progress.completed <= progress.total);
                assert_eq!(
                    progress.completed,
                    progress.successful + progress.failed + progress.skipped
                );
                if progress.total > 0 && progress.completed + progress.cancelled == progress.total {
                    break;
                }
            }
        });

        let products = vec![
            product("p1", true),  // success
            product("p2", false), // skipped: no image
            product("p3", true),  // failed: download
            product("p4", true),  // success
            product("p5", true),  // skipped: no size reduction
        ];
        let report = coordinator.run(products).await.unwrap();
        watcher.await.unwrap();

        let progress = &report.progress;
        assert_eq!(progress.total, 5);
        assert_eq!(progress.completed, 5);
        assert_eq!(progress.successful, 2);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.skipped, 2);
        assert_eq!(progress.cancelled, 0);
        assert!(report.catalog_refresh_needed);
    }

    #[tokio::test]
    async fn test_history_is_appended_only_for_successful_swaps() {
        let temp_dir = TempDir::new().unwrap();
        let store = HistoryStore::open_in(temp_dir.path(), "shop.example.com")
            .await
            .unwrap();
        let history = Arc::new(Mutex::new(store));

        let gateway = Arc::new(TestGateway::default());
        let downloader = Arc::new(TestDownloader::new(2_000_000));
        let coordinator = coordinator(gateway, downloader, 3, Some(Arc::clone(&history)));

        let report = coordinator
            .run(vec![product("p1", true), product("p2", false)])
            .await
            .unwrap();
        assert_eq!(report.progress.successful, 1);
        assert_eq!(report.progress.skipped, 1);

        let store = history.lock().await;
        let records = store.list_recent(10);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].product_id, "p1");
        assert_eq!(records[0].original_image_id, "p1-img-old");
        assert_eq!(records[0].new_image_id, "p1-img-new");
        assert_eq!(records[0].original_size, 2_000_000);
        assert_eq!(records[0].compressed_size, 1_000_000);
        assert_eq!(records[0].saved_percentage, 50.0);
    }
}
