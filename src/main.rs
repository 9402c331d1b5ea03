//! # Catalog Image Optimizer - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del sistema di logging con `tracing`
//! - Validazione degli input dell'utente
//! - Paging del catalogo remoto e avvio del batch coordinator
//! - Rendering del progresso (progress bar o eventi JSON)
//!
//! ## Flusso di esecuzione:
//! 1. Parsa gli argomenti CLI (shop, endpoint, quality, batch-size, etc.)
//! 2. Configura il logging (INFO o DEBUG a seconda del flag verbose)
//! 3. Carica lo storico locale dello shop
//! 4. Pagina il catalogo remoto fino al limite richiesto
//! 5. Avvia il BatchCoordinator e segue gli snapshot di progresso
//! 6. Stampa il report finale con statistiche del run e storiche
//!
//! ## Esempio di utilizzo:
//! ```bash
//! catalog-optimizer --shop myshop.example.com \
//!     --endpoint https://myshop.example.com/admin/api/graphql \
//!     --quality 85 --batch-size 3 --verbose
//! ```

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use catalog_image_optimizer::{
    codec::CodecSettings,
    json_output::JsonMessage,
    progress::{format_size, BatchStats, ProgressManager},
    BatchCoordinator, CatalogGateway, CompressionJob, Config, HistoryStore, JpegCodec,
    OutcomeStatus, Product, RemoteCatalogGateway, SizeFetcher,
};

#[derive(Parser)]
#[command(name = "catalog-optimizer")]
#[command(about = "Compress product images and sync them back to the shop catalog")]
struct Args {
    /// Shop domain (keys the local compression history)
    #[arg(long)]
    shop: String,

    /// GraphQL endpoint of the catalog API
    #[arg(long)]
    endpoint: Option<String>,

    /// API access token (falls back to CATALOG_API_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// JPEG quality (1-100)
    #[arg(short, long, default_value = "80")]
    quality: u8,

    /// Maximum output dimension on the longest side
    #[arg(long, default_value = "2048")]
    max_dimension: u32,

    /// Maximum codec output size in bytes
    #[arg(long, default_value = "2097152")]
    max_bytes: u64,

    /// Carry the original EXIF segment into the re-encoded image
    #[arg(long)]
    preserve_metadata: bool,

    /// Products compressed concurrently per slice
    #[arg(short, long, default_value = "3")]
    batch_size: usize,

    /// Cooldown between slices in milliseconds
    #[arg(long, default_value = "500")]
    cooldown_ms: u64,

    /// Catalog page size when listing products
    #[arg(long, default_value = "50")]
    page_size: u32,

    /// HTTP request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Stop after this many products (0 = whole catalog)
    #[arg(short, long, default_value = "0")]
    limit: usize,

    /// Dry run - compress but don't touch the remote catalog
    #[arg(long)]
    dry_run: bool,

    /// Skip the verification read after each swap
    #[arg(long)]
    no_verify: bool,

    /// List products and their current image sizes, then exit
    #[arg(long)]
    list_only: bool,

    /// Show the most recent compression history records, then exit
    #[arg(long, value_name = "N")]
    history: Option<usize>,

    /// Output progress and status as JSON for programmatic use
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if args.shop.is_empty() {
        return Err(anyhow::anyhow!("Shop domain must not be empty"));
    }

    let history_store = HistoryStore::open(&args.shop).await?;

    // History browsing works offline
    if let Some(limit) = args.history {
        print_history(&history_store, limit);
        return Ok(());
    }

    let endpoint = args
        .endpoint
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--endpoint is required"))?;
    let token = match args.token.clone() {
        Some(token) => token,
        None => std::env::var("CATALOG_API_TOKEN")
            .map_err(|_| anyhow::anyhow!("Provide --token or set CATALOG_API_TOKEN"))?,
    };

    let config = Config {
        jpeg_quality: args.quality,
        max_dimension: args.max_dimension,
        max_bytes: args.max_bytes,
        preserve_metadata: args.preserve_metadata,
        batch_size: args.batch_size,
        cooldown_ms: args.cooldown_ms,
        page_size: args.page_size,
        request_timeout_secs: args.timeout,
        verify_after_swap: !args.no_verify,
        dry_run: args.dry_run,
        json_output: args.json,
    };
    config.validate()?;

    let gateway: Arc<dyn CatalogGateway> =
        Arc::new(RemoteCatalogGateway::new(&endpoint, &token, config.request_timeout_secs)?);
    let fetcher = SizeFetcher::new(config.request_timeout_secs)?;

    // Page through the catalog up to the requested limit
    let products = fetch_products(gateway.as_ref(), &config, args.limit).await?;
    info!("Found {} products with catalog pages", products.len());

    if args.list_only {
        print_catalog(&products, &fetcher).await;
        return Ok(());
    }

    if products.is_empty() {
        info!("No products found to process");
        return Ok(());
    }

    if config.dry_run {
        info!("🧪 Dry run mode: the remote catalog will not be modified");
    }
    info!(
        "🎯 Mode: JPEG quality {}, max dimension {}, slices of {}",
        config.jpeg_quality, config.max_dimension, config.batch_size
    );

    if config.json_output {
        JsonMessage::start(
            args.shop.clone(),
            products.len(),
            config.batch_size,
            config.jpeg_quality,
            config.dry_run,
        )
        .emit();
    }

    let history = Arc::new(Mutex::new(history_store));
    let job = CompressionJob::new(
        gateway,
        Arc::new(JpegCodec),
        Arc::new(fetcher),
        CodecSettings::from_config(&config),
        config.verify_after_swap,
        config.dry_run,
    );
    let coordinator = Arc::new(BatchCoordinator::new(
        job,
        config.batch_size,
        Duration::from_millis(config.cooldown_ms),
        config.dry_run,
        Some(Arc::clone(&history)),
    ));

    // Ctrl-C requests cooperative cancellation
    let ctrlc = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Cancellation requested, draining the current slice...");
                coordinator.cancel();
            }
        })
    };

    // Render progress snapshots as they stream in
    let progress_bar = ProgressManager::new(products.len() as u64);
    let render = {
        let mut rx = coordinator.subscribe();
        let progress_bar = progress_bar.clone();
        let json = config.json_output;
        tokio::spawn(async move {
            let mut seen = 0usize;
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow().clone();
                for outcome in &snapshot.outcomes[seen..] {
                    let message = match outcome.status {
                        OutcomeStatus::Success => {
                            format!("[OK] {}: {:.1}% saved", outcome.product_id, outcome.saved_percentage)
                        }
                        OutcomeStatus::Skipped => format!("[SKIP] {}", outcome.product_id),
                        OutcomeStatus::Failed => format!("[ERROR] {}", outcome.product_id),
                        OutcomeStatus::Cancelled => format!("[CANCELLED] {}", outcome.product_id),
                    };
                    progress_bar.update(&message);
                    if json {
                        JsonMessage::product_complete(outcome).emit();
                    }
                }
                if seen != snapshot.outcomes.len() {
                    seen = snapshot.outcomes.len();
                    if json {
                        JsonMessage::progress(&snapshot).emit();
                    }
                }
            }
        })
    };

    let report = match coordinator.run(products).await {
        Ok(report) => report,
        Err(e) => {
            // Coordinator-level failure: nothing ran, surface it as a banner
            if config.json_output {
                JsonMessage::error("batch run rejected".to_string(), Some(e.to_string())).emit();
            }
            ctrlc.abort();
            render.abort();
            return Err(e);
        }
    };

    ctrlc.abort();
    render.abort();
    let _ = render.await;

    // Final statistics
    let mut stats = BatchStats::new();
    for outcome in &report.progress.outcomes {
        match outcome.status {
            OutcomeStatus::Success => stats.add_optimized(outcome.original_size, outcome.compressed_size),
            OutcomeStatus::Skipped => stats.add_skipped(outcome.original_size),
            OutcomeStatus::Failed => stats.add_error(),
            OutcomeStatus::Cancelled => stats.add_cancelled(),
        }
    }
    progress_bar.finish(&stats.format_summary());

    if config.json_output {
        JsonMessage::complete(&report.progress, report.was_cancelled).emit();
    }

    let (total_records, total_saved, avg_reduction) = history.lock().await.get_stats();
    info!("=== Batch Run Complete ===");
    info!("Products completed this run: {}", report.progress.completed);
    info!("Images swapped this run: {}", report.progress.successful);
    info!("Products skipped this run: {}", report.progress.skipped);
    info!("Errors this run: {}", report.progress.failed);
    info!("Bytes saved this run: {}", format_size(stats.total_bytes_saved));
    info!("--- Historical Stats ---");
    info!("Total swaps ever recorded: {}", total_records);
    info!("Total bytes saved historically: {}", format_size(total_saved));
    info!("Average historical reduction: {:.2}%", avg_reduction);

    if report.was_cancelled {
        info!("Run was cancelled before completing the whole catalog");
    }
    if report.catalog_refresh_needed {
        info!("🔄 Catalog images changed: refresh any open catalog views");
    }

    Ok(())
}

/// Page through the remote catalog, stopping at `limit` products (0 = all)
async fn fetch_products(
    gateway: &dyn CatalogGateway,
    config: &Config,
    limit: usize,
) -> Result<Vec<Product>> {
    let mut products = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = gateway.list_products(cursor.as_deref(), config.page_size).await?;
        products.extend(page.items);

        if limit > 0 && products.len() >= limit {
            products.truncate(limit);
            break;
        }
        if !page.has_more {
            break;
        }
        cursor = page.next_cursor;
        if cursor.is_none() {
            break;
        }
    }

    Ok(products)
}

/// Print the catalog with best-effort image sizes
async fn print_catalog(products: &[Product], fetcher: &SizeFetcher) {
    for product in products {
        match &product.primary_image {
            Some(image) => {
                let size = match fetcher.fetch_len(&image.url).await {
                    Some(len) => format_size(len),
                    None => "unknown size".to_string(),
                };
                println!("{}  {}  [{}]", product.id, product.title, size);
            }
            None => println!("{}  {}  [no image]", product.id, product.title),
        }
    }
}

/// Print the most recent history records
fn print_history(store: &HistoryStore, limit: usize) {
    let limit = if limit == 0 { 10 } else { limit };
    let records = store.list_recent(limit);

    if records.is_empty() {
        println!("No compression history recorded yet");
        return;
    }

    for record in records {
        println!(
            "{}  {}  {} -> {} ({:.1}% saved)",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.product_id,
            format_size(record.original_size),
            format_size(record.compressed_size),
            record.saved_percentage
        );
    }

    let (count, saved, avg) = store.get_stats();
    println!(
        "--- {} swaps recorded, {} saved, average reduction {:.2}% ---",
        count,
        format_size(saved),
        avg
    );
}
