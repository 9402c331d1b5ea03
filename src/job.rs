//! # Compression Job Module
//!
//! Questo modulo implementa l'unità di lavoro del batch: comprimere
//! l'immagine principale di un prodotto e, se migliorata, sostituirla sul
//! catalogo remoto.
//!
//! ## Pipeline per prodotto:
//! 1. Nessuna immagine → outcome `Skipped` senza chiamate di rete
//! 2. Download dei byte originali (fallimento → `Failed`, no retry)
//! 3. Ricompressione via codec (offloaded su thread blocking)
//! 4. **Size-reduction gate**: output non più piccolo → `Skipped`, nessuna
//!    mutazione del catalogo
//! 5. Swap: delete dell'immagine esistente, poi create dai byte compressi
//! 6. Verifica opzionale: re-read dell'immagine corrente del prodotto
//!
//! ## Macchina a stati dello swap:
//! `Pending → Deleted → Created → Verified`. `Deleted` è il point of no
//! return: da lì in poi una mutazione remota è già committata e la
//! cancellazione non può più impedirla. Se la create fallisce dopo una
//! delete riuscita il prodotto resta transitoriamente senza immagine:
//! nessuna compensazione viene tentata.
//!
//! ## Cancellazione:
//! Il token è osservato prima di ogni chiamata di rete. Uno swap già in
//! volo corre fino al completamento; in quel caso la verifica viene saltata
//! e l'esito vero viene restituito.

use crate::{
    catalog::{CatalogGateway, Product},
    codec::{CodecSettings, ImageCodec},
    error::CompressError,
    size_fetcher::ImageDownloader,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Swap progress reached by a job, carried in its outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum SwapPhase {
    /// No remote mutation committed yet
    Pending,
    /// Old image deleted - the point of no return
    Deleted,
    /// New image created
    Created,
    /// New image confirmed visible
    Verified,
}

/// Terminal status of one attempted product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutcomeStatus {
    Success,
    Skipped,
    Failed,
    Cancelled,
}

/// One outcome per attempted product per run, terminal once created
#[derive(Debug, Clone, Serialize)]
pub struct CompressionOutcome {
    pub product_id: String,
    pub status: OutcomeStatus,
    pub original_size: u64,
    pub compressed_size: u64,
    /// Percentage saved, one decimal place; 0.0 unless the swap improved size
    pub saved_percentage: f64,
    pub error: Option<String>,
    pub phase: SwapPhase,
    pub original_image_id: Option<String>,
    pub new_image_id: Option<String>,
}

impl CompressionOutcome {
    fn base(product_id: &str) -> Self {
        Self {
            product_id: product_id.to_string(),
            status: OutcomeStatus::Skipped,
            original_size: 0,
            compressed_size: 0,
            saved_percentage: 0.0,
            error: None,
            phase: SwapPhase::Pending,
            original_image_id: None,
            new_image_id: None,
        }
    }

    fn skipped(product_id: &str, message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::base(product_id)
        }
    }

    fn cancelled(product_id: &str) -> Self {
        Self {
            status: OutcomeStatus::Cancelled,
            error: Some(CompressError::Cancelled.to_string()),
            ..Self::base(product_id)
        }
    }

    /// Whether a remote mutation is already committed for this outcome
    pub fn is_past_point_of_no_return(&self) -> bool {
        self.phase >= SwapPhase::Deleted
    }
}

/// Percentage saved, rounded to one decimal place
pub fn saved_percentage(original_size: u64, compressed_size: u64) -> f64 {
    if original_size == 0 || compressed_size >= original_size {
        return 0.0;
    }
    let ratio = (original_size - compressed_size) as f64 / original_size as f64;
    (ratio * 1000.0).round() / 10.0
}

/// Compresses one product's image and swaps it via the catalog gateway
pub struct CompressionJob {
    gateway: Arc<dyn CatalogGateway>,
    codec: Arc<dyn ImageCodec>,
    downloader: Arc<dyn ImageDownloader>,
    settings: CodecSettings,
    verify_after_swap: bool,
    dry_run: bool,
}

impl CompressionJob {
    pub fn new(
        gateway: Arc<dyn CatalogGateway>,
        codec: Arc<dyn ImageCodec>,
        downloader: Arc<dyn ImageDownloader>,
        settings: CodecSettings,
        verify_after_swap: bool,
        dry_run: bool,
    ) -> Self {
        Self {
            gateway,
            codec,
            downloader,
            settings,
            verify_after_swap,
            dry_run,
        }
    }

    /// Run the full pipeline for one product
    ///
    /// Never panics and never propagates: every failure mode is folded into
    /// the returned outcome so sibling jobs are unaffected.
    pub async fn execute(&self, product: &Product, cancel: &CancellationToken) -> CompressionOutcome {
        let image = match &product.primary_image {
            Some(image) => image.clone(),
            None => {
                debug!("Product {} has no primary image", product.id);
                return CompressionOutcome::skipped(&product.id, &CompressError::NoImage.to_string());
            }
        };

        let mut outcome = CompressionOutcome::base(product.id.as_str());
        outcome.original_image_id = Some(image.id.clone());

        // Download
        if cancel.is_cancelled() {
            return CompressionOutcome::cancelled(&product.id);
        }
        let original_bytes = match self.downloader.download(&image.url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Download failed for product {}: {}", product.id, e);
                outcome.status = OutcomeStatus::Failed;
                outcome.error = Some(CompressError::Fetch(e.to_string()).to_string());
                return outcome;
            }
        };
        outcome.original_size = original_bytes.len() as u64;

        // Re-encode off the orchestrating thread
        let codec = Arc::clone(&self.codec);
        let settings = self.settings.clone();
        let compressed = tokio::task::spawn_blocking(move || codec.compress(&original_bytes, &settings))
            .await
            .unwrap_or_else(|e| Err(CompressError::Codec(e.to_string())));
        let compressed = match compressed {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Re-encoding failed for product {}: {}", product.id, e);
                outcome.status = OutcomeStatus::Failed;
                outcome.error = Some(CompressError::Codec(e.to_string()).to_string());
                return outcome;
            }
        };
        outcome.compressed_size = compressed.len() as u64;

        // Size-reduction gate: never upload a non-improvement
        if outcome.compressed_size >= outcome.original_size {
            debug!(
                "Product {}: {} -> {} bytes, keeping original",
                product.id, outcome.original_size, outcome.compressed_size
            );
            outcome.status = OutcomeStatus::Skipped;
            outcome.error = Some(CompressError::NoSizeReduction.to_string());
            return outcome;
        }
        outcome.saved_percentage = saved_percentage(outcome.original_size, outcome.compressed_size);

        if self.dry_run {
            debug!(
                "Dry run: would swap image of product {} ({:.1}% saved)",
                product.id, outcome.saved_percentage
            );
            outcome.status = OutcomeStatus::Success;
            return outcome;
        }

        // Swap: delete the old image, then create the new one. Once the
        // delete commits the swap runs to completion, cancelled or not.
        if cancel.is_cancelled() {
            return CompressionOutcome::cancelled(&product.id);
        }
        if let Err(e) = self.gateway.delete_image(&product.id, &image.id).await {
            warn!("Delete failed for product {}: {}", product.id, e);
            outcome.status = OutcomeStatus::Failed;
            outcome.error = Some(CompressError::CatalogDelete(e.to_string()).to_string());
            return outcome;
        }
        outcome.phase = SwapPhase::Deleted;

        let new_image = match self.gateway.create_image(&product.id, &compressed).await {
            Ok(image) => image,
            Err(e) => {
                // The old image is gone and nothing replaces it; no
                // compensation is attempted.
                warn!(
                    "Create failed for product {} after delete, product is imageless: {}",
                    product.id, e
                );
                outcome.status = OutcomeStatus::Failed;
                outcome.error = Some(CompressError::CatalogCreate(e.to_string()).to_string());
                return outcome;
            }
        };
        outcome.phase = SwapPhase::Created;
        outcome.new_image_id = Some(new_image.id.clone());

        // Verification read; skipped when cancellation arrived mid-swap
        if self.verify_after_swap && !cancel.is_cancelled() {
            match self.gateway.get_current_image(&product.id).await {
                Ok(Some(current)) if current.id == new_image.id => {
                    outcome.phase = SwapPhase::Verified;
                }
                Ok(current) => {
                    outcome.status = OutcomeStatus::Failed;
                    outcome.error = Some(
                        CompressError::Verification(format!(
                            "expected image {}, found {:?}",
                            new_image.id,
                            current.map(|i| i.id)
                        ))
                        .to_string(),
                    );
                    return outcome;
                }
                Err(e) => {
                    outcome.status = OutcomeStatus::Failed;
                    outcome.error =
                        Some(CompressError::Verification(e.to_string()).to_string());
                    return outcome;
                }
            }
        }

        debug!(
            "Product {}: swapped image ({} -> {} bytes, {:.1}% saved)",
            product.id, outcome.original_size, outcome.compressed_size, outcome.saved_percentage
        );
        outcome.status = OutcomeStatus::Success;
        outcome
    }
}
