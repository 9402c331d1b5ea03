//! # JSON Output Module
//!
//! Questo modulo gestisce l'output strutturato in JSON per consumatori
//! programmatici (UI embedded, wrapper di automazione).
//!
//! ## Responsabilità:
//! - Emette messaggi JSON line-delimited per eventi di progresso
//! - Utilizza le strutture esistenti di CompressionOutcome e BatchProgress
//! - Fornisce interfaccia standardizzata per comunicazione inter-processo
//!
//! ## Tipi di messaggi:
//! - `start`: Inizio del run di compressione
//! - `progress`: Snapshot aggregato corrente
//! - `product_complete`: Esito di un singolo prodotto
//! - `complete`: Fine run con statistiche finali
//! - `error`: Errore coordinator-level

use crate::coordinator::BatchProgress;
use crate::job::{CompressionOutcome, OutcomeStatus};
use serde::Serialize;

/// Tipo di messaggio JSON
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum JsonMessage {
    /// Inizio del run di compressione
    #[serde(rename = "start")]
    Start {
        shop_domain: String,
        total_products: usize,
        batch_size: usize,
        jpeg_quality: u8,
        dry_run: bool,
    },

    /// Snapshot aggregato corrente
    #[serde(rename = "progress")]
    Progress {
        total: usize,
        completed: usize,
        percentage: f64,
        successful: usize,
        failed: usize,
        skipped: usize,
        cancelled: usize,
    },

    /// Esito di un singolo prodotto
    #[serde(rename = "product_complete")]
    ProductComplete {
        product_id: String,
        status: OutcomeStatus,
        original_size: u64,
        compressed_size: u64,
        saved_percentage: f64,
        error: Option<String>,
    },

    /// Run completato
    #[serde(rename = "complete")]
    Complete {
        total: usize,
        successful: usize,
        failed: usize,
        skipped: usize,
        cancelled: usize,
        total_bytes_saved: u64,
        was_cancelled: bool,
    },

    /// Errore coordinator-level
    #[serde(rename = "error")]
    Error {
        message: String,
        details: Option<String>,
    },
}

impl JsonMessage {
    /// Emette il messaggio JSON su stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    /// Crea un messaggio di inizio
    pub fn start(
        shop_domain: String,
        total_products: usize,
        batch_size: usize,
        jpeg_quality: u8,
        dry_run: bool,
    ) -> Self {
        Self::Start {
            shop_domain,
            total_products,
            batch_size,
            jpeg_quality,
            dry_run,
        }
    }

    /// Crea un messaggio di progresso da uno snapshot aggregato
    pub fn progress(progress: &BatchProgress) -> Self {
        let percentage = if progress.total > 0 {
            (progress.completed as f64 / progress.total as f64) * 100.0
        } else {
            0.0
        };

        Self::Progress {
            total: progress.total,
            completed: progress.completed,
            percentage,
            successful: progress.successful,
            failed: progress.failed,
            skipped: progress.skipped,
            cancelled: progress.cancelled,
        }
    }

    /// Crea un messaggio di completamento prodotto
    pub fn product_complete(outcome: &CompressionOutcome) -> Self {
        Self::ProductComplete {
            product_id: outcome.product_id.clone(),
            status: outcome.status,
            original_size: outcome.original_size,
            compressed_size: outcome.compressed_size,
            saved_percentage: outcome.saved_percentage,
            error: outcome.error.clone(),
        }
    }

    /// Crea un messaggio di completamento generale
    pub fn complete(progress: &BatchProgress, was_cancelled: bool) -> Self {
        let total_bytes_saved = progress
            .outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Success)
            .map(|o| o.original_size.saturating_sub(o.compressed_size))
            .sum();

        Self::Complete {
            total: progress.total,
            successful: progress.successful,
            failed: progress.failed,
            skipped: progress.skipped,
            cancelled: progress.cancelled,
            total_bytes_saved,
            was_cancelled,
        }
    }

    /// Crea un messaggio di errore
    pub fn error(message: String, details: Option<String>) -> Self {
        Self::Error { message, details }
    }
}
