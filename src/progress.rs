//! # Progress Tracking and Statistics Module
//!
//! Questo modulo gestisce il progress tracking e le statistiche di batch.
//!
//! ## Responsabilità:
//! - Progress bar visual con `indicatif` per feedback real-time
//! - Tracking statistiche del run (prodotti elaborati, saved, errors)
//! - Calcolo percentuali di riduzione e byte risparmiati
//! - Report finali con statistiche aggregate
//!
//! ## Componenti principali:
//! - `ProgressManager`: Gestisce progress bar principale
//! - `BatchStats`: Traccia statistiche cumulative del run
//!
//! ## Statistiche tracciate:
//! - **products_processed**: Totale prodotti elaborati
//! - **products_optimized**: Prodotti con swap completato
//! - **products_skipped**: Prodotti saltati (nessuna immagine o riduzione)
//! - **products_cancelled**: Prodotti interrotti dalla cancellazione
//! - **total_bytes_saved**: Byte totali risparmiati
//! - **errors**: Numero di errori durante il run
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:00:42] [====================>-------------------] 21/40 (52%) [OK] Mug: 45.2% saved
//! ```

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Manages progress reporting for a batch run
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    /// Create a new progress manager
    pub fn new(total_products: u64) -> Self {
        let bar = ProgressBar::new(total_products);

        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap()
                .progress_chars("=>-"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update progress with a message
    pub fn update(&self, message: &str) {
        self.bar.inc(1);
        self.bar.set_message(message.to_string());
    }

    /// Set a custom message without incrementing
    pub fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    /// Finish with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

/// Statistics tracker for one batch run
#[derive(Debug, Default)]
pub struct BatchStats {
    pub products_processed: usize,
    pub products_optimized: usize,
    pub products_skipped: usize,
    pub products_cancelled: usize,
    pub total_bytes_saved: u64,
    pub total_original_size: u64,
    pub errors: usize,
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_optimized(&mut self, original_size: u64, new_size: u64) {
        self.products_processed += 1;
        self.products_optimized += 1;
        self.total_original_size += original_size;
        self.total_bytes_saved += original_size.saturating_sub(new_size);
    }

    pub fn add_skipped(&mut self, original_size: u64) {
        self.products_processed += 1;
        self.products_skipped += 1;
        self.total_original_size += original_size;
    }

    pub fn add_cancelled(&mut self) {
        self.products_cancelled += 1;
    }

    pub fn add_error(&mut self) {
        self.products_processed += 1;
        self.errors += 1;
    }

    pub fn overall_reduction_percent(&self) -> f64 {
        if self.total_original_size > 0 {
            (self.total_bytes_saved as f64 / self.total_original_size as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn format_summary(&self) -> String {
        format!(
            "Processed: {} products | Optimized: {} | Skipped: {} | Cancelled: {} | Errors: {} | Total saved: {} ({:.2}%)",
            self.products_processed,
            self.products_optimized,
            self.products_skipped,
            self.products_cancelled,
            self.errors,
            format_size(self.total_bytes_saved),
            self.overall_reduction_percent()
        )
    }
}

/// Get human-readable byte size
pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
