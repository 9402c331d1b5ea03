//! # Compression History Module
//!
//! Questo modulo gestisce lo storico append-only delle compressioni riuscite.
//!
//! ## Responsabilità:
//! - Registra una riga write-once per ogni swap andato a buon fine
//! - Persiste lo storico in file JSON per shop specifico
//! - Fornisce le righe più recenti per la visualizzazione
//! - Fornisce statistiche aggregate per il report finale
//!
//! ## Strutture dati:
//! - `CompressionHistoryRecord`: una compressione registrata (prodotto,
//!   immagini, dimensioni, percentuale risparmiata, timestamp)
//! - `HistoryFile`: container per tutte le righe di uno shop
//! - `HistoryStore`: gestisce operazioni di lettura/scrittura storico
//!
//! ## Strategia di persistence:
//! - Un file JSON per shop (basato su hash del dominio)
//! - Salvataggio in `~/.catalog-optimizer/history_<hash>.json`
//! - Le righe sono terminali: mai mutate dopo la creazione
//!
//! ## Esempio struttura history file:
//! ```json
//! {
//!   "records": [
//!     {
//!       "id": 1,
//!       "product_id": "gid://shop/Product/1",
//!       "original_image_id": "gid://shop/Image/11",
//!       "new_image_id": "gid://shop/Image/12",
//!       "original_size": 2000000,
//!       "compressed_size": 800000,
//!       "saved_percentage": 60.0,
//!       "created_at": "2026-08-06T10:00:00Z",
//!       "updated_at": "2026-08-06T10:00:00Z"
//!     }
//!   ],
//!   "next_id": 2
//! }
//! ```

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;

/// One recorded compression outcome, write-once after a successful swap
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CompressionHistoryRecord {
    pub id: u64,
    pub product_id: String,
    pub original_image_id: String,
    pub new_image_id: String,
    pub original_size: u64,
    pub compressed_size: u64,
    pub saved_percentage: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CompressionHistoryRecord {
    /// Build a record for a completed swap; the store assigns the id
    pub fn new(
        product_id: String,
        original_image_id: String,
        new_image_id: String,
        original_size: u64,
        compressed_size: u64,
        saved_percentage: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            product_id,
            original_image_id,
            new_image_id,
            original_size,
            compressed_size,
            saved_percentage,
            created_at: now,
            updated_at: now,
        }
    }
}

/// History file for one shop
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct HistoryFile {
    pub records: Vec<CompressionHistoryRecord>,
    pub next_id: u64,
}

/// Manages the append-only compression history of one shop
pub struct HistoryStore {
    history_file_path: PathBuf,
    history: HistoryFile,
}

impl HistoryStore {
    /// Open the history store for a shop under the user's home directory
    pub async fn open(shop_domain: &str) -> Result<Self> {
        let state_dir = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?
            .join(".catalog-optimizer");

        Self::open_in(&state_dir, shop_domain).await
    }

    /// Open the history store rooted at a specific directory
    pub async fn open_in(state_dir: &Path, shop_domain: &str) -> Result<Self> {
        fs::create_dir_all(state_dir).await?;

        // Create unique history file based on shop domain hash
        let mut hasher = Sha256::new();
        hasher.update(shop_domain.as_bytes());
        let hash = hex::encode(hasher.finalize())[..16].to_string();

        let history_file_path = state_dir.join(format!("history_{}.json", hash));

        let history = if history_file_path.exists() {
            let content = fs::read_to_string(&history_file_path).await?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            HistoryFile::default()
        };

        Ok(Self {
            history_file_path,
            history,
        })
    }

    /// Save current history to file
    pub async fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.history)?;
        fs::write(&self.history_file_path, content).await?;
        Ok(())
    }

    /// Append a write-once record for a successful swap
    pub async fn append_record(&mut self, mut record: CompressionHistoryRecord) -> Result<()> {
        self.history.next_id += 1;
        record.id = self.history.next_id;
        self.history.records.push(record);
        self.save().await
    }

    /// Most recent records first, up to `limit`
    pub fn list_recent(&self, limit: usize) -> Vec<&CompressionHistoryRecord> {
        self.history.records.iter().rev().take(limit).collect()
    }

    /// Get statistics about recorded compressions
    pub fn get_stats(&self) -> (usize, u64, f64) {
        let count = self.history.records.len();
        let total_saved: u64 = self
            .history
            .records
            .iter()
            .map(|r| r.original_size.saturating_sub(r.compressed_size))
            .sum();
        let avg_reduction: f64 = if count > 0 {
            self.history
                .records
                .iter()
                .map(|r| r.saved_percentage)
                .sum::<f64>()
                / count as f64
        } else {
            0.0
        };

        (count, total_saved, avg_reduction)
    }
}
