//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con tutti i parametri di compressione e batch
//! - Fornisce validazione robusta dei parametri di input
//! - Supporta caricamento/salvataggio configurazione da/verso file JSON
//! - Fornisce valori di default sensati per tutti i parametri
//!
//! ## Parametri di configurazione:
//! - `jpeg_quality`: Qualità JPEG di partenza (1-100, default: 80)
//! - `max_dimension`: Lato massimo dell'immagine ricompressa (default: 2048)
//! - `max_bytes`: Dimensione massima dell'output del codec (default: 2 MiB)
//! - `preserve_metadata`: Conserva il segmento EXIF originale (default: false)
//! - `batch_size`: Prodotti elaborati concorrentemente per slice (default: 3)
//! - `cooldown_ms`: Pausa fissa tra una slice e la successiva (default: 500)
//! - `page_size`: Prodotti per pagina del catalogo remoto (default: 50)
//! - `request_timeout_secs`: Timeout client-level delle chiamate HTTP (default: 30)
//! - `verify_after_swap`: Re-check dell'immagine creata (default: true)
//! - `dry_run`: Simula senza mutare il catalogo (default: false)
//! - `json_output`: Emette eventi JSON per uso programmatico (default: false)
//!
//! ## Validazione:
//! - Controlla che jpeg_quality sia 1-100
//! - Controlla che max_dimension e max_bytes siano > 0
//! - Controlla che batch_size e page_size siano > 0
//!
//! ## Esempio:
//! ```rust,ignore
//! let config = Config {
//!     jpeg_quality: 85,
//!     batch_size: 5,
//!     ..Default::default()
//! };
//! config.validate()?;
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for catalog image compression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Starting JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Maximum output dimension on the longest side
    pub max_dimension: u32,
    /// Maximum codec output size in bytes
    pub max_bytes: u64,
    /// Carry the original EXIF segment into the re-encoded image
    pub preserve_metadata: bool,
    /// Number of products compressed concurrently per slice
    pub batch_size: usize,
    /// Cooldown between slices in milliseconds
    pub cooldown_ms: u64,
    /// Catalog page size when listing products
    pub page_size: u32,
    /// Client-level HTTP request timeout in seconds
    pub request_timeout_secs: u64,
    /// Re-read the product image after a swap to confirm visibility
    pub verify_after_swap: bool,
    /// Dry run - compress but don't touch the remote catalog
    pub dry_run: bool,
    /// Output progress and status as JSON for programmatic use
    pub json_output: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jpeg_quality: 80,
            max_dimension: 2048,
            max_bytes: 2 * 1024 * 1024,
            preserve_metadata: false,
            batch_size: 3,
            cooldown_ms: 500,
            page_size: 50,
            request_timeout_secs: 30,
            verify_after_swap: true,
            dry_run: false,
            json_output: false,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(anyhow::anyhow!("JPEG quality must be between 1 and 100"));
        }

        if self.max_dimension == 0 {
            return Err(anyhow::anyhow!("Max dimension must be greater than 0"));
        }

        if self.max_bytes == 0 {
            return Err(anyhow::anyhow!("Max output size must be greater than 0"));
        }

        if self.batch_size == 0 {
            return Err(anyhow::anyhow!("Batch size must be greater than 0"));
        }

        if self.page_size == 0 {
            return Err(anyhow::anyhow!("Page size must be greater than 0"));
        }

        if self.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Request timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Load configuration from file
    pub async fn from_file(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.jpeg_quality = 0;
        assert!(config.validate().is_err());

        config.jpeg_quality = 80;
        config.batch_size = 0;
        assert!(config.validate().is_err());

        config.batch_size = 3;
        config.max_dimension = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.jpeg_quality, 80);
        assert_eq!(config.max_dimension, 2048);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.cooldown_ms, 500);
        assert!(config.verify_after_swap);
        assert!(!config.dry_run);
    }

    #[tokio::test]
    async fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let original_config = Config {
            jpeg_quality: 85,
            max_dimension: 1600,
            batch_size: 5,
            cooldown_ms: 250,
            dry_run: true,
            ..Default::default()
        };

        // Save config
        original_config.save_to_file(&config_path).await.unwrap();

        // Load config
        let loaded_config = Config::from_file(&config_path).await.unwrap();

        assert_eq!(loaded_config.jpeg_quality, 85);
        assert_eq!(loaded_config.max_dimension, 1600);
        assert_eq!(loaded_config.batch_size, 5);
        assert_eq!(loaded_config.cooldown_ms, 250);
        assert!(loaded_config.dry_run);
    }

    #[tokio::test]
    async fn test_config_missing_file_falls_back_to_default() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("does_not_exist.json");

        let config = Config::from_file(&config_path).await.unwrap();
        assert_eq!(config.jpeg_quality, Config::default().jpeg_quality);
    }
}
