//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore custom dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce `CompressError` enum per categorizzare gli errori dei job
//! - Fornisce messaggi di errore descrittivi e strutturati
//! - Integra con `thiserror` per automatic error conversion
//!
//! ## Categorie di errori:
//! - `NoImage`: Il prodotto non ha un'immagine principale (soft, mappa a skip)
//! - `Fetch`: Download dell'immagine originale fallito
//! - `Codec`: Ricompressione dell'immagine fallita
//! - `NoSizeReduction`: L'output del codec non è più piccolo (soft, mappa a skip)
//! - `CatalogDelete`: Il servizio remoto ha rifiutato la cancellazione
//! - `CatalogCreate`: Il servizio remoto ha rifiutato la creazione
//! - `Verification`: L'immagine creata non risulta visibile al re-check
//! - `Cancelled`: Il job è stato interrotto da una cancellazione cooperativa
//!
//! ## Esempio:
//! ```rust,ignore
//! if product.primary_image.is_none() {
//!     return CompressionOutcome::skipped(&product.id, CompressError::NoImage);
//! }
//! ```

/// Custom error types for catalog image compression
#[derive(thiserror::Error, Debug)]
pub enum CompressError {
    #[error("no image found")]
    NoImage,

    #[error("image download failed: {0}")]
    Fetch(String),

    #[error("image re-encoding failed: {0}")]
    Codec(String),

    #[error("no size reduction achieved")]
    NoSizeReduction,

    #[error("catalog delete failed: {0}")]
    CatalogDelete(String),

    #[error("catalog create failed: {0}")]
    CatalogCreate(String),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("cancelled")]
    Cancelled,

    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),
}
