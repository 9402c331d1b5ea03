//! # Catalog Image Optimizer Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare dell'applicazione
//! - Espone i tipi e le funzioni principali tramite re-exports
//! - Fornisce un'interfaccia pulita per il main.rs e per altri consumatori
//!
//! ## Architettura dei moduli:
//! - `config`: Gestione configurazione e validazione parametri
//! - `error`: Tipi di errore custom per le diverse operazioni
//! - `catalog`: Snapshot di dominio e contratto del catalogo remoto
//! - `gateway`: Adapter GraphQL verso il catalogo remoto
//! - `codec`: Ricompressione in-memory delle immagini
//! - `size_fetcher`: Download e probe dimensioni delle risorse remote
//! - `job`: Unità di lavoro compress-and-swap per prodotto
//! - `coordinator`: Orchestratore del run batch a slice
//! - `history`: Storico append-only delle compressioni riuscite
//! - `progress`: Progress tracking e statistiche
//! - `json_output`: Eventi JSON per consumatori programmatici
//!
//! ## Utilizzo:
//! ```rust,ignore
//! use catalog_image_optimizer::{BatchCoordinator, CompressionJob, Config};
//!
//! let config = Config::default();
//! let coordinator = BatchCoordinator::new(job, config.batch_size, cooldown, false, None);
//! let report = coordinator.run(products).await?;
//! ```

pub mod catalog;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod history;
pub mod job;
pub mod json_output;
pub mod progress;
pub mod size_fetcher;

pub use catalog::{CatalogGateway, Image, Product, ProductPage};
pub use codec::{CodecSettings, ImageCodec, JpegCodec};
pub use config::Config;
pub use coordinator::{BatchCoordinator, BatchProgress, BatchRunReport};
pub use error::CompressError;
pub use gateway::RemoteCatalogGateway;
pub use history::{CompressionHistoryRecord, HistoryStore};
pub use job::{CompressionJob, CompressionOutcome, OutcomeStatus, SwapPhase};
pub use size_fetcher::SizeFetcher;
