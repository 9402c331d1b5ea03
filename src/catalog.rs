//! # Catalog Domain Module
//!
//! Questo modulo definisce gli snapshot di dominio del catalogo remoto e il
//! contratto verso il servizio che lo espone.
//!
//! ## Responsabilità:
//! - Definisce `Product` e `Image` come snapshot immutabili per pagina
//! - Definisce `ProductPage` per la paginazione cursor-based
//! - Definisce il trait `CatalogGateway` consumato da job e coordinator
//!
//! ## Modello delle immagini:
//! Un'immagine viene sostituita, mai mutata in place: la sostituzione è una
//! coppia delete-then-create, quindi un prodotto resta brevemente senza
//! immagine a metà operazione.
//!
//! ## Contratto gateway:
//! - `list_products(cursor, page_size)`: una pagina di prodotti con cursore
//! - `delete_image(product_id, image_id)`: cancella per id
//! - `create_image(product_id, bytes)`: crea dai byte compressi
//! - `get_current_image(product_id)`: immagine corrente, se presente
//!
//! Gli errori service-level (rifiuti del servizio remoto) e quelli di
//! trasporto arrivano entrambi come `Err`; il chiamante li registra per
//! prodotto senza abortire il batch.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A product image as exposed by the remote catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub url: String,
}

/// Immutable product snapshot fetched per page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub primary_image: Option<Image>,
}

/// One page of products from the remote catalog
#[derive(Debug, Clone)]
pub struct ProductPage {
    pub items: Vec<Product>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Remote catalog service consumed by jobs and the coordinator
#[async_trait]
pub trait CatalogGateway: Send + Sync {
    /// List one page of products with their primary image
    async fn list_products(&self, cursor: Option<&str>, page_size: u32) -> Result<ProductPage>;

    /// Delete an image by id
    async fn delete_image(&self, product_id: &str, image_id: &str) -> Result<()>;

    /// Create a new image for a product from raw bytes
    async fn create_image(&self, product_id: &str, bytes: &[u8]) -> Result<Image>;

    /// Fetch the product's current primary image, if any
    async fn get_current_image(&self, product_id: &str) -> Result<Option<Image>>;
}
