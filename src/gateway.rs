//! # Remote Catalog Gateway Module
//!
//! Questo modulo implementa `CatalogGateway` contro l'endpoint GraphQL admin
//! della piattaforma remota.
//!
//! ## Responsabilità:
//! - Client HTTP condiviso con bearer token e timeout client-level
//! - Paginazione cursor-based della lista prodotti
//! - Mutazioni delete/create immagine con gestione `userErrors`
//! - Upload dei byte compressi come attachment base64
//!
//! ## Gestione errori:
//! - Errori di trasporto (HTTP, timeout) → `Err` con il contesto reqwest
//! - Errori GraphQL top-level → `Err` con i messaggi concatenati
//! - `userErrors` nel payload della mutazione → `Err` service-level
//!
//! Il gateway non distingue le fasi del job: è il chiamante a mappare un
//! errore di delete o di create sulla rispettiva categoria.
//!
//! ## Nota sullo schema:
//! Le semantiche dell'API remota sono trattate come black-box; le query qui
//! sotto coprono esattamente le quattro operazioni consumate dal batch.

use crate::catalog::{CatalogGateway, Image, Product, ProductPage};
use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const LIST_PRODUCTS_QUERY: &str = r#"
query ListProducts($pageSize: Int!, $cursor: String) {
  products(first: $pageSize, after: $cursor) {
    edges {
      node {
        id
        title
        featuredImage { id url }
      }
    }
    pageInfo { hasNextPage endCursor }
  }
}
"#;

const DELETE_IMAGE_MUTATION: &str = r#"
mutation DeleteImage($productId: ID!, $imageId: ID!) {
  productImageDelete(productId: $productId, imageId: $imageId) {
    deletedImageId
    userErrors { field message }
  }
}
"#;

const CREATE_IMAGE_MUTATION: &str = r#"
mutation CreateImage($productId: ID!, $attachment: String!) {
  productImageCreate(productId: $productId, attachment: $attachment) {
    image { id url }
    userErrors { field message }
  }
}
"#;

const CURRENT_IMAGE_QUERY: &str = r#"
query CurrentImage($productId: ID!) {
  product(id: $productId) {
    featuredImage { id url }
  }
}
"#;

/// GraphQL adapter for the remote product catalog
pub struct RemoteCatalogGateway {
    client: Client,
    endpoint: String,
}

impl RemoteCatalogGateway {
    /// Create a gateway for one shop endpoint
    pub fn new(endpoint: &str, api_token: &str, timeout_secs: u64) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_token))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    /// Execute one GraphQL request and unwrap the data envelope
    async fn execute(&self, query: &str, variables: serde_json::Value) -> Result<serde_json::Value> {
        let body = serde_json::json!({ "query": query, "variables": variables });

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("catalog API returned status {}", status));
        }

        let envelope: GraphQlEnvelope = response.json().await?;

        if let Some(errors) = envelope.errors {
            if !errors.is_empty() {
                let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
                return Err(anyhow::anyhow!("GraphQL errors: {}", messages.join("; ")));
            }
        }

        envelope
            .data
            .ok_or_else(|| anyhow::anyhow!("GraphQL response contained no data"))
    }
}

#[async_trait]
impl CatalogGateway for RemoteCatalogGateway {
    async fn list_products(&self, cursor: Option<&str>, page_size: u32) -> Result<ProductPage> {
        let variables = serde_json::json!({ "pageSize": page_size, "cursor": cursor });
        let data = self.execute(LIST_PRODUCTS_QUERY, variables).await?;
        let parsed: ProductsData = serde_json::from_value(data)?;

        debug!(
            "Listed {} products (has_more: {})",
            parsed.products.edges.len(),
            parsed.products.page_info.has_next_page
        );

        Ok(ProductPage {
            items: parsed
                .products
                .edges
                .into_iter()
                .map(|edge| Product {
                    id: edge.node.id,
                    title: edge.node.title,
                    primary_image: edge.node.featured_image.map(Image::from),
                })
                .collect(),
            next_cursor: parsed.products.page_info.end_cursor,
            has_more: parsed.products.page_info.has_next_page,
        })
    }

    async fn delete_image(&self, product_id: &str, image_id: &str) -> Result<()> {
        let variables = serde_json::json!({ "productId": product_id, "imageId": image_id });
        let data = self.execute(DELETE_IMAGE_MUTATION, variables).await?;
        let parsed: DeleteData = serde_json::from_value(data)?;

        check_user_errors(&parsed.product_image_delete.user_errors)?;

        if parsed.product_image_delete.deleted_image_id.is_none() {
            return Err(anyhow::anyhow!("service did not confirm image deletion"));
        }

        debug!("Deleted image {} of product {}", image_id, product_id);
        Ok(())
    }

    async fn create_image(&self, product_id: &str, bytes: &[u8]) -> Result<Image> {
        let attachment = STANDARD.encode(bytes);
        let variables = serde_json::json!({ "productId": product_id, "attachment": attachment });
        let data = self.execute(CREATE_IMAGE_MUTATION, variables).await?;
        let parsed: CreateData = serde_json::from_value(data)?;

        check_user_errors(&parsed.product_image_create.user_errors)?;

        let image = parsed
            .product_image_create
            .image
            .ok_or_else(|| anyhow::anyhow!("service did not return the created image"))?;

        debug!("Created image {} for product {}", image.id, product_id);
        Ok(Image::from(image))
    }

    async fn get_current_image(&self, product_id: &str) -> Result<Option<Image>> {
        let variables = serde_json::json!({ "productId": product_id });
        let data = self.execute(CURRENT_IMAGE_QUERY, variables).await?;
        let parsed: CurrentImageData = serde_json::from_value(data)?;

        Ok(parsed
            .product
            .and_then(|p| p.featured_image)
            .map(Image::from))
    }
}

/// Turn a non-empty `userErrors` list into a service-level error
fn check_user_errors(errors: &[UserError]) -> Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
    Err(anyhow::anyhow!("{}", messages.join("; ")))
}

#[derive(Debug, Deserialize)]
struct GraphQlEnvelope {
    data: Option<serde_json::Value>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ProductsData {
    products: ProductConnection,
}

#[derive(Debug, Deserialize)]
struct ProductConnection {
    edges: Vec<ProductEdge>,
    #[serde(rename = "pageInfo")]
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct ProductEdge {
    node: ProductNode,
}

#[derive(Debug, Deserialize)]
struct ProductNode {
    id: String,
    title: String,
    #[serde(rename = "featuredImage")]
    featured_image: Option<ImageNode>,
}

#[derive(Debug, Deserialize)]
struct ImageNode {
    id: String,
    url: String,
}

impl From<ImageNode> for Image {
    fn from(node: ImageNode) -> Self {
        Image {
            id: node.id,
            url: node.url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(rename = "hasNextPage")]
    has_next_page: bool,
    #[serde(rename = "endCursor")]
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteData {
    #[serde(rename = "productImageDelete")]
    product_image_delete: DeletePayload,
}

#[derive(Debug, Deserialize)]
struct DeletePayload {
    #[serde(rename = "deletedImageId")]
    deleted_image_id: Option<String>,
    #[serde(rename = "userErrors")]
    user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
struct CreateData {
    #[serde(rename = "productImageCreate")]
    product_image_create: CreatePayload,
}

#[derive(Debug, Deserialize)]
struct CreatePayload {
    image: Option<ImageNode>,
    #[serde(rename = "userErrors")]
    user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
struct CurrentImageData {
    product: Option<CurrentImageNode>,
}

#[derive(Debug, Deserialize)]
struct CurrentImageNode {
    #[serde(rename = "featuredImage")]
    featured_image: Option<ImageNode>,
}

#[derive(Debug, Deserialize)]
struct UserError {
    #[allow(dead_code)]
    field: Option<Vec<String>>,
    message: String,
}
