//! # Product Repository
//!
//! Product reads and inserts.
//!
//! Catalog fields (sku, name, price) are owned by the surrounding ERP; this
//! engine only ever writes `stock_quantity`, and exclusively through
//! [`crate::repository::stock::StockRepository::apply`]. Nothing in this
//! module touches that column.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use varejo_core::Product;

const PRODUCT_COLUMNS: &str = "id, sku, name, price_cents, stock_quantity, \
     minimum_stock_level, is_active, created_at, updated_at";

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Gets a product by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Gets a product by its SKU.
    pub async fn get_by_sku(&self, sku: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = ?1"
        ))
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Lists active products sorted by name.
    pub async fn list_active(&self, limit: u32) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE is_active = 1 ORDER BY name LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    /// Lists active products at or below their minimum stock level.
    ///
    /// Read query backing replenishment screens; the push-style alert is the
    /// engine's low-stock broadcast.
    pub async fn list_below_minimum(&self) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE is_active = 1 AND stock_quantity <= minimum_stock_level \
             ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    /// Inserts a new product.
    ///
    /// ## Errors
    /// * `DbError::UniqueViolation` - SKU already exists
    pub async fn insert(&self, product: &Product) -> DbResult<()> {
        debug!(sku = %product.sku, "Inserting product");

        sqlx::query(
            "INSERT INTO products (
                id, sku, name, price_cents, stock_quantity,
                minimum_stock_level, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.price_cents)
        .bind(product.stock_quantity)
        .bind(product.minimum_stock_level)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Soft-deletes a product by setting is_active = false.
    ///
    /// Historical sales and adjustments still reference it.
    pub async fn soft_delete(&self, id: &str) -> DbResult<()> {
        debug!(id = %id, "Soft-deleting product");

        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE products SET is_active = 0, updated_at = ?2 WHERE id = ?1",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }

        Ok(())
    }

    /// Counts active products (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

/// Helper to generate a new product ID.
pub fn generate_product_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    fn sample_product(sku: &str, stock: i64, minimum: i64) -> Product {
        let now = Utc::now();
        Product {
            id: generate_product_id(),
            sku: sku.to_string(),
            name: format!("Product {sku}"),
            price_cents: 1000,
            stock_quantity: stock,
            minimum_stock_level: minimum,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = sample_product("COKE-330", 10, 2);

        db.products().insert(&product).await.unwrap();

        let loaded = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(loaded.sku, "COKE-330");
        assert_eq!(loaded.stock_quantity, 10);

        let by_sku = db.products().get_by_sku("COKE-330").await.unwrap();
        assert!(by_sku.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_sku_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.products()
            .insert(&sample_product("COKE-330", 10, 2))
            .await
            .unwrap();

        let err = db
            .products()
            .insert(&sample_product("COKE-330", 5, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_list_below_minimum() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.products()
            .insert(&sample_product("LOW-1", 2, 5))
            .await
            .unwrap();
        db.products()
            .insert(&sample_product("OK-1", 50, 5))
            .await
            .unwrap();

        let low = db.products().list_below_minimum().await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].sku, "LOW-1");
    }
}
