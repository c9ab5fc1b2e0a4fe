//! PostgreSQL store. Order lines and payment details live in JSONB columns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::aggregates::{
    LineItem, Order, OrderStatus, Payment, PaymentDetails, PaymentMethod, PaymentStatus, Product, ProductSnapshot,
};
use crate::store::{Inventory, OrderStore, PaymentWrite, StatusQueryResult};
use crate::{MarketError, Result};

const ORDER_COLUMNS: &str = "id, user_id, products, total_price, address, phone_number, ordered_at, status, payment_method, payment_status, payment_details";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> Result<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE {} LIMIT 1", ORDER_COLUMNS, clause);
        let row = sqlx::query_as::<_, OrderRow>(&sql).bind(value).fetch_optional(&self.pool).await?;
        row.map(Order::try_from).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: String,
    products: Json<Vec<LineItem>>,
    total_price: Decimal,
    address: String,
    phone_number: String,
    ordered_at: i64,
    status: i32,
    payment_method: String,
    payment_status: String,
    payment_details: Json<PaymentDetails>,
}

impl TryFrom<OrderRow> for Order {
    type Error = MarketError;

    fn try_from(r: OrderRow) -> Result<Self> {
        let corrupt = |what: &str, value: &str| MarketError::StorageError(format!("order {} has unknown {} '{}'", r.id, what, value));
        let status = OrderStatus::try_from(r.status).map_err(|_| corrupt("status", &r.status.to_string()))?;
        let payment = Payment {
            payment_method: PaymentMethod::parse(&r.payment_method).ok_or_else(|| corrupt("payment method", &r.payment_method))?,
            payment_status: PaymentStatus::parse(&r.payment_status).ok_or_else(|| corrupt("payment status", &r.payment_status))?,
            payment_details: r.payment_details.0,
        };
        Ok(Order::restore(
            r.id, r.user_id, r.products.0, r.total_price, r.address, r.phone_number, r.ordered_at, status, payment,
        ))
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    seller_id: String,
    name: String,
    description: String,
    price: Decimal,
    quantity: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = MarketError;

    fn try_from(r: ProductRow) -> Result<Self> {
        let quantity = u32::try_from(r.quantity)
            .map_err(|_| MarketError::StorageError(format!("product {} has negative stock", r.id)))?;
        Ok(Product::restore(r.id, r.seller_id, r.name, r.description, r.price, quantity, r.created_at))
    }
}

/// JSONB object merged over the stored payment details by a status query.
fn status_query_patch(result: &StatusQueryResult, at: DateTime<Utc>) -> Value {
    let mut patch = json!({ "lastQueryAt": at });
    match result {
        Ok(response) => patch["lastQueryResponse"] = response.clone(),
        Err(error) => patch["error"] = json!(error),
    }
    patch
}

fn stock_param(qty: u32) -> Result<i32> {
    i32::try_from(qty).map_err(|_| MarketError::Validation(format!("Quantity {} is too large", qty)))
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert(&self, order: &Order) -> Result<()> {
        let payment = order.payment();
        sqlx::query(
            "INSERT INTO orders (id, user_id, products, total_price, address, phone_number, ordered_at, status, payment_method, payment_status, payment_details) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(order.id())
        .bind(order.user_id())
        .bind(Json(order.products()))
        .bind(order.total_price())
        .bind(order.address())
        .bind(order.phone_number())
        .bind(order.ordered_at())
        .bind(i32::from(order.status()))
        .bind(payment.payment_method.as_str())
        .bind(payment.payment_status.as_str())
        .bind(Json(&payment.payment_details))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        let row = sqlx::query_as::<_, OrderRow>(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(Order::try_from).transpose()
    }

    async fn find_by_checkout_request_id(&self, checkout_request_id: &str) -> Result<Option<Order>> {
        self.fetch_one_where("payment_details->>'checkoutRequestId' = $1", checkout_request_id).await
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Order>> {
        self.fetch_one_where("payment_details->>'transactionId' = $1", transaction_id).await
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE user_id = $1 ORDER BY ordered_at DESC, id DESC", ORDER_COLUMNS);
        let rows = sqlx::query_as::<_, OrderRow>(&sql).bind(user_id).fetch_all(&self.pool).await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn list_for_seller(&self, seller_id: &str) -> Result<Vec<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE products @> $1 ORDER BY ordered_at DESC, id DESC", ORDER_COLUMNS);
        let filter = json!([{ "product": { "sellerId": seller_id } }]);
        let rows = sqlx::query_as::<_, OrderRow>(&sql).bind(Json(filter)).fetch_all(&self.pool).await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn list_all(&self) -> Result<Vec<Order>> {
        let sql = format!("SELECT {} FROM orders ORDER BY ordered_at DESC, id DESC", ORDER_COLUMNS);
        let rows = sqlx::query_as::<_, OrderRow>(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn update_status(&self, id: Uuid, status: OrderStatus) -> Result<bool> {
        let done = sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(i32::from(status))
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn transition_status(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> Result<bool> {
        let done = sqlx::query("UPDATE orders SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(i32::from(from))
            .bind(i32::from(to))
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn update_payment(&self, id: Uuid, payment: &Payment) -> Result<PaymentWrite> {
        let done = sqlx::query(
            "UPDATE orders SET payment_method = $2, payment_status = $3, payment_details = $4 \
             WHERE id = $1 AND payment_status <> $5",
        )
        .bind(id)
        .bind(payment.payment_method.as_str())
        .bind(payment.payment_status.as_str())
        .bind(Json(&payment.payment_details))
        .bind(PaymentStatus::Paid.as_str())
        .execute(&self.pool)
        .await?;
        if done.rows_affected() > 0 {
            return Ok(PaymentWrite::Saved);
        }
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM orders WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(if exists { PaymentWrite::AlreadyPaid } else { PaymentWrite::Missing })
    }

    async fn record_status_query(&self, id: Uuid, result: &StatusQueryResult, at: DateTime<Utc>) -> Result<bool> {
        let done = sqlx::query(
            "UPDATE orders SET payment_method = $3, \
             payment_details = (CASE WHEN payment_details->>'method' = $3 THEN payment_details \
                                ELSE jsonb_build_object('method', $3) END - 'error') || $2 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(Json(status_query_patch(result, at)))
        .bind(PaymentMethod::Mpesa.as_str())
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let done = sqlx::query("DELETE FROM orders WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }
}

#[async_trait]
impl Inventory for PgStore {
    async fn create_product(&self, product: &Product) -> Result<()> {
        sqlx::query("INSERT INTO products (id, seller_id, name, description, price, quantity, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)")
            .bind(product.id())
            .bind(product.seller_id())
            .bind(product.name())
            .bind(product.description())
            .bind(product.price())
            .bind(stock_param(product.quantity().value())?)
            .bind(product.created_at())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Product::try_from).transpose()
    }

    async fn list_products_for_seller(&self, seller_id: &str) -> Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE seller_id = $1 ORDER BY created_at DESC, id DESC")
            .bind(seller_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Product::try_from).collect()
    }

    async fn update_product(&self, product: &Product) -> Result<bool> {
        let done = sqlx::query("UPDATE products SET name = $2, description = $3, price = $4, quantity = $5 WHERE id = $1")
            .bind(product.id())
            .bind(product.name())
            .bind(product.description())
            .bind(product.price())
            .bind(stock_param(product.quantity().value())?)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn delete_product(&self, id: Uuid) -> Result<bool> {
        let done = sqlx::query("DELETE FROM products WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }

    /// Conditional decrements inside one transaction; any short line rolls
    /// the whole reservation back.
    async fn reserve(&self, lines: &[(Uuid, u32)]) -> Result<Vec<ProductSnapshot>> {
        let mut tx = self.pool.begin().await?;
        let mut snapshots = Vec::with_capacity(lines.len());
        for &(id, qty) in lines {
            let row = sqlx::query_as::<_, ProductRow>(
                "UPDATE products SET quantity = quantity - $2 WHERE id = $1 AND quantity >= $2 RETURNING *",
            )
            .bind(id)
            .bind(stock_param(qty)?)
            .fetch_optional(&mut *tx)
            .await?;
            match row {
                Some(row) => snapshots.push(Product::try_from(row)?.snapshot()),
                None => {
                    let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM products WHERE id = $1)")
                        .bind(id)
                        .fetch_one(&mut *tx)
                        .await?;
                    return Err(if exists { MarketError::InsufficientStock(id) } else { MarketError::NotFound("Product") });
                }
            }
        }
        tx.commit().await?;
        Ok(snapshots)
    }

    async fn restore(&self, lines: &[(Uuid, u32)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for &(id, qty) in lines {
            let done = sqlx::query("UPDATE products SET quantity = quantity + $2 WHERE id = $1")
                .bind(id)
                .bind(stock_param(qty)?)
                .execute(&mut *tx)
                .await?;
            if done.rows_affected() == 0 {
                tracing::warn!(product_id = %id, "Skipping stock restore for missing product");
            }
        }
        tx.commit().await?;
        Ok(())
    }
}
