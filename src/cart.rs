//! Shopping cart engine.
//!
//! Every mutation (add, remove, change quantity) runs inside one transaction
//! together with the totals recompute, so the cart's derived fields are never
//! observed stale.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::catalog::{self, KINDS};
use crate::models::{Cart, CartProduct, Customer};
use crate::{Result, ShopError};

/// Upstream auth headers. The auth layer itself is an external collaborator;
/// it forwards an authenticated user id and/or an anonymous session token.
const USER_HEADER: &str = "x-user-id";
const SESSION_HEADER: &str = "x-session-id";

/// The identity a cart is scoped to, passed explicitly into every cart
/// operation.
#[derive(Debug, Clone)]
pub struct Shopper {
    pub user_id: Option<Uuid>,
    pub session: Option<String>,
}

impl Shopper {
    pub fn is_known(&self) -> bool {
        self.user_id.is_some() || self.session.is_some()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Shopper
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok());
        let session = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        Ok(Shopper { user_id, session })
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CartLine {
    pub id: Uuid,
    pub product_kind: String,
    pub product_id: Uuid,
    pub title: String,
    pub slug: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub final_price: Decimal,
}

#[derive(Debug, Serialize)]
pub struct CartContext {
    pub cart: Cart,
    pub items: Vec<CartLine>,
}

pub async fn get_or_create_customer<'e, E>(exec: E, user_id: Uuid) -> Result<Customer>
where
    E: PgExecutor<'e>,
{
    let customer = sqlx::query_as::<_, Customer>(
        "INSERT INTO customers (id, user_id) VALUES ($1, $2) \
         ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id \
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(user_id)
    .fetch_one(exec)
    .await?;
    Ok(customer)
}

/// Resolve the shopper's open cart, creating one when none exists.
///
/// An anonymous session cart is claimed on the first authenticated touch:
/// ownership moves to the customer and the anonymous flag is cleared.
pub async fn current_cart(pool: &PgPool, shopper: &Shopper) -> Result<Cart> {
    if let Some(user_id) = shopper.user_id {
        let customer = get_or_create_customer(pool, user_id).await?;
        let open = sqlx::query_as::<_, Cart>(
            "SELECT * FROM carts WHERE owner_id = $1 AND NOT in_order \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(customer.id)
        .fetch_optional(pool)
        .await?;
        if let Some(cart) = open {
            return Ok(cart);
        }
        if let Some(token) = &shopper.session {
            let claimed = sqlx::query_as::<_, Cart>(
                "UPDATE carts SET owner_id = $1, for_anonymous_user = FALSE \
                 WHERE id = (SELECT id FROM carts \
                             WHERE session_token = $2 AND for_anonymous_user AND NOT in_order \
                             ORDER BY created_at DESC LIMIT 1) \
                 RETURNING *",
            )
            .bind(customer.id)
            .bind(token)
            .fetch_optional(pool)
            .await?;
            if let Some(cart) = claimed {
                sqlx::query("UPDATE cart_products SET customer_id = $1 WHERE cart_id = $2")
                    .bind(customer.id)
                    .bind(cart.id)
                    .execute(pool)
                    .await?;
                tracing::info!(cart_id = %cart.id, customer_id = %customer.id, "claimed anonymous cart");
                return Ok(cart);
            }
        }
        let cart =
            sqlx::query_as::<_, Cart>("INSERT INTO carts (id, owner_id) VALUES ($1, $2) RETURNING *")
                .bind(Uuid::now_v7())
                .bind(customer.id)
                .fetch_one(pool)
                .await?;
        Ok(cart)
    } else if let Some(token) = &shopper.session {
        let open = sqlx::query_as::<_, Cart>(
            "SELECT * FROM carts WHERE session_token = $1 AND for_anonymous_user AND NOT in_order \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(token)
        .fetch_optional(pool)
        .await?;
        if let Some(cart) = open {
            return Ok(cart);
        }
        let cart = sqlx::query_as::<_, Cart>(
            "INSERT INTO carts (id, session_token, for_anonymous_user) VALUES ($1, $2, TRUE) \
             RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(token)
        .fetch_one(pool)
        .await?;
        Ok(cart)
    } else {
        Err(ShopError::Unauthorized)
    }
}

/// The cart plus its line items, or `None` when the request carries no
/// identity at all (read-only pages render without a cart).
pub async fn cart_context(pool: &PgPool, shopper: &Shopper) -> Result<Option<CartContext>> {
    if !shopper.is_known() {
        return Ok(None);
    }
    let cart = current_cart(pool, shopper).await?;
    let items = cart_lines(pool, cart.id).await?;
    Ok(Some(CartContext { cart, items }))
}

pub async fn cart_lines(pool: &PgPool, cart_id: Uuid) -> Result<Vec<CartLine>> {
    let sql = format!(
        "SELECT cp.id, cp.product_kind, cp.product_id, p.title, p.slug, \
                p.price AS unit_price, cp.quantity, cp.final_price \
         FROM cart_products cp \
         JOIN ({}) p ON p.kind = cp.product_kind AND p.id = cp.product_id \
         WHERE cp.cart_id = $1 \
         ORDER BY cp.id",
        product_union_sql()
    );
    let lines = sqlx::query_as::<_, CartLine>(&sql)
        .bind(cart_id)
        .fetch_all(pool)
        .await?;
    Ok(lines)
}

/// Add one product to the shopper's cart. Re-adding a product already in the
/// cart leaves its quantity untouched.
pub async fn add_product(pool: &PgPool, shopper: &Shopper, kind_tag: &str, slug: &str) -> Result<()> {
    let kind = catalog::resolve(kind_tag).ok_or(ShopError::NotFound)?;
    let cart = current_cart(pool, shopper).await?;
    let mut tx = pool.begin().await?;
    let product = catalog::product_by_slug(&mut *tx, kind, slug).await?;
    let created: Option<CartProduct> = sqlx::query_as(
        "INSERT INTO cart_products (id, cart_id, customer_id, product_kind, product_id, quantity, final_price) \
         VALUES ($1, $2, $3, $4, $5, 1, $6) \
         ON CONFLICT (cart_id, product_kind, product_id) DO NOTHING \
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(cart.id)
    .bind(cart.owner_id)
    .bind(kind.discriminator)
    .bind(product.id)
    .bind(line_price(1, product.price))
    .fetch_optional(&mut *tx)
    .await?;
    if let Some(item) = &created {
        tracing::info!(line_id = %item.id, cart_id = %cart.id, "line item created");
    }
    recompute(&mut tx, cart.id).await?;
    tx.commit().await?;
    Ok(())
}

/// Remove a product's line item. A missing line item is a NotFound: the cart
/// never offered removal of a product it does not hold.
pub async fn remove_product(
    pool: &PgPool,
    shopper: &Shopper,
    kind_tag: &str,
    slug: &str,
) -> Result<()> {
    let kind = catalog::resolve(kind_tag).ok_or(ShopError::NotFound)?;
    let cart = current_cart(pool, shopper).await?;
    let mut tx = pool.begin().await?;
    let product = catalog::product_by_slug(&mut *tx, kind, slug).await?;
    let deleted = sqlx::query(
        "DELETE FROM cart_products WHERE cart_id = $1 AND product_kind = $2 AND product_id = $3",
    )
    .bind(cart.id)
    .bind(kind.discriminator)
    .bind(product.id)
    .execute(&mut *tx)
    .await?;
    if deleted.rows_affected() == 0 {
        return Err(ShopError::NotFound);
    }
    recompute(&mut tx, cart.id).await?;
    tx.commit().await?;
    Ok(())
}

/// Set a line item's quantity, re-deriving its price from the live product
/// price. Quantity is validated positive at the form layer.
pub async fn set_quantity(
    pool: &PgPool,
    shopper: &Shopper,
    kind_tag: &str,
    slug: &str,
    quantity: i32,
) -> Result<()> {
    let kind = catalog::resolve(kind_tag).ok_or(ShopError::NotFound)?;
    let cart = current_cart(pool, shopper).await?;
    let mut tx = pool.begin().await?;
    let product = catalog::product_by_slug(&mut *tx, kind, slug).await?;
    let updated = sqlx::query(
        "UPDATE cart_products SET quantity = $4, final_price = $5 \
         WHERE cart_id = $1 AND product_kind = $2 AND product_id = $3",
    )
    .bind(cart.id)
    .bind(kind.discriminator)
    .bind(product.id)
    .bind(quantity)
    .bind(line_price(quantity, product.price))
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ShopError::NotFound);
    }
    recompute(&mut tx, cart.id).await?;
    tx.commit().await?;
    Ok(())
}

/// Full recompute of the cart's derived totals from its current line items.
/// No delta updates: always the whole set.
pub async fn recompute(tx: &mut Transaction<'_, Postgres>, cart_id: Uuid) -> Result<()> {
    let lines: Vec<(i32, Decimal)> =
        sqlx::query_as("SELECT quantity, final_price FROM cart_products WHERE cart_id = $1")
            .bind(cart_id)
            .fetch_all(&mut **tx)
            .await?;
    let (total_products, final_price) = cart_totals(&lines);
    sqlx::query("UPDATE carts SET total_products = $2, final_price = $3 WHERE id = $1")
        .bind(cart_id)
        .bind(total_products)
        .bind(final_price)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn product_union_sql() -> String {
    KINDS
        .iter()
        .map(|k| {
            format!(
                "SELECT id, title, slug, price, '{}' AS kind FROM {}",
                k.discriminator, k.table
            )
        })
        .collect::<Vec<_>>()
        .join(" UNION ALL ")
}

pub(crate) fn line_price(quantity: i32, unit_price: Decimal) -> Decimal {
    Decimal::from(quantity) * unit_price
}

pub(crate) fn cart_totals(lines: &[(i32, Decimal)]) -> (i32, Decimal) {
    let count = lines.iter().map(|(quantity, _)| *quantity).sum();
    let total = lines.iter().map(|(_, price)| *price).sum();
    (count, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_price() {
        assert_eq!(line_price(3, Decimal::new(1999, 2)), Decimal::new(5997, 2));
        assert_eq!(line_price(1, Decimal::new(50000, 2)), Decimal::new(50000, 2));
    }

    #[test]
    fn test_cart_totals() {
        let lines = vec![
            (2, Decimal::new(3998, 2)),
            (1, Decimal::new(129900, 2)),
            (3, Decimal::new(1500, 2)),
        ];
        let (count, total) = cart_totals(&lines);
        assert_eq!(count, 6);
        assert_eq!(total, Decimal::new(135398, 2));
        // Recomputing from the same lines is idempotent.
        assert_eq!(cart_totals(&lines), (count, total));
    }

    #[test]
    fn test_cart_totals_empty() {
        assert_eq!(cart_totals(&[]), (0, Decimal::ZERO));
    }

    #[test]
    fn test_product_union_covers_registry() {
        let sql = product_union_sql();
        for kind in KINDS {
            assert!(sql.contains(kind.table));
        }
        assert_eq!(sql.matches("UNION ALL").count(), KINDS.len() - 1);
    }
}
