//! Order checkout: form validation and the placement transaction.

use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::cart::{current_cart, get_or_create_customer, Shopper};
use crate::events;
use crate::models::{BuyingType, Order, OrderStatus};
use crate::{AppState, Result, ShopError};

#[derive(Debug, Deserialize, Validate)]
pub struct OrderForm {
    #[validate(length(min = 1))]
    pub first_name: String,
    #[validate(length(min = 1))]
    pub last_name: String,
    #[validate(length(min = 5, max = 12))]
    pub phone: String,
    pub address: Option<String>,
    pub buying_type: BuyingType,
    pub order_at: NaiveDate,
    pub comment: Option<String>,
}

/// Place an order from the shopper's current cart.
///
/// All four writes happen in one transaction: insert the order, mark the cart
/// ordered, bind the cart to the order, append the order to the customer's
/// order list. A failure anywhere rolls back everything.
pub async fn place_order(state: &AppState, shopper: &Shopper, form: OrderForm) -> Result<Order> {
    form.validate()?;
    let user_id = shopper.user_id.ok_or(ShopError::Unauthorized)?;
    let cart = current_cart(&state.db, shopper).await?;

    let mut tx = state.db.begin().await?;
    let customer = get_or_create_customer(&mut *tx, user_id).await?;
    let order = sqlx::query_as::<_, Order>(
        "INSERT INTO orders (id, first_name, last_name, phone, address, status, buying_type, comment, order_at, customer_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&form.first_name)
    .bind(&form.last_name)
    .bind(&form.phone)
    .bind(&form.address)
    .bind(OrderStatus::New)
    .bind(form.buying_type)
    .bind(&form.comment)
    .bind(form.order_at)
    .bind(customer.id)
    .fetch_one(&mut *tx)
    .await?;
    sqlx::query("UPDATE carts SET in_order = TRUE WHERE id = $1")
        .bind(cart.id)
        .execute(&mut *tx)
        .await?;
    let order = sqlx::query_as::<_, Order>("UPDATE orders SET cart_id = $2 WHERE id = $1 RETURNING *")
        .bind(order.id)
        .bind(cart.id)
        .fetch_one(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO customer_orders (customer_id, order_id) VALUES ($1, $2)")
        .bind(customer.id)
        .bind(order.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(order_id = %order.id, cart_id = %cart.id, "order placed");
    events::publish(state, "order.placed", &order).await;
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_form() -> OrderForm {
        OrderForm {
            first_name: "Ivan".into(),
            last_name: "Petrov".into(),
            phone: "+7900123456".into(),
            address: Some("Arbat 1".into()),
            buying_type: BuyingType::Delivery,
            order_at: NaiveDate::from_ymd_opt(2026, 8, 20).unwrap(),
            comment: None,
        }
    }

    #[test]
    fn test_order_form_valid() {
        assert!(valid_form().validate().is_ok());
    }

    #[test]
    fn test_order_form_requires_names() {
        let mut form = valid_form();
        form.first_name = String::new();
        assert!(form.validate().is_err());

        let mut form = valid_form();
        form.last_name = String::new();
        assert!(form.validate().is_err());
    }

    #[test]
    fn test_order_form_phone_bounds() {
        let mut form = valid_form();
        form.phone = "123".into();
        assert!(form.validate().is_err());

        let mut form = valid_form();
        form.phone = "+790012345678999".into();
        assert!(form.validate().is_err());
    }

    #[test]
    fn test_order_form_optional_fields() {
        let mut form = valid_form();
        form.address = None;
        form.comment = None;
        assert!(form.validate().is_ok());
    }
}
