//! Storefront request handlers.
//!
//! Rendering is an external collaborator: each page handler returns the
//! context object the template layer would consume. Cart mutations redirect
//! back to the cart page.

use axum::extract::{Form, Path, State};
use axum::response::Redirect;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use crate::cart::{self, Shopper};
use crate::checkout::{self, OrderForm};
use crate::models::Category;
use crate::{catalog, AppState, Result, ShopError};

pub async fn home(State(state): State<AppState>, shopper: Shopper) -> Result<Json<Value>> {
    let categories = catalog::categories_with_counts(&state.db).await?;
    let products = catalog::latest_products(&state.db).await?;
    let cart = cart::cart_context(&state.db, &shopper).await?;
    Ok(Json(
        json!({ "categories": categories, "products": products, "cart": cart }),
    ))
}

pub async fn product_detail(
    State(state): State<AppState>,
    Path((kind_tag, slug)): Path<(String, String)>,
    shopper: Shopper,
) -> Result<Json<Value>> {
    let kind = catalog::resolve(&kind_tag).ok_or(ShopError::NotFound)?;
    let product = catalog::detail_by_slug(&state.db, kind, &slug).await?;
    let cart = cart::cart_context(&state.db, &shopper).await?;
    Ok(Json(json!({ "product": product, "cart": cart })))
}

pub async fn category_detail(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    shopper: Shopper,
) -> Result<Json<Value>> {
    let category = catalog::category_by_slug(&state.db, &slug).await?;
    let products = catalog::products_in_category(&state.db, category.id).await?;
    let cart = cart::cart_context(&state.db, &shopper).await?;
    Ok(Json(
        json!({ "category": category, "products": products, "cart": cart }),
    ))
}

pub async fn cart_view(State(state): State<AppState>, shopper: Shopper) -> Result<Json<Value>> {
    let cart = cart::current_cart(&state.db, &shopper).await?;
    let items = cart::cart_lines(&state.db, cart.id).await?;
    let categories = catalog::categories_with_counts(&state.db).await?;
    let context = cart::CartContext { cart, items };
    Ok(Json(json!({ "cart": context, "categories": categories })))
}

pub async fn add_to_cart(
    State(state): State<AppState>,
    Path((kind_tag, slug)): Path<(String, String)>,
    shopper: Shopper,
) -> Result<Redirect> {
    cart::add_product(&state.db, &shopper, &kind_tag, &slug).await?;
    tracing::info!(kind = %kind_tag, slug = %slug, "product added to cart");
    Ok(Redirect::to("/cart/"))
}

pub async fn remove_from_cart(
    State(state): State<AppState>,
    Path((kind_tag, slug)): Path<(String, String)>,
    shopper: Shopper,
) -> Result<Redirect> {
    cart::remove_product(&state.db, &shopper, &kind_tag, &slug).await?;
    tracing::info!(kind = %kind_tag, slug = %slug, "product removed from cart");
    Ok(Redirect::to("/cart/"))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangeQtyForm {
    #[validate(range(min = 1))]
    pub quantity: i32,
}

pub async fn change_qty(
    State(state): State<AppState>,
    Path((kind_tag, slug)): Path<(String, String)>,
    shopper: Shopper,
    Form(form): Form<ChangeQtyForm>,
) -> Result<Redirect> {
    form.validate()?;
    cart::set_quantity(&state.db, &shopper, &kind_tag, &slug, form.quantity).await?;
    Ok(Redirect::to("/cart/"))
}

pub async fn checkout_page(State(state): State<AppState>, shopper: Shopper) -> Result<Json<Value>> {
    let cart = cart::current_cart(&state.db, &shopper).await?;
    let items = cart::cart_lines(&state.db, cart.id).await?;
    let categories = catalog::categories_with_counts(&state.db).await?;
    let context = cart::CartContext { cart, items };
    Ok(Json(json!({ "cart": context, "categories": categories })))
}

/// A valid form places the order and lands back on the home page; an invalid
/// one returns to the checkout form.
pub async fn make_order(
    State(state): State<AppState>,
    shopper: Shopper,
    Form(form): Form<OrderForm>,
) -> Result<Redirect> {
    match checkout::place_order(&state, &shopper, form).await {
        Ok(_) => Ok(Redirect::to("/")),
        Err(ShopError::Validation(errors)) => {
            tracing::warn!(?errors, "order form rejected");
            Ok(Redirect::to("/checkout/"))
        }
        Err(e) => Err(e),
    }
}

pub async fn api_categories(State(state): State<AppState>) -> Result<Json<Vec<Category>>> {
    let categories =
        sqlx::query_as::<_, Category>("SELECT id, name, slug FROM categories ORDER BY name")
            .fetch_all(&state.db)
            .await?;
    Ok(Json(categories))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_qty_rejects_non_positive() {
        assert!(ChangeQtyForm { quantity: 0 }.validate().is_err());
        assert!(ChangeQtyForm { quantity: -3 }.validate().is_err());
        assert!(ChangeQtyForm { quantity: 1 }.validate().is_ok());
    }
}
