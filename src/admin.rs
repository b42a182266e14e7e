//! Back-office endpoints: catalog editors with extra validation, order review.

use std::borrow::Cow;
use std::io::Cursor;

use axum::body::Bytes;
use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::catalog::{self, ProductKind};
use crate::models::{Category, Notebook, Order, OrderStatus, Smartphone};
use crate::{AppState, Result, ShopError};

pub const MAX_IMAGE_BYTES: usize = 3_145_728;
pub const MIN_RESOLUTION: (u32, u32) = (400, 400);
pub const MAX_RESOLUTION: (u32, u32) = (3800, 3800);

// =============================================================================
// Image validation
// =============================================================================

/// All three checks are independent and all must pass. The upper resolution
/// bound rejects the upload; nothing is ever downscaled.
pub fn validate_image(bytes: &[u8]) -> std::result::Result<(), ValidationErrors> {
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(field_error("image", "max_size", "image is larger than 3MB"));
    }
    let (width, height) = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|_| field_error("image", "undecodable", "image could not be decoded"))?
        .into_dimensions()
        .map_err(|_| field_error("image", "undecodable", "image could not be decoded"))?;
    if width < MIN_RESOLUTION.0 || height < MIN_RESOLUTION.1 {
        return Err(field_error(
            "image",
            "min_resolution",
            "image resolution is below the 400x400 minimum",
        ));
    }
    if width > MAX_RESOLUTION.0 || height > MAX_RESOLUTION.1 {
        return Err(field_error(
            "image",
            "max_resolution",
            "image resolution is above the 3800x3800 maximum",
        ));
    }
    Ok(())
}

fn field_error(
    field: &'static str,
    code: &'static str,
    message: impl Into<Cow<'static, str>>,
) -> ValidationErrors {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    let mut errors = ValidationErrors::new();
    errors.add(field, error);
    errors
}

fn non_negative_price(price: &Decimal) -> std::result::Result<(), ValidationError> {
    if price.is_sign_negative() {
        return Err(ValidationError::new("non_negative"));
    }
    Ok(())
}

// =============================================================================
// Forms
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CategoryForm {
    #[validate(length(min = 1))]
    pub name: String,
    pub slug: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct NotebookForm {
    #[validate(length(min = 1))]
    pub title: String,
    #[validate(length(min = 1))]
    pub slug: String,
    pub description: Option<String>,
    #[validate(custom = "non_negative_price")]
    pub price: Decimal,
    pub category_id: Uuid,
    pub diagonal: String,
    pub display_type: String,
    pub processor_freq: String,
    pub ram: String,
    pub video: String,
    pub time_without_charge: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SmartphoneForm {
    #[validate(length(min = 1))]
    pub title: String,
    #[validate(length(min = 1))]
    pub slug: String,
    pub description: Option<String>,
    #[validate(custom = "non_negative_price")]
    pub price: Decimal,
    pub category_id: Uuid,
    pub diagonal: String,
    pub display_type: String,
    pub resolution: String,
    pub accum_volume: String,
    pub ram: String,
    pub sd: bool,
    pub sd_max_volume: Option<String>,
    pub main_cam_mp: String,
    pub front_cam_mp: String,
}

impl SmartphoneForm {
    /// Dependent-field rule: without a card slot the max volume field is
    /// meaningless, so the form clears it before persisting.
    pub fn normalized(mut self) -> Self {
        if !self.sd {
            self.sd_max_volume = None;
        }
        self
    }
}

fn parse_form<T: DeserializeOwned>(payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| ShopError::Validation(field_error("body", "invalid", e.to_string())))
}

fn slug_conflict(e: sqlx::Error) -> ShopError {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            ShopError::Validation(field_error("slug", "unique", "slug is already in use"))
        }
        _ => ShopError::Storage(e),
    }
}

// =============================================================================
// Handlers
// =============================================================================

pub async fn create_category(
    State(state): State<AppState>,
    Json(form): Json<CategoryForm>,
) -> Result<(StatusCode, Json<Category>)> {
    form.validate()?;
    let slug = form
        .slug
        .unwrap_or_else(|| form.name.to_lowercase().replace(' ', "-"));
    let category = sqlx::query_as::<_, Category>(
        "INSERT INTO categories (id, name, slug) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&form.name)
    .bind(&slug)
    .fetch_one(&state.db)
    .await
    .map_err(slug_conflict)?;
    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn create_product(
    State(state): State<AppState>,
    Path(kind_tag): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Response> {
    let kind = catalog::resolve(&kind_tag).ok_or(ShopError::NotFound)?;
    let response = match kind.kind {
        ProductKind::Notebook => {
            let form: NotebookForm = parse_form(payload)?;
            form.validate()?;
            let row = insert_notebook(&state.db, &form).await?;
            (StatusCode::CREATED, Json(row)).into_response()
        }
        ProductKind::Smartphone => {
            let form = parse_form::<SmartphoneForm>(payload)?.normalized();
            form.validate()?;
            let row = insert_smartphone(&state.db, &form).await?;
            (StatusCode::CREATED, Json(row)).into_response()
        }
    };
    Ok(response)
}

pub async fn update_product(
    State(state): State<AppState>,
    Path((kind_tag, slug)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> Result<Response> {
    let kind = catalog::resolve(&kind_tag).ok_or(ShopError::NotFound)?;
    let response = match kind.kind {
        ProductKind::Notebook => {
            let form: NotebookForm = parse_form(payload)?;
            form.validate()?;
            let row = update_notebook(&state.db, &slug, &form).await?;
            Json(row).into_response()
        }
        ProductKind::Smartphone => {
            let form = parse_form::<SmartphoneForm>(payload)?.normalized();
            form.validate()?;
            let row = update_smartphone(&state.db, &slug, &form).await?;
            Json(row).into_response()
        }
    };
    Ok(response)
}

pub async fn upload_image(
    State(state): State<AppState>,
    Path((kind_tag, slug)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Value>> {
    let kind = catalog::resolve(&kind_tag).ok_or(ShopError::NotFound)?;
    validate_image(&body)?;
    let product = catalog::product_by_slug(&state.db, kind, &slug).await?;

    let ext = image::guess_format(&body)
        .ok()
        .and_then(|f| f.extensions_str().first().copied())
        .unwrap_or("img");
    let key = format!("{}/{}.{}", kind.discriminator, product.id, ext);
    let media_root = std::env::var("MEDIA_ROOT").unwrap_or_else(|_| "./media".to_string());
    let path = std::path::Path::new(&media_root).join(&key);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, &body).await?;

    let sql = format!("UPDATE {} SET image = $2 WHERE id = $1", kind.table);
    sqlx::query(&sql)
        .bind(product.id)
        .bind(&key)
        .execute(&state.db)
        .await?;
    tracing::info!(product = %product.slug, key, "image uploaded");
    Ok(Json(json!({ "image": key })))
}

pub async fn list_orders(State(state): State<AppState>) -> Result<Json<Vec<Order>>> {
    let orders = sqlx::query_as::<_, Order>("SELECT * FROM orders ORDER BY created_at DESC")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(orders))
}

#[derive(Debug, Deserialize)]
pub struct StatusForm {
    pub status: OrderStatus,
}

/// The back office may set any status directly; the lifecycle has no
/// transition guard.
pub async fn set_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(form): Json<StatusForm>,
) -> Result<Json<Order>> {
    let order = sqlx::query_as::<_, Order>("UPDATE orders SET status = $2 WHERE id = $1 RETURNING *")
        .bind(id)
        .bind(form.status)
        .fetch_optional(&state.db)
        .await?
        .ok_or(ShopError::NotFound)?;
    tracing::info!(order_id = %order.id, status = ?order.status, "order status updated");
    Ok(Json(order))
}

// =============================================================================
// Per-kind editors
// =============================================================================

async fn insert_notebook(db: &PgPool, form: &NotebookForm) -> Result<Notebook> {
    sqlx::query_as::<_, Notebook>(
        "INSERT INTO notebooks (id, title, slug, description, price, category_id, diagonal, display_type, processor_freq, ram, video, time_without_charge) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&form.title)
    .bind(&form.slug)
    .bind(&form.description)
    .bind(form.price)
    .bind(form.category_id)
    .bind(&form.diagonal)
    .bind(&form.display_type)
    .bind(&form.processor_freq)
    .bind(&form.ram)
    .bind(&form.video)
    .bind(&form.time_without_charge)
    .fetch_one(db)
    .await
    .map_err(slug_conflict)
}

async fn update_notebook(db: &PgPool, slug: &str, form: &NotebookForm) -> Result<Notebook> {
    sqlx::query_as::<_, Notebook>(
        "UPDATE notebooks SET title = $2, slug = $3, description = $4, price = $5, category_id = $6, \
                diagonal = $7, display_type = $8, processor_freq = $9, ram = $10, video = $11, \
                time_without_charge = $12 \
         WHERE slug = $1 \
         RETURNING *",
    )
    .bind(slug)
    .bind(&form.title)
    .bind(&form.slug)
    .bind(&form.description)
    .bind(form.price)
    .bind(form.category_id)
    .bind(&form.diagonal)
    .bind(&form.display_type)
    .bind(&form.processor_freq)
    .bind(&form.ram)
    .bind(&form.video)
    .bind(&form.time_without_charge)
    .fetch_optional(db)
    .await
    .map_err(slug_conflict)?
    .ok_or(ShopError::NotFound)
}

async fn insert_smartphone(db: &PgPool, form: &SmartphoneForm) -> Result<Smartphone> {
    sqlx::query_as::<_, Smartphone>(
        "INSERT INTO smartphones (id, title, slug, description, price, category_id, diagonal, display_type, resolution, accum_volume, ram, sd, sd_max_volume, main_cam_mp, front_cam_mp) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&form.title)
    .bind(&form.slug)
    .bind(&form.description)
    .bind(form.price)
    .bind(form.category_id)
    .bind(&form.diagonal)
    .bind(&form.display_type)
    .bind(&form.resolution)
    .bind(&form.accum_volume)
    .bind(&form.ram)
    .bind(form.sd)
    .bind(&form.sd_max_volume)
    .bind(&form.main_cam_mp)
    .bind(&form.front_cam_mp)
    .fetch_one(db)
    .await
    .map_err(slug_conflict)
}

async fn update_smartphone(db: &PgPool, slug: &str, form: &SmartphoneForm) -> Result<Smartphone> {
    sqlx::query_as::<_, Smartphone>(
        "UPDATE smartphones SET title = $2, slug = $3, description = $4, price = $5, category_id = $6, \
                diagonal = $7, display_type = $8, resolution = $9, accum_volume = $10, ram = $11, \
                sd = $12, sd_max_volume = $13, main_cam_mp = $14, front_cam_mp = $15 \
         WHERE slug = $1 \
         RETURNING *",
    )
    .bind(slug)
    .bind(&form.title)
    .bind(&form.slug)
    .bind(&form.description)
    .bind(form.price)
    .bind(form.category_id)
    .bind(&form.diagonal)
    .bind(&form.display_type)
    .bind(&form.resolution)
    .bind(&form.accum_volume)
    .bind(&form.ram)
    .bind(form.sd)
    .bind(&form.sd_max_volume)
    .bind(&form.main_cam_mp)
    .bind(&form.front_cam_mp)
    .fetch_optional(db)
    .await
    .map_err(slug_conflict)?
    .ok_or(ShopError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::new(width, height);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn error_code(errors: &ValidationErrors, field: &str) -> String {
        errors.field_errors()[field][0].code.to_string()
    }

    #[test]
    fn test_image_over_byte_ceiling_rejected() {
        let bytes = vec![0u8; 4 * 1024 * 1024];
        let errors = validate_image(&bytes).unwrap_err();
        assert_eq!(error_code(&errors, "image"), "max_size");
    }

    #[test]
    fn test_image_below_resolution_floor_rejected() {
        let errors = validate_image(&png_bytes(350, 350)).unwrap_err();
        assert_eq!(error_code(&errors, "image"), "min_resolution");
    }

    #[test]
    fn test_image_above_resolution_ceiling_rejected() {
        let errors = validate_image(&png_bytes(4000, 4000)).unwrap_err();
        assert_eq!(error_code(&errors, "image"), "max_resolution");
    }

    #[test]
    fn test_image_within_bounds_accepted() {
        let bytes = png_bytes(800, 600);
        assert!(bytes.len() <= MAX_IMAGE_BYTES);
        assert!(validate_image(&bytes).is_ok());
    }

    #[test]
    fn test_undecodable_image_rejected() {
        assert!(validate_image(b"not an image").is_err());
    }

    fn smartphone_form(sd: bool, sd_max_volume: Option<String>) -> SmartphoneForm {
        SmartphoneForm {
            title: "Galaxy Z".into(),
            slug: "galaxy-z".into(),
            description: None,
            price: Decimal::new(129900, 2),
            category_id: Uuid::nil(),
            diagonal: "6.7".into(),
            display_type: "AMOLED".into(),
            resolution: "2640x1080".into(),
            accum_volume: "4500 mAh".into(),
            ram: "8GB".into(),
            sd,
            sd_max_volume,
            main_cam_mp: "50".into(),
            front_cam_mp: "10".into(),
        }
    }

    #[test]
    fn test_sd_rule_clears_volume_without_slot() {
        let form = smartphone_form(false, Some("256GB".into())).normalized();
        assert_eq!(form.sd_max_volume, None);
    }

    #[test]
    fn test_sd_rule_keeps_volume_with_slot() {
        let form = smartphone_form(true, Some("256GB".into())).normalized();
        assert_eq!(form.sd_max_volume.as_deref(), Some("256GB"));
    }

    #[test]
    fn test_negative_price_rejected() {
        let mut form = smartphone_form(true, None);
        form.price = Decimal::new(-100, 2);
        assert!(form.validate().is_err());
    }
}
