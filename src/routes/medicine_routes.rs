// src/routes/medicine_routes.rs

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, patch},
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{MySql, QueryBuilder};

use crate::{
    activity,
    db::UpdateSet,
    error::{db_error, ApiError},
    extract::{Json, Path, Query},
    models::{like_pattern, ok_deleted, ApiOk, AppState, MedicineStatus, OkData, PageQuery, Paged},
    validation::{Validator, Vocabulary},
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MedicineRow {
    pub id: i64,
    pub name: String,
    pub generic_name: Option<String>,
    pub category: Option<String>,
    pub manufacturer: Option<String>,
    pub unit_price_cents: i64,
    pub stock_quantity: i32,
    pub reorder_level: i32,
    pub expiry_date: Option<NaiveDate>,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const MEDICINE_COLUMNS: &str = "id, name, generic_name, category, manufacturer, unit_price_cents, \
stock_quantity, reorder_level, expiry_date, status, created_at, updated_at";

#[derive(Debug, Default, Deserialize)]
pub struct MedicineRequest {
    pub name: Option<String>,
    pub generic_name: Option<String>,
    pub category: Option<String>,
    pub manufacturer: Option<String>,
    pub unit_price_cents: Option<i64>,
    pub stock_quantity: Option<i32>,
    pub reorder_level: Option<i32>,
    pub expiry_date: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MedicineFilter {
    pub search: Option<String>,
    pub category: Option<String>,
    pub low_stock: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct StockAdjustment {
    pub delta: Option<i32>,
}

#[derive(Debug, Default)]
struct MedicineFields {
    name: Option<String>,
    expiry_date: Option<NaiveDate>,
    status: Option<MedicineStatus>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_medicines).post(create_medicine))
        .route("/{id}", get(get_medicine).put(update_medicine).delete(delete_medicine))
        .route("/{id}/stock", patch(adjust_stock))
}

fn validate_fields(req: &MedicineRequest, creating: bool) -> Result<MedicineFields, ApiError> {
    let mut v = Validator::new();
    let name = if creating {
        v.required("name", req.name.as_deref())
    } else {
        v.not_blank("name", req.name.as_deref())
    };
    v.min("unit_price_cents", req.unit_price_cents, 0);
    v.min("stock_quantity", req.stock_quantity, 0);
    v.min("reorder_level", req.reorder_level, 0);
    let fields = MedicineFields {
        name,
        expiry_date: v.date("expiry_date", req.expiry_date.as_deref()),
        status: v.one_of("status", req.status.as_deref()),
    };
    v.finish()?;
    Ok(fields)
}

/// New stock level after applying `delta`, or `None` if it would go negative.
fn apply_delta(current: i32, delta: i32) -> Option<i32> {
    current.checked_add(delta).filter(|n| *n >= 0)
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, f: &MedicineFilter) {
    qb.push(" WHERE 1=1");
    if let Some(pattern) = like_pattern(f.search.as_deref()) {
        qb.push(" AND (name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR generic_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR manufacturer LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(category) = f.category.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND category = ").push_bind(category.to_string());
    }
    if f.low_stock == Some(true) {
        qb.push(" AND stock_quantity <= reorder_level");
    }
}

pub async fn list_medicines(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<MedicineFilter>,
) -> Result<Json<Paged<MedicineRow>>, ApiError> {
    let window = page.window()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM medicines");
    push_filters(&mut count, &filter);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(format!("SELECT {MEDICINE_COLUMNS} FROM medicines"));
    push_filters(&mut qb, &filter);
    qb.push(" ORDER BY name LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let medicines: Vec<MedicineRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: medicines,
        pagination: window.with_total(total),
    }))
}

async fn fetch_medicine(state: &AppState, id: i64) -> Result<MedicineRow, ApiError> {
    sqlx::query_as::<_, MedicineRow>(&format!("SELECT {MEDICINE_COLUMNS} FROM medicines WHERE id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Medicine"))
}

pub async fn get_medicine(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<MedicineRow>>, ApiError> {
    let medicine = fetch_medicine(&state, id).await?;
    Ok(Json(ApiOk { data: medicine }))
}

pub async fn create_medicine(
    State(state): State<AppState>,
    Json(req): Json<MedicineRequest>,
) -> Result<(StatusCode, Json<ApiOk<MedicineRow>>), ApiError> {
    let fields = validate_fields(&req, true)?;
    let name = fields.name.unwrap_or_default();
    let status = fields.status.unwrap_or(MedicineStatus::Active);

    let res = sqlx::query(
        r#"
        INSERT INTO medicines (
          name, generic_name, category, manufacturer, unit_price_cents,
          stock_quantity, reorder_level, expiry_date, status
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&name)
    .bind(&req.generic_name)
    .bind(&req.category)
    .bind(&req.manufacturer)
    .bind(req.unit_price_cents.unwrap_or(0))
    .bind(req.stock_quantity.unwrap_or(0))
    .bind(req.reorder_level.unwrap_or(10))
    .bind(fields.expiry_date)
    .bind(status.as_str())
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(&state.db, "medicine", Some(id), "created", format!("Medicine {name} added")).await;

    let medicine = fetch_medicine(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: medicine })))
}

pub async fn update_medicine(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<MedicineRequest>,
) -> Result<Json<ApiOk<MedicineRow>>, ApiError> {
    let fields = validate_fields(&req, false)?;

    let mut set = UpdateSet::new("medicines");
    set.set_opt("name", fields.name)
        .set_opt("generic_name", req.generic_name.clone())
        .set_opt("category", req.category.clone())
        .set_opt("manufacturer", req.manufacturer.clone())
        .set_opt("unit_price_cents", req.unit_price_cents)
        .set_opt("stock_quantity", req.stock_quantity)
        .set_opt("reorder_level", req.reorder_level)
        .set_opt("expiry_date", fields.expiry_date)
        .set_opt("status", fields.status.map(|s| s.as_str()));
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }

    set.execute_by_id(id, &state.db).await.map_err(db_error)?;

    let medicine = fetch_medicine(&state, id).await?;
    activity::record(&state.db, "medicine", Some(id), "updated", format!("Medicine {} updated", medicine.name)).await;
    Ok(Json(ApiOk { data: medicine }))
}

/// Adds a signed delta to the stock level. The row is locked so concurrent
/// adjustments serialize.
pub async fn adjust_stock(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<StockAdjustment>,
) -> Result<Json<ApiOk<MedicineRow>>, ApiError> {
    let mut v = Validator::new();
    if !matches!(req.delta, Some(d) if d != 0) {
        v.push("delta", "is required and must be non-zero");
    }
    v.finish()?;
    let delta = req.delta.unwrap_or_default();

    let mut tx = state.db.begin().await.map_err(db_error)?;

    let current: i32 = sqlx::query_scalar("SELECT stock_quantity FROM medicines WHERE id = ? FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Medicine"))?;

    let Some(next) = apply_delta(current, delta) else {
        return Err(ApiError::BadRequest(
            "INSUFFICIENT_STOCK",
            format!("Stock cannot go below zero (current: {current}, change: {delta})"),
        ));
    };

    sqlx::query("UPDATE medicines SET stock_quantity = ? WHERE id = ?")
        .bind(next)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
    tx.commit().await.map_err(db_error)?;

    activity::record(
        &state.db,
        "medicine",
        Some(id),
        "updated",
        format!("Stock adjusted by {delta} to {next}"),
    )
    .await;

    let medicine = fetch_medicine(&state, id).await?;
    Ok(Json(ApiOk { data: medicine }))
}

pub async fn delete_medicine(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM medicines WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Medicine"));
    }

    activity::record(&state.db, "medicine", Some(id), "deleted", format!("Medicine #{id} deleted")).await;
    Ok(Json(ok_deleted()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_never_goes_negative() {
        assert_eq!(apply_delta(10, -4), Some(6));
        assert_eq!(apply_delta(3, -3), Some(0));
        assert_eq!(apply_delta(3, -4), None);
        assert_eq!(apply_delta(i32::MAX, 1), None);
    }

    #[test]
    fn create_checks_amounts_and_status() {
        let req = MedicineRequest {
            name: Some("Amoxicillin".into()),
            unit_price_cents: Some(-1),
            stock_quantity: Some(-5),
            status: Some("recalled".into()),
            ..Default::default()
        };
        let Err(ApiError::Validation(errors)) = validate_fields(&req, true) else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["unit_price_cents", "stock_quantity", "status"]);
    }

    #[test]
    fn low_stock_filter_compares_columns() {
        let mut qb = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM medicines");
        push_filters(
            &mut qb,
            &MedicineFilter {
                low_stock: Some(true),
                ..Default::default()
            },
        );
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM medicines WHERE 1=1 AND stock_quantity <= reorder_level"
        );
    }
}
