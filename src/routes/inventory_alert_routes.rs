// src/routes/inventory_alert_routes.rs

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{MySql, QueryBuilder};

use crate::{
    activity,
    db::{require_reference, UpdateSet},
    error::{db_error, ApiError},
    extract::{Json, Path, Query},
    models::{
        deserialize_double_option, like_pattern, ok_deleted, AlertStatus, ApiOk, AppState, OkData, PageQuery, Paged,
    },
    validation::{Validator, Vocabulary},
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct InventoryAlertRow {
    pub id: i64,
    pub medicine_id: i64,
    pub medicine_name: String,
    pub medicine_category: Option<String>,
    pub supplier_id: Option<i64>,
    pub supplier_name: Option<String>,
    pub current_stock: i32,
    pub min_level: i32,
    pub status: String,
    pub notes: Option<String>,
    pub resolved_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const ALERT_SELECT: &str = r#"
    SELECT a.id, a.medicine_id, m.name AS medicine_name, m.category AS medicine_category,
           a.supplier_id, s.name AS supplier_name, a.current_stock, a.min_level, a.status,
           a.notes, a.resolved_at, a.created_at, a.updated_at
    FROM inventory_alerts a
    JOIN medicines m ON a.medicine_id = m.id
    LEFT JOIN suppliers s ON a.supplier_id = s.id
"#;

#[derive(Debug, Default, Deserialize)]
pub struct CreateAlertRequest {
    pub medicine_id: Option<i64>,
    pub supplier_id: Option<i64>,
    pub current_stock: Option<i32>,
    pub min_level: Option<i32>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateAlertRequest {
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub supplier_id: Option<Option<i64>>,
    pub current_stock: Option<i32>,
    pub min_level: Option<i32>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertFilter {
    pub search: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub supplier_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ScanResult {
    pub created: u64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_alerts).post(create_alert))
        .route("/scan", post(scan_stock))
        .route("/{id}", get(get_alert).put(update_alert).delete(delete_alert))
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, f: &AlertFilter) {
    qb.push(" WHERE 1=1");
    if let Some(pattern) = like_pattern(f.search.as_deref()) {
        qb.push(" AND (m.name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR m.generic_name LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(category) = f.category.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND m.category = ").push_bind(category.to_string());
    }
    if let Some(status) = f.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND a.status = ").push_bind(status.to_string());
    }
    if let Some(supplier_id) = f.supplier_id {
        qb.push(" AND a.supplier_id = ").push_bind(supplier_id);
    }
}

/// Resolution timestamp to write alongside a status change.
fn resolved_at_assignment(status: AlertStatus) -> &'static str {
    match status {
        AlertStatus::Resolved => "resolved_at = COALESCE(resolved_at, NOW())",
        _ => "resolved_at = NULL",
    }
}

pub async fn list_alerts(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<AlertFilter>,
) -> Result<Json<Paged<InventoryAlertRow>>, ApiError> {
    let window = page.window()?;

    let mut count = QueryBuilder::<MySql>::new(
        "SELECT COUNT(*) FROM inventory_alerts a JOIN medicines m ON a.medicine_id = m.id",
    );
    push_filters(&mut count, &filter);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(ALERT_SELECT);
    push_filters(&mut qb, &filter);
    qb.push(" ORDER BY a.status = 'resolved', a.current_stock, a.created_at DESC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let alerts: Vec<InventoryAlertRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: alerts,
        pagination: window.with_total(total),
    }))
}

async fn fetch_alert(state: &AppState, id: i64) -> Result<InventoryAlertRow, ApiError> {
    sqlx::query_as::<_, InventoryAlertRow>(&format!("{ALERT_SELECT} WHERE a.id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Inventory alert"))
}

pub async fn get_alert(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<InventoryAlertRow>>, ApiError> {
    let alert = fetch_alert(&state, id).await?;
    Ok(Json(ApiOk { data: alert }))
}

/// Stock and minimum default to the medicine's current figures; the status
/// defaults to what those figures imply.
pub async fn create_alert(
    State(state): State<AppState>,
    Json(req): Json<CreateAlertRequest>,
) -> Result<(StatusCode, Json<ApiOk<InventoryAlertRow>>), ApiError> {
    let mut v = Validator::new();
    if req.medicine_id.is_none() {
        v.push("medicine_id", "is required");
    }
    v.min("current_stock", req.current_stock, 0);
    v.min("min_level", req.min_level, 0);
    let status: Option<AlertStatus> = v.one_of("status", req.status.as_deref());
    v.finish()?;
    let medicine_id = req.medicine_id.unwrap_or_default();

    let (medicine_name, stock, reorder_level): (String, i32, i32) =
        sqlx::query_as("SELECT name, stock_quantity, reorder_level FROM medicines WHERE id = ?")
            .bind(medicine_id)
            .fetch_optional(&state.db)
            .await
            .map_err(db_error)?
            .ok_or_else(|| ApiError::BadRequest("INVALID_REFERENCE", "Medicine not found".into()))?;
    if let Some(supplier_id) = req.supplier_id {
        require_reference(&state.db, "suppliers", supplier_id, "Supplier").await?;
    }

    let current_stock = req.current_stock.unwrap_or(stock);
    let min_level = req.min_level.unwrap_or(reorder_level);
    let status = status.unwrap_or_else(|| AlertStatus::for_stock(current_stock, min_level));

    let res = sqlx::query(
        r#"
        INSERT INTO inventory_alerts (medicine_id, supplier_id, current_stock, min_level, status, notes, resolved_at)
        VALUES (?, ?, ?, ?, ?, ?, IF(? = 'resolved', NOW(), NULL))
        "#,
    )
    .bind(medicine_id)
    .bind(req.supplier_id)
    .bind(current_stock)
    .bind(min_level)
    .bind(status.as_str())
    .bind(&req.notes)
    .bind(status.as_str())
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(
        &state.db,
        "inventory_alert",
        Some(id),
        "created",
        format!("Stock alert raised for {medicine_name} ({current_stock} left)"),
    )
    .await;

    let alert = fetch_alert(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: alert })))
}

pub async fn update_alert(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateAlertRequest>,
) -> Result<Json<ApiOk<InventoryAlertRow>>, ApiError> {
    let mut v = Validator::new();
    let current_stock = v.min("current_stock", req.current_stock, 0);
    let min_level = v.min("min_level", req.min_level, 0);
    let status: Option<AlertStatus> = v.one_of("status", req.status.as_deref());
    v.finish()?;

    if let Some(Some(supplier_id)) = req.supplier_id {
        require_reference(&state.db, "suppliers", supplier_id, "Supplier").await?;
    }

    let mut set = UpdateSet::new("inventory_alerts");
    set.set_opt("supplier_id", req.supplier_id)
        .set_opt("current_stock", current_stock)
        .set_opt("min_level", min_level)
        .set_opt("notes", req.notes.clone());
    if let Some(status) = status {
        set.set("status", status.as_str()).set_raw(resolved_at_assignment(status));
    }
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }

    set.execute_by_id(id, &state.db).await.map_err(db_error)?;

    let alert = fetch_alert(&state, id).await?;
    activity::record(
        &state.db,
        "inventory_alert",
        Some(id),
        "updated",
        format!("Stock alert for {} marked {}", alert.medicine_name, alert.status),
    )
    .await;
    Ok(Json(ApiOk { data: alert }))
}

/// Raises an alert for every active medicine at or below its reorder level
/// that has no unresolved alert yet.
pub async fn scan_stock(State(state): State<AppState>) -> Result<Json<ApiOk<ScanResult>>, ApiError> {
    let mut tx = state.db.begin().await.map_err(db_error)?;

    let candidates: Vec<(i64, i32, i32)> = sqlx::query_as(
        r#"
        SELECT m.id, m.stock_quantity, m.reorder_level
        FROM medicines m
        WHERE m.status = 'active'
          AND m.stock_quantity <= m.reorder_level
          AND NOT EXISTS (
            SELECT 1 FROM inventory_alerts a
            WHERE a.medicine_id = m.id AND a.status <> 'resolved'
          )
        FOR UPDATE
        "#,
    )
    .fetch_all(&mut *tx)
    .await
    .map_err(db_error)?;

    let mut created = 0;
    for (medicine_id, stock, reorder_level) in candidates {
        let status = AlertStatus::for_stock(stock, reorder_level);
        sqlx::query(
            "INSERT INTO inventory_alerts (medicine_id, current_stock, min_level, status) VALUES (?, ?, ?, ?)",
        )
        .bind(medicine_id)
        .bind(stock)
        .bind(reorder_level)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
        created += 1;
    }
    tx.commit().await.map_err(db_error)?;

    if created > 0 {
        activity::record(
            &state.db,
            "inventory_alert",
            None,
            "created",
            format!("Stock scan raised {created} alert(s)"),
        )
        .await;
    }
    Ok(Json(ApiOk {
        data: ScanResult { created },
    }))
}

pub async fn delete_alert(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM inventory_alerts WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Inventory alert"));
    }

    activity::record(&state.db, "inventory_alert", Some(id), "deleted", format!("Inventory alert #{id} deleted")).await;
    Ok(Json(ok_deleted()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolving_stamps_and_reopening_clears() {
        assert_eq!(
            resolved_at_assignment(AlertStatus::Resolved),
            "resolved_at = COALESCE(resolved_at, NOW())"
        );
        assert_eq!(resolved_at_assignment(AlertStatus::LowStock), "resolved_at = NULL");
        assert_eq!(resolved_at_assignment(AlertStatus::OutOfStock), "resolved_at = NULL");
    }

    #[test]
    fn filters_reach_through_to_the_medicine() {
        let mut qb = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM inventory_alerts a");
        push_filters(
            &mut qb,
            &AlertFilter {
                search: Some("amox".into()),
                category: Some("Antibiotics".into()),
                status: Some("low_stock".into()),
                supplier_id: None,
            },
        );
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM inventory_alerts a WHERE 1=1 AND (m.name LIKE ? OR m.generic_name LIKE ?) \
AND m.category = ? AND a.status = ?"
        );
    }

    #[test]
    fn status_update_carries_the_resolution_stamp() {
        let mut set = UpdateSet::new("inventory_alerts");
        let status = AlertStatus::Resolved;
        set.set("status", status.as_str()).set_raw(resolved_at_assignment(status));
        assert_eq!(
            set.sql(),
            "UPDATE inventory_alerts SET status = ?, resolved_at = COALESCE(resolved_at, NOW())"
        );
    }
}
