// src/routes/report_routes.rs

use axum::{
    extract::State,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json as SqlJson, MySql, QueryBuilder};

use crate::{
    activity,
    error::{db_error, ApiError},
    extract::{Json, Path, Query},
    models::{ok_deleted, ApiOk, AppState, OkData, PageQuery, Paged, ReportType},
    validation::{Validator, Vocabulary},
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ReportRow {
    pub id: i64,
    pub report_type: String,
    pub title: String,
    pub content: String,
    pub parameters: Option<SqlJson<serde_json::Value>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub(crate) const REPORT_COLUMNS: &str = "id, report_type, title, content, parameters, created_at";

#[derive(Debug, Default, Deserialize)]
pub struct ReportFilter {
    pub report_type: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_reports))
        .route("/{id}", get(get_report).delete(delete_report))
}

pub async fn list_reports(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<ReportFilter>,
) -> Result<Json<Paged<ReportRow>>, ApiError> {
    let window = page.window()?;

    let mut v = Validator::new();
    let report_type = v.one_of::<ReportType>("report_type", filter.report_type.as_deref());
    v.finish()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM ai_reports");
    let mut qb = QueryBuilder::<MySql>::new(format!("SELECT {REPORT_COLUMNS} FROM ai_reports"));
    if let Some(t) = report_type {
        count.push(" WHERE report_type = ").push_bind(t.as_str());
        qb.push(" WHERE report_type = ").push_bind(t.as_str());
    }

    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    qb.push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());
    let reports: Vec<ReportRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: reports,
        pagination: window.with_total(total),
    }))
}

pub(crate) async fn fetch_report(state: &AppState, id: i64) -> Result<ReportRow, ApiError> {
    sqlx::query_as::<_, ReportRow>(&format!("SELECT {REPORT_COLUMNS} FROM ai_reports WHERE id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Report"))
}

pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<ReportRow>>, ApiError> {
    let report = fetch_report(&state, id).await?;
    Ok(Json(ApiOk { data: report }))
}

pub async fn delete_report(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM ai_reports WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Report"));
    }

    activity::record(&state.db, "ai_report", Some(id), "deleted", format!("Report #{id} deleted")).await;
    Ok(Json(ok_deleted()))
}
