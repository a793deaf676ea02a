// src/routes/activity_routes.rs

use axum::{
    extract::State,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{MySql, QueryBuilder};

use crate::{
    error::{db_error, ApiError},
    extract::{Json, Query},
    models::{AppState, PageQuery, Paged},
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ActivityRow {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub action: String,
    pub description: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivityFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_activity))
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, f: &ActivityFilter) {
    qb.push(" WHERE 1=1");
    if let Some(entity_type) = f.entity_type.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND entity_type = ").push_bind(entity_type.to_string());
    }
    if let Some(entity_id) = f.entity_id {
        qb.push(" AND entity_id = ").push_bind(entity_id);
    }
}

/// Newest first.
pub async fn list_activity(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<ActivityFilter>,
) -> Result<Json<Paged<ActivityRow>>, ApiError> {
    let window = page.window()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM activity_logs");
    push_filters(&mut count, &filter);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(
        "SELECT id, entity_type, entity_id, action, description, created_at FROM activity_logs",
    );
    push_filters(&mut qb, &filter);
    qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let entries: Vec<ActivityRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: entries,
        pagination: window.with_total(total),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_entity_type_is_ignored() {
        let mut qb = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM activity_logs");
        push_filters(
            &mut qb,
            &ActivityFilter {
                entity_type: Some("  ".into()),
                entity_id: Some(3),
            },
        );
        assert_eq!(qb.sql(), "SELECT COUNT(*) FROM activity_logs WHERE 1=1 AND entity_id = ?");
    }
}
