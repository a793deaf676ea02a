// src/routes/prescription_template_routes.rs

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json as SqlJson, MySql, QueryBuilder};

use crate::{
    activity,
    db::{require_reference, UpdateSet},
    error::{db_error, ApiError},
    extract::{Json, Path, Query},
    models::{like_pattern, ok_deleted, ApiOk, AppState, OkData, PageQuery, Paged},
    validation::Validator,
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TemplateRow {
    pub id: i64,
    pub name: String,
    pub category: Option<String>,
    pub medications: SqlJson<serde_json::Value>,
    pub instructions: Option<String>,
    pub created_by: Option<i64>,
    pub usage_count: i32,
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const TEMPLATE_COLUMNS: &str = "id, name, category, medications, instructions, created_by, usage_count, \
last_used_at, created_at, updated_at";

#[derive(Debug, Default, Deserialize)]
pub struct TemplateRequest {
    pub name: Option<String>,
    pub category: Option<String>,
    pub medications: Option<serde_json::Value>,
    pub instructions: Option<String>,
    pub created_by: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TemplateFilter {
    pub search: Option<String>,
    pub category: Option<String>,
    /// Only templates used at least once, most recent first.
    pub recent: Option<bool>,
}

#[derive(Debug)]
struct TemplateFields {
    name: Option<String>,
    medications: Option<serde_json::Value>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_templates).post(create_template))
        .route("/{id}", get(get_template).put(update_template).delete(delete_template))
        .route("/{id}/use", post(use_template))
}

/// Each medication must at least name the drug.
fn check_medications(v: &mut Validator, value: &serde_json::Value) -> bool {
    let Some(items) = value.as_array().filter(|items| !items.is_empty()) else {
        v.push("medications", "must be a non-empty array");
        return false;
    };
    let named = items.iter().all(|item| {
        item.get("name")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|name| !name.trim().is_empty())
    });
    if !named {
        v.push("medications", "every entry needs a name");
    }
    named
}

fn validate_fields(req: &TemplateRequest, creating: bool) -> Result<TemplateFields, ApiError> {
    let mut v = Validator::new();
    let name = if creating {
        v.required("name", req.name.as_deref())
    } else {
        v.not_blank("name", req.name.as_deref())
    };
    let medications = match &req.medications {
        Some(meds) => check_medications(&mut v, meds).then(|| meds.clone()),
        None => {
            if creating {
                v.push("medications", "is required");
            }
            None
        }
    };
    v.finish()?;
    Ok(TemplateFields { name, medications })
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, f: &TemplateFilter) {
    qb.push(" WHERE 1=1");
    if let Some(pattern) = like_pattern(f.search.as_deref()) {
        qb.push(" AND (name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR category LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(category) = f.category.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND category = ").push_bind(category.to_string());
    }
    if f.recent == Some(true) {
        qb.push(" AND last_used_at IS NOT NULL");
    }
}

fn order_clause(f: &TemplateFilter) -> &'static str {
    if f.recent == Some(true) {
        " ORDER BY last_used_at DESC"
    } else {
        " ORDER BY usage_count DESC, name"
    }
}

pub async fn list_templates(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<TemplateFilter>,
) -> Result<Json<Paged<TemplateRow>>, ApiError> {
    let window = page.window()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM prescription_templates");
    push_filters(&mut count, &filter);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(format!("SELECT {TEMPLATE_COLUMNS} FROM prescription_templates"));
    push_filters(&mut qb, &filter);
    qb.push(order_clause(&filter))
        .push(" LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let templates: Vec<TemplateRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: templates,
        pagination: window.with_total(total),
    }))
}

async fn fetch_template(state: &AppState, id: i64) -> Result<TemplateRow, ApiError> {
    sqlx::query_as::<_, TemplateRow>(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM prescription_templates WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?
    .ok_or_else(|| ApiError::not_found("Prescription template"))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<TemplateRow>>, ApiError> {
    let template = fetch_template(&state, id).await?;
    Ok(Json(ApiOk { data: template }))
}

pub async fn create_template(
    State(state): State<AppState>,
    Json(req): Json<TemplateRequest>,
) -> Result<(StatusCode, Json<ApiOk<TemplateRow>>), ApiError> {
    let fields = validate_fields(&req, true)?;
    let name = fields.name.unwrap_or_default();
    let medications = fields.medications.unwrap_or_default();

    if let Some(user_id) = req.created_by {
        require_reference(&state.db, "users", user_id, "User").await?;
    }

    let res = sqlx::query(
        r#"
        INSERT INTO prescription_templates (name, category, medications, instructions, created_by)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&name)
    .bind(&req.category)
    .bind(SqlJson(medications))
    .bind(&req.instructions)
    .bind(req.created_by)
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(
        &state.db,
        "prescription_template",
        Some(id),
        "created",
        format!("Prescription template {name} created"),
    )
    .await;

    let template = fetch_template(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: template })))
}

pub async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<TemplateRequest>,
) -> Result<Json<ApiOk<TemplateRow>>, ApiError> {
    let fields = validate_fields(&req, false)?;

    let mut set = UpdateSet::new("prescription_templates");
    set.set_opt("name", fields.name)
        .set_opt("category", req.category.clone())
        .set_opt("medications", fields.medications.map(SqlJson))
        .set_opt("instructions", req.instructions.clone());
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }

    set.execute_by_id(id, &state.db).await.map_err(db_error)?;

    let template = fetch_template(&state, id).await?;
    activity::record(
        &state.db,
        "prescription_template",
        Some(id),
        "updated",
        format!("Prescription template {} updated", template.name),
    )
    .await;
    Ok(Json(ApiOk { data: template }))
}

/// Records that a prescription was written from this template.
pub async fn use_template(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<TemplateRow>>, ApiError> {
    let res = sqlx::query(
        "UPDATE prescription_templates SET usage_count = usage_count + 1, last_used_at = NOW() WHERE id = ?",
    )
    .bind(id)
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Prescription template"));
    }

    let template = fetch_template(&state, id).await?;
    tracing::debug!(template_id = id, usage_count = template.usage_count, "prescription template used");
    Ok(Json(ApiOk { data: template }))
}

pub async fn delete_template(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM prescription_templates WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Prescription template"));
    }

    activity::record(
        &state.db,
        "prescription_template",
        Some(id),
        "deleted",
        format!("Prescription template #{id} deleted"),
    )
    .await;
    Ok(Json(ok_deleted()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_needs_a_name_and_named_medications() {
        let req = TemplateRequest::default();
        let Err(ApiError::Validation(errors)) = validate_fields(&req, true) else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["name", "medications"]);

        let req = TemplateRequest {
            name: Some("Hypertension starter".into()),
            medications: Some(json!([{"name": "Amlodipine", "dosage": "5mg"}, {"dosage": "10mg"}])),
            ..Default::default()
        };
        let Err(ApiError::Validation(errors)) = validate_fields(&req, true) else {
            panic!("expected validation error");
        };
        assert_eq!(errors[0].message, "every entry needs a name");
    }

    #[test]
    fn medications_must_be_a_non_empty_array() {
        let mut v = Validator::new();
        assert!(!check_medications(&mut v, &json!([])));
        assert!(!check_medications(&mut v, &json!({"name": "Amlodipine"})));
        assert!(check_medications(&mut v, &json!([{"name": "Amlodipine"}])));
    }

    #[test]
    fn update_may_leave_medications_alone() {
        let req = TemplateRequest {
            instructions: Some("Review in two weeks".into()),
            ..Default::default()
        };
        let fields = validate_fields(&req, false).unwrap();
        assert!(fields.name.is_none());
        assert!(fields.medications.is_none());
    }

    #[test]
    fn recent_templates_are_ordered_by_last_use() {
        let recent = TemplateFilter {
            recent: Some(true),
            ..Default::default()
        };
        let mut qb = QueryBuilder::<MySql>::new("SELECT id FROM prescription_templates");
        push_filters(&mut qb, &recent);
        qb.push(order_clause(&recent));
        assert_eq!(
            qb.sql(),
            "SELECT id FROM prescription_templates WHERE 1=1 AND last_used_at IS NOT NULL ORDER BY last_used_at DESC"
        );
        assert_eq!(order_clause(&TemplateFilter::default()), " ORDER BY usage_count DESC, name");
    }
}
