// src/routes/specialization_routes.rs

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{MySql, QueryBuilder};

use crate::{
    activity,
    db::{require_reference, UpdateSet},
    error::{db_error, ApiError},
    extract::{Json, Path, Query},
    models::{like_pattern, ok_deleted, ApiOk, AppState, ListingStatus, OkData, PageQuery, Paged},
    validation::{Validator, Vocabulary},
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct SpecializationRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub department_id: Option<i64>,
    pub department_name: Option<String>,
    pub status: String,
    pub doctor_count: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

// Doctors are matched on their free-text specialization.
const SPECIALIZATION_SELECT: &str = r#"
    SELECT sp.id, sp.name, sp.description, sp.department_id, d.name AS department_name, sp.status,
           (SELECT COUNT(*) FROM doctors doc WHERE doc.specialization = sp.name) AS doctor_count,
           sp.created_at, sp.updated_at
    FROM specializations sp
    LEFT JOIN departments d ON sp.department_id = d.id
"#;

#[derive(Debug, Default, Deserialize)]
pub struct SpecializationRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub department_id: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SpecializationFilter {
    pub search: Option<String>,
    pub department_id: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Default)]
struct SpecializationFields {
    name: Option<String>,
    status: Option<ListingStatus>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_specializations).post(create_specialization))
        .route(
            "/{id}",
            get(get_specialization)
                .put(update_specialization)
                .delete(delete_specialization),
        )
}

fn validate_fields(req: &SpecializationRequest, creating: bool) -> Result<SpecializationFields, ApiError> {
    let mut v = Validator::new();
    let name = if creating {
        v.required("name", req.name.as_deref())
    } else {
        v.not_blank("name", req.name.as_deref())
    };
    if creating && req.department_id.is_none() {
        v.push("department_id", "is required");
    }
    let fields = SpecializationFields {
        name,
        status: v.one_of("status", req.status.as_deref()),
    };
    v.finish()?;
    Ok(fields)
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, f: &SpecializationFilter) {
    qb.push(" WHERE 1=1");
    if let Some(pattern) = like_pattern(f.search.as_deref()) {
        qb.push(" AND (sp.name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR sp.description LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(department_id) = f.department_id {
        qb.push(" AND sp.department_id = ").push_bind(department_id);
    }
    if let Some(status) = f.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND sp.status = ").push_bind(status.to_string());
    }
}

fn duplicate_name(e: sqlx::Error) -> ApiError {
    match db_error(e) {
        ApiError::Conflict(..) => ApiError::Conflict(
            "SPECIALIZATION_EXISTS",
            "Specialization with this name already exists".into(),
        ),
        other => other,
    }
}

pub async fn list_specializations(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<SpecializationFilter>,
) -> Result<Json<Paged<SpecializationRow>>, ApiError> {
    let window = page.window()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM specializations sp");
    push_filters(&mut count, &filter);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(SPECIALIZATION_SELECT);
    push_filters(&mut qb, &filter);
    qb.push(" ORDER BY sp.name LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let rows: Vec<SpecializationRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: rows,
        pagination: window.with_total(total),
    }))
}

async fn fetch_specialization(state: &AppState, id: i64) -> Result<SpecializationRow, ApiError> {
    sqlx::query_as::<_, SpecializationRow>(&format!("{SPECIALIZATION_SELECT} WHERE sp.id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Specialization"))
}

pub async fn get_specialization(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<SpecializationRow>>, ApiError> {
    let row = fetch_specialization(&state, id).await?;
    Ok(Json(ApiOk { data: row }))
}

pub async fn create_specialization(
    State(state): State<AppState>,
    Json(req): Json<SpecializationRequest>,
) -> Result<(StatusCode, Json<ApiOk<SpecializationRow>>), ApiError> {
    let fields = validate_fields(&req, true)?;
    let name = fields.name.unwrap_or_default();
    let department_id = req.department_id.unwrap_or_default();
    let status = fields.status.unwrap_or(ListingStatus::Active);

    require_reference(&state.db, "departments", department_id, "Department").await?;

    let res = sqlx::query(
        "INSERT INTO specializations (name, description, department_id, status) VALUES (?, ?, ?, ?)",
    )
    .bind(&name)
    .bind(&req.description)
    .bind(department_id)
    .bind(status.as_str())
    .execute(&state.db)
    .await
    .map_err(duplicate_name)?;

    let id = res.last_insert_id() as i64;
    activity::record(&state.db, "specialization", Some(id), "created", format!("Specialization {name} added")).await;

    let row = fetch_specialization(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: row })))
}

pub async fn update_specialization(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SpecializationRequest>,
) -> Result<Json<ApiOk<SpecializationRow>>, ApiError> {
    let fields = validate_fields(&req, false)?;

    if let Some(department_id) = req.department_id {
        require_reference(&state.db, "departments", department_id, "Department").await?;
    }

    let mut set = UpdateSet::new("specializations");
    set.set_opt("name", fields.name)
        .set_opt("description", req.description.clone())
        .set_opt("department_id", req.department_id)
        .set_opt("status", fields.status.map(|s| s.as_str()));
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }

    set.execute_by_id(id, &state.db).await.map_err(duplicate_name)?;

    let row = fetch_specialization(&state, id).await?;
    activity::record(
        &state.db,
        "specialization",
        Some(id),
        "updated",
        format!("Specialization {} updated", row.name),
    )
    .await;
    Ok(Json(ApiOk { data: row }))
}

/// Refused while any doctor still lists the specialization.
pub async fn delete_specialization(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let row = fetch_specialization(&state, id).await?;
    if row.doctor_count > 0 {
        return Err(ApiError::Conflict(
            "SPECIALIZATION_IN_USE",
            format!("{} doctor(s) still list {}", row.doctor_count, row.name),
        ));
    }

    sqlx::query("DELETE FROM specializations WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    activity::record(
        &state.db,
        "specialization",
        Some(id),
        "deleted",
        format!("Specialization {} deleted", row.name),
    )
    .await;
    Ok(Json(ok_deleted()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_needs_name_and_department() {
        let Err(ApiError::Validation(errors)) = validate_fields(&SpecializationRequest::default(), true) else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["name", "department_id"]);
    }

    #[test]
    fn update_accepts_a_lone_status() {
        let req = SpecializationRequest {
            status: Some("Inactive".into()),
            ..Default::default()
        };
        let fields = validate_fields(&req, false).unwrap();
        assert_eq!(fields.status, Some(ListingStatus::Inactive));
        assert!(fields.name.is_none());
    }

    #[test]
    fn search_covers_name_and_description() {
        let mut qb = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM specializations sp");
        push_filters(
            &mut qb,
            &SpecializationFilter {
                search: Some("cardio".into()),
                department_id: Some(2),
                status: None,
            },
        );
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM specializations sp WHERE 1=1 AND (sp.name LIKE ? OR sp.description LIKE ?) \
AND sp.department_id = ?"
        );
    }
}
