// src/routes/supplier_routes.rs

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
    db::UpdateSet,
    error::{db_error, ApiError},
    extract::{Json, Path, Query},
    models::{like_pattern, ok_deleted, ApiOk, AppState, ListingStatus, OkData, PageQuery, Paged},
    validation::{Validator, Vocabulary},
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct SupplierRow {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub contact_person: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub rating: Option<i8>,
    pub status: String,
    pub description: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const SUPPLIER_COLUMNS: &str = "id, name, category, contact_person, email, phone, location, rating, \
status, description, created_at, updated_at";

#[derive(Debug, Default, Deserialize)]
pub struct SupplierRequest {
    pub name: Option<String>,
    pub category: Option<String>,
    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub rating: Option<i8>,
    pub status: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SupplierFilter {
    pub search: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default)]
struct SupplierFields {
    name: Option<String>,
    category: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    rating: Option<i8>,
    status: Option<ListingStatus>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_suppliers).post(create_supplier))
        .route("/{id}", get(get_supplier).put(update_supplier).delete(delete_supplier))
}

fn validate_fields(req: &SupplierRequest, creating: bool) -> Result<SupplierFields, ApiError> {
    let mut v = Validator::new();
    let (name, category) = if creating {
        (
            v.required("name", req.name.as_deref()),
            v.required("category", req.category.as_deref()),
        )
    } else {
        (
            v.not_blank("name", req.name.as_deref()),
            v.not_blank("category", req.category.as_deref()),
        )
    };
    if creating && req.email.as_deref().map_or(true, |e| e.trim().is_empty()) {
        v.push("email", "is required");
    }
    let fields = SupplierFields {
        name,
        category,
        email: v.email("email", req.email.as_deref()),
        phone: v.phone("phone", req.phone.as_deref()),
        rating: v.range("rating", req.rating, 0, 5),
        status: v.one_of("status", req.status.as_deref()),
    };
    v.finish()?;
    Ok(fields)
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, f: &SupplierFilter) {
    qb.push(" WHERE 1=1");
    if let Some(pattern) = like_pattern(f.search.as_deref()) {
        qb.push(" AND (name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR contact_person LIKE ")
            .push_bind(pattern.clone())
            .push(" OR email LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(category) = f.category.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND category = ").push_bind(category.to_string());
    }
    if let Some(status) = f.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND status = ").push_bind(status.to_string());
    }
}

fn duplicate_name(e: sqlx::Error) -> ApiError {
    match db_error(e) {
        ApiError::Conflict(..) => ApiError::Conflict(
            "SUPPLIER_EXISTS",
            "Supplier with this name already exists".into(),
        ),
        other => other,
    }
}

pub async fn list_suppliers(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<SupplierFilter>,
) -> Result<Json<Paged<SupplierRow>>, ApiError> {
    let window = page.window()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM suppliers");
    push_filters(&mut count, &filter);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(format!("SELECT {SUPPLIER_COLUMNS} FROM suppliers"));
    push_filters(&mut qb, &filter);
    qb.push(" ORDER BY name LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let suppliers: Vec<SupplierRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: suppliers,
        pagination: window.with_total(total),
    }))
}

async fn fetch_supplier(state: &AppState, id: i64) -> Result<SupplierRow, ApiError> {
    sqlx::query_as::<_, SupplierRow>(&format!("SELECT {SUPPLIER_COLUMNS} FROM suppliers WHERE id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Supplier"))
}

pub async fn get_supplier(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<SupplierRow>>, ApiError> {
    let supplier = fetch_supplier(&state, id).await?;
    Ok(Json(ApiOk { data: supplier }))
}

pub async fn create_supplier(
    State(state): State<AppState>,
    Json(req): Json<SupplierRequest>,
) -> Result<(StatusCode, Json<ApiOk<SupplierRow>>), ApiError> {
    let fields = validate_fields(&req, true)?;
    let name = fields.name.unwrap_or_default();
    let status = fields.status.unwrap_or(ListingStatus::Active);

    let res = sqlx::query(
        r#"
        INSERT INTO suppliers (
          name, category, contact_person, email, phone, location, rating, status, description
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&name)
    .bind(fields.category)
    .bind(&req.contact_person)
    .bind(fields.email)
    .bind(fields.phone)
    .bind(&req.location)
    .bind(fields.rating)
    .bind(status.as_str())
    .bind(&req.description)
    .execute(&state.db)
    .await
    .map_err(duplicate_name)?;

    let id = res.last_insert_id() as i64;
    activity::record(&state.db, "supplier", Some(id), "created", format!("Supplier {name} added")).await;

    let supplier = fetch_supplier(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: supplier })))
}

pub async fn update_supplier(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SupplierRequest>,
) -> Result<Json<ApiOk<SupplierRow>>, ApiError> {
    let fields = validate_fields(&req, false)?;

    let mut set = UpdateSet::new("suppliers");
    set.set_opt("name", fields.name)
        .set_opt("category", fields.category)
        .set_opt("contact_person", req.contact_person.clone())
        .set_opt("email", fields.email)
        .set_opt("phone", fields.phone)
        .set_opt("location", req.location.clone())
        .set_opt("rating", fields.rating)
        .set_opt("status", fields.status.map(|s| s.as_str()))
        .set_opt("description", req.description.clone());
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }

    set.execute_by_id(id, &state.db).await.map_err(duplicate_name)?;

    let supplier = fetch_supplier(&state, id).await?;
    activity::record(&state.db, "supplier", Some(id), "updated", format!("Supplier {} updated", supplier.name)).await;
    Ok(Json(ApiOk { data: supplier }))
}

pub async fn delete_supplier(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM suppliers WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Supplier"));
    }

    activity::record(&state.db, "supplier", Some(id), "deleted", format!("Supplier #{id} deleted")).await;
    Ok(Json(ok_deleted()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_fields(req: &SupplierRequest, creating: bool) -> Vec<String> {
        let Err(ApiError::Validation(errors)) = validate_fields(req, creating) else {
            panic!("expected validation error");
        };
        errors.into_iter().map(|e| e.field).collect()
    }

    #[test]
    fn create_needs_name_category_and_email() {
        assert_eq!(
            invalid_fields(&SupplierRequest::default(), true),
            ["name", "category", "email"]
        );
    }

    #[test]
    fn rating_is_out_of_five() {
        let req = SupplierRequest {
            rating: Some(6),
            email: Some("not-an-email".into()),
            ..Default::default()
        };
        assert_eq!(invalid_fields(&req, false), ["email", "rating"]);

        let req = SupplierRequest {
            name: Some("MedSupply Co".into()),
            category: Some("Pharmaceuticals".into()),
            email: Some("orders@medsupply.test".into()),
            rating: Some(5),
            ..Default::default()
        };
        let fields = validate_fields(&req, true).unwrap();
        assert_eq!(fields.rating, Some(5));
        assert_eq!(fields.status, None);
    }

    #[test]
    fn filters_bind_category_and_status() {
        let mut qb = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM suppliers");
        push_filters(
            &mut qb,
            &SupplierFilter {
                category: Some("Equipment".into()),
                status: Some("active".into()),
                ..Default::default()
            },
        );
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM suppliers WHERE 1=1 AND category = ? AND status = ?"
        );
    }
}
