// src/routes/staff_routes.rs

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
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
    models::{like_pattern, ok_deleted, ApiOk, AppState, Gender, OkData, PageQuery, Paged, StaffStatus},
    validation::{Validator, Vocabulary},
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct StaffRow {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub role: String,
    pub department: Option<String>,
    pub joined_date: NaiveDate,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const STAFF_COLUMNS: &str = "id, first_name, last_name, email, phone, date_of_birth, gender, address, \
role, department, joined_date, status, created_at, updated_at";

#[derive(Debug, Default, Deserialize)]
pub struct StaffRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub role: Option<String>,
    pub department: Option<String>,
    pub joined_date: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StaffFilter {
    pub search: Option<String>,
    pub department: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default)]
struct StaffFields {
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    date_of_birth: Option<NaiveDate>,
    gender: Option<Gender>,
    role: Option<String>,
    joined_date: Option<NaiveDate>,
    status: Option<StaffStatus>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_staff).post(create_staff))
        .route("/{id}", get(get_staff).put(update_staff).delete(delete_staff))
}

fn validate_fields(req: &StaffRequest, creating: bool) -> Result<StaffFields, ApiError> {
    let mut v = Validator::new();
    let mut fields = StaffFields::default();

    if creating {
        fields.first_name = v.required("first_name", req.first_name.as_deref());
        fields.last_name = v.required("last_name", req.last_name.as_deref());
        if v.required("email", req.email.as_deref()).is_some() {
            fields.email = v.email("email", req.email.as_deref());
        }
        fields.role = v.required("role", req.role.as_deref());
        if v.required("joined_date", req.joined_date.as_deref()).is_some() {
            fields.joined_date = v.date("joined_date", req.joined_date.as_deref());
        }
    } else {
        fields.first_name = v.not_blank("first_name", req.first_name.as_deref());
        fields.last_name = v.not_blank("last_name", req.last_name.as_deref());
        fields.email = v.email("email", req.email.as_deref());
        fields.role = v.not_blank("role", req.role.as_deref());
        fields.joined_date = v.date("joined_date", req.joined_date.as_deref());
    }

    fields.phone = v.phone("phone", req.phone.as_deref());
    fields.date_of_birth = v.date("date_of_birth", req.date_of_birth.as_deref());
    fields.gender = v.one_of("gender", req.gender.as_deref());
    fields.status = v.one_of("status", req.status.as_deref());

    v.finish()?;
    Ok(fields)
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, f: &StaffFilter, status: Option<StaffStatus>) {
    qb.push(" WHERE 1=1");
    if let Some(pattern) = like_pattern(f.search.as_deref()) {
        qb.push(" AND (CONCAT(first_name, ' ', last_name) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR email LIKE ")
            .push_bind(pattern.clone())
            .push(" OR role LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(department) = f.department.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND department = ").push_bind(department.to_string());
    }
    if let Some(status) = status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
}

pub async fn list_staff(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<StaffFilter>,
) -> Result<Json<Paged<StaffRow>>, ApiError> {
    let window = page.window()?;
    let mut v = Validator::new();
    let status = v.one_of::<StaffStatus>("status", filter.status.as_deref());
    v.finish()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM staff");
    push_filters(&mut count, &filter, status);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(format!("SELECT {STAFF_COLUMNS} FROM staff"));
    push_filters(&mut qb, &filter, status);
    qb.push(" ORDER BY last_name, first_name LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let staff: Vec<StaffRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: staff,
        pagination: window.with_total(total),
    }))
}

async fn fetch_staff(state: &AppState, id: i64) -> Result<StaffRow, ApiError> {
    sqlx::query_as::<_, StaffRow>(&format!("SELECT {STAFF_COLUMNS} FROM staff WHERE id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Staff member"))
}

pub async fn get_staff(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<StaffRow>>, ApiError> {
    let member = fetch_staff(&state, id).await?;
    Ok(Json(ApiOk { data: member }))
}

pub async fn create_staff(
    State(state): State<AppState>,
    Json(req): Json<StaffRequest>,
) -> Result<(StatusCode, Json<ApiOk<StaffRow>>), ApiError> {
    let fields = validate_fields(&req, true)?;
    let email = fields.email.unwrap_or_default();

    let res = sqlx::query(
        r#"
        INSERT INTO staff (
          first_name, last_name, email, phone, date_of_birth, gender, address,
          role, department, joined_date, status
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(fields.first_name.unwrap_or_default())
    .bind(fields.last_name.unwrap_or_default())
    .bind(&email)
    .bind(fields.phone)
    .bind(fields.date_of_birth)
    .bind(fields.gender.map(|g| g.as_str()))
    .bind(&req.address)
    .bind(fields.role.unwrap_or_default())
    .bind(&req.department)
    .bind(fields.joined_date)
    .bind(fields.status.unwrap_or(StaffStatus::Active).as_str())
    .execute(&state.db)
    .await
    .map_err(|e| match db_error(e) {
        ApiError::Conflict(..) => ApiError::Conflict(
            "STAFF_EXISTS",
            "Staff member with this email already exists".into(),
        ),
        other => other,
    })?;

    let id = res.last_insert_id() as i64;
    activity::record(&state.db, "staff", Some(id), "created", format!("Staff member {email} added")).await;

    let member = fetch_staff(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: member })))
}

pub async fn update_staff(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<StaffRequest>,
) -> Result<Json<ApiOk<StaffRow>>, ApiError> {
    let fields = validate_fields(&req, false)?;

    let mut set = UpdateSet::new("staff");
    set.set_opt("first_name", fields.first_name)
        .set_opt("last_name", fields.last_name)
        .set_opt("email", fields.email)
        .set_opt("phone", fields.phone)
        .set_opt("date_of_birth", fields.date_of_birth)
        .set_opt("gender", fields.gender.map(|g| g.as_str()))
        .set_opt("address", req.address.clone())
        .set_opt("role", fields.role)
        .set_opt("department", req.department.clone())
        .set_opt("joined_date", fields.joined_date)
        .set_opt("status", fields.status.map(|s| s.as_str()));
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }

    set.execute_by_id(id, &state.db).await.map_err(db_error)?;

    let member = fetch_staff(&state, id).await?;
    activity::record(&state.db, "staff", Some(id), "updated", format!("Staff member {} updated", member.email)).await;
    Ok(Json(ApiOk { data: member }))
}

pub async fn delete_staff(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM staff WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Staff member"));
    }

    activity::record(&state.db, "staff", Some(id), "deleted", format!("Staff member #{id} removed")).await;
    Ok(Json(ok_deleted()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_lists_every_missing_field() {
        let Err(ApiError::Validation(errors)) = validate_fields(&StaffRequest::default(), true) else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["first_name", "last_name", "email", "role", "joined_date"]);
    }

    #[test]
    fn create_normalizes_email_and_parses_dates() {
        let req = StaffRequest {
            first_name: Some("Grace".into()),
            last_name: Some("Hopper".into()),
            email: Some(" Grace@Hospital.com".into()),
            role: Some("Nurse".into()),
            joined_date: Some("2023-09-01".into()),
            status: Some("on_leave".into()),
            ..Default::default()
        };
        let fields = validate_fields(&req, true).unwrap();
        assert_eq!(fields.email.as_deref(), Some("grace@hospital.com"));
        assert_eq!(fields.joined_date, NaiveDate::from_ymd_opt(2023, 9, 1));
        assert_eq!(fields.status, Some(StaffStatus::OnLeave));
    }

    #[test]
    fn filters_compose() {
        let mut qb = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM staff");
        let filter = StaffFilter {
            department: Some("Radiology".into()),
            ..Default::default()
        };
        push_filters(&mut qb, &filter, Some(StaffStatus::Active));
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM staff WHERE 1=1 AND department = ? AND status = ?"
        );
    }
}
