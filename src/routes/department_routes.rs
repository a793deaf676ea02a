// src/routes/department_routes.rs

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
    models::{deserialize_double_option, ok_deleted, ApiOk, AppState, OkData, PageQuery, Paged},
    validation::Validator,
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DepartmentRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub head_doctor_id: Option<i64>,
    pub head_doctor_first_name: Option<String>,
    pub head_doctor_last_name: Option<String>,
    pub location: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
    pub doctor_count: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const DEPARTMENT_SELECT: &str = r#"
    SELECT d.id, d.name, d.description, d.head_doctor_id,
           u.first_name AS head_doctor_first_name, u.last_name AS head_doctor_last_name,
           d.location, d.phone, d.email, d.is_active,
           (SELECT COUNT(*) FROM doctors doc WHERE doc.department_id = d.id) AS doctor_count,
           d.created_at, d.updated_at
    FROM departments d
    LEFT JOIN users u ON d.head_doctor_id = u.id
"#;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DepartmentDoctorRow {
    pub id: i64,
    pub user_id: i64,
    pub specialization: String,
    pub experience_years: i32,
    pub consultation_fee_cents: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DepartmentStatistics {
    pub total_appointments: i64,
    pub completed_appointments: i64,
    pub upcoming_appointments: i64,
}

#[derive(Debug, Serialize)]
pub struct DepartmentDetail {
    #[serde(flatten)]
    pub department: DepartmentRow,
    pub doctors: Vec<DepartmentDoctorRow>,
    pub statistics: DepartmentStatistics,
}

#[derive(Debug, Default, Deserialize)]
pub struct DepartmentRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub head_doctor_id: Option<Option<i64>>,
    pub location: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Default, PartialEq)]
struct DepartmentFields {
    name: Option<String>,
    phone: Option<String>,
    email: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_departments).post(create_department))
        .route(
            "/{id}",
            get(get_department).put(update_department).delete(delete_department),
        )
}

fn validate_fields(req: &DepartmentRequest, creating: bool) -> Result<DepartmentFields, ApiError> {
    let mut v = Validator::new();
    let name = if creating {
        v.required("name", req.name.as_deref())
    } else {
        v.not_blank("name", req.name.as_deref())
    };
    let fields = DepartmentFields {
        name,
        phone: v.phone("phone", req.phone.as_deref()),
        email: v.email("email", req.email.as_deref()),
    };
    v.finish()?;
    Ok(fields)
}

async fn ensure_name_free(state: &AppState, name: &str, exclude_id: i64) -> Result<(), ApiError> {
    let taken: Option<i64> = sqlx::query_scalar("SELECT id FROM departments WHERE name = ? AND id <> ?")
        .bind(name)
        .bind(exclude_id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?;
    if taken.is_some() {
        return Err(ApiError::Conflict(
            "DEPARTMENT_EXISTS",
            "Department with this name already exists".into(),
        ));
    }
    Ok(())
}

pub async fn list_departments(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Paged<DepartmentRow>>, ApiError> {
    let window = page.window()?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM departments WHERE is_active = TRUE")
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(DEPARTMENT_SELECT);
    qb.push(" WHERE d.is_active = TRUE ORDER BY d.name LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let departments: Vec<DepartmentRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: departments,
        pagination: window.with_total(total),
    }))
}

async fn fetch_department(state: &AppState, id: i64) -> Result<DepartmentRow, ApiError> {
    sqlx::query_as::<_, DepartmentRow>(&format!(
        "{DEPARTMENT_SELECT} WHERE d.id = ? AND d.is_active = TRUE"
    ))
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?
    .ok_or_else(|| ApiError::not_found("Department"))
}

pub async fn get_department(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<DepartmentDetail>>, ApiError> {
    let department = fetch_department(&state, id).await?;

    let doctors: Vec<DepartmentDoctorRow> = sqlx::query_as(
        r#"
        SELECT doc.id, doc.user_id, doc.specialization, doc.experience_years,
               doc.consultation_fee_cents, u.first_name, u.last_name, u.email, u.phone
        FROM doctors doc
        JOIN users u ON doc.user_id = u.id
        WHERE doc.department_id = ? AND u.is_active = TRUE
        ORDER BY u.first_name, u.last_name
        "#,
    )
    .bind(id)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    let statistics: DepartmentStatistics = sqlx::query_as(
        r#"
        SELECT
          COUNT(*) AS total_appointments,
          CAST(COALESCE(SUM(status = 'completed'), 0) AS SIGNED) AS completed_appointments,
          CAST(COALESCE(SUM(appointment_date >= CURDATE()), 0) AS SIGNED) AS upcoming_appointments
        FROM appointments
        WHERE department_id = ?
        "#,
    )
    .bind(id)
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiOk {
        data: DepartmentDetail {
            department,
            doctors,
            statistics,
        },
    }))
}

pub async fn create_department(
    State(state): State<AppState>,
    Json(req): Json<DepartmentRequest>,
) -> Result<(StatusCode, Json<ApiOk<DepartmentRow>>), ApiError> {
    let fields = validate_fields(&req, true)?;
    let name = fields.name.clone().unwrap_or_default();

    ensure_name_free(&state, &name, 0).await?;
    let head_doctor_id = req.head_doctor_id.flatten();
    if let Some(user_id) = head_doctor_id {
        require_reference(&state.db, "users", user_id, "Head doctor").await?;
    }

    let res = sqlx::query(
        r#"
        INSERT INTO departments (name, description, head_doctor_id, location, phone, email)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&name)
    .bind(&req.description)
    .bind(head_doctor_id)
    .bind(&req.location)
    .bind(&fields.phone)
    .bind(&fields.email)
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(&state.db, "department", Some(id), "created", format!("Department {name} created")).await;

    let department = fetch_department(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: department })))
}

pub async fn update_department(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<DepartmentRequest>,
) -> Result<Json<ApiOk<DepartmentRow>>, ApiError> {
    let fields = validate_fields(&req, false)?;

    let mut set = UpdateSet::new("departments");
    set.set_opt("name", fields.name.clone())
        .set_opt("description", req.description.clone())
        .set_opt("head_doctor_id", req.head_doctor_id)
        .set_opt("location", req.location.clone())
        .set_opt("phone", fields.phone)
        .set_opt("email", fields.email);
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }

    if let Some(name) = fields.name.as_deref() {
        ensure_name_free(&state, name, id).await?;
    }
    if let Some(Some(user_id)) = req.head_doctor_id {
        require_reference(&state.db, "users", user_id, "Head doctor").await?;
    }

    set.execute_by_id(id, &state.db).await.map_err(db_error)?;

    let department = fetch_department(&state, id).await?;
    activity::record(
        &state.db,
        "department",
        Some(id),
        "updated",
        format!("Department {} updated", department.name),
    )
    .await;
    Ok(Json(ApiOk { data: department }))
}

/// Soft delete: the department disappears from listings but keeps its history.
pub async fn delete_department(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("UPDATE departments SET is_active = FALSE WHERE id = ? AND is_active = TRUE")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Department"));
    }

    activity::record(&state.db, "department", Some(id), "deleted", format!("Department #{id} deactivated")).await;
    Ok(Json(ok_deleted()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_requires_a_name() {
        let req = DepartmentRequest {
            name: Some("   ".into()),
            ..Default::default()
        };
        let Err(ApiError::Validation(errors)) = validate_fields(&req, true) else {
            panic!("expected validation error");
        };
        assert_eq!(errors[0].field, "name");
    }

    #[test]
    fn update_allows_missing_name_but_checks_contact() {
        let req = DepartmentRequest {
            email: Some("cardio@hospital".into()),
            ..Default::default()
        };
        let Err(ApiError::Validation(errors)) = validate_fields(&req, false) else {
            panic!("expected validation error");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "email");
    }

    #[test]
    fn fields_are_trimmed_and_normalized() {
        let req = DepartmentRequest {
            name: Some(" Cardiology ".into()),
            email: Some("Cardio@Hospital.com".into()),
            ..Default::default()
        };
        let fields = validate_fields(&req, true).unwrap();
        assert_eq!(fields.name.as_deref(), Some("Cardiology"));
        assert_eq!(fields.email.as_deref(), Some("cardio@hospital.com"));
    }
}
