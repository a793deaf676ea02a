// src/routes/doctor_routes.rs

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Router,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json as SqlJson, MySql, QueryBuilder};

use crate::{
    activity,
    db::{require_reference, UpdateSet},
    error::{db_error, ApiError},
    extract::{Json, Path, Query},
    models::{like_pattern, ApiOk, AppState, CountBy, PageQuery, Paged},
    validation::Validator,
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DoctorRow {
    pub id: i64,
    pub user_id: i64,
    pub department_id: Option<i64>,
    pub specialization: String,
    pub license_number: String,
    pub experience_years: i32,
    pub consultation_fee_cents: i64,
    pub availability_schedule: Option<SqlJson<serde_json::Value>>,
    pub bio: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub department_name: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const DOCTOR_SELECT: &str = r#"
    SELECT d.id, d.user_id, d.department_id, d.specialization, d.license_number,
           d.experience_years, d.consultation_fee_cents, d.availability_schedule, d.bio,
           u.first_name, u.last_name, u.email, u.phone, u.avatar,
           dept.name AS department_name, d.created_at, d.updated_at
    FROM doctors d
    JOIN users u ON d.user_id = u.id
    LEFT JOIN departments dept ON d.department_id = dept.id
"#;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct UpcomingAppointmentRow {
    pub id: i64,
    pub patient_id: i64,
    pub patient_number: String,
    pub patient_first_name: String,
    pub patient_last_name: String,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub duration_minutes: i32,
    pub status: String,
    #[serde(rename = "type")]
    pub appointment_type: String,
}

#[derive(Debug, Serialize)]
pub struct DoctorDetail {
    #[serde(flatten)]
    pub doctor: DoctorRow,
    pub upcoming_appointments: Vec<UpcomingAppointmentRow>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDoctorRequest {
    pub user_id: Option<i64>,
    pub department_id: Option<i64>,
    pub specialization: Option<String>,
    pub license_number: Option<String>,
    pub experience_years: Option<i32>,
    pub consultation_fee_cents: Option<i64>,
    pub availability_schedule: Option<serde_json::Value>,
    pub bio: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateDoctorRequest {
    pub department_id: Option<i64>,
    pub specialization: Option<String>,
    pub license_number: Option<String>,
    pub experience_years: Option<i32>,
    pub consultation_fee_cents: Option<i64>,
    pub availability_schedule: Option<serde_json::Value>,
    pub bio: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DoctorFilter {
    pub search: Option<String>,
    pub department_id: Option<i64>,
    pub specialization: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DepartmentDoctorCount {
    pub department_name: String,
    pub doctor_count: i64,
}

#[derive(Debug, Serialize)]
pub struct DoctorStats {
    pub total_doctors: i64,
    pub specialization_distribution: Vec<CountBy>,
    pub department_distribution: Vec<DepartmentDoctorCount>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_doctors).post(create_doctor))
        .route("/stats/overview", get(doctor_stats))
        .route("/{id}", get(get_doctor).put(update_doctor))
}

fn validate_create(req: &CreateDoctorRequest) -> Result<(), ApiError> {
    let mut v = Validator::new();
    if req.user_id.is_none() {
        v.push("user_id", "is required");
    }
    v.required("specialization", req.specialization.as_deref());
    v.required("license_number", req.license_number.as_deref());
    v.min("experience_years", req.experience_years, 0);
    v.min("consultation_fee_cents", req.consultation_fee_cents, 0);
    v.finish()
}

fn build_update<'a>(req: &UpdateDoctorRequest) -> Result<UpdateSet<'a>, ApiError> {
    let mut v = Validator::new();
    let mut set = UpdateSet::new("doctors");

    set.set_opt("department_id", req.department_id)
        .set_opt("specialization", v.not_blank("specialization", req.specialization.as_deref()))
        .set_opt("license_number", v.not_blank("license_number", req.license_number.as_deref()))
        .set_opt("experience_years", v.min("experience_years", req.experience_years, 0))
        .set_opt(
            "consultation_fee_cents",
            v.min("consultation_fee_cents", req.consultation_fee_cents, 0),
        )
        .set_opt("availability_schedule", req.availability_schedule.clone().map(SqlJson))
        .set_opt("bio", req.bio.clone());

    v.finish()?;
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }
    Ok(set)
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, f: &DoctorFilter) {
    qb.push(" WHERE u.is_active = TRUE");
    if let Some(pattern) = like_pattern(f.search.as_deref()) {
        qb.push(" AND (CONCAT(u.first_name, ' ', u.last_name) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR d.specialization LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(department_id) = f.department_id {
        qb.push(" AND d.department_id = ").push_bind(department_id);
    }
    if let Some(spec) = f.specialization.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND d.specialization = ").push_bind(spec.to_string());
    }
}

pub async fn list_doctors(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<DoctorFilter>,
) -> Result<Json<Paged<DoctorRow>>, ApiError> {
    let window = page.window()?;

    let mut count = QueryBuilder::<MySql>::new(
        "SELECT COUNT(*) FROM doctors d JOIN users u ON d.user_id = u.id",
    );
    push_filters(&mut count, &filter);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(DOCTOR_SELECT);
    push_filters(&mut qb, &filter);
    qb.push(" ORDER BY u.first_name, u.last_name LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let doctors: Vec<DoctorRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: doctors,
        pagination: window.with_total(total),
    }))
}

async fn fetch_doctor(state: &AppState, id: i64) -> Result<DoctorRow, ApiError> {
    sqlx::query_as::<_, DoctorRow>(&format!("{DOCTOR_SELECT} WHERE d.id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Doctor"))
}

pub async fn get_doctor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<DoctorDetail>>, ApiError> {
    let doctor = fetch_doctor(&state, id).await?;

    let upcoming_appointments: Vec<UpcomingAppointmentRow> = sqlx::query_as(
        r#"
        SELECT a.id, a.patient_id, p.patient_number,
               p.first_name AS patient_first_name, p.last_name AS patient_last_name,
               a.appointment_date, a.appointment_time, a.duration_minutes, a.status,
               a.type AS appointment_type
        FROM appointments a
        JOIN patients p ON a.patient_id = p.id
        WHERE a.doctor_id = ? AND a.appointment_date >= CURDATE()
        ORDER BY a.appointment_date, a.appointment_time
        "#,
    )
    .bind(id)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiOk {
        data: DoctorDetail {
            doctor,
            upcoming_appointments,
        },
    }))
}

pub async fn create_doctor(
    State(state): State<AppState>,
    Json(req): Json<CreateDoctorRequest>,
) -> Result<(StatusCode, Json<ApiOk<DoctorRow>>), ApiError> {
    validate_create(&req)?;
    let user_id = req.user_id.unwrap_or_default();

    let role: Option<String> = sqlx::query_scalar("SELECT role FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?;
    if role.as_deref() != Some("doctor") {
        return Err(ApiError::BadRequest(
            "INVALID_REFERENCE",
            "User not found or not a doctor".into(),
        ));
    }

    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM doctors WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?;
    if existing.is_some() {
        return Err(ApiError::Conflict(
            "DOCTOR_EXISTS",
            "Doctor profile already exists".into(),
        ));
    }

    if let Some(department_id) = req.department_id {
        require_reference(&state.db, "departments", department_id, "Department").await?;
    }

    let res = sqlx::query(
        r#"
        INSERT INTO doctors (
          user_id, department_id, specialization, license_number,
          experience_years, consultation_fee_cents, availability_schedule, bio
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(req.department_id)
    .bind(req.specialization.as_deref().map(str::trim))
    .bind(req.license_number.as_deref().map(str::trim))
    .bind(req.experience_years.unwrap_or(0))
    .bind(req.consultation_fee_cents.unwrap_or(0))
    .bind(req.availability_schedule.clone().map(SqlJson))
    .bind(&req.bio)
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(
        &state.db,
        "doctor",
        Some(id),
        "created",
        format!("Doctor profile created for user #{user_id}"),
    )
    .await;

    let doctor = fetch_doctor(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: doctor })))
}

pub async fn update_doctor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateDoctorRequest>,
) -> Result<Json<ApiOk<DoctorRow>>, ApiError> {
    let set = build_update(&req)?;
    if let Some(department_id) = req.department_id {
        require_reference(&state.db, "departments", department_id, "Department").await?;
    }
    set.execute_by_id(id, &state.db).await.map_err(db_error)?;

    let doctor = fetch_doctor(&state, id).await?;
    activity::record(&state.db, "doctor", Some(id), "updated", format!("Doctor #{id} updated")).await;
    Ok(Json(ApiOk { data: doctor }))
}

pub async fn doctor_stats(State(state): State<AppState>) -> Result<Json<ApiOk<DoctorStats>>, ApiError> {
    let total_doctors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM doctors")
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let specialization_distribution: Vec<CountBy> = sqlx::query_as(
        r#"
        SELECT specialization AS label, COUNT(*) AS count
        FROM doctors
        GROUP BY specialization
        ORDER BY count DESC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    let department_distribution: Vec<DepartmentDoctorCount> = sqlx::query_as(
        r#"
        SELECT d.name AS department_name, COUNT(doc.id) AS doctor_count
        FROM departments d
        LEFT JOIN doctors doc ON d.id = doc.department_id
        GROUP BY d.id, d.name
        ORDER BY doctor_count DESC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiOk {
        data: DoctorStats {
            total_doctors,
            specialization_distribution,
            department_distribution,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_requires_profile_fields() {
        let req: CreateDoctorRequest =
            serde_json::from_str(r#"{"specialization":"","experience_years":-2}"#).unwrap();
        let Err(ApiError::Validation(errors)) = validate_create(&req) else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["user_id", "specialization", "license_number", "experience_years"]);
    }

    #[test]
    fn update_stores_schedule_as_json() {
        let req: UpdateDoctorRequest = serde_json::from_str(
            r#"{"availability_schedule":{"monday":["09:00","17:00"]},"consultation_fee_cents":15000}"#,
        )
        .unwrap();
        let set = build_update(&req).unwrap();
        assert_eq!(
            set.sql(),
            "UPDATE doctors SET consultation_fee_cents = ?, availability_schedule = ?"
        );
    }

    #[test]
    fn negative_fee_is_rejected() {
        let req = UpdateDoctorRequest {
            consultation_fee_cents: Some(-1),
            ..Default::default()
        };
        assert!(matches!(build_update(&req), Err(ApiError::Validation(_))));
    }
}
