// src/routes/patient_routes.rs

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
    models::{
        deserialize_double_option, generate_reference, like_pattern, ok_deleted, ApiOk, AppState,
        BloodType, CountBy, Gender, OkData, PageQuery, Paged,
    },
    validation::{Validator, Vocabulary},
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PatientRow {
    pub id: i64,
    pub patient_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub blood_type: Option<String>,
    pub allergies: Option<String>,
    pub medical_history: Option<String>,
    pub insurance_provider: Option<String>,
    pub insurance_number: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const PATIENT_COLUMNS: &str = "id, patient_number, first_name, last_name, email, phone, \
    date_of_birth, gender, address, emergency_contact_name, emergency_contact_phone, blood_type, \
    allergies, medical_history, insurance_provider, insurance_number, created_at, updated_at";

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PatientAppointmentRow {
    pub id: i64,
    pub appointment_date: NaiveDate,
    pub appointment_time: chrono::NaiveTime,
    pub duration_minutes: i32,
    pub status: String,
    #[serde(rename = "type")]
    pub appointment_type: String,
    pub notes: Option<String>,
    pub doctor_first_name: String,
    pub doctor_last_name: String,
    pub department_name: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PatientRecordRow {
    pub id: i64,
    pub diagnosis: Option<String>,
    pub symptoms: Option<String>,
    pub treatment: Option<String>,
    pub follow_up_date: Option<NaiveDate>,
    pub doctor_first_name: String,
    pub doctor_last_name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct PatientDetail {
    #[serde(flatten)]
    pub patient: PatientRow,
    pub appointments: Vec<PatientAppointmentRow>,
    pub medical_records: Vec<PatientRecordRow>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PatientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub phone: Option<Option<String>>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub blood_type: Option<String>,
    pub allergies: Option<String>,
    pub medical_history: Option<String>,
    pub insurance_provider: Option<String>,
    pub insurance_number: Option<String>,
}

/// Validated patient fields shared by create and update. `None` means "not supplied".
#[derive(Debug, Default, PartialEq)]
struct PatientFields {
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<Option<String>>,
    phone: Option<Option<String>>,
    date_of_birth: Option<NaiveDate>,
    gender: Option<Gender>,
    blood_type: Option<BloodType>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PatientFilter {
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PatientStats {
    pub total_patients: i64,
    pub new_this_month: i64,
    pub gender_distribution: Vec<CountBy>,
    pub age_distribution: Vec<CountBy>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_patients).post(create_patient))
        .route("/stats/overview", get(patient_stats))
        .route("/{id}", get(get_patient).put(update_patient).delete(delete_patient))
}

/* =========================
   Validation
========================= */

fn nullable(
    v: &mut Validator,
    value: &Option<Option<String>>,
    check: fn(&mut Validator, &str, Option<&str>) -> Option<String>,
    field: &str,
) -> Option<Option<String>> {
    match value {
        None => None,
        Some(None) => Some(None),
        Some(Some(s)) if s.trim().is_empty() => Some(None),
        Some(Some(s)) => check(v, field, Some(s.as_str())).map(Some),
    }
}

fn validate_fields(req: &PatientRequest, creating: bool) -> Result<PatientFields, ApiError> {
    let mut v = Validator::new();

    let (first_name, last_name) = if creating {
        (
            v.required("first_name", req.first_name.as_deref()),
            v.required("last_name", req.last_name.as_deref()),
        )
    } else {
        (
            v.not_blank("first_name", req.first_name.as_deref()),
            v.not_blank("last_name", req.last_name.as_deref()),
        )
    };

    let fields = PatientFields {
        first_name,
        last_name,
        email: nullable(&mut v, &req.email, Validator::email, "email"),
        phone: nullable(&mut v, &req.phone, Validator::phone, "phone"),
        date_of_birth: v.date("date_of_birth", req.date_of_birth.as_deref()),
        gender: v.one_of("gender", req.gender.as_deref()),
        blood_type: v.one_of("blood_type", req.blood_type.as_deref()),
    };

    if let Some(dob) = fields.date_of_birth {
        if dob > chrono::Utc::now().date_naive() {
            v.push("date_of_birth", "must not be in the future");
        }
    }
    v.phone("emergency_contact_phone", req.emergency_contact_phone.as_deref());

    v.finish()?;
    Ok(fields)
}

fn trimmed(s: &Option<String>) -> Option<String> {
    s.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, f: &PatientFilter) {
    qb.push(" WHERE 1=1");
    if let Some(pattern) = like_pattern(f.search.as_deref()) {
        qb.push(" AND (CONCAT(first_name, ' ', last_name) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR patient_number LIKE ")
            .push_bind(pattern.clone())
            .push(" OR email LIKE ")
            .push_bind(pattern.clone())
            .push(" OR phone LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

/* =========================
   Handlers
========================= */

pub async fn list_patients(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<PatientFilter>,
) -> Result<Json<Paged<PatientRow>>, ApiError> {
    let window = page.window()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM patients");
    push_filters(&mut count, &filter);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(format!("SELECT {PATIENT_COLUMNS} FROM patients"));
    push_filters(&mut qb, &filter);
    qb.push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let patients: Vec<PatientRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: patients,
        pagination: window.with_total(total),
    }))
}

async fn fetch_patient(state: &AppState, id: i64) -> Result<PatientRow, ApiError> {
    sqlx::query_as::<_, PatientRow>(&format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Patient"))
}

pub async fn get_patient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<PatientDetail>>, ApiError> {
    let patient = fetch_patient(&state, id).await?;

    let appointments: Vec<PatientAppointmentRow> = sqlx::query_as(
        r#"
        SELECT a.id, a.appointment_date, a.appointment_time, a.duration_minutes, a.status,
               a.type AS appointment_type, a.notes,
               u.first_name AS doctor_first_name, u.last_name AS doctor_last_name,
               dept.name AS department_name
        FROM appointments a
        JOIN doctors doc ON a.doctor_id = doc.id
        JOIN users u ON doc.user_id = u.id
        LEFT JOIN departments dept ON a.department_id = dept.id
        WHERE a.patient_id = ?
        ORDER BY a.appointment_date DESC, a.appointment_time DESC
        "#,
    )
    .bind(id)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    let medical_records: Vec<PatientRecordRow> = sqlx::query_as(
        r#"
        SELECT mr.id, mr.diagnosis, mr.symptoms, mr.treatment, mr.follow_up_date,
               u.first_name AS doctor_first_name, u.last_name AS doctor_last_name, mr.created_at
        FROM medical_records mr
        JOIN doctors doc ON mr.doctor_id = doc.id
        JOIN users u ON doc.user_id = u.id
        WHERE mr.patient_id = ?
        ORDER BY mr.created_at DESC
        "#,
    )
    .bind(id)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiOk {
        data: PatientDetail {
            patient,
            appointments,
            medical_records,
        },
    }))
}

pub async fn create_patient(
    State(state): State<AppState>,
    Json(req): Json<PatientRequest>,
) -> Result<(StatusCode, Json<ApiOk<PatientRow>>), ApiError> {
    let fields = validate_fields(&req, true)?;
    let patient_number = generate_reference("PAT");

    let res = sqlx::query(
        r#"
        INSERT INTO patients (
          patient_number, first_name, last_name, email, phone, date_of_birth, gender,
          address, emergency_contact_name, emergency_contact_phone, blood_type,
          allergies, medical_history, insurance_provider, insurance_number
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&patient_number)
    .bind(&fields.first_name)
    .bind(&fields.last_name)
    .bind(fields.email.flatten())
    .bind(fields.phone.flatten())
    .bind(fields.date_of_birth)
    .bind(fields.gender.map(|g| g.as_str()))
    .bind(trimmed(&req.address))
    .bind(trimmed(&req.emergency_contact_name))
    .bind(trimmed(&req.emergency_contact_phone))
    .bind(fields.blood_type.map(|b| b.as_str()))
    .bind(trimmed(&req.allergies))
    .bind(trimmed(&req.medical_history))
    .bind(trimmed(&req.insurance_provider))
    .bind(trimmed(&req.insurance_number))
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(
        &state.db,
        "patient",
        Some(id),
        "created",
        format!("Patient {patient_number} registered"),
    )
    .await;

    let patient = fetch_patient(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: patient })))
}

fn build_update<'a>(req: &PatientRequest) -> Result<UpdateSet<'a>, ApiError> {
    let fields = validate_fields(req, false)?;
    let mut set = UpdateSet::new("patients");

    set.set_opt("first_name", fields.first_name)
        .set_opt("last_name", fields.last_name)
        .set_opt("email", fields.email)
        .set_opt("phone", fields.phone)
        .set_opt("date_of_birth", fields.date_of_birth)
        .set_opt("gender", fields.gender.map(|g| g.as_str()))
        .set_opt("address", req.address.clone())
        .set_opt("emergency_contact_name", req.emergency_contact_name.clone())
        .set_opt("emergency_contact_phone", req.emergency_contact_phone.clone())
        .set_opt("blood_type", fields.blood_type.map(|b| b.as_str()))
        .set_opt("allergies", req.allergies.clone())
        .set_opt("medical_history", req.medical_history.clone())
        .set_opt("insurance_provider", req.insurance_provider.clone())
        .set_opt("insurance_number", req.insurance_number.clone());

    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }
    Ok(set)
}

pub async fn update_patient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<PatientRequest>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    let set = build_update(&req)?;
    set.execute_by_id(id, &state.db).await.map_err(db_error)?;

    let patient = fetch_patient(&state, id).await?;
    activity::record(
        &state.db,
        "patient",
        Some(id),
        "updated",
        format!("Patient {} updated", patient.patient_number),
    )
    .await;
    Ok(Json(ApiOk { data: patient }))
}

pub async fn delete_patient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM patients WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Patient"));
    }

    activity::record(&state.db, "patient", Some(id), "deleted", format!("Patient #{id} deleted")).await;
    Ok(Json(ok_deleted()))
}

pub async fn patient_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiOk<PatientStats>>, ApiError> {
    let (total_patients, new_this_month): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
          COUNT(*),
          CAST(COALESCE(SUM(created_at >= DATE_FORMAT(CURRENT_DATE(), '%Y-%m-01')), 0) AS SIGNED)
        FROM patients
        "#,
    )
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    let gender_distribution: Vec<CountBy> = sqlx::query_as(
        r#"
        SELECT gender AS label, COUNT(*) AS count
        FROM patients
        WHERE gender IS NOT NULL
        GROUP BY gender
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    let age_distribution: Vec<CountBy> = sqlx::query_as(
        r#"
        SELECT
          CASE
            WHEN TIMESTAMPDIFF(YEAR, date_of_birth, CURDATE()) < 18 THEN 'Under 18'
            WHEN TIMESTAMPDIFF(YEAR, date_of_birth, CURDATE()) BETWEEN 18 AND 35 THEN '18-35'
            WHEN TIMESTAMPDIFF(YEAR, date_of_birth, CURDATE()) BETWEEN 36 AND 60 THEN '36-60'
            ELSE 'Over 60'
          END AS label,
          COUNT(*) AS count
        FROM patients
        WHERE date_of_birth IS NOT NULL
        GROUP BY label
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiOk {
        data: PatientStats {
            total_patients,
            new_this_month,
            gender_distribution,
            age_distribution,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> PatientRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn create_requires_names() {
        let Err(ApiError::Validation(errors)) = validate_fields(&parse("{}"), true) else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["first_name", "last_name"]);
    }

    #[test]
    fn create_validates_optional_fields() {
        let req = parse(
            r#"{"first_name":"Alice","last_name":"Johnson","email":"bad","gender":"unknown",
                "date_of_birth":"1985-13-40","blood_type":"Z+"}"#,
        );
        let Err(ApiError::Validation(errors)) = validate_fields(&req, true) else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["email", "date_of_birth", "gender", "blood_type"]);
    }

    #[test]
    fn future_birth_dates_are_rejected() {
        let req = parse(r#"{"first_name":"A","last_name":"B","date_of_birth":"2999-01-01"}"#);
        assert!(validate_fields(&req, true).is_err());
    }

    #[test]
    fn valid_patient_normalizes() {
        let req = parse(
            r#"{"first_name":" Alice ","last_name":"Johnson","email":"Alice@Email.com",
                "gender":"Female","date_of_birth":"1985-03-15","blood_type":"a+"}"#,
        );
        let fields = validate_fields(&req, true).unwrap();
        assert_eq!(fields.first_name.as_deref(), Some("Alice"));
        assert_eq!(fields.email, Some(Some("alice@email.com".to_string())));
        assert_eq!(fields.gender, Some(Gender::Female));
        assert_eq!(fields.blood_type, Some(BloodType::APos));
    }

    #[test]
    fn update_can_clear_contact_fields() {
        let set = build_update(&parse(r#"{"email":null,"phone":""}"#)).unwrap();
        assert_eq!(set.sql(), "UPDATE patients SET email = ?, phone = ?");
    }

    #[test]
    fn empty_update_is_rejected() {
        let err = build_update(&parse("{}")).err().unwrap();
        assert!(matches!(err, ApiError::BadRequest("NO_FIELDS", _)));
    }

    #[test]
    fn update_rejects_blank_names() {
        assert!(build_update(&parse(r#"{"first_name":"  "}"#)).is_err());
    }
}
