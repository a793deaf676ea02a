// src/routes/record_routes.rs

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json as SqlJson, MySql, QueryBuilder};

use crate::{
    activity,
    db::{require_reference, UpdateSet},
    error::{db_error, ApiError},
    extract::{Json, Path, Query},
    models::{deserialize_double_option, ok_deleted, ApiOk, AppState, OkData, PageQuery, Paged},
    validation::Validator,
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MedicalRecordRow {
    pub id: i64,
    pub patient_id: i64,
    pub doctor_id: i64,
    pub appointment_id: Option<i64>,
    pub diagnosis: Option<String>,
    pub symptoms: Option<String>,
    pub treatment: Option<String>,
    pub prescription: Option<String>,
    pub vital_signs: Option<SqlJson<serde_json::Value>>,
    pub notes: Option<String>,
    pub follow_up_date: Option<NaiveDate>,
    pub patient_number: String,
    pub patient_first_name: String,
    pub patient_last_name: String,
    pub doctor_first_name: String,
    pub doctor_last_name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const RECORD_SELECT: &str = r#"
    SELECT mr.id, mr.patient_id, mr.doctor_id, mr.appointment_id, mr.diagnosis, mr.symptoms,
           mr.treatment, mr.prescription, mr.vital_signs, mr.notes, mr.follow_up_date,
           p.patient_number, p.first_name AS patient_first_name, p.last_name AS patient_last_name,
           u.first_name AS doctor_first_name, u.last_name AS doctor_last_name,
           mr.created_at, mr.updated_at
    FROM medical_records mr
    JOIN patients p ON mr.patient_id = p.id
    JOIN doctors doc ON mr.doctor_id = doc.id
    JOIN users u ON doc.user_id = u.id
"#;

#[derive(Debug, Deserialize)]
pub struct CreateRecordRequest {
    pub patient_id: Option<i64>,
    pub doctor_id: Option<i64>,
    pub appointment_id: Option<i64>,
    pub diagnosis: Option<String>,
    pub symptoms: Option<String>,
    pub treatment: Option<String>,
    pub prescription: Option<String>,
    pub vital_signs: Option<serde_json::Value>,
    pub notes: Option<String>,
    pub follow_up_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRecordRequest {
    pub diagnosis: Option<String>,
    pub symptoms: Option<String>,
    pub treatment: Option<String>,
    pub prescription: Option<String>,
    pub vital_signs: Option<serde_json::Value>,
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub follow_up_date: Option<Option<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecordFilter {
    pub patient_id: Option<i64>,
    pub doctor_id: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_records).post(create_record))
        .route("/{id}", get(get_record).put(update_record).delete(delete_record))
}

fn validate_create(req: &CreateRecordRequest) -> Result<Option<NaiveDate>, ApiError> {
    let mut v = Validator::new();
    if req.patient_id.is_none() {
        v.push("patient_id", "is required");
    }
    if req.doctor_id.is_none() {
        v.push("doctor_id", "is required");
    }
    let follow_up = v.date("follow_up_date", req.follow_up_date.as_deref());
    if let Some(vitals) = &req.vital_signs {
        if !vitals.is_object() {
            v.push("vital_signs", "must be an object");
        }
    }
    v.finish()?;
    Ok(follow_up)
}

fn build_update<'a>(req: &UpdateRecordRequest) -> Result<UpdateSet<'a>, ApiError> {
    let mut v = Validator::new();
    let mut set = UpdateSet::new("medical_records");

    set.set_opt("diagnosis", req.diagnosis.clone())
        .set_opt("symptoms", req.symptoms.clone())
        .set_opt("treatment", req.treatment.clone())
        .set_opt("prescription", req.prescription.clone());

    if let Some(vitals) = &req.vital_signs {
        if vitals.is_object() {
            set.set("vital_signs", SqlJson(vitals.clone()));
        } else {
            v.push("vital_signs", "must be an object");
        }
    }
    set.set_opt("notes", req.notes.clone());
    match &req.follow_up_date {
        Some(Some(d)) => {
            set.set_opt("follow_up_date", v.date("follow_up_date", Some(d.as_str())));
        }
        Some(None) => {
            set.set("follow_up_date", None::<NaiveDate>);
        }
        None => {}
    }

    v.finish()?;
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }
    Ok(set)
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, f: &RecordFilter) {
    qb.push(" WHERE 1=1");
    if let Some(patient_id) = f.patient_id {
        qb.push(" AND mr.patient_id = ").push_bind(patient_id);
    }
    if let Some(doctor_id) = f.doctor_id {
        qb.push(" AND mr.doctor_id = ").push_bind(doctor_id);
    }
}

pub async fn list_records(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<RecordFilter>,
) -> Result<Json<Paged<MedicalRecordRow>>, ApiError> {
    let window = page.window()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM medical_records mr");
    push_filters(&mut count, &filter);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(RECORD_SELECT);
    push_filters(&mut qb, &filter);
    qb.push(" ORDER BY mr.created_at DESC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let records: Vec<MedicalRecordRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: records,
        pagination: window.with_total(total),
    }))
}

async fn fetch_record(state: &AppState, id: i64) -> Result<MedicalRecordRow, ApiError> {
    sqlx::query_as::<_, MedicalRecordRow>(&format!("{RECORD_SELECT} WHERE mr.id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Medical record"))
}

pub async fn get_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<MedicalRecordRow>>, ApiError> {
    let record = fetch_record(&state, id).await?;
    Ok(Json(ApiOk { data: record }))
}

pub async fn create_record(
    State(state): State<AppState>,
    Json(req): Json<CreateRecordRequest>,
) -> Result<(StatusCode, Json<ApiOk<MedicalRecordRow>>), ApiError> {
    let follow_up_date = validate_create(&req)?;
    let patient_id = req.patient_id.unwrap_or_default();
    let doctor_id = req.doctor_id.unwrap_or_default();

    require_reference(&state.db, "patients", patient_id, "Patient").await?;
    require_reference(&state.db, "doctors", doctor_id, "Doctor").await?;
    if let Some(appointment_id) = req.appointment_id {
        require_reference(&state.db, "appointments", appointment_id, "Appointment").await?;
    }

    let res = sqlx::query(
        r#"
        INSERT INTO medical_records (
          patient_id, doctor_id, appointment_id, diagnosis, symptoms, treatment,
          prescription, vital_signs, notes, follow_up_date
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(patient_id)
    .bind(doctor_id)
    .bind(req.appointment_id)
    .bind(&req.diagnosis)
    .bind(&req.symptoms)
    .bind(&req.treatment)
    .bind(&req.prescription)
    .bind(req.vital_signs.clone().map(SqlJson))
    .bind(&req.notes)
    .bind(follow_up_date)
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(
        &state.db,
        "medical_record",
        Some(id),
        "created",
        format!("Medical record added for patient #{patient_id}"),
    )
    .await;

    let record = fetch_record(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: record })))
}

pub async fn update_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateRecordRequest>,
) -> Result<Json<ApiOk<MedicalRecordRow>>, ApiError> {
    let set = build_update(&req)?;
    set.execute_by_id(id, &state.db).await.map_err(db_error)?;

    let record = fetch_record(&state, id).await?;
    activity::record(&state.db, "medical_record", Some(id), "updated", format!("Medical record #{id} updated")).await;
    Ok(Json(ApiOk { data: record }))
}

pub async fn delete_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM medical_records WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Medical record"));
    }

    activity::record(&state.db, "medical_record", Some(id), "deleted", format!("Medical record #{id} deleted")).await;
    Ok(Json(ok_deleted()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_needs_patient_and_doctor() {
        let req: CreateRecordRequest =
            serde_json::from_str(r#"{"diagnosis":"Hypertension","vital_signs":[120,80]}"#).unwrap();
        let Err(ApiError::Validation(errors)) = validate_create(&req) else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["patient_id", "doctor_id", "vital_signs"]);
    }

    #[test]
    fn create_parses_follow_up() {
        let req: CreateRecordRequest = serde_json::from_str(
            r#"{"patient_id":1,"doctor_id":1,"follow_up_date":"2024-04-01",
                "vital_signs":{"blood_pressure":"120/80","pulse":72}}"#,
        )
        .unwrap();
        assert_eq!(validate_create(&req).unwrap(), NaiveDate::from_ymd_opt(2024, 4, 1));
    }

    #[test]
    fn update_can_clear_follow_up() {
        let req: UpdateRecordRequest =
            serde_json::from_str(r#"{"treatment":"Rest","follow_up_date":null}"#).unwrap();
        let set = build_update(&req).unwrap();
        assert_eq!(
            set.sql(),
            "UPDATE medical_records SET treatment = ?, follow_up_date = ?"
        );
    }
}
