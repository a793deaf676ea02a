// src/routes/prescription_routes.rs

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
    models::{
        like_pattern, ok_deleted, ApiOk, AppState, OkData, PageQuery, Paged, PrescriptionStatus,
    },
    validation::{Validator, Vocabulary},
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PrescriptionRow {
    pub id: i64,
    pub patient_id: i64,
    pub doctor_id: i64,
    pub prescription_type: String,
    pub diagnosis: Option<String>,
    pub medications: String,
    pub notes_for_pharmacist: Option<String>,
    pub status: String,
    pub prescription_date: chrono::DateTime<chrono::Utc>,
    pub patient_number: String,
    pub patient_first_name: String,
    pub patient_last_name: String,
    pub doctor_first_name: String,
    pub doctor_last_name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const PRESCRIPTION_SELECT: &str = r#"
    SELECT rx.id, rx.patient_id, rx.doctor_id, rx.prescription_type, rx.diagnosis, rx.medications,
           rx.notes_for_pharmacist, rx.status, rx.prescription_date,
           p.patient_number, p.first_name AS patient_first_name, p.last_name AS patient_last_name,
           u.first_name AS doctor_first_name, u.last_name AS doctor_last_name,
           rx.created_at, rx.updated_at
    FROM prescriptions rx
    JOIN patients p ON rx.patient_id = p.id
    JOIN doctors doc ON rx.doctor_id = doc.id
    JOIN users u ON doc.user_id = u.id
"#;

const PRESCRIPTION_COUNT: &str = r#"
    SELECT COUNT(*)
    FROM prescriptions rx
    JOIN patients p ON rx.patient_id = p.id
"#;

#[derive(Debug, Default, Deserialize)]
pub struct PrescriptionRequest {
    pub patient_id: Option<i64>,
    pub doctor_id: Option<i64>,
    pub prescription_type: Option<String>,
    pub diagnosis: Option<String>,
    pub medications: Option<String>,
    pub notes_for_pharmacist: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PrescriptionFilter {
    pub search: Option<String>,
    pub patient_id: Option<i64>,
}

struct PrescriptionFields {
    prescription_type: Option<String>,
    medications: Option<String>,
    status: Option<PrescriptionStatus>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_prescriptions).post(create_prescription))
        .route(
            "/{id}",
            get(get_prescription).put(update_prescription).delete(delete_prescription),
        )
}

fn validate_fields(req: &PrescriptionRequest, creating: bool) -> Result<PrescriptionFields, ApiError> {
    let mut v = Validator::new();
    if creating {
        if req.patient_id.is_none() {
            v.push("patient_id", "is required");
        }
        if req.doctor_id.is_none() {
            v.push("doctor_id", "is required");
        }
    }
    let medications = if creating {
        v.required("medications", req.medications.as_deref())
    } else {
        v.not_blank("medications", req.medications.as_deref())
    };
    let fields = PrescriptionFields {
        prescription_type: v.not_blank("prescription_type", req.prescription_type.as_deref()),
        medications,
        status: v.one_of("status", req.status.as_deref()),
    };
    v.finish()?;
    Ok(fields)
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, f: &PrescriptionFilter) {
    qb.push(" WHERE 1=1");
    if let Some(pattern) = like_pattern(f.search.as_deref()) {
        qb.push(" AND (p.first_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR p.last_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR rx.diagnosis LIKE ")
            .push_bind(pattern.clone())
            .push(" OR rx.medications LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(patient_id) = f.patient_id {
        qb.push(" AND rx.patient_id = ").push_bind(patient_id);
    }
}

pub async fn list_prescriptions(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<PrescriptionFilter>,
) -> Result<Json<Paged<PrescriptionRow>>, ApiError> {
    let window = page.window()?;

    let mut count = QueryBuilder::<MySql>::new(PRESCRIPTION_COUNT);
    push_filters(&mut count, &filter);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(PRESCRIPTION_SELECT);
    push_filters(&mut qb, &filter);
    qb.push(" ORDER BY rx.prescription_date DESC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let prescriptions: Vec<PrescriptionRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: prescriptions,
        pagination: window.with_total(total),
    }))
}

async fn fetch_prescription(state: &AppState, id: i64) -> Result<PrescriptionRow, ApiError> {
    sqlx::query_as::<_, PrescriptionRow>(&format!("{PRESCRIPTION_SELECT} WHERE rx.id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Prescription"))
}

pub async fn get_prescription(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<PrescriptionRow>>, ApiError> {
    let prescription = fetch_prescription(&state, id).await?;
    Ok(Json(ApiOk { data: prescription }))
}

pub async fn create_prescription(
    State(state): State<AppState>,
    Json(req): Json<PrescriptionRequest>,
) -> Result<(StatusCode, Json<ApiOk<PrescriptionRow>>), ApiError> {
    let fields = validate_fields(&req, true)?;
    let patient_id = req.patient_id.unwrap_or_default();
    let doctor_id = req.doctor_id.unwrap_or_default();

    require_reference(&state.db, "patients", patient_id, "Patient").await?;
    require_reference(&state.db, "doctors", doctor_id, "Doctor").await?;

    let res = sqlx::query(
        r#"
        INSERT INTO prescriptions (
          patient_id, doctor_id, prescription_type, diagnosis, medications,
          notes_for_pharmacist, status
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(patient_id)
    .bind(doctor_id)
    .bind(fields.prescription_type.unwrap_or_else(|| "standard".to_string()))
    .bind(&req.diagnosis)
    .bind(fields.medications.unwrap_or_default())
    .bind(&req.notes_for_pharmacist)
    .bind(fields.status.unwrap_or(PrescriptionStatus::Active).as_str())
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(
        &state.db,
        "prescription",
        Some(id),
        "created",
        format!("Prescription issued for patient #{patient_id}"),
    )
    .await;

    let prescription = fetch_prescription(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: prescription })))
}

pub async fn update_prescription(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<PrescriptionRequest>,
) -> Result<Json<ApiOk<PrescriptionRow>>, ApiError> {
    let fields = validate_fields(&req, false)?;

    let mut set = UpdateSet::new("prescriptions");
    set.set_opt("patient_id", req.patient_id)
        .set_opt("doctor_id", req.doctor_id)
        .set_opt("prescription_type", fields.prescription_type)
        .set_opt("diagnosis", req.diagnosis.clone())
        .set_opt("medications", fields.medications)
        .set_opt("notes_for_pharmacist", req.notes_for_pharmacist.clone())
        .set_opt("status", fields.status.map(|s| s.as_str()));
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }

    if let Some(patient_id) = req.patient_id {
        require_reference(&state.db, "patients", patient_id, "Patient").await?;
    }
    if let Some(doctor_id) = req.doctor_id {
        require_reference(&state.db, "doctors", doctor_id, "Doctor").await?;
    }

    set.execute_by_id(id, &state.db).await.map_err(db_error)?;

    let prescription = fetch_prescription(&state, id).await?;
    activity::record(&state.db, "prescription", Some(id), "updated", format!("Prescription #{id} updated")).await;
    Ok(Json(ApiOk { data: prescription }))
}

pub async fn delete_prescription(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM prescriptions WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Prescription"));
    }

    activity::record(&state.db, "prescription", Some(id), "deleted", format!("Prescription #{id} deleted")).await;
    Ok(Json(ok_deleted()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_requires_parties_and_medications() {
        let req = PrescriptionRequest {
            medications: Some("".into()),
            ..Default::default()
        };
        let Err(ApiError::Validation(errors)) = validate_fields(&req, true) else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["patient_id", "doctor_id", "medications"]);
    }

    #[test]
    fn update_accepts_status_alone() {
        let req = PrescriptionRequest {
            status: Some("Completed".into()),
            ..Default::default()
        };
        let fields = validate_fields(&req, false).unwrap();
        assert_eq!(fields.status, Some(PrescriptionStatus::Completed));
        assert!(fields.medications.is_none());
    }

    #[test]
    fn search_spans_patient_and_contents() {
        let mut qb = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM prescriptions rx");
        push_filters(
            &mut qb,
            &PrescriptionFilter {
                search: Some("amox".into()),
                patient_id: Some(7),
            },
        );
        let sql = qb.sql();
        assert!(sql.contains("rx.medications LIKE ?"));
        assert!(sql.ends_with(" AND rx.patient_id = ?"));
    }
}
