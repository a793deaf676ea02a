// src/routes/appointment_routes.rs

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Router,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::{MySql, MySqlConnection, QueryBuilder};

use crate::{
    activity,
    db::{require_reference, UpdateSet},
    error::{db_error, ApiError},
    extract::{Json, Path, Query},
    models::{
        deserialize_double_option, ok_deleted, ApiOk, AppState, AppointmentStatus,
        AppointmentType, CountBy, OkData, PageQuery, Paged,
    },
    scheduling::{find_conflict, TimeSlot, DEFAULT_DURATION_MINUTES, MAX_DURATION_MINUTES},
    validation::{Validator, Vocabulary},
};

/*
Appointment lifecycle:
  scheduled -> confirmed -> in_progress -> completed
  any active status -> cancelled | no_show
Only scheduled/confirmed appointments hold the doctor's time slot.
*/

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: i64,
    pub patient_id: i64,
    pub doctor_id: i64,
    pub department_id: Option<i64>,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub duration_minutes: i32,
    pub status: String,
    #[serde(rename = "type")]
    pub appointment_type: String,
    pub notes: Option<String>,
    pub patient_number: String,
    pub patient_first_name: String,
    pub patient_last_name: String,
    pub patient_email: Option<String>,
    pub patient_phone: Option<String>,
    pub doctor_first_name: String,
    pub doctor_last_name: String,
    pub department_name: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const APPOINTMENT_SELECT: &str = r#"
    SELECT a.id, a.patient_id, a.doctor_id, a.department_id, a.appointment_date,
           a.appointment_time, a.duration_minutes, a.status, a.type AS appointment_type, a.notes,
           p.patient_number, p.first_name AS patient_first_name, p.last_name AS patient_last_name,
           p.email AS patient_email, p.phone AS patient_phone,
           u.first_name AS doctor_first_name, u.last_name AS doctor_last_name,
           dept.name AS department_name, a.created_at, a.updated_at
    FROM appointments a
    JOIN patients p ON a.patient_id = p.id
    JOIN doctors doc ON a.doctor_id = doc.id
    JOIN users u ON doc.user_id = u.id
    LEFT JOIN departments dept ON a.department_id = dept.id
"#;

/// The schedule-relevant columns of an existing appointment.
#[derive(Debug, Clone, sqlx::FromRow)]
struct ScheduleRow {
    id: i64,
    patient_id: i64,
    doctor_id: i64,
    appointment_date: NaiveDate,
    appointment_time: NaiveTime,
    duration_minutes: i32,
    status: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Option<i64>,
    pub doctor_id: Option<i64>,
    pub department_id: Option<i64>,
    pub appointment_date: Option<String>,
    pub appointment_time: Option<String>,
    pub duration_minutes: Option<i32>,
    #[serde(rename = "type")]
    pub appointment_type: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, PartialEq)]
struct NewAppointment {
    patient_id: i64,
    doctor_id: i64,
    department_id: Option<i64>,
    date: NaiveDate,
    time: NaiveTime,
    duration_minutes: i32,
    appointment_type: AppointmentType,
    notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub patient_id: Option<i64>,
    pub doctor_id: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub department_id: Option<Option<i64>>,
    pub appointment_date: Option<String>,
    pub appointment_time: Option<String>,
    pub duration_minutes: Option<i32>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub appointment_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Default)]
struct AppointmentPatch {
    patient_id: Option<i64>,
    doctor_id: Option<i64>,
    department_id: Option<Option<i64>>,
    date: Option<NaiveDate>,
    time: Option<NaiveTime>,
    duration_minutes: Option<i32>,
    status: Option<AppointmentStatus>,
    appointment_type: Option<AppointmentType>,
    notes: Option<Option<String>>,
}

impl AppointmentPatch {
    fn touches_schedule(&self) -> bool {
        self.doctor_id.is_some()
            || self.date.is_some()
            || self.time.is_some()
            || self.duration_minutes.is_some()
            || self.status.is_some()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AppointmentFilter {
    pub status: Option<String>,
    pub date: Option<String>,
    pub doctor_id: Option<i64>,
    pub patient_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AppointmentStats {
    pub total_appointments: i64,
    pub today_appointments: i64,
    pub upcoming_appointments: i64,
    pub status_distribution: Vec<CountBy>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_appointments).post(create_appointment))
        .route("/stats/overview", get(appointment_stats))
        .route(
            "/{id}",
            get(get_appointment).put(update_appointment).delete(delete_appointment),
        )
}

/* ============================================================
   Validation
   ============================================================ */

fn validate_create(req: &CreateAppointmentRequest) -> Result<NewAppointment, ApiError> {
    let mut v = Validator::new();

    if req.patient_id.is_none() {
        v.push("patient_id", "is required");
    }
    if req.doctor_id.is_none() {
        v.push("doctor_id", "is required");
    }
    let date = match req.appointment_date.as_deref() {
        Some(d) => v.date("appointment_date", Some(d)),
        None => {
            v.push("appointment_date", "is required");
            None
        }
    };
    let time = match req.appointment_time.as_deref() {
        Some(t) => v.clock("appointment_time", Some(t)),
        None => {
            v.push("appointment_time", "is required");
            None
        }
    };
    let duration_minutes = v
        .range("duration_minutes", req.duration_minutes, 1, MAX_DURATION_MINUTES)
        .unwrap_or(DEFAULT_DURATION_MINUTES);
    let appointment_type = v
        .one_of::<AppointmentType>("type", req.appointment_type.as_deref())
        .unwrap_or(AppointmentType::Consultation);

    v.finish()?;

    match (req.patient_id, req.doctor_id, date, time) {
        (Some(patient_id), Some(doctor_id), Some(date), Some(time)) => Ok(NewAppointment {
            patient_id,
            doctor_id,
            department_id: req.department_id,
            date,
            time,
            duration_minutes,
            appointment_type,
            notes: req.notes.clone(),
        }),
        _ => Err(ApiError::Internal("appointment validation lost a field".into())),
    }
}

fn validate_patch(req: &UpdateAppointmentRequest) -> Result<AppointmentPatch, ApiError> {
    let mut v = Validator::new();
    let patch = AppointmentPatch {
        patient_id: req.patient_id,
        doctor_id: req.doctor_id,
        department_id: req.department_id,
        date: v.date("appointment_date", req.appointment_date.as_deref()),
        time: v.clock("appointment_time", req.appointment_time.as_deref()),
        duration_minutes: v.range("duration_minutes", req.duration_minutes, 1, MAX_DURATION_MINUTES),
        status: v.one_of("status", req.status.as_deref()),
        appointment_type: v.one_of("type", req.appointment_type.as_deref()),
        notes: req.notes.clone(),
    };
    v.finish()?;
    Ok(patch)
}

fn build_update<'a>(p: &AppointmentPatch) -> UpdateSet<'a> {
    let mut set = UpdateSet::new("appointments");
    set.set_opt("patient_id", p.patient_id)
        .set_opt("doctor_id", p.doctor_id)
        .set_opt("department_id", p.department_id)
        .set_opt("appointment_date", p.date)
        .set_opt("appointment_time", p.time)
        .set_opt("duration_minutes", p.duration_minutes)
        .set_opt("status", p.status.map(|s| s.as_str()))
        .set_opt("type", p.appointment_type.map(|t| t.as_str()))
        .set_opt("notes", p.notes.clone());
    set
}

/* ============================================================
   Conflict detection
   ============================================================ */

/// Rejects `candidate` when it overlaps an active appointment of `doctor_id` on `date`.
/// `exclude_id` is the appointment being rescheduled (0 when creating).
async fn ensure_slot_free(
    conn: &mut MySqlConnection,
    doctor_id: i64,
    date: NaiveDate,
    candidate: TimeSlot,
    exclude_id: i64,
) -> Result<(), ApiError> {
    let rows: Vec<(i64, NaiveTime, i32)> = sqlx::query_as(
        r#"
        SELECT id, appointment_time, duration_minutes
        FROM appointments
        WHERE doctor_id = ? AND appointment_date = ? AND id <> ?
          AND status IN ('scheduled', 'confirmed')
        "#,
    )
    .bind(doctor_id)
    .bind(date)
    .bind(exclude_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error)?;

    let existing = rows
        .into_iter()
        .map(|(id, time, duration)| (id, TimeSlot::new(time, duration)));

    match find_conflict(&candidate, existing) {
        Some(other) => {
            tracing::info!(doctor_id, %date, conflicting_id = other, "appointment slot taken");
            Err(ApiError::Conflict(
                "APPOINTMENT_CONFLICT",
                "Appointment time conflicts with existing appointment".into(),
            ))
        }
        None => Ok(()),
    }
}

/// Locks the doctor's row so concurrent bookings for one doctor serialize.
async fn lock_doctor(conn: &mut MySqlConnection, doctor_id: i64) -> Result<(), ApiError> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM doctors WHERE id = ? FOR UPDATE")
        .bind(doctor_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?;
    match found {
        Some(_) => Ok(()),
        None => Err(ApiError::BadRequest("INVALID_REFERENCE", "Doctor not found".into())),
    }
}

/* ============================================================
   Handlers
   ============================================================ */

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, f: &AppointmentFilter) -> Result<(), ApiError> {
    let mut v = Validator::new();
    let status = v.one_of::<AppointmentStatus>("status", f.status.as_deref());
    let date = v.date("date", f.date.as_deref());
    v.finish()?;

    qb.push(" WHERE 1=1");
    if let Some(status) = status {
        qb.push(" AND a.status = ").push_bind(status.as_str());
    }
    if let Some(date) = date {
        qb.push(" AND a.appointment_date = ").push_bind(date);
    }
    if let Some(doctor_id) = f.doctor_id {
        qb.push(" AND a.doctor_id = ").push_bind(doctor_id);
    }
    if let Some(patient_id) = f.patient_id {
        qb.push(" AND a.patient_id = ").push_bind(patient_id);
    }
    Ok(())
}

pub async fn list_appointments(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<AppointmentFilter>,
) -> Result<Json<Paged<AppointmentRow>>, ApiError> {
    let window = page.window()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM appointments a");
    push_filters(&mut count, &filter)?;
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(APPOINTMENT_SELECT);
    push_filters(&mut qb, &filter)?;
    qb.push(" ORDER BY a.appointment_date DESC, a.appointment_time DESC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let appointments: Vec<AppointmentRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: appointments,
        pagination: window.with_total(total),
    }))
}

async fn fetch_appointment(state: &AppState, id: i64) -> Result<AppointmentRow, ApiError> {
    sqlx::query_as::<_, AppointmentRow>(&format!("{APPOINTMENT_SELECT} WHERE a.id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Appointment"))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let appointment = fetch_appointment(&state, id).await?;
    Ok(Json(ApiOk { data: appointment }))
}

pub async fn create_appointment(
    State(state): State<AppState>,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<ApiOk<AppointmentRow>>), ApiError> {
    let new = validate_create(&req)?;

    let mut tx = state.db.begin().await.map_err(db_error)?;

    require_reference(&mut *tx, "patients", new.patient_id, "Patient").await?;
    lock_doctor(&mut tx, new.doctor_id).await?;
    if let Some(department_id) = new.department_id {
        require_reference(&mut *tx, "departments", department_id, "Department").await?;
    }

    let slot = TimeSlot::new(new.time, new.duration_minutes);
    ensure_slot_free(&mut tx, new.doctor_id, new.date, slot, 0).await?;

    let res = sqlx::query(
        r#"
        INSERT INTO appointments (
          patient_id, doctor_id, department_id, appointment_date, appointment_time,
          duration_minutes, status, type, notes
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(new.patient_id)
    .bind(new.doctor_id)
    .bind(new.department_id)
    .bind(new.date)
    .bind(new.time)
    .bind(new.duration_minutes)
    .bind(AppointmentStatus::Scheduled.as_str())
    .bind(new.appointment_type.as_str())
    .bind(&new.notes)
    .execute(&mut *tx)
    .await
    .map_err(db_error)?;

    tx.commit().await.map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(
        &state.db,
        "appointment",
        Some(id),
        "created",
        format!(
            "Appointment booked for patient #{} with doctor #{} on {} at {}",
            new.patient_id,
            new.doctor_id,
            new.date,
            new.time.format("%H:%M")
        ),
    )
    .await;

    let appointment = fetch_appointment(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: appointment })))
}

pub async fn update_appointment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let patch = validate_patch(&req)?;
    let set = build_update(&patch);
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }

    let mut tx = state.db.begin().await.map_err(db_error)?;

    let current: ScheduleRow = sqlx::query_as(
        r#"
        SELECT id, patient_id, doctor_id, appointment_date, appointment_time, duration_minutes, status
        FROM appointments
        WHERE id = ?
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(db_error)?
    .ok_or_else(|| ApiError::not_found("Appointment"))?;

    if let Some(patient_id) = patch.patient_id.filter(|p| *p != current.patient_id) {
        require_reference(&mut *tx, "patients", patient_id, "Patient").await?;
    }
    if let Some(Some(department_id)) = patch.department_id {
        require_reference(&mut *tx, "departments", department_id, "Department").await?;
    }

    if patch.touches_schedule() {
        let doctor_id = patch.doctor_id.unwrap_or(current.doctor_id);
        let status = patch
            .status
            .or_else(|| AppointmentStatus::parse(&current.status))
            .unwrap_or(AppointmentStatus::Scheduled);

        lock_doctor(&mut tx, doctor_id).await?;

        if status.blocks_schedule() {
            let slot = TimeSlot::new(
                patch.time.unwrap_or(current.appointment_time),
                patch.duration_minutes.unwrap_or(current.duration_minutes),
            );
            let date = patch.date.unwrap_or(current.appointment_date);
            ensure_slot_free(&mut tx, doctor_id, date, slot, current.id).await?;
        }
    }

    set.execute_by_id(id, &mut *tx).await.map_err(db_error)?;
    tx.commit().await.map_err(db_error)?;

    let appointment = fetch_appointment(&state, id).await?;
    activity::record(
        &state.db,
        "appointment",
        Some(id),
        "updated",
        format!("Appointment #{id} updated (status {})", appointment.status),
    )
    .await;
    Ok(Json(ApiOk { data: appointment }))
}

pub async fn delete_appointment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM appointments WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Appointment"));
    }

    activity::record(&state.db, "appointment", Some(id), "deleted", format!("Appointment #{id} deleted")).await;
    Ok(Json(ok_deleted()))
}

pub async fn appointment_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiOk<AppointmentStats>>, ApiError> {
    let (total_appointments, today_appointments, upcoming_appointments): (i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT
              COUNT(*),
              CAST(COALESCE(SUM(appointment_date = CURDATE()), 0) AS SIGNED),
              CAST(COALESCE(SUM(appointment_date > CURDATE()
                                AND status IN ('scheduled', 'confirmed')), 0) AS SIGNED)
            FROM appointments
            "#,
        )
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let status_distribution: Vec<CountBy> = sqlx::query_as(
        "SELECT status AS label, COUNT(*) AS count FROM appointments GROUP BY status",
    )
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiOk {
        data: AppointmentStats {
            total_appointments,
            today_appointments,
            upcoming_appointments,
            status_distribution,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(json: &str) -> Result<NewAppointment, ApiError> {
        let req: CreateAppointmentRequest = serde_json::from_str(json).unwrap();
        validate_create(&req)
    }

    #[test]
    fn create_applies_defaults() {
        let new = create(
            r#"{"patient_id":1,"doctor_id":2,"appointment_date":"2024-03-15","appointment_time":"9:30"}"#,
        )
        .unwrap();
        assert_eq!(new.duration_minutes, DEFAULT_DURATION_MINUTES);
        assert_eq!(new.appointment_type, AppointmentType::Consultation);
        assert_eq!(new.time, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
    }

    #[test]
    fn create_lists_missing_and_malformed_fields() {
        let Err(ApiError::Validation(errors)) = create(
            r#"{"doctor_id":2,"appointment_date":"tomorrow","appointment_time":"25:00","type":"spa"}"#,
        ) else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["patient_id", "appointment_date", "appointment_time", "type"]);
    }

    #[test]
    fn duration_is_bounded() {
        assert!(create(
            r#"{"patient_id":1,"doctor_id":2,"appointment_date":"2024-03-15","appointment_time":"10:00","duration_minutes":0}"#
        )
        .is_err());
        assert!(create(
            r#"{"patient_id":1,"doctor_id":2,"appointment_date":"2024-03-15","appointment_time":"10:00","duration_minutes":721}"#
        )
        .is_err());
    }

    #[test]
    fn notes_only_patch_skips_conflict_check() {
        let req: UpdateAppointmentRequest = serde_json::from_str(r#"{"notes":"bring x-rays"}"#).unwrap();
        let patch = validate_patch(&req).unwrap();
        assert!(!patch.touches_schedule());
        assert_eq!(build_update(&patch).sql(), "UPDATE appointments SET notes = ?");
    }

    #[test]
    fn reschedule_patch_touches_schedule() {
        let req: UpdateAppointmentRequest =
            serde_json::from_str(r#"{"appointment_time":"14:00","status":"confirmed"}"#).unwrap();
        let patch = validate_patch(&req).unwrap();
        assert!(patch.touches_schedule());
        assert_eq!(patch.status, Some(AppointmentStatus::Confirmed));
        assert_eq!(
            build_update(&patch).sql(),
            "UPDATE appointments SET appointment_time = ?, status = ?"
        );
    }

    #[test]
    fn bad_status_is_rejected() {
        let req: UpdateAppointmentRequest = serde_json::from_str(r#"{"status":"postponed"}"#).unwrap();
        assert!(matches!(validate_patch(&req), Err(ApiError::Validation(_))));
    }

    #[test]
    fn empty_patch_has_no_assignments() {
        let patch = validate_patch(&UpdateAppointmentRequest::default()).unwrap();
        assert!(build_update(&patch).is_empty());
    }
}
