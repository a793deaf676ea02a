// src/routes/ambulance_routes.rs
//
// Ambulance fleet and emergency calls. Dispatching a call and closing it move
// the assigned ambulance between `available` and `on_duty` inside the same
// transaction as the call update.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, patch, post},
    Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{MySql, MySqlConnection, QueryBuilder};

use crate::{
    activity,
    db::UpdateSet,
    error::{db_error, ApiError},
    extract::{Json, Path, Query},
    models::{
        like_pattern, ok_deleted, stored, AmbulanceStatus, ApiOk, AppState, CallPriority, CallStatus, OkData,
        PageQuery, Paged,
    },
    validation::{Validator, Vocabulary},
};

/* =========================
   Ambulances
========================= */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AmbulanceRow {
    pub id: i64,
    pub name: String,
    pub registration_number: String,
    pub driver_name: Option<String>,
    pub driver_phone: Option<String>,
    pub status: String,
    pub location: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const AMBULANCE_COLUMNS: &str =
    "id, name, registration_number, driver_name, driver_phone, status, location, created_at, updated_at";

#[derive(Debug, Default, Deserialize)]
pub struct AmbulanceRequest {
    pub name: Option<String>,
    pub registration_number: Option<String>,
    pub driver_name: Option<String>,
    pub driver_phone: Option<String>,
    pub status: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FleetFilter {
    pub search: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: Option<String>,
}

struct AmbulanceFields {
    name: Option<String>,
    registration_number: Option<String>,
    driver_phone: Option<String>,
    status: Option<AmbulanceStatus>,
}

pub fn ambulance_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_ambulances).post(create_ambulance))
        .route(
            "/{id}",
            get(get_ambulance).put(update_ambulance).delete(delete_ambulance),
        )
        .route("/{id}/status", patch(set_ambulance_status))
}

fn validate_ambulance(req: &AmbulanceRequest, creating: bool) -> Result<AmbulanceFields, ApiError> {
    let mut v = Validator::new();
    let (name, registration_number) = if creating {
        (
            v.required("name", req.name.as_deref()),
            v.required("registration_number", req.registration_number.as_deref()),
        )
    } else {
        (
            v.not_blank("name", req.name.as_deref()),
            v.not_blank("registration_number", req.registration_number.as_deref()),
        )
    };
    let fields = AmbulanceFields {
        name,
        registration_number,
        driver_phone: v.phone("driver_phone", req.driver_phone.as_deref()),
        status: v.one_of("status", req.status.as_deref()),
    };
    v.finish()?;
    Ok(fields)
}

fn push_ambulance_filters(qb: &mut QueryBuilder<'_, MySql>, search: Option<&str>, status: Option<AmbulanceStatus>) {
    qb.push(" WHERE 1=1");
    if let Some(pattern) = like_pattern(search) {
        qb.push(" AND (name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR registration_number LIKE ")
            .push_bind(pattern.clone())
            .push(" OR driver_name LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(status) = status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
}

pub async fn list_ambulances(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<FleetFilter>,
) -> Result<Json<Paged<AmbulanceRow>>, ApiError> {
    let window = page.window()?;
    let mut v = Validator::new();
    let status = v.one_of::<AmbulanceStatus>("status", filter.status.as_deref());
    v.finish()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM ambulances");
    push_ambulance_filters(&mut count, filter.search.as_deref(), status);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(format!("SELECT {AMBULANCE_COLUMNS} FROM ambulances"));
    push_ambulance_filters(&mut qb, filter.search.as_deref(), status);
    qb.push(" ORDER BY name LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let ambulances: Vec<AmbulanceRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: ambulances,
        pagination: window.with_total(total),
    }))
}

async fn fetch_ambulance(state: &AppState, id: i64) -> Result<AmbulanceRow, ApiError> {
    sqlx::query_as::<_, AmbulanceRow>(&format!("SELECT {AMBULANCE_COLUMNS} FROM ambulances WHERE id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Ambulance"))
}

pub async fn get_ambulance(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<AmbulanceRow>>, ApiError> {
    let ambulance = fetch_ambulance(&state, id).await?;
    Ok(Json(ApiOk { data: ambulance }))
}

pub async fn create_ambulance(
    State(state): State<AppState>,
    Json(req): Json<AmbulanceRequest>,
) -> Result<(StatusCode, Json<ApiOk<AmbulanceRow>>), ApiError> {
    let fields = validate_ambulance(&req, true)?;
    let registration_number = fields.registration_number.unwrap_or_default();

    let res = sqlx::query(
        r#"
        INSERT INTO ambulances (name, registration_number, driver_name, driver_phone, status, location)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(fields.name.unwrap_or_default())
    .bind(&registration_number)
    .bind(&req.driver_name)
    .bind(fields.driver_phone)
    .bind(fields.status.unwrap_or(AmbulanceStatus::Available).as_str())
    .bind(&req.location)
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(
        &state.db,
        "ambulance",
        Some(id),
        "created",
        format!("Ambulance {registration_number} added to fleet"),
    )
    .await;

    let ambulance = fetch_ambulance(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: ambulance })))
}

pub async fn update_ambulance(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<AmbulanceRequest>,
) -> Result<Json<ApiOk<AmbulanceRow>>, ApiError> {
    let fields = validate_ambulance(&req, false)?;
    let next_status = fields.status;

    let mut set = UpdateSet::new("ambulances");
    set.set_opt("name", fields.name)
        .set_opt("registration_number", fields.registration_number)
        .set_opt("driver_name", req.driver_name.clone())
        .set_opt("driver_phone", fields.driver_phone)
        .set_opt("status", fields.status.map(|s| s.as_str()))
        .set_opt("location", req.location.clone());
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }

    let mut tx = state.db.begin().await.map_err(db_error)?;
    if let Some(next) = next_status {
        let (current, open_call) = lock_fleet_status(&mut tx, id).await?;
        check_manual_status(current, next, open_call)?;
    }
    set.execute_by_id(id, &mut *tx).await.map_err(db_error)?;
    tx.commit().await.map_err(db_error)?;

    let ambulance = fetch_ambulance(&state, id).await?;
    activity::record(&state.db, "ambulance", Some(id), "updated", format!("Ambulance {} updated", ambulance.name)).await;
    Ok(Json(ApiOk { data: ambulance }))
}

pub async fn set_ambulance_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<StatusChange>,
) -> Result<Json<ApiOk<AmbulanceRow>>, ApiError> {
    let mut v = Validator::new();
    let status = v.one_of::<AmbulanceStatus>("status", req.status.as_deref());
    if req.status.is_none() {
        v.push("status", "is required");
    }
    v.finish()?;
    let status = status.unwrap_or(AmbulanceStatus::Available);

    let mut tx = state.db.begin().await.map_err(db_error)?;
    let (current, open_call) = lock_fleet_status(&mut tx, id).await?;
    check_manual_status(current, status, open_call)?;

    sqlx::query("UPDATE ambulances SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
    tx.commit().await.map_err(db_error)?;

    activity::record(
        &state.db,
        "ambulance",
        Some(id),
        "updated",
        format!("Ambulance #{id} status set to {}", status.as_str()),
    )
    .await;

    let ambulance = fetch_ambulance(&state, id).await?;
    Ok(Json(ApiOk { data: ambulance }))
}

/// Locks the ambulance row and finds the open call it serves, if any.
async fn lock_fleet_status(
    conn: &mut MySqlConnection,
    id: i64,
) -> Result<(AmbulanceStatus, Option<i64>), ApiError> {
    let status: String = sqlx::query_scalar("SELECT status FROM ambulances WHERE id = ? FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Ambulance"))?;

    let open_call: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM emergency_calls \
         WHERE ambulance_id = ? AND status NOT IN ('completed', 'cancelled') LIMIT 1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_error)?;

    Ok((stored("ambulances.status", &status)?, open_call))
}

/// An ambulance serving an open call only changes status through the call.
fn check_manual_status(
    current: AmbulanceStatus,
    next: AmbulanceStatus,
    open_call: Option<i64>,
) -> Result<(), ApiError> {
    match open_call {
        Some(call_id) if next != current => Err(ApiError::Conflict(
            "AMBULANCE_ON_CALL",
            format!("Ambulance is assigned to open emergency call #{call_id}"),
        )),
        _ => Ok(()),
    }
}

pub async fn delete_ambulance(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM ambulances WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Ambulance"));
    }

    activity::record(&state.db, "ambulance", Some(id), "deleted", format!("Ambulance #{id} removed")).await;
    Ok(Json(ok_deleted()))
}

/* =========================
   Emergency calls
========================= */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct EmergencyCallRow {
    pub id: i64,
    pub patient_name: String,
    pub phone: String,
    pub location: String,
    pub emergency_type: String,
    pub priority: String,
    pub status: String,
    pub ambulance_id: Option<i64>,
    pub ambulance_name: Option<String>,
    pub ambulance_registration: Option<String>,
    pub call_time: chrono::DateTime<chrono::Utc>,
    pub notes: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const CALL_SELECT: &str = r#"
    SELECT ec.id, ec.patient_name, ec.phone, ec.location, ec.emergency_type, ec.priority, ec.status,
           ec.ambulance_id, amb.name AS ambulance_name, amb.registration_number AS ambulance_registration,
           ec.call_time, ec.notes, ec.created_at, ec.updated_at
    FROM emergency_calls ec
    LEFT JOIN ambulances amb ON ec.ambulance_id = amb.id
"#;

#[derive(Debug, Default, Deserialize)]
pub struct CallRequest {
    pub patient_name: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub emergency_type: Option<String>,
    pub priority: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub ambulance_id: Option<i64>,
}

struct CallFields {
    patient_name: Option<String>,
    phone: Option<String>,
    location: Option<String>,
    emergency_type: Option<String>,
    priority: Option<CallPriority>,
}

pub fn call_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_calls).post(create_call))
        .route("/{id}", get(get_call).put(update_call).delete(delete_call))
        .route("/{id}/status", patch(set_call_status))
        .route("/{id}/dispatch", post(dispatch_call))
}

fn validate_call(req: &CallRequest, creating: bool) -> Result<CallFields, ApiError> {
    let mut v = Validator::new();
    let fields = if creating {
        let patient_name = v.required("patient_name", req.patient_name.as_deref());
        let phone = match v.required("phone", req.phone.as_deref()) {
            Some(p) => v.phone("phone", Some(p.as_str())),
            None => None,
        };
        CallFields {
            patient_name,
            phone,
            location: v.required("location", req.location.as_deref()),
            emergency_type: v.required("emergency_type", req.emergency_type.as_deref()),
            priority: v.one_of("priority", req.priority.as_deref()),
        }
    } else {
        let patient_name = v.not_blank("patient_name", req.patient_name.as_deref());
        let phone = match v.not_blank("phone", req.phone.as_deref()) {
            Some(p) => v.phone("phone", Some(p.as_str())),
            None => None,
        };
        CallFields {
            patient_name,
            phone,
            location: v.not_blank("location", req.location.as_deref()),
            emergency_type: v.not_blank("emergency_type", req.emergency_type.as_deref()),
            priority: v.one_of("priority", req.priority.as_deref()),
        }
    };
    v.finish()?;
    Ok(fields)
}

fn push_call_filters(qb: &mut QueryBuilder<'_, MySql>, search: Option<&str>, status: Option<CallStatus>) {
    qb.push(" WHERE 1=1");
    if let Some(pattern) = like_pattern(search) {
        qb.push(" AND (ec.patient_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR ec.location LIKE ")
            .push_bind(pattern.clone())
            .push(" OR ec.emergency_type LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(status) = status {
        qb.push(" AND ec.status = ").push_bind(status.as_str());
    }
}

pub async fn list_calls(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<FleetFilter>,
) -> Result<Json<Paged<EmergencyCallRow>>, ApiError> {
    let window = page.window()?;
    let mut v = Validator::new();
    let status = v.one_of::<CallStatus>("status", filter.status.as_deref());
    v.finish()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM emergency_calls ec");
    push_call_filters(&mut count, filter.search.as_deref(), status);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(CALL_SELECT);
    push_call_filters(&mut qb, filter.search.as_deref(), status);
    qb.push(" ORDER BY ec.call_time DESC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let calls: Vec<EmergencyCallRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: calls,
        pagination: window.with_total(total),
    }))
}

async fn fetch_call(state: &AppState, id: i64) -> Result<EmergencyCallRow, ApiError> {
    sqlx::query_as::<_, EmergencyCallRow>(&format!("{CALL_SELECT} WHERE ec.id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Emergency call"))
}

pub async fn get_call(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<EmergencyCallRow>>, ApiError> {
    let call = fetch_call(&state, id).await?;
    Ok(Json(ApiOk { data: call }))
}

pub async fn create_call(
    State(state): State<AppState>,
    Json(req): Json<CallRequest>,
) -> Result<(StatusCode, Json<ApiOk<EmergencyCallRow>>), ApiError> {
    let fields = validate_call(&req, true)?;
    let priority = fields.priority.unwrap_or(CallPriority::High);

    let res = sqlx::query(
        r#"
        INSERT INTO emergency_calls (patient_name, phone, location, emergency_type, priority, notes)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(fields.patient_name.unwrap_or_default())
    .bind(fields.phone.unwrap_or_default())
    .bind(fields.location.unwrap_or_default())
    .bind(fields.emergency_type.unwrap_or_default())
    .bind(priority.as_str())
    .bind(&req.notes)
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    tracing::warn!(call_id = id, priority = priority.as_str(), "emergency call received");
    activity::record(&state.db, "emergency_call", Some(id), "created", format!("Emergency call #{id} logged")).await;

    let call = fetch_call(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: call })))
}

pub async fn update_call(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<CallRequest>,
) -> Result<Json<ApiOk<EmergencyCallRow>>, ApiError> {
    let fields = validate_call(&req, false)?;

    let mut set = UpdateSet::new("emergency_calls");
    set.set_opt("patient_name", fields.patient_name)
        .set_opt("phone", fields.phone)
        .set_opt("location", fields.location)
        .set_opt("emergency_type", fields.emergency_type)
        .set_opt("priority", fields.priority.map(|p| p.as_str()))
        .set_opt("notes", req.notes.clone());
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }

    set.execute_by_id(id, &state.db).await.map_err(db_error)?;

    let call = fetch_call(&state, id).await?;
    activity::record(&state.db, "emergency_call", Some(id), "updated", format!("Emergency call #{id} updated")).await;
    Ok(Json(ApiOk { data: call }))
}

async fn release_ambulance(conn: &mut MySqlConnection, ambulance_id: i64) -> Result<(), ApiError> {
    sqlx::query("UPDATE ambulances SET status = 'available' WHERE id = ? AND status = 'on_duty'")
        .bind(ambulance_id)
        .execute(conn)
        .await
        .map_err(db_error)?;
    Ok(())
}

/// Decides what a status change does to the call's ambulance and returns the
/// ambulance to hand back, if any. Only an open -> closed move releases it;
/// closed calls cannot be reopened.
fn call_transition(
    current: CallStatus,
    next: CallStatus,
    ambulance_id: Option<i64>,
) -> Result<Option<i64>, ApiError> {
    match (current.releases_ambulance(), next.releases_ambulance()) {
        (false, true) => Ok(ambulance_id),
        (true, false) => Err(ApiError::Conflict(
            "CALL_CLOSED",
            format!("Emergency call is already {}", current.as_str()),
        )),
        _ => Ok(None),
    }
}

/// A call takes one ambulance, once, while it is open.
fn check_dispatchable(status: CallStatus, assigned: Option<i64>) -> Result<(), ApiError> {
    if status.releases_ambulance() {
        return Err(ApiError::Conflict(
            "CALL_CLOSED",
            format!("Emergency call is already {}", status.as_str()),
        ));
    }
    if let Some(ambulance_id) = assigned {
        return Err(ApiError::Conflict(
            "CALL_ALREADY_DISPATCHED",
            format!("Ambulance #{ambulance_id} is already assigned to this call"),
        ));
    }
    Ok(())
}

fn check_ambulance_available(status: AmbulanceStatus) -> Result<(), ApiError> {
    if status != AmbulanceStatus::Available {
        return Err(ApiError::Conflict(
            "AMBULANCE_UNAVAILABLE",
            format!("Ambulance is {}", status.as_str()),
        ));
    }
    Ok(())
}

/// Moves a call through its lifecycle. Completing or cancelling a call hands
/// its ambulance back to the available pool.
pub async fn set_call_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<StatusChange>,
) -> Result<Json<ApiOk<EmergencyCallRow>>, ApiError> {
    let mut v = Validator::new();
    let status = v.one_of::<CallStatus>("status", req.status.as_deref());
    if req.status.is_none() {
        v.push("status", "is required");
    }
    v.finish()?;
    let status = status.unwrap_or(CallStatus::Pending);

    let mut tx = state.db.begin().await.map_err(db_error)?;

    let (current, ambulance_id): (String, Option<i64>) =
        sqlx::query_as("SELECT status, ambulance_id FROM emergency_calls WHERE id = ? FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| ApiError::not_found("Emergency call"))?;
    let release = call_transition(stored("emergency_calls.status", &current)?, status, ambulance_id)?;

    sqlx::query("UPDATE emergency_calls SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

    if let Some(ambulance_id) = release {
        release_ambulance(&mut tx, ambulance_id).await?;
    }
    tx.commit().await.map_err(db_error)?;

    activity::record(
        &state.db,
        "emergency_call",
        Some(id),
        "updated",
        format!("Emergency call #{id} marked {}", status.as_str()),
    )
    .await;

    let call = fetch_call(&state, id).await?;
    Ok(Json(ApiOk { data: call }))
}

/// Assigns an available ambulance to an open call that has none yet.
pub async fn dispatch_call(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<DispatchRequest>,
) -> Result<Json<ApiOk<EmergencyCallRow>>, ApiError> {
    let mut v = Validator::new();
    if req.ambulance_id.is_none() {
        v.push("ambulance_id", "is required");
    }
    v.finish()?;
    let ambulance_id = req.ambulance_id.unwrap_or_default();

    let mut tx = state.db.begin().await.map_err(db_error)?;

    let (call_status, assigned): (String, Option<i64>) =
        sqlx::query_as("SELECT status, ambulance_id FROM emergency_calls WHERE id = ? FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| ApiError::not_found("Emergency call"))?;
    check_dispatchable(stored("emergency_calls.status", &call_status)?, assigned)?;

    let ambulance_status: String = sqlx::query_scalar("SELECT status FROM ambulances WHERE id = ? FOR UPDATE")
        .bind(ambulance_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::BadRequest("INVALID_REFERENCE", "Ambulance not found".into()))?;
    check_ambulance_available(stored("ambulances.status", &ambulance_status)?)?;

    sqlx::query("UPDATE ambulances SET status = 'on_duty' WHERE id = ?")
        .bind(ambulance_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
    sqlx::query("UPDATE emergency_calls SET ambulance_id = ?, status = 'dispatched' WHERE id = ?")
        .bind(ambulance_id)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
    tx.commit().await.map_err(db_error)?;

    tracing::info!(call_id = id, ambulance_id, "ambulance dispatched");
    activity::record(
        &state.db,
        "emergency_call",
        Some(id),
        "updated",
        format!("Ambulance #{ambulance_id} dispatched to call #{id}"),
    )
    .await;

    let call = fetch_call(&state, id).await?;
    Ok(Json(ApiOk { data: call }))
}

pub async fn delete_call(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let mut tx = state.db.begin().await.map_err(db_error)?;

    let (status, ambulance_id): (String, Option<i64>) =
        sqlx::query_as("SELECT status, ambulance_id FROM emergency_calls WHERE id = ? FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| ApiError::not_found("Emergency call"))?;

    sqlx::query("DELETE FROM emergency_calls WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

    let open = CallStatus::parse(&status).is_some_and(|s| !s.releases_ambulance());
    if let (true, Some(ambulance_id)) = (open, ambulance_id) {
        release_ambulance(&mut tx, ambulance_id).await?;
    }
    tx.commit().await.map_err(db_error)?;

    activity::record(&state.db, "emergency_call", Some(id), "deleted", format!("Emergency call #{id} deleted")).await;
    Ok(Json(ok_deleted()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambulance_requires_name_and_registration() {
        let req = AmbulanceRequest {
            driver_phone: Some("call me".into()),
            ..Default::default()
        };
        let Err(ApiError::Validation(errors)) = validate_ambulance(&req, true) else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["name", "registration_number", "driver_phone"]);
    }

    #[test]
    fn call_requires_contact_details() {
        let req = CallRequest {
            patient_name: Some("John Doe".into()),
            phone: Some("12".into()),
            priority: Some("urgent".into()),
            ..Default::default()
        };
        let Err(ApiError::Validation(errors)) = validate_call(&req, true) else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["phone", "location", "emergency_type", "priority"]);
    }

    #[test]
    fn call_update_takes_partial_fields() {
        let req = CallRequest {
            priority: Some("critical".into()),
            ..Default::default()
        };
        let fields = validate_call(&req, false).unwrap();
        assert_eq!(fields.priority, Some(CallPriority::Critical));
        assert!(fields.patient_name.is_none());
    }

    #[test]
    fn closing_statuses_release_the_ambulance() {
        assert!(CallStatus::Completed.releases_ambulance());
        assert!(CallStatus::Cancelled.releases_ambulance());
        assert!(!CallStatus::Dispatched.releases_ambulance());
        assert!(!CallStatus::EnRoute.releases_ambulance());
    }

    fn conflict_code<T: std::fmt::Debug>(result: Result<T, ApiError>) -> &'static str {
        match result {
            Err(ApiError::Conflict(code, _)) => code,
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn closing_an_open_call_hands_back_its_ambulance() {
        let release = call_transition(CallStatus::EnRoute, CallStatus::Completed, Some(4)).unwrap();
        assert_eq!(release, Some(4));
        let release = call_transition(CallStatus::Pending, CallStatus::Cancelled, None).unwrap();
        assert_eq!(release, None);
    }

    #[test]
    fn re_closing_a_call_leaves_a_reassigned_ambulance_alone() {
        // Ambulance 4 finished this call and may be serving another one by now.
        let release = call_transition(CallStatus::Completed, CallStatus::Cancelled, Some(4)).unwrap();
        assert_eq!(release, None);
    }

    #[test]
    fn closed_calls_cannot_be_reopened() {
        let result = call_transition(CallStatus::Cancelled, CallStatus::Dispatched, Some(4));
        assert_eq!(conflict_code(result), "CALL_CLOSED");
    }

    #[test]
    fn moving_between_open_statuses_keeps_the_ambulance() {
        let release = call_transition(CallStatus::Dispatched, CallStatus::EnRoute, Some(4)).unwrap();
        assert_eq!(release, None);
    }

    #[test]
    fn dispatch_needs_an_open_unassigned_call() {
        assert!(check_dispatchable(CallStatus::Pending, None).is_ok());
        assert_eq!(conflict_code(check_dispatchable(CallStatus::Completed, None)), "CALL_CLOSED");
        assert_eq!(
            conflict_code(check_dispatchable(CallStatus::Dispatched, Some(2))),
            "CALL_ALREADY_DISPATCHED"
        );
        // Sent back to pending while the first ambulance is still attached.
        assert_eq!(
            conflict_code(check_dispatchable(CallStatus::Pending, Some(2))),
            "CALL_ALREADY_DISPATCHED"
        );
    }

    #[test]
    fn dispatch_needs_an_available_ambulance() {
        assert!(check_ambulance_available(AmbulanceStatus::Available).is_ok());
        for status in [AmbulanceStatus::OnDuty, AmbulanceStatus::Maintenance, AmbulanceStatus::OutOfService] {
            assert_eq!(conflict_code(check_ambulance_available(status)), "AMBULANCE_UNAVAILABLE");
        }
    }

    #[test]
    fn ambulance_on_a_call_keeps_its_status() {
        let result = check_manual_status(AmbulanceStatus::OnDuty, AmbulanceStatus::Available, Some(9));
        assert_eq!(conflict_code(result), "AMBULANCE_ON_CALL");
        assert!(check_manual_status(AmbulanceStatus::OnDuty, AmbulanceStatus::OnDuty, Some(9)).is_ok());
    }

    #[test]
    fn idle_ambulance_status_is_free_to_change() {
        assert!(check_manual_status(AmbulanceStatus::OnDuty, AmbulanceStatus::Available, None).is_ok());
        assert!(check_manual_status(AmbulanceStatus::Available, AmbulanceStatus::Maintenance, None).is_ok());
    }
}
