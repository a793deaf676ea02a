// src/routes/room_routes.rs
//
// Wards and beds. A room holds at most one active allotment: allotting moves the
// room to `occupied`, discharging or removing the allotment moves it back.

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{MySql, MySqlConnection, QueryBuilder};

use crate::{
    activity,
    db::{require_reference, UpdateSet},
    error::{db_error, ApiError},
    extract::{Json, Path, Query},
    models::{
        deserialize_double_option, ok_deleted, stored, AllotmentStatus, ApiOk, AppState, OkData, PageQuery,
        Paged, RoomStatus,
    },
    validation::{Validator, Vocabulary},
};

/* =========================
   Rooms
========================= */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct RoomRow {
    pub id: i64,
    pub room_number: String,
    pub room_type: String,
    pub department: String,
    pub floor: i32,
    pub capacity: i32,
    pub price_per_day_cents: i64,
    pub status: String,
    pub description: Option<String>,
    pub attached_bathroom: bool,
    pub air_conditioning: bool,
    pub oxygen_supply: bool,
    pub wheelchair_accessible: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const ROOM_COLUMNS: &str = "id, room_number, room_type, department, floor, capacity, price_per_day_cents, \
status, description, attached_bathroom, air_conditioning, oxygen_supply, wheelchair_accessible, \
created_at, updated_at";

#[derive(Debug, Default, Deserialize)]
pub struct RoomRequest {
    pub room_number: Option<String>,
    pub room_type: Option<String>,
    pub department: Option<String>,
    pub floor: Option<i32>,
    pub capacity: Option<i32>,
    pub price_per_day_cents: Option<i64>,
    pub status: Option<String>,
    pub description: Option<String>,
    pub attached_bathroom: Option<bool>,
    pub air_conditioning: Option<bool>,
    pub oxygen_supply: Option<bool>,
    pub wheelchair_accessible: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RoomFilter {
    pub department: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DepartmentOccupancy {
    pub department: String,
    pub total_rooms: usize,
    pub available: usize,
    pub occupied: usize,
    pub maintenance: usize,
    pub reserved: usize,
    pub rooms: Vec<RoomRow>,
}

struct RoomFields {
    room_number: Option<String>,
    room_type: Option<String>,
    department: Option<String>,
    floor: Option<i32>,
    capacity: Option<i32>,
    price_per_day_cents: Option<i64>,
    status: Option<RoomStatus>,
}

pub fn room_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_rooms).post(create_room))
        .route("/by-department/{department}", get(rooms_by_department))
        .route("/{id}", get(get_room).put(update_room).delete(delete_room))
}

fn validate_room(req: &RoomRequest, creating: bool) -> Result<RoomFields, ApiError> {
    let mut v = Validator::new();
    let (room_number, room_type, department) = if creating {
        for (field, value) in [
            ("floor", req.floor.map(i64::from)),
            ("capacity", req.capacity.map(i64::from)),
            ("price_per_day_cents", req.price_per_day_cents),
        ] {
            if value.is_none() {
                v.push(field, "is required");
            }
        }
        (
            v.required("room_number", req.room_number.as_deref()),
            v.required("room_type", req.room_type.as_deref()),
            v.required("department", req.department.as_deref()),
        )
    } else {
        (
            v.not_blank("room_number", req.room_number.as_deref()),
            v.not_blank("room_type", req.room_type.as_deref()),
            v.not_blank("department", req.department.as_deref()),
        )
    };
    let fields = RoomFields {
        room_number,
        room_type,
        department,
        floor: v.min("floor", req.floor, 0),
        capacity: v.min("capacity", req.capacity, 1),
        price_per_day_cents: v.min("price_per_day_cents", req.price_per_day_cents, 0),
        status: v.one_of("status", req.status.as_deref()),
    };
    v.finish()?;
    Ok(fields)
}

fn occupancy(department: String, rooms: Vec<RoomRow>) -> DepartmentOccupancy {
    let with = |status: RoomStatus| rooms.iter().filter(|r| r.status == status.as_str()).count();
    DepartmentOccupancy {
        total_rooms: rooms.len(),
        available: with(RoomStatus::Available),
        occupied: with(RoomStatus::Occupied),
        maintenance: with(RoomStatus::Maintenance),
        reserved: with(RoomStatus::Reserved),
        department,
        rooms,
    }
}

pub async fn list_rooms(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<RoomFilter>,
) -> Result<Json<Paged<RoomRow>>, ApiError> {
    let window = page.window()?;
    let mut v = Validator::new();
    let status = v.one_of::<RoomStatus>("status", filter.status.as_deref());
    v.finish()?;
    let department = filter.department.as_deref().map(str::trim).filter(|s| !s.is_empty());

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM rooms WHERE 1=1");
    let mut qb = QueryBuilder::<MySql>::new(format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE 1=1"));
    for b in [&mut count, &mut qb] {
        if let Some(department) = department {
            b.push(" AND department = ").push_bind(department.to_string());
        }
        if let Some(status) = status {
            b.push(" AND status = ").push_bind(status.as_str());
        }
    }

    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    qb.push(" ORDER BY floor, room_number LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());
    let rooms: Vec<RoomRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: rooms,
        pagination: window.with_total(total),
    }))
}

pub async fn rooms_by_department(
    State(state): State<AppState>,
    Path(department): Path<String>,
) -> Result<Json<ApiOk<DepartmentOccupancy>>, ApiError> {
    let rooms: Vec<RoomRow> = sqlx::query_as(&format!(
        "SELECT {ROOM_COLUMNS} FROM rooms WHERE department = ? ORDER BY floor, room_number"
    ))
    .bind(&department)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiOk {
        data: occupancy(department, rooms),
    }))
}

async fn fetch_room(state: &AppState, id: i64) -> Result<RoomRow, ApiError> {
    sqlx::query_as::<_, RoomRow>(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Room"))
}

pub async fn get_room(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<RoomRow>>, ApiError> {
    let room = fetch_room(&state, id).await?;
    Ok(Json(ApiOk { data: room }))
}

pub async fn create_room(
    State(state): State<AppState>,
    Json(req): Json<RoomRequest>,
) -> Result<(StatusCode, Json<ApiOk<RoomRow>>), ApiError> {
    let fields = validate_room(&req, true)?;
    let room_number = fields.room_number.unwrap_or_default();

    let res = sqlx::query(
        r#"
        INSERT INTO rooms (
          room_number, room_type, department, floor, capacity, price_per_day_cents, status,
          description, attached_bathroom, air_conditioning, oxygen_supply, wheelchair_accessible
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&room_number)
    .bind(fields.room_type.unwrap_or_default())
    .bind(fields.department.unwrap_or_default())
    .bind(fields.floor.unwrap_or_default())
    .bind(fields.capacity.unwrap_or(1))
    .bind(fields.price_per_day_cents.unwrap_or_default())
    .bind(fields.status.unwrap_or(RoomStatus::Available).as_str())
    .bind(&req.description)
    .bind(req.attached_bathroom.unwrap_or(false))
    .bind(req.air_conditioning.unwrap_or(false))
    .bind(req.oxygen_supply.unwrap_or(false))
    .bind(req.wheelchair_accessible.unwrap_or(false))
    .execute(&state.db)
    .await
    .map_err(|e| match db_error(e) {
        ApiError::Conflict(..) => ApiError::Conflict("ROOM_EXISTS", format!("Room {room_number} already exists")),
        other => other,
    })?;

    let id = res.last_insert_id() as i64;
    activity::record(&state.db, "room", Some(id), "created", format!("Room {room_number} added")).await;

    let room = fetch_room(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: room })))
}

/// Locks the room row and finds its active allotment, if any.
async fn lock_room_status(conn: &mut MySqlConnection, id: i64) -> Result<(RoomStatus, Option<i64>), ApiError> {
    let status: String = sqlx::query_scalar("SELECT status FROM rooms WHERE id = ? FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Room"))?;

    let active: Option<i64> =
        sqlx::query_scalar("SELECT id FROM room_allotments WHERE room_id = ? AND status = 'occupied' LIMIT 1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_error)?;

    Ok((stored("rooms.status", &status)?, active))
}

/// A room with an active allotment only changes status through the allotment.
fn check_manual_room_status(
    current: RoomStatus,
    next: RoomStatus,
    active_allotment: Option<i64>,
) -> Result<(), ApiError> {
    match active_allotment {
        Some(allotment_id) if next != current => Err(ApiError::Conflict(
            "ROOM_ALLOTTED",
            format!("Room is held by active allotment #{allotment_id}"),
        )),
        _ => Ok(()),
    }
}

pub async fn update_room(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<RoomRequest>,
) -> Result<Json<ApiOk<RoomRow>>, ApiError> {
    let fields = validate_room(&req, false)?;
    let next_status = fields.status;

    let mut set = UpdateSet::new("rooms");
    set.set_opt("room_number", fields.room_number)
        .set_opt("room_type", fields.room_type)
        .set_opt("department", fields.department)
        .set_opt("floor", fields.floor)
        .set_opt("capacity", fields.capacity)
        .set_opt("price_per_day_cents", fields.price_per_day_cents)
        .set_opt("status", fields.status.map(|s| s.as_str()))
        .set_opt("description", req.description.clone())
        .set_opt("attached_bathroom", req.attached_bathroom)
        .set_opt("air_conditioning", req.air_conditioning)
        .set_opt("oxygen_supply", req.oxygen_supply)
        .set_opt("wheelchair_accessible", req.wheelchair_accessible);
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }

    let mut tx = state.db.begin().await.map_err(db_error)?;
    if let Some(next) = next_status {
        let (current, active_allotment) = lock_room_status(&mut tx, id).await?;
        check_manual_room_status(current, next, active_allotment)?;
    }
    set.execute_by_id(id, &mut *tx).await.map_err(db_error)?;
    tx.commit().await.map_err(db_error)?;

    let room = fetch_room(&state, id).await?;
    activity::record(&state.db, "room", Some(id), "updated", format!("Room {} updated", room.room_number)).await;
    Ok(Json(ApiOk { data: room }))
}

pub async fn delete_room(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM rooms WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Room"));
    }

    activity::record(&state.db, "room", Some(id), "deleted", format!("Room #{id} removed")).await;
    Ok(Json(ok_deleted()))
}

/* =========================
   Allotments
========================= */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AllotmentRow {
    pub id: i64,
    pub room_id: i64,
    pub room_number: String,
    pub patient_id: i64,
    pub patient_first_name: String,
    pub patient_last_name: String,
    pub attending_doctor_id: Option<i64>,
    pub allotment_date: NaiveDate,
    pub expected_discharge_date: Option<NaiveDate>,
    pub discharged_at: Option<chrono::DateTime<chrono::Utc>>,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const ALLOTMENT_SELECT: &str = r#"
    SELECT ra.id, ra.room_id, r.room_number, ra.patient_id,
           p.first_name AS patient_first_name, p.last_name AS patient_last_name,
           ra.attending_doctor_id, ra.allotment_date, ra.expected_discharge_date, ra.discharged_at,
           ra.status, ra.notes, ra.created_at, ra.updated_at
    FROM room_allotments ra
    JOIN rooms r ON ra.room_id = r.id
    JOIN patients p ON ra.patient_id = p.id
"#;

#[derive(Debug, Default, Deserialize)]
pub struct AllotmentRequest {
    pub room_id: Option<i64>,
    pub patient_id: Option<i64>,
    pub attending_doctor_id: Option<i64>,
    pub allotment_date: Option<String>,
    pub expected_discharge_date: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AllotmentUpdate {
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub attending_doctor_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub expected_discharge_date: Option<Option<String>>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AllotmentFilter {
    pub status: Option<String>,
}

struct NewAllotment {
    room_id: i64,
    patient_id: i64,
    allotment_date: Option<NaiveDate>,
    expected_discharge_date: Option<NaiveDate>,
}

pub fn allotment_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_allotments).post(create_allotment))
        .route(
            "/{id}",
            get(get_allotment).put(update_allotment).delete(delete_allotment),
        )
}

fn validate_allotment(req: &AllotmentRequest) -> Result<NewAllotment, ApiError> {
    let mut v = Validator::new();
    if req.room_id.is_none() {
        v.push("room_id", "is required");
    }
    if req.patient_id.is_none() {
        v.push("patient_id", "is required");
    }
    let allotment_date = v.date("allotment_date", req.allotment_date.as_deref());
    let expected_discharge_date = v.date("expected_discharge_date", req.expected_discharge_date.as_deref());
    if let (Some(from), Some(until)) = (allotment_date, expected_discharge_date) {
        if until < from {
            v.push("expected_discharge_date", "must not be before allotment_date");
        }
    }
    v.finish()?;
    Ok(NewAllotment {
        room_id: req.room_id.unwrap_or_default(),
        patient_id: req.patient_id.unwrap_or_default(),
        allotment_date,
        expected_discharge_date,
    })
}

/// Update set for an allotment plus the status it moves to, if any.
fn build_allotment_update<'a>(
    req: &AllotmentUpdate,
) -> Result<(UpdateSet<'a>, Option<AllotmentStatus>), ApiError> {
    let mut v = Validator::new();
    let mut set = UpdateSet::new("room_allotments");

    set.set_opt("attending_doctor_id", req.attending_doctor_id);
    match &req.expected_discharge_date {
        Some(Some(d)) => {
            set.set_opt("expected_discharge_date", v.date("expected_discharge_date", Some(d.as_str())));
        }
        Some(None) => {
            set.set("expected_discharge_date", None::<NaiveDate>);
        }
        None => {}
    }
    let status = v.one_of::<AllotmentStatus>("status", req.status.as_deref());
    if let Some(status) = status {
        set.set("status", status.as_str());
        if status.holds_room() {
            set.set_raw("discharged_at = NULL");
        } else {
            set.set_raw("discharged_at = COALESCE(discharged_at, NOW())");
        }
    }
    set.set_opt("notes", req.notes.clone());

    v.finish()?;
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }
    Ok((set, status))
}

/// What an allotment status change does to its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoomEffect {
    Keep,
    Free,
    Claim,
}

fn allotment_room_effect(was_holding: bool, next: Option<AllotmentStatus>) -> RoomEffect {
    match next.map(|s| s.holds_room()) {
        Some(false) if was_holding => RoomEffect::Free,
        Some(true) if !was_holding => RoomEffect::Claim,
        _ => RoomEffect::Keep,
    }
}

fn check_room_available(room: &str, status: RoomStatus) -> Result<(), ApiError> {
    if status != RoomStatus::Available {
        return Err(ApiError::Conflict(
            "ROOM_UNAVAILABLE",
            format!("Room {room} is {}", status.as_str()),
        ));
    }
    Ok(())
}

async fn set_room_status(conn: &mut MySqlConnection, room_id: i64, status: RoomStatus) -> Result<(), ApiError> {
    sqlx::query("UPDATE rooms SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(room_id)
        .execute(conn)
        .await
        .map_err(db_error)?;
    Ok(())
}

pub async fn list_allotments(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<AllotmentFilter>,
) -> Result<Json<Paged<AllotmentRow>>, ApiError> {
    let window = page.window()?;
    let mut v = Validator::new();
    let status = v.one_of::<AllotmentStatus>("status", filter.status.as_deref());
    v.finish()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM room_allotments ra");
    let mut qb = QueryBuilder::<MySql>::new(ALLOTMENT_SELECT);
    if let Some(status) = status {
        count.push(" WHERE ra.status = ").push_bind(status.as_str());
        qb.push(" WHERE ra.status = ").push_bind(status.as_str());
    }

    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    qb.push(" ORDER BY ra.allotment_date DESC, ra.id DESC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());
    let allotments: Vec<AllotmentRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: allotments,
        pagination: window.with_total(total),
    }))
}

async fn fetch_allotment(state: &AppState, id: i64) -> Result<AllotmentRow, ApiError> {
    sqlx::query_as::<_, AllotmentRow>(&format!("{ALLOTMENT_SELECT} WHERE ra.id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Room allotment"))
}

pub async fn get_allotment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<AllotmentRow>>, ApiError> {
    let allotment = fetch_allotment(&state, id).await?;
    Ok(Json(ApiOk { data: allotment }))
}

pub async fn create_allotment(
    State(state): State<AppState>,
    Json(req): Json<AllotmentRequest>,
) -> Result<(StatusCode, Json<ApiOk<AllotmentRow>>), ApiError> {
    let new = validate_allotment(&req)?;

    let mut tx = state.db.begin().await.map_err(db_error)?;

    let (room_number, room_status): (String, String) =
        sqlx::query_as("SELECT room_number, status FROM rooms WHERE id = ? FOR UPDATE")
            .bind(new.room_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| ApiError::BadRequest("INVALID_REFERENCE", "Room not found".into()))?;
    check_room_available(&room_number, stored("rooms.status", &room_status)?)?;

    require_reference(&mut *tx, "patients", new.patient_id, "Patient").await?;
    if let Some(doctor_id) = req.attending_doctor_id {
        require_reference(&mut *tx, "doctors", doctor_id, "Doctor").await?;
    }

    let res = sqlx::query(
        r#"
        INSERT INTO room_allotments (
          room_id, patient_id, attending_doctor_id, allotment_date, expected_discharge_date, notes
        ) VALUES (?, ?, ?, COALESCE(?, CURDATE()), ?, ?)
        "#,
    )
    .bind(new.room_id)
    .bind(new.patient_id)
    .bind(req.attending_doctor_id)
    .bind(new.allotment_date)
    .bind(new.expected_discharge_date)
    .bind(&req.notes)
    .execute(&mut *tx)
    .await
    .map_err(db_error)?;

    set_room_status(&mut tx, new.room_id, RoomStatus::Occupied).await?;
    tx.commit().await.map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(
        &state.db,
        "room_allotment",
        Some(id),
        "created",
        format!("Room {room_number} allotted to patient #{}", new.patient_id),
    )
    .await;

    let allotment = fetch_allotment(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: allotment })))
}

/// Updates an allotment. Leaving the `occupied` status stamps `discharged_at`
/// and frees the room; re-occupying requires the room to still be available.
pub async fn update_allotment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<AllotmentUpdate>,
) -> Result<Json<ApiOk<AllotmentRow>>, ApiError> {
    let (set, next_status) = build_allotment_update(&req)?;

    let mut tx = state.db.begin().await.map_err(db_error)?;

    let (room_id, current): (i64, String) =
        sqlx::query_as("SELECT room_id, status FROM room_allotments WHERE id = ? FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| ApiError::not_found("Room allotment"))?;
    let was_holding = AllotmentStatus::parse(&current).is_some_and(|s| s.holds_room());

    if let Some(Some(doctor_id)) = req.attending_doctor_id {
        require_reference(&mut *tx, "doctors", doctor_id, "Doctor").await?;
    }

    match allotment_room_effect(was_holding, next_status) {
        RoomEffect::Free => {
            set_room_status(&mut tx, room_id, RoomStatus::Available).await?;
        }
        RoomEffect::Claim => {
            let (room_number, room_status): (String, String) =
                sqlx::query_as("SELECT room_number, status FROM rooms WHERE id = ? FOR UPDATE")
                    .bind(room_id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(db_error)?;
            check_room_available(&room_number, stored("rooms.status", &room_status)?)?;
            set_room_status(&mut tx, room_id, RoomStatus::Occupied).await?;
        }
        RoomEffect::Keep => {}
    }

    set.execute_by_id(id, &mut *tx).await.map_err(db_error)?;
    tx.commit().await.map_err(db_error)?;

    let allotment = fetch_allotment(&state, id).await?;
    activity::record(
        &state.db,
        "room_allotment",
        Some(id),
        "updated",
        format!("Allotment #{id} for room {} is {}", allotment.room_number, allotment.status),
    )
    .await;
    Ok(Json(ApiOk { data: allotment }))
}

pub async fn delete_allotment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let mut tx = state.db.begin().await.map_err(db_error)?;

    let (room_id, status): (i64, String) =
        sqlx::query_as("SELECT room_id, status FROM room_allotments WHERE id = ? FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| ApiError::not_found("Room allotment"))?;

    sqlx::query("DELETE FROM room_allotments WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
    if AllotmentStatus::parse(&status).is_some_and(|s| s.holds_room()) {
        set_room_status(&mut tx, room_id, RoomStatus::Available).await?;
    }
    tx.commit().await.map_err(db_error)?;

    activity::record(&state.db, "room_allotment", Some(id), "deleted", format!("Allotment #{id} removed")).await;
    Ok(Json(ok_deleted()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn room(number: &str, status: RoomStatus) -> RoomRow {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        RoomRow {
            id: 1,
            room_number: number.into(),
            room_type: "general".into(),
            department: "Cardiology".into(),
            floor: 2,
            capacity: 1,
            price_per_day_cents: 25_000,
            status: status.as_str().into(),
            description: None,
            attached_bathroom: true,
            air_conditioning: true,
            oxygen_supply: false,
            wheelchair_accessible: true,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn occupancy_counts_by_status() {
        let summary = occupancy(
            "Cardiology".into(),
            vec![
                room("201", RoomStatus::Available),
                room("202", RoomStatus::Occupied),
                room("203", RoomStatus::Occupied),
                room("204", RoomStatus::Maintenance),
            ],
        );
        assert_eq!(summary.total_rooms, 4);
        assert_eq!(summary.available, 1);
        assert_eq!(summary.occupied, 2);
        assert_eq!(summary.maintenance, 1);
        assert_eq!(summary.reserved, 0);
    }

    #[test]
    fn room_create_requires_layout() {
        let req = RoomRequest {
            room_number: Some("101".into()),
            capacity: Some(0),
            ..Default::default()
        };
        let Err(ApiError::Validation(errors)) = validate_room(&req, true) else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["floor", "price_per_day_cents", "room_type", "department", "capacity"]);
    }

    #[test]
    fn allotment_dates_are_ordered() {
        let req = AllotmentRequest {
            room_id: Some(1),
            patient_id: Some(2),
            allotment_date: Some("2024-03-10".into()),
            expected_discharge_date: Some("2024-03-01".into()),
            ..Default::default()
        };
        let Err(ApiError::Validation(errors)) = validate_allotment(&req) else {
            panic!("expected validation error");
        };
        assert_eq!(errors[0].field, "expected_discharge_date");
    }

    #[test]
    fn discharge_stamps_discharged_at() {
        let req: AllotmentUpdate = serde_json::from_str(r#"{"status":"discharged"}"#).unwrap();
        let (set, status) = build_allotment_update(&req).unwrap();
        assert_eq!(status, Some(AllotmentStatus::Discharged));
        assert_eq!(
            set.sql(),
            "UPDATE room_allotments SET status = ?, discharged_at = COALESCE(discharged_at, NOW())"
        );
    }

    fn conflict_code<T: std::fmt::Debug>(result: Result<T, ApiError>) -> &'static str {
        match result {
            Err(ApiError::Conflict(code, _)) => code,
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn discharge_frees_and_readmission_claims_the_room() {
        assert_eq!(allotment_room_effect(true, Some(AllotmentStatus::Discharged)), RoomEffect::Free);
        assert_eq!(allotment_room_effect(true, Some(AllotmentStatus::Transferred)), RoomEffect::Free);
        assert_eq!(allotment_room_effect(false, Some(AllotmentStatus::Occupied)), RoomEffect::Claim);
    }

    #[test]
    fn unchanged_holding_leaves_the_room_alone() {
        assert_eq!(allotment_room_effect(true, Some(AllotmentStatus::Occupied)), RoomEffect::Keep);
        assert_eq!(allotment_room_effect(false, Some(AllotmentStatus::Discharged)), RoomEffect::Keep);
        assert_eq!(allotment_room_effect(true, None), RoomEffect::Keep);
    }

    #[test]
    fn only_available_rooms_take_a_patient() {
        assert!(check_room_available("201", RoomStatus::Available).is_ok());
        for status in [RoomStatus::Occupied, RoomStatus::Maintenance, RoomStatus::Reserved] {
            assert_eq!(conflict_code(check_room_available("201", status)), "ROOM_UNAVAILABLE");
        }
    }

    #[test]
    fn allotted_room_cannot_be_freed_by_hand() {
        let result = check_manual_room_status(RoomStatus::Occupied, RoomStatus::Available, Some(12));
        assert_eq!(conflict_code(result), "ROOM_ALLOTTED");
        assert!(check_manual_room_status(RoomStatus::Occupied, RoomStatus::Occupied, Some(12)).is_ok());
        assert!(check_manual_room_status(RoomStatus::Available, RoomStatus::Maintenance, None).is_ok());
    }

    #[test]
    fn empty_allotment_update_is_rejected() {
        let Err(ApiError::BadRequest(code, _)) = build_allotment_update(&AllotmentUpdate::default()) else {
            panic!("expected bad request");
        };
        assert_eq!(code, "NO_FIELDS");
    }
}
