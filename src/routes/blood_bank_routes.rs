// src/routes/blood_bank_routes.rs
//
// Blood units, donors and issue requests. An issue that reaches `issued` takes
// its unit out of stock in the same transaction.

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
        generate_reference, like_pattern, ok_deleted, ApiOk, AppState, BloodIssueStatus, BloodType,
        BloodUnitStatus, DonorStatus, Gender, OkData, PageQuery, Paged,
    },
    validation::{FieldError, Validator, Vocabulary},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stock", get(blood_stock))
        .route("/units", get(list_units).post(create_unit))
        .route("/units/{id}", get(get_unit).put(update_unit).delete(delete_unit))
        .route("/donors", get(list_donors).post(create_donor))
        .route("/donors/{id}", get(get_donor).put(update_donor).delete(delete_donor))
        .route("/issues", get(list_issues).post(create_issue))
        .route("/issues/{id}", get(get_issue).put(update_issue))
}

/* =========================
   Units
========================= */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct BloodUnitRow {
    pub id: i64,
    pub unit_number: String,
    pub blood_type: String,
    pub donor_id: Option<i64>,
    pub donor_name: Option<String>,
    pub quantity: i32,
    pub collection_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const UNIT_SELECT: &str = r#"
    SELECT bu.id, bu.unit_number, bu.blood_type, bu.donor_id, bd.name AS donor_name, bu.quantity,
           bu.collection_date, bu.expiry_date, bu.status, bu.notes, bu.created_at, bu.updated_at
    FROM blood_units bu
    LEFT JOIN blood_donors bd ON bu.donor_id = bd.id
"#;

#[derive(Debug, Default, Deserialize)]
pub struct UnitRequest {
    pub blood_type: Option<String>,
    pub donor_id: Option<i64>,
    pub quantity: Option<i32>,
    pub collection_date: Option<String>,
    pub expiry_date: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UnitFilter {
    pub blood_type: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockLevel {
    pub blood_type: &'static str,
    pub units: i64,
    pub quantity: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct StockCount {
    blood_type: String,
    units: i64,
    quantity: i64,
}

struct UnitFields {
    blood_type: Option<BloodType>,
    quantity: Option<i32>,
    collection_date: Option<NaiveDate>,
    expiry_date: Option<NaiveDate>,
    status: Option<BloodUnitStatus>,
}

fn validate_unit(req: &UnitRequest, creating: bool) -> Result<UnitFields, ApiError> {
    let mut v = Validator::new();
    if creating {
        for (field, value) in [
            ("blood_type", &req.blood_type),
            ("collection_date", &req.collection_date),
            ("expiry_date", &req.expiry_date),
        ] {
            if value.as_deref().map(str::trim).unwrap_or_default().is_empty() {
                v.push(field, "is required");
            }
        }
    }
    let fields = UnitFields {
        blood_type: v.one_of("blood_type", req.blood_type.as_deref()),
        quantity: v.min("quantity", req.quantity, 1),
        collection_date: v.date("collection_date", req.collection_date.as_deref()),
        expiry_date: v.date("expiry_date", req.expiry_date.as_deref()),
        status: v.one_of("status", req.status.as_deref()),
    };
    if let (Some(collected), Some(expires)) = (fields.collection_date, fields.expiry_date) {
        if expires <= collected {
            v.push("expiry_date", "must be after collection_date");
        }
    }
    v.finish()?;
    Ok(fields)
}

/// One entry per blood type, zero-filled for types with no stock.
fn stock_levels(counts: &[StockCount]) -> Vec<StockLevel> {
    BloodType::ALL
        .iter()
        .map(|t| {
            let found = counts.iter().find(|c| c.blood_type == t.as_str());
            StockLevel {
                blood_type: t.as_str(),
                units: found.map_or(0, |c| c.units),
                quantity: found.map_or(0, |c| c.quantity),
            }
        })
        .collect()
}

pub async fn blood_stock(State(state): State<AppState>) -> Result<Json<ApiOk<Vec<StockLevel>>>, ApiError> {
    let counts: Vec<StockCount> = sqlx::query_as(
        r#"
        SELECT blood_type, COUNT(*) AS units, CAST(COALESCE(SUM(quantity), 0) AS SIGNED) AS quantity
        FROM blood_units
        WHERE status = 'available' AND expiry_date >= CURDATE()
        GROUP BY blood_type
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiOk {
        data: stock_levels(&counts),
    }))
}

pub async fn list_units(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<UnitFilter>,
) -> Result<Json<Paged<BloodUnitRow>>, ApiError> {
    let window = page.window()?;
    let mut v = Validator::new();
    let blood_type = v.one_of::<BloodType>("blood_type", filter.blood_type.as_deref());
    let status = v.one_of::<BloodUnitStatus>("status", filter.status.as_deref());
    v.finish()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM blood_units bu WHERE 1=1");
    let mut qb = QueryBuilder::<MySql>::new(format!("{UNIT_SELECT} WHERE 1=1"));
    for b in [&mut count, &mut qb] {
        if let Some(t) = blood_type {
            b.push(" AND bu.blood_type = ").push_bind(t.as_str());
        }
        if let Some(s) = status {
            b.push(" AND bu.status = ").push_bind(s.as_str());
        }
    }

    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    qb.push(" ORDER BY bu.expiry_date ASC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());
    let units: Vec<BloodUnitRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: units,
        pagination: window.with_total(total),
    }))
}

async fn fetch_unit(state: &AppState, id: i64) -> Result<BloodUnitRow, ApiError> {
    sqlx::query_as::<_, BloodUnitRow>(&format!("{UNIT_SELECT} WHERE bu.id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Blood unit"))
}

pub async fn get_unit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<BloodUnitRow>>, ApiError> {
    let unit = fetch_unit(&state, id).await?;
    Ok(Json(ApiOk { data: unit }))
}

/// Registers a collected unit. A unit with a donor also refreshes the donor's
/// last donation date.
pub async fn create_unit(
    State(state): State<AppState>,
    Json(req): Json<UnitRequest>,
) -> Result<(StatusCode, Json<ApiOk<BloodUnitRow>>), ApiError> {
    let fields = validate_unit(&req, true)?;
    let (Some(blood_type), Some(collection_date), Some(expiry_date)) =
        (fields.blood_type, fields.collection_date, fields.expiry_date)
    else {
        return Err(ApiError::Internal("blood unit passed validation without its fields".into()));
    };

    let mut tx = state.db.begin().await.map_err(db_error)?;
    if let Some(donor_id) = req.donor_id {
        require_reference(&mut *tx, "blood_donors", donor_id, "Donor").await?;
    }

    let unit_number = generate_reference("BU");
    let res = sqlx::query(
        r#"
        INSERT INTO blood_units (unit_number, blood_type, donor_id, quantity, collection_date, expiry_date, status, notes)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&unit_number)
    .bind(blood_type.as_str())
    .bind(req.donor_id)
    .bind(fields.quantity.unwrap_or(1))
    .bind(collection_date)
    .bind(expiry_date)
    .bind(fields.status.unwrap_or(BloodUnitStatus::Available).as_str())
    .bind(&req.notes)
    .execute(&mut *tx)
    .await
    .map_err(db_error)?;

    if let Some(donor_id) = req.donor_id {
        sqlx::query(
            r#"
            UPDATE blood_donors
            SET last_donation_date = GREATEST(COALESCE(last_donation_date, ?), ?)
            WHERE id = ?
            "#,
        )
        .bind(collection_date)
        .bind(collection_date)
        .bind(donor_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
    }
    tx.commit().await.map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(
        &state.db,
        "blood_unit",
        Some(id),
        "created",
        format!("Blood unit {unit_number} ({}) registered", blood_type.as_str()),
    )
    .await;

    let unit = fetch_unit(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: unit })))
}

pub async fn update_unit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UnitRequest>,
) -> Result<Json<ApiOk<BloodUnitRow>>, ApiError> {
    let fields = validate_unit(&req, false)?;

    let mut set = UpdateSet::new("blood_units");
    set.set_opt("blood_type", fields.blood_type.map(|t| t.as_str()))
        .set_opt("donor_id", req.donor_id)
        .set_opt("quantity", fields.quantity)
        .set_opt("collection_date", fields.collection_date)
        .set_opt("expiry_date", fields.expiry_date)
        .set_opt("status", fields.status.map(|s| s.as_str()))
        .set_opt("notes", req.notes.clone());
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }
    if let Some(donor_id) = req.donor_id {
        require_reference(&state.db, "blood_donors", donor_id, "Donor").await?;
    }

    set.execute_by_id(id, &state.db).await.map_err(db_error)?;

    let unit = fetch_unit(&state, id).await?;
    activity::record(&state.db, "blood_unit", Some(id), "updated", format!("Blood unit {} updated", unit.unit_number)).await;
    Ok(Json(ApiOk { data: unit }))
}

pub async fn delete_unit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM blood_units WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Blood unit"));
    }

    activity::record(&state.db, "blood_unit", Some(id), "deleted", format!("Blood unit #{id} removed")).await;
    Ok(Json(ok_deleted()))
}

/* =========================
   Donors
========================= */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DonorRow {
    pub id: i64,
    pub name: String,
    pub blood_type: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub last_donation_date: Option<NaiveDate>,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const DONOR_COLUMNS: &str = "id, name, blood_type, phone, email, date_of_birth, gender, \
last_donation_date, status, created_at, updated_at";

#[derive(Debug, Default, Deserialize)]
pub struct DonorRequest {
    pub name: Option<String>,
    pub blood_type: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub last_donation_date: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DonorFilter {
    pub search: Option<String>,
    pub blood_type: Option<String>,
}

struct DonorFields {
    name: Option<String>,
    blood_type: Option<BloodType>,
    phone: Option<String>,
    email: Option<String>,
    date_of_birth: Option<NaiveDate>,
    gender: Option<Gender>,
    last_donation_date: Option<NaiveDate>,
    status: Option<DonorStatus>,
}

fn validate_donor(req: &DonorRequest, creating: bool) -> Result<DonorFields, ApiError> {
    let mut v = Validator::new();
    let name = if creating {
        if req.blood_type.is_none() {
            v.push("blood_type", "is required");
        }
        v.required("name", req.name.as_deref())
    } else {
        v.not_blank("name", req.name.as_deref())
    };
    let fields = DonorFields {
        name,
        blood_type: v.one_of("blood_type", req.blood_type.as_deref()),
        phone: v.phone("phone", req.phone.as_deref()),
        email: v.email("email", req.email.as_deref()),
        date_of_birth: v.date("date_of_birth", req.date_of_birth.as_deref()),
        gender: v.one_of("gender", req.gender.as_deref()),
        last_donation_date: v.date("last_donation_date", req.last_donation_date.as_deref()),
        status: v.one_of("status", req.status.as_deref()),
    };
    v.finish()?;
    Ok(fields)
}

pub async fn list_donors(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<DonorFilter>,
) -> Result<Json<Paged<DonorRow>>, ApiError> {
    let window = page.window()?;
    let mut v = Validator::new();
    let blood_type = v.one_of::<BloodType>("blood_type", filter.blood_type.as_deref());
    v.finish()?;
    let pattern = like_pattern(filter.search.as_deref());

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM blood_donors WHERE 1=1");
    let mut qb = QueryBuilder::<MySql>::new(format!("SELECT {DONOR_COLUMNS} FROM blood_donors WHERE 1=1"));
    for b in [&mut count, &mut qb] {
        if let Some(pattern) = &pattern {
            b.push(" AND (name LIKE ")
                .push_bind(pattern.clone())
                .push(" OR phone LIKE ")
                .push_bind(pattern.clone())
                .push(" OR email LIKE ")
                .push_bind(pattern.clone())
                .push(")");
        }
        if let Some(t) = blood_type {
            b.push(" AND blood_type = ").push_bind(t.as_str());
        }
    }

    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    qb.push(" ORDER BY name LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());
    let donors: Vec<DonorRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: donors,
        pagination: window.with_total(total),
    }))
}

async fn fetch_donor(state: &AppState, id: i64) -> Result<DonorRow, ApiError> {
    sqlx::query_as::<_, DonorRow>(&format!("SELECT {DONOR_COLUMNS} FROM blood_donors WHERE id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Donor"))
}

pub async fn get_donor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<DonorRow>>, ApiError> {
    let donor = fetch_donor(&state, id).await?;
    Ok(Json(ApiOk { data: donor }))
}

pub async fn create_donor(
    State(state): State<AppState>,
    Json(req): Json<DonorRequest>,
) -> Result<(StatusCode, Json<ApiOk<DonorRow>>), ApiError> {
    let fields = validate_donor(&req, true)?;
    let name = fields.name.unwrap_or_default();

    let res = sqlx::query(
        r#"
        INSERT INTO blood_donors (name, blood_type, phone, email, date_of_birth, gender, last_donation_date, status)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&name)
    .bind(fields.blood_type.map(|t| t.as_str()))
    .bind(fields.phone)
    .bind(fields.email)
    .bind(fields.date_of_birth)
    .bind(fields.gender.map(|g| g.as_str()))
    .bind(fields.last_donation_date)
    .bind(fields.status.unwrap_or(DonorStatus::Active).as_str())
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(&state.db, "blood_donor", Some(id), "created", format!("Donor {name} registered")).await;

    let donor = fetch_donor(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: donor })))
}

pub async fn update_donor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<DonorRequest>,
) -> Result<Json<ApiOk<DonorRow>>, ApiError> {
    let fields = validate_donor(&req, false)?;

    let mut set = UpdateSet::new("blood_donors");
    set.set_opt("name", fields.name)
        .set_opt("blood_type", fields.blood_type.map(|t| t.as_str()))
        .set_opt("phone", fields.phone)
        .set_opt("email", fields.email)
        .set_opt("date_of_birth", fields.date_of_birth)
        .set_opt("gender", fields.gender.map(|g| g.as_str()))
        .set_opt("last_donation_date", fields.last_donation_date)
        .set_opt("status", fields.status.map(|s| s.as_str()));
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }

    set.execute_by_id(id, &state.db).await.map_err(db_error)?;

    let donor = fetch_donor(&state, id).await?;
    activity::record(&state.db, "blood_donor", Some(id), "updated", format!("Donor {} updated", donor.name)).await;
    Ok(Json(ApiOk { data: donor }))
}

pub async fn delete_donor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM blood_donors WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Donor"));
    }

    activity::record(&state.db, "blood_donor", Some(id), "deleted", format!("Donor #{id} removed")).await;
    Ok(Json(ok_deleted()))
}

/* =========================
   Issues
========================= */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct BloodIssueRow {
    pub id: i64,
    pub issue_number: String,
    pub blood_unit_id: Option<i64>,
    pub unit_number: Option<String>,
    pub blood_type: String,
    pub units: i32,
    pub recipient_patient_id: Option<i64>,
    pub recipient_first_name: Option<String>,
    pub recipient_last_name: Option<String>,
    pub requesting_doctor_id: Option<i64>,
    pub purpose: Option<String>,
    pub status: String,
    pub issued_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const ISSUE_SELECT: &str = r#"
    SELECT bi.id, bi.issue_number, bi.blood_unit_id, bu.unit_number, bi.blood_type, bi.units,
           bi.recipient_patient_id, p.first_name AS recipient_first_name, p.last_name AS recipient_last_name,
           bi.requesting_doctor_id, bi.purpose, bi.status, bi.issued_at, bi.created_at, bi.updated_at
    FROM blood_issues bi
    LEFT JOIN blood_units bu ON bi.blood_unit_id = bu.id
    LEFT JOIN patients p ON bi.recipient_patient_id = p.id
"#;

#[derive(Debug, Default, Deserialize)]
pub struct IssueRequest {
    pub blood_unit_id: Option<i64>,
    pub blood_type: Option<String>,
    pub units: Option<i32>,
    pub recipient_patient_id: Option<i64>,
    pub requesting_doctor_id: Option<i64>,
    pub purpose: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IssueFilter {
    pub status: Option<String>,
}

struct IssueFields {
    blood_type: Option<BloodType>,
    units: Option<i32>,
    status: Option<BloodIssueStatus>,
}

fn validate_issue(req: &IssueRequest, creating: bool) -> Result<IssueFields, ApiError> {
    let mut v = Validator::new();
    if creating && req.blood_type.is_none() {
        v.push("blood_type", "is required");
    }
    let fields = IssueFields {
        blood_type: v.one_of("blood_type", req.blood_type.as_deref()),
        units: v.min("units", req.units, 1),
        status: v.one_of("status", req.status.as_deref()),
    };
    if fields.status == Some(BloodIssueStatus::Issued) && creating && req.blood_unit_id.is_none() {
        v.push("blood_unit_id", "is required when issuing");
    }
    v.finish()?;
    Ok(fields)
}

/// Takes an available, unexpired unit of the requested type out of stock.
async fn take_unit(conn: &mut MySqlConnection, unit_id: i64, blood_type: &str) -> Result<(), ApiError> {
    let (unit_type, status, expiry_date): (String, String, NaiveDate) =
        sqlx::query_as("SELECT blood_type, status, expiry_date FROM blood_units WHERE id = ? FOR UPDATE")
            .bind(unit_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_error)?
            .ok_or_else(|| ApiError::BadRequest("INVALID_REFERENCE", "Blood unit not found".into()))?;

    if unit_type != blood_type {
        return Err(ApiError::BadRequest(
            "BLOOD_TYPE_MISMATCH",
            format!("Unit is {unit_type}, request is for {blood_type}"),
        ));
    }
    if status != BloodUnitStatus::Available.as_str() || expiry_date < chrono::Utc::now().date_naive() {
        return Err(ApiError::Conflict(
            "UNIT_UNAVAILABLE",
            "Blood unit is not available for issue".into(),
        ));
    }

    sqlx::query("UPDATE blood_units SET status = 'issued' WHERE id = ?")
        .bind(unit_id)
        .execute(&mut *conn)
        .await
        .map_err(db_error)?;
    Ok(())
}

pub async fn list_issues(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<IssueFilter>,
) -> Result<Json<Paged<BloodIssueRow>>, ApiError> {
    let window = page.window()?;
    let mut v = Validator::new();
    let status = v.one_of::<BloodIssueStatus>("status", filter.status.as_deref());
    v.finish()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM blood_issues bi");
    let mut qb = QueryBuilder::<MySql>::new(ISSUE_SELECT);
    if let Some(status) = status {
        count.push(" WHERE bi.status = ").push_bind(status.as_str());
        qb.push(" WHERE bi.status = ").push_bind(status.as_str());
    }

    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    qb.push(" ORDER BY bi.created_at DESC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());
    let issues: Vec<BloodIssueRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: issues,
        pagination: window.with_total(total),
    }))
}

async fn fetch_issue(state: &AppState, id: i64) -> Result<BloodIssueRow, ApiError> {
    sqlx::query_as::<_, BloodIssueRow>(&format!("{ISSUE_SELECT} WHERE bi.id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Blood issue"))
}

pub async fn get_issue(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<BloodIssueRow>>, ApiError> {
    let issue = fetch_issue(&state, id).await?;
    Ok(Json(ApiOk { data: issue }))
}

pub async fn create_issue(
    State(state): State<AppState>,
    Json(req): Json<IssueRequest>,
) -> Result<(StatusCode, Json<ApiOk<BloodIssueRow>>), ApiError> {
    let fields = validate_issue(&req, true)?;
    let blood_type = fields.blood_type.map(|t| t.as_str()).unwrap_or_default();
    let status = fields.status.unwrap_or(BloodIssueStatus::Pending);

    let mut tx = state.db.begin().await.map_err(db_error)?;

    if let Some(patient_id) = req.recipient_patient_id {
        require_reference(&mut *tx, "patients", patient_id, "Patient").await?;
    }
    if let Some(doctor_id) = req.requesting_doctor_id {
        require_reference(&mut *tx, "doctors", doctor_id, "Doctor").await?;
    }
    match (req.blood_unit_id, status) {
        (Some(unit_id), BloodIssueStatus::Issued) => take_unit(&mut tx, unit_id, blood_type).await?,
        (Some(unit_id), _) => require_reference(&mut *tx, "blood_units", unit_id, "Blood unit").await?,
        (None, _) => {}
    }

    let issue_number = generate_reference("BI");
    let res = sqlx::query(
        r#"
        INSERT INTO blood_issues (
          issue_number, blood_unit_id, blood_type, units, recipient_patient_id,
          requesting_doctor_id, purpose, status, issued_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, IF(? = 'issued', NOW(), NULL))
        "#,
    )
    .bind(&issue_number)
    .bind(req.blood_unit_id)
    .bind(blood_type)
    .bind(fields.units.unwrap_or(1))
    .bind(req.recipient_patient_id)
    .bind(req.requesting_doctor_id)
    .bind(&req.purpose)
    .bind(status.as_str())
    .bind(status.as_str())
    .execute(&mut *tx)
    .await
    .map_err(db_error)?;
    tx.commit().await.map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(
        &state.db,
        "blood_issue",
        Some(id),
        "created",
        format!("Blood issue {issue_number} ({blood_type}) requested"),
    )
    .await;

    let issue = fetch_issue(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: issue })))
}

/// Updates an issue request. Moving it to `issued` consumes the linked unit.
pub async fn update_issue(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<IssueRequest>,
) -> Result<Json<ApiOk<BloodIssueRow>>, ApiError> {
    let fields = validate_issue(&req, false)?;

    let mut set = UpdateSet::new("blood_issues");
    set.set_opt("blood_unit_id", req.blood_unit_id)
        .set_opt("blood_type", fields.blood_type.map(|t| t.as_str()))
        .set_opt("units", fields.units)
        .set_opt("recipient_patient_id", req.recipient_patient_id)
        .set_opt("requesting_doctor_id", req.requesting_doctor_id)
        .set_opt("purpose", req.purpose.clone())
        .set_opt("status", fields.status.map(|s| s.as_str()));
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }

    let mut tx = state.db.begin().await.map_err(db_error)?;

    let (current_status, current_unit, current_type): (String, Option<i64>, String) =
        sqlx::query_as("SELECT status, blood_unit_id, blood_type FROM blood_issues WHERE id = ? FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| ApiError::not_found("Blood issue"))?;

    if let Some(patient_id) = req.recipient_patient_id {
        require_reference(&mut *tx, "patients", patient_id, "Patient").await?;
    }
    if let Some(doctor_id) = req.requesting_doctor_id {
        require_reference(&mut *tx, "doctors", doctor_id, "Doctor").await?;
    }

    let already_issued = current_status == BloodIssueStatus::Issued.as_str();
    if fields.status == Some(BloodIssueStatus::Issued) && !already_issued {
        let Some(unit_id) = req.blood_unit_id.or(current_unit) else {
            return Err(ApiError::Validation(vec![FieldError::new(
                "blood_unit_id",
                "is required when issuing",
            )]));
        };
        let blood_type = fields.blood_type.map(|t| t.as_str().to_string()).unwrap_or(current_type);
        take_unit(&mut tx, unit_id, &blood_type).await?;
        set.set_raw("issued_at = NOW()");
    } else if let Some(unit_id) = req.blood_unit_id {
        require_reference(&mut *tx, "blood_units", unit_id, "Blood unit").await?;
    }

    set.execute_by_id(id, &mut *tx).await.map_err(db_error)?;
    tx.commit().await.map_err(db_error)?;

    let issue = fetch_issue(&state, id).await?;
    activity::record(
        &state.db,
        "blood_issue",
        Some(id),
        "updated",
        format!("Blood issue {} is {}", issue.issue_number, issue.status),
    )
    .await;
    Ok(Json(ApiOk { data: issue }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_is_zero_filled_in_vocabulary_order() {
        let counts = vec![
            StockCount {
                blood_type: "O-".into(),
                units: 2,
                quantity: 3,
            },
            StockCount {
                blood_type: "A+".into(),
                units: 5,
                quantity: 5,
            },
        ];
        let levels = stock_levels(&counts);
        assert_eq!(levels.len(), 8);
        assert_eq!(
            levels[0],
            StockLevel {
                blood_type: "A+",
                units: 5,
                quantity: 5
            }
        );
        assert_eq!(levels[1].units, 0);
        assert_eq!(levels[7].blood_type, "O-");
        assert_eq!(levels[7].quantity, 3);
    }

    #[test]
    fn unit_expiry_follows_collection() {
        let req = UnitRequest {
            blood_type: Some("B+".into()),
            collection_date: Some("2024-03-01".into()),
            expiry_date: Some("2024-03-01".into()),
            ..Default::default()
        };
        let Err(ApiError::Validation(errors)) = validate_unit(&req, true) else {
            panic!("expected validation error");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "expiry_date");
    }

    #[test]
    fn unit_create_requires_type_and_dates() {
        let Err(ApiError::Validation(errors)) = validate_unit(&UnitRequest::default(), true) else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["blood_type", "collection_date", "expiry_date"]);
    }

    #[test]
    fn issuing_on_create_needs_a_unit() {
        let req = IssueRequest {
            blood_type: Some("AB-".into()),
            status: Some("issued".into()),
            ..Default::default()
        };
        let Err(ApiError::Validation(errors)) = validate_issue(&req, true) else {
            panic!("expected validation error");
        };
        assert_eq!(errors[0].field, "blood_unit_id");
    }

    #[test]
    fn donor_update_checks_contact() {
        let req = DonorRequest {
            email: Some("donor-at-example".into()),
            blood_type: Some("Z".into()),
            ..Default::default()
        };
        let Err(ApiError::Validation(errors)) = validate_donor(&req, false) else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["blood_type", "email"]);
    }
}
