// src/routes/billing_routes.rs
//
// Invoices and insurance claims. Amounts are integer cents throughout.

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
    db::{require_reference, UpdateSet},
    error::{db_error, ApiError},
    extract::{Json, Path, Query},
    models::{
        deserialize_double_option, generate_reference, ok_deleted, ApiOk, AppState, ClaimStatus,
        CountBy, InvoiceStatus, OkData, PageQuery, Paged,
    },
    validation::{Validator, Vocabulary},
};

/* =========================
   Invoices
========================= */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct InvoiceRow {
    pub id: i64,
    pub invoice_number: String,
    pub patient_id: i64,
    pub patient_first_name: String,
    pub patient_last_name: String,
    pub amount_cents: i64,
    pub status: String,
    pub due_date: Option<NaiveDate>,
    pub paid_at: Option<chrono::DateTime<chrono::Utc>>,
    pub notes: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const INVOICE_SELECT: &str = r#"
    SELECT i.id, i.invoice_number, i.patient_id,
           p.first_name AS patient_first_name, p.last_name AS patient_last_name,
           i.amount_cents, i.status, i.due_date, i.paid_at, i.notes, i.created_at, i.updated_at
    FROM invoices i
    JOIN patients p ON i.patient_id = p.id
"#;

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceRequest {
    pub patient_id: Option<i64>,
    pub amount_cents: Option<i64>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub due_date: Option<Option<String>>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceFilter {
    pub status: Option<String>,
    pub patient_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct InvoiceStats {
    pub total_invoices: i64,
    pub total_billed_cents: i64,
    pub total_paid_cents: i64,
    pub outstanding_cents: i64,
    pub status_distribution: Vec<CountBy>,
}

pub fn invoice_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_invoices).post(create_invoice))
        .route("/stats/overview", get(invoice_stats))
        .route("/{id}", get(get_invoice).put(update_invoice).delete(delete_invoice))
}

struct NewInvoice {
    patient_id: i64,
    amount_cents: i64,
    status: InvoiceStatus,
    due_date: Option<NaiveDate>,
}

fn validate_invoice(req: &InvoiceRequest) -> Result<NewInvoice, ApiError> {
    let mut v = Validator::new();
    if req.patient_id.is_none() {
        v.push("patient_id", "is required");
    }
    if req.amount_cents.is_none() {
        v.push("amount_cents", "is required");
    }
    let amount_cents = v.min("amount_cents", req.amount_cents, 0);
    let status = v.one_of("status", req.status.as_deref());
    let due_date = v.date("due_date", req.due_date.clone().flatten().as_deref());
    v.finish()?;

    Ok(NewInvoice {
        patient_id: req.patient_id.unwrap_or_default(),
        amount_cents: amount_cents.unwrap_or_default(),
        status: status.unwrap_or(InvoiceStatus::Pending),
        due_date,
    })
}

fn build_invoice_update<'a>(req: &InvoiceRequest) -> Result<UpdateSet<'a>, ApiError> {
    let mut v = Validator::new();
    let mut set = UpdateSet::new("invoices");

    set.set_opt("patient_id", req.patient_id)
        .set_opt("amount_cents", v.min("amount_cents", req.amount_cents, 0));

    if let Some(status) = v.one_of::<InvoiceStatus>("status", req.status.as_deref()) {
        set.set("status", status.as_str());
        if status == InvoiceStatus::Paid {
            set.set_raw("paid_at = COALESCE(paid_at, NOW())");
        } else {
            set.set_raw("paid_at = NULL");
        }
    }
    match &req.due_date {
        Some(Some(d)) => {
            set.set_opt("due_date", v.date("due_date", Some(d.as_str())));
        }
        Some(None) => {
            set.set("due_date", None::<NaiveDate>);
        }
        None => {}
    }
    set.set_opt("notes", req.notes.clone());

    v.finish()?;
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }
    Ok(set)
}

fn push_invoice_filters(qb: &mut QueryBuilder<'_, MySql>, status: Option<InvoiceStatus>, f: &InvoiceFilter) {
    qb.push(" WHERE 1=1");
    if let Some(status) = status {
        qb.push(" AND i.status = ").push_bind(status.as_str());
    }
    if let Some(patient_id) = f.patient_id {
        qb.push(" AND i.patient_id = ").push_bind(patient_id);
    }
}

pub async fn list_invoices(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<InvoiceFilter>,
) -> Result<Json<Paged<InvoiceRow>>, ApiError> {
    let window = page.window()?;
    let mut v = Validator::new();
    let status = v.one_of::<InvoiceStatus>("status", filter.status.as_deref());
    v.finish()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM invoices i");
    push_invoice_filters(&mut count, status, &filter);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(INVOICE_SELECT);
    push_invoice_filters(&mut qb, status, &filter);
    qb.push(" ORDER BY i.created_at DESC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let invoices: Vec<InvoiceRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: invoices,
        pagination: window.with_total(total),
    }))
}

async fn fetch_invoice(state: &AppState, id: i64) -> Result<InvoiceRow, ApiError> {
    sqlx::query_as::<_, InvoiceRow>(&format!("{INVOICE_SELECT} WHERE i.id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Invoice"))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<InvoiceRow>>, ApiError> {
    let invoice = fetch_invoice(&state, id).await?;
    Ok(Json(ApiOk { data: invoice }))
}

pub async fn create_invoice(
    State(state): State<AppState>,
    Json(req): Json<InvoiceRequest>,
) -> Result<(StatusCode, Json<ApiOk<InvoiceRow>>), ApiError> {
    let new = validate_invoice(&req)?;
    require_reference(&state.db, "patients", new.patient_id, "Patient").await?;

    let invoice_number = generate_reference("INV");
    let res = sqlx::query(
        r#"
        INSERT INTO invoices (invoice_number, patient_id, amount_cents, status, due_date, paid_at, notes)
        VALUES (?, ?, ?, ?, ?, IF(? = 'paid', NOW(), NULL), ?)
        "#,
    )
    .bind(&invoice_number)
    .bind(new.patient_id)
    .bind(new.amount_cents)
    .bind(new.status.as_str())
    .bind(new.due_date)
    .bind(new.status.as_str())
    .bind(&req.notes)
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(&state.db, "invoice", Some(id), "created", format!("Invoice {invoice_number} issued")).await;

    let invoice = fetch_invoice(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: invoice })))
}

pub async fn update_invoice(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<InvoiceRequest>,
) -> Result<Json<ApiOk<InvoiceRow>>, ApiError> {
    let set = build_invoice_update(&req)?;
    if let Some(patient_id) = req.patient_id {
        require_reference(&state.db, "patients", patient_id, "Patient").await?;
    }
    set.execute_by_id(id, &state.db).await.map_err(db_error)?;

    let invoice = fetch_invoice(&state, id).await?;
    activity::record(
        &state.db,
        "invoice",
        Some(id),
        "updated",
        format!("Invoice {} updated ({})", invoice.invoice_number, invoice.status),
    )
    .await;
    Ok(Json(ApiOk { data: invoice }))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM invoices WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Invoice"));
    }

    activity::record(&state.db, "invoice", Some(id), "deleted", format!("Invoice #{id} deleted")).await;
    Ok(Json(ok_deleted()))
}

pub async fn invoice_stats(State(state): State<AppState>) -> Result<Json<ApiOk<InvoiceStats>>, ApiError> {
    let (total_invoices, total_billed_cents, total_paid_cents, outstanding_cents): (i64, i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT
              COUNT(*),
              CAST(COALESCE(SUM(amount_cents), 0) AS SIGNED),
              CAST(COALESCE(SUM(CASE WHEN status = 'paid' THEN amount_cents END), 0) AS SIGNED),
              CAST(COALESCE(SUM(CASE WHEN status IN ('pending', 'overdue') THEN amount_cents END), 0) AS SIGNED)
            FROM invoices
            "#,
        )
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let status_distribution: Vec<CountBy> = sqlx::query_as(
        "SELECT status AS label, COUNT(*) AS count FROM invoices GROUP BY status ORDER BY count DESC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiOk {
        data: InvoiceStats {
            total_invoices,
            total_billed_cents,
            total_paid_cents,
            outstanding_cents,
            status_distribution,
        },
    }))
}

/* =========================
   Insurance claims
========================= */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ClaimRow {
    pub id: i64,
    pub claim_number: String,
    pub patient_id: i64,
    pub patient_first_name: String,
    pub patient_last_name: String,
    pub invoice_id: Option<i64>,
    pub provider: String,
    pub amount_cents: i64,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const CLAIM_SELECT: &str = r#"
    SELECT c.id, c.claim_number, c.patient_id,
           p.first_name AS patient_first_name, p.last_name AS patient_last_name,
           c.invoice_id, c.provider, c.amount_cents, c.status, c.notes, c.created_at, c.updated_at
    FROM insurance_claims c
    JOIN patients p ON c.patient_id = p.id
"#;

#[derive(Debug, Default, Deserialize)]
pub struct ClaimRequest {
    pub patient_id: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub invoice_id: Option<Option<i64>>,
    pub provider: Option<String>,
    pub amount_cents: Option<i64>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClaimFilter {
    pub status: Option<String>,
}

pub fn claim_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_claims).post(create_claim))
        .route("/{id}", get(get_claim).put(update_claim).delete(delete_claim))
}

struct ClaimFields {
    provider: Option<String>,
    amount_cents: Option<i64>,
    status: Option<ClaimStatus>,
}

fn validate_claim(req: &ClaimRequest, creating: bool) -> Result<ClaimFields, ApiError> {
    let mut v = Validator::new();
    let provider = if creating {
        if req.patient_id.is_none() {
            v.push("patient_id", "is required");
        }
        if req.amount_cents.is_none() {
            v.push("amount_cents", "is required");
        }
        v.required("provider", req.provider.as_deref())
    } else {
        v.not_blank("provider", req.provider.as_deref())
    };
    let fields = ClaimFields {
        provider,
        amount_cents: v.min("amount_cents", req.amount_cents, 0),
        status: v.one_of("status", req.status.as_deref()),
    };
    v.finish()?;
    Ok(fields)
}

pub async fn list_claims(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<ClaimFilter>,
) -> Result<Json<Paged<ClaimRow>>, ApiError> {
    let window = page.window()?;
    let mut v = Validator::new();
    let status = v.one_of::<ClaimStatus>("status", filter.status.as_deref());
    v.finish()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM insurance_claims c");
    let mut qb = QueryBuilder::<MySql>::new(CLAIM_SELECT);
    if let Some(status) = status {
        count.push(" WHERE c.status = ").push_bind(status.as_str());
        qb.push(" WHERE c.status = ").push_bind(status.as_str());
    }

    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    qb.push(" ORDER BY c.created_at DESC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());
    let claims: Vec<ClaimRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: claims,
        pagination: window.with_total(total),
    }))
}

async fn fetch_claim(state: &AppState, id: i64) -> Result<ClaimRow, ApiError> {
    sqlx::query_as::<_, ClaimRow>(&format!("{CLAIM_SELECT} WHERE c.id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Insurance claim"))
}

pub async fn get_claim(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<ClaimRow>>, ApiError> {
    let claim = fetch_claim(&state, id).await?;
    Ok(Json(ApiOk { data: claim }))
}

pub async fn create_claim(
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> Result<(StatusCode, Json<ApiOk<ClaimRow>>), ApiError> {
    let fields = validate_claim(&req, true)?;
    let patient_id = req.patient_id.unwrap_or_default();
    let invoice_id = req.invoice_id.flatten();

    require_reference(&state.db, "patients", patient_id, "Patient").await?;
    if let Some(invoice_id) = invoice_id {
        require_reference(&state.db, "invoices", invoice_id, "Invoice").await?;
    }

    let claim_number = generate_reference("CLM");
    let res = sqlx::query(
        r#"
        INSERT INTO insurance_claims (claim_number, patient_id, invoice_id, provider, amount_cents, status, notes)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&claim_number)
    .bind(patient_id)
    .bind(invoice_id)
    .bind(fields.provider.unwrap_or_default())
    .bind(fields.amount_cents.unwrap_or_default())
    .bind(fields.status.unwrap_or(ClaimStatus::Pending).as_str())
    .bind(&req.notes)
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(&state.db, "insurance_claim", Some(id), "created", format!("Claim {claim_number} filed")).await;

    let claim = fetch_claim(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: claim })))
}

pub async fn update_claim(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ClaimRequest>,
) -> Result<Json<ApiOk<ClaimRow>>, ApiError> {
    let fields = validate_claim(&req, false)?;

    let mut set = UpdateSet::new("insurance_claims");
    set.set_opt("patient_id", req.patient_id)
        .set_opt("invoice_id", req.invoice_id)
        .set_opt("provider", fields.provider)
        .set_opt("amount_cents", fields.amount_cents)
        .set_opt("status", fields.status.map(|s| s.as_str()))
        .set_opt("notes", req.notes.clone());
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }

    if let Some(patient_id) = req.patient_id {
        require_reference(&state.db, "patients", patient_id, "Patient").await?;
    }
    if let Some(Some(invoice_id)) = req.invoice_id {
        require_reference(&state.db, "invoices", invoice_id, "Invoice").await?;
    }

    set.execute_by_id(id, &state.db).await.map_err(db_error)?;

    let claim = fetch_claim(&state, id).await?;
    activity::record(
        &state.db,
        "insurance_claim",
        Some(id),
        "updated",
        format!("Claim {} updated ({})", claim.claim_number, claim.status),
    )
    .await;
    Ok(Json(ApiOk { data: claim }))
}

pub async fn delete_claim(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM insurance_claims WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Insurance claim"));
    }

    activity::record(&state.db, "insurance_claim", Some(id), "deleted", format!("Claim #{id} deleted")).await;
    Ok(Json(ok_deleted()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_needs_patient_and_amount() {
        let req = InvoiceRequest {
            status: Some("paid".into()),
            ..Default::default()
        };
        let Err(ApiError::Validation(errors)) = validate_invoice(&req) else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["patient_id", "amount_cents"]);
    }

    #[test]
    fn invoice_defaults_to_pending() {
        let req: InvoiceRequest =
            serde_json::from_str(r#"{"patient_id":4,"amount_cents":15000,"due_date":"2024-05-01"}"#).unwrap();
        let new = validate_invoice(&req).unwrap();
        assert_eq!(new.status, InvoiceStatus::Pending);
        assert_eq!(new.due_date, NaiveDate::from_ymd_opt(2024, 5, 1));
    }

    #[test]
    fn paying_an_invoice_stamps_paid_at() {
        let req: InvoiceRequest = serde_json::from_str(r#"{"status":"paid"}"#).unwrap();
        let set = build_invoice_update(&req).unwrap();
        assert_eq!(
            set.sql(),
            "UPDATE invoices SET status = ?, paid_at = COALESCE(paid_at, NOW())"
        );
    }

    #[test]
    fn reopening_an_invoice_clears_paid_at() {
        let req: InvoiceRequest = serde_json::from_str(r#"{"status":"pending","due_date":null}"#).unwrap();
        let set = build_invoice_update(&req).unwrap();
        assert_eq!(
            set.sql(),
            "UPDATE invoices SET status = ?, paid_at = NULL, due_date = ?"
        );
    }

    #[test]
    fn claim_update_rejects_blank_provider() {
        let req = ClaimRequest {
            provider: Some("  ".into()),
            amount_cents: Some(-10),
            ..Default::default()
        };
        let Err(ApiError::Validation(errors)) = validate_claim(&req, false) else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["provider", "amount_cents"]);
    }
}
