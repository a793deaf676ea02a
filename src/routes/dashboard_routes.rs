// src/routes/dashboard_routes.rs

use axum::{extract::State, routing::get, Router};
use chrono::{Datelike, Months, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::{
    error::{db_error, ApiError},
    extract::{Json, Query},
    models::{ApiOk, AppState},
    validation::Validator,
};

const DEFAULT_CHART_MONTHS: u32 = 12;
const MAX_CHART_MONTHS: u32 = 36;
const DEFAULT_RECENT_LIMIT: i64 = 10;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DashboardStats {
    pub total_doctors: i64,
    pub total_patients: i64,
    pub total_appointments: i64,
    pub pending_appointments: i64,
    pub revenue_cents: i64,
    pub occupied_rooms: i64,
    pub open_emergency_calls: i64,
    pub low_stock_medicines: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct RecentAppointmentRow {
    pub id: i64,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub status: String,
    pub patient_first_name: String,
    pub patient_last_name: String,
    pub doctor_first_name: String,
    pub doctor_last_name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// One bar or point of a monthly chart, `name` being `YYYY-MM`.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ChartPoint {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChartQuery {
    pub months: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(stats))
        .route("/recent-appointments", get(recent_appointments))
        .route("/revenue-chart", get(revenue_chart))
        .route("/patient-growth", get(patient_growth))
}

/// First day of the oldest month in a window of `months` ending with `today`'s month.
fn window_start(today: NaiveDate, months: u32) -> Option<NaiveDate> {
    today
        .with_day(1)?
        .checked_sub_months(Months::new(months.saturating_sub(1)))
}

fn month_keys(start: NaiveDate, months: u32) -> Vec<String> {
    (0..months)
        .filter_map(|i| start.checked_add_months(Months::new(i)))
        .map(|d| d.format("%Y-%m").to_string())
        .collect()
}

/// Lays sparse `(YYYY-MM, value)` rows over every month of the window, zero where absent.
fn fill_months(keys: Vec<String>, rows: &[(String, i64)]) -> Vec<ChartPoint> {
    keys.into_iter()
        .map(|name| {
            let value = rows
                .iter()
                .find(|(month, _)| *month == name)
                .map_or(0, |(_, v)| *v);
            ChartPoint { name, value }
        })
        .collect()
}

/// Turns per-month additions into running totals on top of `baseline`.
fn accumulate(baseline: i64, points: Vec<ChartPoint>) -> Vec<ChartPoint> {
    let mut total = baseline;
    points
        .into_iter()
        .map(|p| {
            total += p.value;
            ChartPoint {
                name: p.name,
                value: total,
            }
        })
        .collect()
}

fn chart_window(q: &ChartQuery) -> Result<(NaiveDate, Vec<String>), ApiError> {
    let mut v = Validator::new();
    let months = v
        .range("months", q.months, 1, MAX_CHART_MONTHS)
        .unwrap_or(DEFAULT_CHART_MONTHS);
    v.finish()?;

    let start = window_start(chrono::Utc::now().date_naive(), months)
        .ok_or_else(|| ApiError::Internal("chart window out of calendar range".into()))?;
    Ok((start, month_keys(start, months)))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<ApiOk<DashboardStats>>, ApiError> {
    let stats: DashboardStats = sqlx::query_as(
        r#"
        SELECT
          (SELECT COUNT(*) FROM doctors) AS total_doctors,
          (SELECT COUNT(*) FROM patients) AS total_patients,
          (SELECT COUNT(*) FROM appointments) AS total_appointments,
          (SELECT COUNT(*) FROM appointments WHERE status IN ('scheduled', 'confirmed')) AS pending_appointments,
          (SELECT CAST(COALESCE(SUM(amount_cents), 0) AS SIGNED) FROM invoices WHERE status = 'paid') AS revenue_cents,
          (SELECT COUNT(*) FROM rooms WHERE status = 'occupied') AS occupied_rooms,
          (SELECT COUNT(*) FROM emergency_calls WHERE status NOT IN ('completed', 'cancelled')) AS open_emergency_calls,
          (SELECT COUNT(*) FROM medicines WHERE status = 'active' AND stock_quantity <= reorder_level) AS low_stock_medicines
        "#,
    )
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiOk { data: stats }))
}

pub async fn recent_appointments(
    State(state): State<AppState>,
    Query(q): Query<RecentQuery>,
) -> Result<Json<ApiOk<Vec<RecentAppointmentRow>>>, ApiError> {
    let mut v = Validator::new();
    let limit = v.range("limit", q.limit, 1, 50).unwrap_or(DEFAULT_RECENT_LIMIT);
    v.finish()?;

    let rows: Vec<RecentAppointmentRow> = sqlx::query_as(
        r#"
        SELECT a.id, a.appointment_date, a.appointment_time, a.status,
               p.first_name AS patient_first_name, p.last_name AS patient_last_name,
               u.first_name AS doctor_first_name, u.last_name AS doctor_last_name,
               a.created_at
        FROM appointments a
        JOIN patients p ON a.patient_id = p.id
        JOIN doctors doc ON a.doctor_id = doc.id
        JOIN users u ON doc.user_id = u.id
        ORDER BY a.created_at DESC, a.id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiOk { data: rows }))
}

/// Invoiced cents per month, cancelled invoices excluded.
pub async fn revenue_chart(
    State(state): State<AppState>,
    Query(q): Query<ChartQuery>,
) -> Result<Json<ApiOk<Vec<ChartPoint>>>, ApiError> {
    let (start, keys) = chart_window(&q)?;

    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT DATE_FORMAT(created_at, '%Y-%m') AS month, CAST(SUM(amount_cents) AS SIGNED)
        FROM invoices
        WHERE status <> 'cancelled' AND created_at >= ?
        GROUP BY month
        "#,
    )
    .bind(start)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiOk {
        data: fill_months(keys, &rows),
    }))
}

/// Registered patients at the end of each month.
pub async fn patient_growth(
    State(state): State<AppState>,
    Query(q): Query<ChartQuery>,
) -> Result<Json<ApiOk<Vec<ChartPoint>>>, ApiError> {
    let (start, keys) = chart_window(&q)?;

    let baseline: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM patients WHERE created_at < ?")
        .bind(start)
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT DATE_FORMAT(created_at, '%Y-%m') AS month, COUNT(*)
        FROM patients
        WHERE created_at >= ?
        GROUP BY month
        "#,
    )
    .bind(start)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiOk {
        data: accumulate(baseline, fill_months(keys, &rows)),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn window_reaches_back_across_the_year() {
        assert_eq!(window_start(day(2026, 3, 18), 6), Some(day(2025, 10, 1)));
        assert_eq!(window_start(day(2026, 3, 31), 1), Some(day(2026, 3, 1)));
        assert_eq!(
            month_keys(day(2025, 11, 1), 3),
            ["2025-11", "2025-12", "2026-01"]
        );
    }

    #[test]
    fn missing_months_chart_as_zero() {
        let keys = month_keys(day(2026, 1, 1), 3);
        let rows = vec![("2026-03".to_string(), 900), ("2026-01".to_string(), 1500)];
        let values: Vec<_> = fill_months(keys, &rows).into_iter().map(|p| p.value).collect();
        assert_eq!(values, [1500, 0, 900]);
    }

    #[test]
    fn growth_is_cumulative_from_the_baseline() {
        let points = fill_months(
            month_keys(day(2026, 1, 1), 3),
            &[("2026-01".to_string(), 4), ("2026-03".to_string(), 2)],
        );
        assert_eq!(
            accumulate(10, points),
            [
                ChartPoint { name: "2026-01".into(), value: 14 },
                ChartPoint { name: "2026-02".into(), value: 14 },
                ChartPoint { name: "2026-03".into(), value: 16 },
            ]
        );
    }

    #[test]
    fn chart_months_are_bounded() {
        let q = ChartQuery { months: Some(0) };
        assert!(matches!(chart_window(&q), Err(ApiError::Validation(_))));

        let (_, keys) = chart_window(&ChartQuery::default()).unwrap();
        assert_eq!(keys.len(), DEFAULT_CHART_MONTHS as usize);
    }
}
