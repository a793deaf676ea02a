// src/routes/attendance_routes.rs

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Router,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::{MySql, QueryBuilder};

use crate::{
    activity,
    db::{require_reference, UpdateSet},
    error::{db_error, ApiError},
    extract::{Json, Path, Query},
    models::{ok_deleted, stored, ApiOk, AppState, AttendanceStatus, CountBy, OkData, PageQuery, Paged},
    validation::{FieldError, Validator, Vocabulary},
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AttendanceRow {
    pub id: i64,
    pub staff_id: i64,
    pub staff_first_name: String,
    pub staff_last_name: String,
    pub staff_role: String,
    pub attendance_date: NaiveDate,
    pub status: String,
    pub check_in: Option<NaiveTime>,
    pub check_out: Option<NaiveTime>,
    pub worked_minutes: Option<i32>,
    pub notes: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const ATTENDANCE_SELECT: &str = r#"
    SELECT a.id, a.staff_id, s.first_name AS staff_first_name, s.last_name AS staff_last_name,
           s.role AS staff_role, a.attendance_date, a.status, a.check_in, a.check_out,
           a.worked_minutes, a.notes, a.created_at, a.updated_at
    FROM staff_attendance a
    JOIN staff s ON a.staff_id = s.id
"#;

#[derive(Debug, Default, Deserialize)]
pub struct AttendanceRequest {
    pub staff_id: Option<i64>,
    pub attendance_date: Option<String>,
    pub status: Option<String>,
    pub check_in: Option<String>,
    pub check_out: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AttendanceFilter {
    pub staff_id: Option<i64>,
    pub date: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AttendanceSummary {
    pub date: NaiveDate,
    pub by_status: Vec<CountBy>,
}

/// Check-in/out times of one attendance day and the minutes between them.
#[derive(Debug, PartialEq, Eq)]
struct Shift {
    check_in: Option<NaiveTime>,
    check_out: Option<NaiveTime>,
    worked_minutes: Option<i32>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_attendance).post(create_attendance))
        .route("/summary", get(attendance_summary))
        .route("/{id}", get(get_attendance).put(update_attendance).delete(delete_attendance))
}

fn shift(
    status: AttendanceStatus,
    check_in: Option<NaiveTime>,
    check_out: Option<NaiveTime>,
) -> Result<Shift, FieldError> {
    if !status.on_site() && (check_in.is_some() || check_out.is_some()) {
        return Err(FieldError::new("status", "absent and on-leave days carry no check-in or check-out"));
    }
    let worked_minutes = match (check_in, check_out) {
        (None, Some(_)) => return Err(FieldError::new("check_out", "needs a check_in")),
        (Some(start), Some(end)) if end <= start => {
            return Err(FieldError::new("check_out", "must be after check_in"))
        }
        (Some(start), Some(end)) => Some((end - start).num_minutes() as i32),
        _ => None,
    };
    Ok(Shift {
        check_in,
        check_out,
        worked_minutes,
    })
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, f: &AttendanceFilter) -> Result<(), ApiError> {
    let mut v = Validator::new();
    let date = v.date("date", f.date.as_deref());
    v.finish()?;

    qb.push(" WHERE 1=1");
    if let Some(staff_id) = f.staff_id {
        qb.push(" AND a.staff_id = ").push_bind(staff_id);
    }
    if let Some(date) = date {
        qb.push(" AND a.attendance_date = ").push_bind(date);
    }
    if let Some(status) = f.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND a.status = ").push_bind(status.to_string());
    }
    Ok(())
}

fn duplicate_day(e: sqlx::Error) -> ApiError {
    match db_error(e) {
        ApiError::Conflict(..) => ApiError::Conflict(
            "ATTENDANCE_EXISTS",
            "Attendance for this staff member and date already exists".into(),
        ),
        other => other,
    }
}

pub async fn list_attendance(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<AttendanceFilter>,
) -> Result<Json<Paged<AttendanceRow>>, ApiError> {
    let window = page.window()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM staff_attendance a");
    push_filters(&mut count, &filter)?;
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(ATTENDANCE_SELECT);
    push_filters(&mut qb, &filter)?;
    qb.push(" ORDER BY a.attendance_date DESC, s.last_name, s.first_name LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let rows: Vec<AttendanceRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: rows,
        pagination: window.with_total(total),
    }))
}

/// Head count per status for one day, today by default.
pub async fn attendance_summary(
    State(state): State<AppState>,
    Query(q): Query<SummaryQuery>,
) -> Result<Json<ApiOk<AttendanceSummary>>, ApiError> {
    let mut v = Validator::new();
    let date = v.date("date", q.date.as_deref());
    v.finish()?;
    let date = date.unwrap_or_else(|| chrono::Utc::now().date_naive());

    let by_status: Vec<CountBy> = sqlx::query_as(
        r#"
        SELECT status AS label, COUNT(*) AS count
        FROM staff_attendance
        WHERE attendance_date = ?
        GROUP BY status
        ORDER BY count DESC
        "#,
    )
    .bind(date)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiOk {
        data: AttendanceSummary { date, by_status },
    }))
}

async fn fetch_attendance(state: &AppState, id: i64) -> Result<AttendanceRow, ApiError> {
    sqlx::query_as::<_, AttendanceRow>(&format!("{ATTENDANCE_SELECT} WHERE a.id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Attendance record"))
}

pub async fn get_attendance(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<AttendanceRow>>, ApiError> {
    let row = fetch_attendance(&state, id).await?;
    Ok(Json(ApiOk { data: row }))
}

pub async fn create_attendance(
    State(state): State<AppState>,
    Json(req): Json<AttendanceRequest>,
) -> Result<(StatusCode, Json<ApiOk<AttendanceRow>>), ApiError> {
    let mut v = Validator::new();
    if req.staff_id.is_none() {
        v.push("staff_id", "is required");
    }
    let date = v.date("attendance_date", req.attendance_date.as_deref());
    let status: Option<AttendanceStatus> = v.one_of("status", req.status.as_deref());
    let check_in = v.clock("check_in", req.check_in.as_deref());
    let check_out = v.clock("check_out", req.check_out.as_deref());
    v.finish()?;

    let staff_id = req.staff_id.unwrap_or_default();
    let date = date.unwrap_or_else(|| chrono::Utc::now().date_naive());
    let status = status.unwrap_or(AttendanceStatus::Present);
    let day = shift(status, check_in, check_out).map_err(|e| ApiError::Validation(vec![e]))?;

    require_reference(&state.db, "staff", staff_id, "Staff member").await?;

    let res = sqlx::query(
        r#"
        INSERT INTO staff_attendance (
          staff_id, attendance_date, status, check_in, check_out, worked_minutes, notes
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(staff_id)
    .bind(date)
    .bind(status.as_str())
    .bind(day.check_in)
    .bind(day.check_out)
    .bind(day.worked_minutes)
    .bind(&req.notes)
    .execute(&state.db)
    .await
    .map_err(duplicate_day)?;

    let id = res.last_insert_id() as i64;
    activity::record(
        &state.db,
        "attendance",
        Some(id),
        "created",
        format!("Staff #{staff_id} marked {} on {date}", status.as_str()),
    )
    .await;

    let row = fetch_attendance(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: row })))
}

/// Times not sent keep their stored value unless the new status is off site,
/// in which case they are cleared. Worked minutes are always recomputed.
pub async fn update_attendance(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<AttendanceRequest>,
) -> Result<Json<ApiOk<AttendanceRow>>, ApiError> {
    let mut v = Validator::new();
    if req.staff_id.is_some() {
        v.push("staff_id", "cannot be changed");
    }
    let date = v.date("attendance_date", req.attendance_date.as_deref());
    let status: Option<AttendanceStatus> = v.one_of("status", req.status.as_deref());
    let check_in = v.clock("check_in", req.check_in.as_deref());
    let check_out = v.clock("check_out", req.check_out.as_deref());
    v.finish()?;

    let current = fetch_attendance(&state, id).await?;
    let status = match status {
        Some(s) => s,
        None => stored("staff_attendance.status", &current.status)?,
    };
    let keep = |sent: Option<NaiveTime>, was: Option<NaiveTime>| match sent {
        Some(t) => Some(t),
        None if status.on_site() => was,
        None => None,
    };
    let day = shift(status, keep(check_in, current.check_in), keep(check_out, current.check_out))
        .map_err(|e| ApiError::Validation(vec![e]))?;

    let mut set = UpdateSet::new("staff_attendance");
    set.set_opt("attendance_date", date)
        .set_opt("status", req.status.as_ref().map(|_| status.as_str()))
        .set_opt("notes", req.notes.clone());
    let times_touched = req.check_in.is_some() || req.check_out.is_some() || req.status.is_some();
    if times_touched {
        set.set("check_in", day.check_in)
            .set("check_out", day.check_out)
            .set("worked_minutes", day.worked_minutes);
    }
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }

    set.execute_by_id(id, &state.db).await.map_err(duplicate_day)?;

    let row = fetch_attendance(&state, id).await?;
    activity::record(
        &state.db,
        "attendance",
        Some(id),
        "updated",
        format!("Attendance of {} {} on {} updated", row.staff_first_name, row.staff_last_name, row.attendance_date),
    )
    .await;
    Ok(Json(ApiOk { data: row }))
}

pub async fn delete_attendance(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM staff_attendance WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Attendance record"));
    }

    activity::record(&state.db, "attendance", Some(id), "deleted", format!("Attendance record #{id} deleted")).await;
    Ok(Json(ok_deleted()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(h, m, 0)
    }

    #[test]
    fn worked_minutes_span_check_in_to_check_out() {
        let s = shift(AttendanceStatus::Present, at(8, 45), at(17, 15)).unwrap();
        assert_eq!(s.worked_minutes, Some(510));

        let s = shift(AttendanceStatus::Late, at(9, 30), None).unwrap();
        assert_eq!(s.check_in, at(9, 30));
        assert_eq!(s.worked_minutes, None);
    }

    #[test]
    fn check_out_must_follow_check_in() {
        let e = shift(AttendanceStatus::Present, at(17, 0), at(9, 0)).unwrap_err();
        assert_eq!(e.field, "check_out");
        assert_eq!(e.message, "must be after check_in");

        let e = shift(AttendanceStatus::HalfDay, None, at(13, 0)).unwrap_err();
        assert_eq!(e.message, "needs a check_in");
    }

    #[test]
    fn off_site_days_have_no_times() {
        assert_eq!(
            shift(AttendanceStatus::Absent, None, None).unwrap(),
            Shift {
                check_in: None,
                check_out: None,
                worked_minutes: None
            }
        );
        let e = shift(AttendanceStatus::OnLeave, at(9, 0), None).unwrap_err();
        assert_eq!(e.field, "status");
    }

    #[test]
    fn bad_filter_date_is_rejected() {
        let mut qb = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM staff_attendance a");
        let filter = AttendanceFilter {
            date: Some("yesterday".into()),
            ..Default::default()
        };
        assert!(matches!(push_filters(&mut qb, &filter), Err(ApiError::Validation(_))));

        let mut qb = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM staff_attendance a");
        let filter = AttendanceFilter {
            staff_id: Some(4),
            date: Some("2030-03-01".into()),
            status: None,
        };
        push_filters(&mut qb, &filter).unwrap();
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM staff_attendance a WHERE 1=1 AND a.staff_id = ? AND a.attendance_date = ?"
        );
    }
}
