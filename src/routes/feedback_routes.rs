// src/routes/feedback_routes.rs

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
    db::UpdateSet,
    error::{db_error, ApiError},
    extract::{Json, Path, Query},
    models::{
        like_pattern, ok_deleted, ApiOk, AppState, FeedbackCategory, FeedbackStatus, OkData, PageQuery, Paged,
        ReviewStatus, ReviewSubject,
    },
    validation::{Validator, Vocabulary},
};

/* -------------------------
   Reviews
--------------------------*/

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ReviewRow {
    pub id: i64,
    pub subject_type: String,
    pub subject_name: String,
    pub rating: i8,
    pub comment: Option<String>,
    pub reviewer_name: Option<String>,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const REVIEW_COLUMNS: &str = "id, subject_type, subject_name, rating, comment, reviewer_name, status, \
created_at, updated_at";

#[derive(Debug, Default, Deserialize)]
pub struct ReviewRequest {
    pub subject_type: Option<String>,
    pub subject_name: Option<String>,
    pub rating: Option<i8>,
    pub comment: Option<String>,
    pub reviewer_name: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReviewFilter {
    pub subject_type: Option<String>,
    pub subject_name: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default)]
struct ReviewFields {
    subject_type: Option<ReviewSubject>,
    subject_name: Option<String>,
    rating: Option<i8>,
    status: Option<ReviewStatus>,
}

pub fn review_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_reviews).post(create_review))
        .route("/{id}", get(get_review).put(update_review).delete(delete_review))
}

fn validate_review(req: &ReviewRequest, creating: bool) -> Result<ReviewFields, ApiError> {
    let mut v = Validator::new();
    if creating {
        if req.subject_type.is_none() {
            v.push("subject_type", "is required");
        }
        if req.rating.is_none() {
            v.push("rating", "is required");
        }
    }
    let subject_name = if creating {
        v.required("subject_name", req.subject_name.as_deref())
    } else {
        v.not_blank("subject_name", req.subject_name.as_deref())
    };
    let fields = ReviewFields {
        subject_type: v.one_of("subject_type", req.subject_type.as_deref()),
        subject_name,
        rating: v.range("rating", req.rating, 1, 5),
        status: v.one_of("status", req.status.as_deref()),
    };
    v.finish()?;
    Ok(fields)
}

fn push_review_filters(qb: &mut QueryBuilder<'_, MySql>, f: &ReviewFilter) {
    qb.push(" WHERE 1=1");
    if let Some(kind) = f.subject_type.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND subject_type = ").push_bind(kind.to_string());
    }
    if let Some(pattern) = like_pattern(f.subject_name.as_deref()) {
        qb.push(" AND subject_name LIKE ").push_bind(pattern);
    }
    if let Some(status) = f.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND status = ").push_bind(status.to_string());
    }
}

pub async fn list_reviews(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<ReviewFilter>,
) -> Result<Json<Paged<ReviewRow>>, ApiError> {
    let window = page.window()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM reviews");
    push_review_filters(&mut count, &filter);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(format!("SELECT {REVIEW_COLUMNS} FROM reviews"));
    push_review_filters(&mut qb, &filter);
    qb.push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let reviews: Vec<ReviewRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: reviews,
        pagination: window.with_total(total),
    }))
}

async fn fetch_review(state: &AppState, id: i64) -> Result<ReviewRow, ApiError> {
    sqlx::query_as::<_, ReviewRow>(&format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Review"))
}

pub async fn get_review(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<ReviewRow>>, ApiError> {
    let review = fetch_review(&state, id).await?;
    Ok(Json(ApiOk { data: review }))
}

pub async fn create_review(
    State(state): State<AppState>,
    Json(req): Json<ReviewRequest>,
) -> Result<(StatusCode, Json<ApiOk<ReviewRow>>), ApiError> {
    let fields = validate_review(&req, true)?;
    let (Some(subject_type), Some(subject_name), Some(rating)) =
        (fields.subject_type, fields.subject_name, fields.rating)
    else {
        return Err(ApiError::Internal("review fields missing after validation".into()));
    };
    let status = fields.status.unwrap_or(ReviewStatus::Active);

    let res = sqlx::query(
        r#"
        INSERT INTO reviews (subject_type, subject_name, rating, comment, reviewer_name, status)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(subject_type.as_str())
    .bind(&subject_name)
    .bind(rating)
    .bind(&req.comment)
    .bind(&req.reviewer_name)
    .bind(status.as_str())
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(
        &state.db,
        "review",
        Some(id),
        "created",
        format!("{rating}-star review for {subject_name}"),
    )
    .await;

    let review = fetch_review(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: review })))
}

pub async fn update_review(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<ApiOk<ReviewRow>>, ApiError> {
    let fields = validate_review(&req, false)?;

    let mut set = UpdateSet::new("reviews");
    set.set_opt("subject_type", fields.subject_type.map(|s| s.as_str()))
        .set_opt("subject_name", fields.subject_name)
        .set_opt("rating", fields.rating)
        .set_opt("comment", req.comment.clone())
        .set_opt("reviewer_name", req.reviewer_name.clone())
        .set_opt("status", fields.status.map(|s| s.as_str()));
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }

    set.execute_by_id(id, &state.db).await.map_err(db_error)?;

    let review = fetch_review(&state, id).await?;
    activity::record(&state.db, "review", Some(id), "updated", format!("Review #{id} updated")).await;
    Ok(Json(ApiOk { data: review }))
}

pub async fn delete_review(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM reviews WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Review"));
    }

    activity::record(&state.db, "review", Some(id), "deleted", format!("Review #{id} deleted")).await;
    Ok(Json(ok_deleted()))
}

/* -------------------------
   Feedback
--------------------------*/

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct FeedbackRow {
    pub id: i64,
    pub subject: String,
    pub message: String,
    pub sender_name: Option<String>,
    pub sender_email: Option<String>,
    pub category: String,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const FEEDBACK_COLUMNS: &str = "id, subject, message, sender_name, sender_email, category, status, \
created_at, updated_at";

#[derive(Debug, Default, Deserialize)]
pub struct FeedbackRequest {
    pub subject: Option<String>,
    pub message: Option<String>,
    pub sender_name: Option<String>,
    pub sender_email: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FeedbackFilter {
    pub search: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default)]
struct FeedbackFields {
    subject: Option<String>,
    message: Option<String>,
    sender_email: Option<String>,
    category: Option<FeedbackCategory>,
    status: Option<FeedbackStatus>,
}

pub fn feedback_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_feedback).post(create_feedback))
        .route("/{id}", get(get_feedback).put(update_feedback).delete(delete_feedback))
}

fn validate_feedback(req: &FeedbackRequest, creating: bool) -> Result<FeedbackFields, ApiError> {
    let mut v = Validator::new();
    let (subject, message) = if creating {
        (
            v.required("subject", req.subject.as_deref()),
            v.required("message", req.message.as_deref()),
        )
    } else {
        (
            v.not_blank("subject", req.subject.as_deref()),
            v.not_blank("message", req.message.as_deref()),
        )
    };
    let fields = FeedbackFields {
        subject,
        message,
        sender_email: v.email("sender_email", req.sender_email.as_deref()),
        category: v.one_of("category", req.category.as_deref()),
        status: v.one_of("status", req.status.as_deref()),
    };
    v.finish()?;
    Ok(fields)
}

fn push_feedback_filters(qb: &mut QueryBuilder<'_, MySql>, f: &FeedbackFilter) {
    qb.push(" WHERE 1=1");
    if let Some(pattern) = like_pattern(f.search.as_deref()) {
        qb.push(" AND (subject LIKE ")
            .push_bind(pattern.clone())
            .push(" OR message LIKE ")
            .push_bind(pattern.clone())
            .push(" OR sender_name LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(category) = f.category.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND category = ").push_bind(category.to_string());
    }
    if let Some(status) = f.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND status = ").push_bind(status.to_string());
    }
}

pub async fn list_feedback(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<FeedbackFilter>,
) -> Result<Json<Paged<FeedbackRow>>, ApiError> {
    let window = page.window()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM feedback");
    push_feedback_filters(&mut count, &filter);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(format!("SELECT {FEEDBACK_COLUMNS} FROM feedback"));
    push_feedback_filters(&mut qb, &filter);
    qb.push(" ORDER BY status = 'resolved', created_at DESC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let items: Vec<FeedbackRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: items,
        pagination: window.with_total(total),
    }))
}

async fn fetch_feedback(state: &AppState, id: i64) -> Result<FeedbackRow, ApiError> {
    sqlx::query_as::<_, FeedbackRow>(&format!("SELECT {FEEDBACK_COLUMNS} FROM feedback WHERE id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("Feedback"))
}

pub async fn get_feedback(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<FeedbackRow>>, ApiError> {
    let item = fetch_feedback(&state, id).await?;
    Ok(Json(ApiOk { data: item }))
}

pub async fn create_feedback(
    State(state): State<AppState>,
    Json(req): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<ApiOk<FeedbackRow>>), ApiError> {
    let fields = validate_feedback(&req, true)?;
    let subject = fields.subject.unwrap_or_default();
    let category = fields.category.unwrap_or(FeedbackCategory::General);
    let status = fields.status.unwrap_or(FeedbackStatus::Pending);

    let res = sqlx::query(
        r#"
        INSERT INTO feedback (subject, message, sender_name, sender_email, category, status)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&subject)
    .bind(fields.message)
    .bind(&req.sender_name)
    .bind(fields.sender_email)
    .bind(category.as_str())
    .bind(status.as_str())
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(&state.db, "feedback", Some(id), "created", format!("Feedback received: {subject}")).await;

    let item = fetch_feedback(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: item })))
}

pub async fn update_feedback(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<ApiOk<FeedbackRow>>, ApiError> {
    let fields = validate_feedback(&req, false)?;

    let mut set = UpdateSet::new("feedback");
    set.set_opt("subject", fields.subject)
        .set_opt("message", fields.message)
        .set_opt("sender_name", req.sender_name.clone())
        .set_opt("sender_email", fields.sender_email)
        .set_opt("category", fields.category.map(|c| c.as_str()))
        .set_opt("status", fields.status.map(|s| s.as_str()));
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }

    set.execute_by_id(id, &state.db).await.map_err(db_error)?;

    let item = fetch_feedback(&state, id).await?;
    activity::record(
        &state.db,
        "feedback",
        Some(id),
        "updated",
        format!("Feedback #{id} is now {}", item.status),
    )
    .await;
    Ok(Json(ApiOk { data: item }))
}

pub async fn delete_feedback(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM feedback WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Feedback"));
    }

    activity::record(&state.db, "feedback", Some(id), "deleted", format!("Feedback #{id} deleted")).await;
    Ok(Json(ok_deleted()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid<T: std::fmt::Debug>(result: Result<T, ApiError>) -> Vec<String> {
        let Err(ApiError::Validation(errors)) = result else {
            panic!("expected validation error");
        };
        errors.into_iter().map(|e| e.field).collect()
    }

    #[test]
    fn review_needs_subject_and_rating() {
        assert_eq!(
            invalid(validate_review(&ReviewRequest::default(), true)),
            ["subject_type", "rating", "subject_name"]
        );
    }

    #[test]
    fn rating_runs_one_to_five() {
        let mut req = ReviewRequest {
            subject_type: Some("doctor".into()),
            subject_name: Some("Dr. Grey".into()),
            rating: Some(0),
            ..Default::default()
        };
        assert_eq!(invalid(validate_review(&req, true)), ["rating"]);

        req.rating = Some(5);
        let fields = validate_review(&req, true).unwrap();
        assert_eq!(fields.subject_type, Some(ReviewSubject::Doctor));
        assert_eq!(fields.rating, Some(5));
    }

    #[test]
    fn feedback_checks_sender_email_and_category() {
        let req = FeedbackRequest {
            subject: Some("Parking".into()),
            message: Some("Not enough spaces".into()),
            sender_email: Some("nobody".into()),
            category: Some("rant".into()),
            ..Default::default()
        };
        assert_eq!(invalid(validate_feedback(&req, true)), ["sender_email", "category"]);
    }

    #[test]
    fn feedback_status_can_change_alone() {
        let req = FeedbackRequest {
            status: Some("resolved".into()),
            ..Default::default()
        };
        let fields = validate_feedback(&req, false).unwrap();
        assert_eq!(fields.status, Some(FeedbackStatus::Resolved));
    }

    #[test]
    fn feedback_search_spans_text_columns() {
        let mut qb = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM feedback");
        push_feedback_filters(
            &mut qb,
            &FeedbackFilter {
                search: Some("parking".into()),
                ..Default::default()
            },
        );
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM feedback WHERE 1=1 AND (subject LIKE ? OR message LIKE ? OR sender_name LIKE ?)"
        );
    }
}
