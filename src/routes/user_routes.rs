// src/routes/user_routes.rs

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, put},
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
        deserialize_double_option, like_pattern, ok_deleted, ApiOk, AppState, CountBy, OkData,
        PageQuery, Paged, Role,
    },
    password::{hash_password, MIN_PASSWORD_LEN},
    validation::{Validator, Vocabulary},
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub role: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const USER_COLUMNS: &str =
    "id, email, role, first_name, last_name, phone, avatar, is_active, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, PartialEq)]
struct NewUser {
    email: String,
    password: String,
    first_name: String,
    last_name: String,
    role: Role,
    phone: Option<String>,
    avatar: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub avatar: Option<Option<String>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub new_password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserFilter {
    pub search: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserStats {
    pub total_users: i64,
    pub active_users: i64,
    pub new_this_month: i64,
    pub role_distribution: Vec<CountBy>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        // /api/users
        .route("/", get(list_users).post(create_user))
        .route("/stats/overview", get(user_stats))
        // /api/users/{id}
        .route("/{id}", get(get_user).put(update_user).delete(delete_user))
        .route("/{id}/reset-password", put(reset_password))
}

/* =========================
   Validation
========================= */

fn validate_create(req: &CreateUserRequest) -> Result<NewUser, ApiError> {
    let mut v = Validator::new();

    let email = v.required("email", req.email.as_deref());
    let email = email.and_then(|e| v.email("email", Some(e.as_str())));
    let password = v.min_len("password", req.password.as_deref(), MIN_PASSWORD_LEN);
    let first_name = v.required("first_name", req.first_name.as_deref());
    let last_name = v.required("last_name", req.last_name.as_deref());
    let role = match req.role.as_deref() {
        Some(r) => v.one_of::<Role>("role", Some(r)),
        None => {
            v.push("role", "is required");
            None
        }
    };
    let phone = v.phone("phone", req.phone.as_deref());
    let avatar = req
        .avatar
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    v.finish()?;

    match (email, password, first_name, last_name, role) {
        (Some(email), Some(password), Some(first_name), Some(last_name), Some(role)) => Ok(NewUser {
            email,
            password,
            first_name,
            last_name,
            role,
            phone,
            avatar,
        }),
        _ => Err(ApiError::Internal("user validation lost a field".into())),
    }
}

fn build_update<'a>(req: &UpdateUserRequest) -> Result<UpdateSet<'a>, ApiError> {
    let mut v = Validator::new();
    let mut set = UpdateSet::new("users");

    set.set_opt("first_name", v.not_blank("first_name", req.first_name.as_deref()));
    set.set_opt("last_name", v.not_blank("last_name", req.last_name.as_deref()));
    if let Some(role) = v.one_of::<Role>("role", req.role.as_deref()) {
        set.set("role", role.as_str());
    }
    match &req.phone {
        Some(Some(p)) => {
            set.set_opt("phone", v.phone("phone", Some(p.as_str())));
        }
        Some(None) => {
            set.set("phone", None::<String>);
        }
        None => {}
    }
    if let Some(avatar) = &req.avatar {
        set.set("avatar", avatar.clone());
    }
    set.set_opt("is_active", req.is_active);

    v.finish()?;
    if set.is_empty() {
        return Err(ApiError::no_fields_to_update());
    }
    Ok(set)
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, f: &UserFilter) -> Result<(), ApiError> {
    qb.push(" WHERE 1=1");
    if let Some(pattern) = like_pattern(f.search.as_deref()) {
        qb.push(" AND (CONCAT(first_name, ' ', last_name) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR email LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if f.role.as_deref().is_some_and(|r| !r.trim().is_empty()) {
        let mut v = Validator::new();
        let role = v.one_of::<Role>("role", f.role.as_deref());
        v.finish()?;
        if let Some(role) = role {
            qb.push(" AND role = ").push_bind(role.as_str());
        }
    }
    Ok(())
}

/* =========================
   Handlers
========================= */

pub async fn list_users(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<UserFilter>,
) -> Result<Json<Paged<UserRow>>, ApiError> {
    let window = page.window()?;

    let mut count = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM users");
    push_filters(&mut count, &filter)?;
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::<MySql>::new(format!("SELECT {USER_COLUMNS} FROM users"));
    push_filters(&mut qb, &filter)?;
    qb.push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let users: Vec<UserRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(Paged {
        data: users,
        pagination: window.with_total(total),
    }))
}

async fn fetch_user(state: &AppState, id: i64) -> Result<UserRow, ApiError> {
    sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("User"))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<UserRow>>, ApiError> {
    let user = fetch_user(&state, id).await?;
    Ok(Json(ApiOk { data: user }))
}

pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<ApiOk<UserRow>>), ApiError> {
    let new = validate_create(&req)?;

    let taken: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
        .bind(&new.email)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?;
    if taken.is_some() {
        return Err(ApiError::Conflict("USER_EXISTS", "User already exists".into()));
    }

    let pw_hash = hash_password(&new.password).map_err(ApiError::Internal)?;

    let res = sqlx::query(
        r#"
        INSERT INTO users (email, password, role, first_name, last_name, phone, avatar)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&new.email)
    .bind(&pw_hash)
    .bind(new.role.as_str())
    .bind(&new.first_name)
    .bind(&new.last_name)
    .bind(&new.phone)
    .bind(&new.avatar)
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(&state.db, "user", Some(id), "created", format!("User {} created", new.email)).await;

    let user = fetch_user(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: user })))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<ApiOk<UserRow>>, ApiError> {
    let set = build_update(&req)?;
    set.execute_by_id(id, &state.db).await.map_err(db_error)?;

    let user = fetch_user(&state, id).await?;
    activity::record(&state.db, "user", Some(id), "updated", format!("User {} updated", user.email)).await;
    Ok(Json(ApiOk { data: user }))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("User"));
    }

    activity::record(&state.db, "user", Some(id), "deleted", format!("User #{id} deleted")).await;
    Ok(Json(ok_deleted()))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let mut v = Validator::new();
    let new_password = v.min_len("new_password", req.new_password.as_deref(), MIN_PASSWORD_LEN);
    v.finish()?;
    let Some(new_password) = new_password else {
        return Err(ApiError::Internal("password validation lost a field".into()));
    };

    // Existence first: MySQL reports 0 affected rows when the hash is unchanged.
    fetch_user(&state, id).await?;

    let pw_hash = hash_password(&new_password).map_err(ApiError::Internal)?;
    sqlx::query("UPDATE users SET password = ? WHERE id = ?")
        .bind(&pw_hash)
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    activity::record(&state.db, "user", Some(id), "updated", format!("Password reset for user #{id}")).await;
    Ok(Json(ApiOk { data: OkData { ok: true } }))
}

pub async fn user_stats(State(state): State<AppState>) -> Result<Json<ApiOk<UserStats>>, ApiError> {
    let (total_users, active_users, new_this_month): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
          COUNT(*),
          CAST(COALESCE(SUM(is_active = TRUE), 0) AS SIGNED),
          CAST(COALESCE(SUM(created_at >= DATE_FORMAT(CURRENT_DATE(), '%Y-%m-01')), 0) AS SIGNED)
        FROM users
        "#,
    )
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    let role_distribution: Vec<CountBy> = sqlx::query_as(
        "SELECT role AS label, COUNT(*) AS count FROM users GROUP BY role ORDER BY count DESC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiOk {
        data: UserStats {
            total_users,
            active_users,
            new_this_month,
            role_distribution,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_req() -> CreateUserRequest {
        CreateUserRequest {
            email: Some(" Dr.Smith@Hospital.com ".into()),
            password: Some("secret123".into()),
            first_name: Some(" John ".into()),
            last_name: Some("Smith".into()),
            role: Some("doctor".into()),
            phone: Some("+1-555-0101".into()),
            avatar: None,
        }
    }

    #[test]
    fn create_normalizes_fields() {
        let new = validate_create(&create_req()).unwrap();
        assert_eq!(new.email, "dr.smith@hospital.com");
        assert_eq!(new.first_name, "John");
        assert_eq!(new.role, Role::Doctor);
    }

    #[test]
    fn create_reports_every_bad_field() {
        let req = CreateUserRequest {
            email: Some("nope".into()),
            password: Some("123".into()),
            first_name: None,
            last_name: Some("Smith".into()),
            role: Some("janitor".into()),
            phone: None,
            avatar: None,
        };
        let Err(ApiError::Validation(errors)) = validate_create(&req) else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["email", "password", "first_name", "role"]);
    }

    #[test]
    fn update_without_fields_is_rejected() {
        let err = build_update(&UpdateUserRequest::default()).err().unwrap();
        assert!(matches!(err, ApiError::BadRequest("NO_FIELDS", _)));
    }

    #[test]
    fn update_sets_only_supplied_columns() {
        let req: UpdateUserRequest =
            serde_json::from_str(r#"{"role":"nurse","phone":null,"is_active":false}"#).unwrap();
        let set = build_update(&req).unwrap();
        assert_eq!(set.sql(), "UPDATE users SET role = ?, phone = ?, is_active = ?");
    }

    #[test]
    fn role_filter_must_be_known() {
        let mut qb = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM users");
        let filter = UserFilter {
            search: None,
            role: Some("wizard".into()),
        };
        assert!(push_filters(&mut qb, &filter).is_err());
    }
}
