// src/routes/ai_routes.rs
//
// AI report generation and the assistant chat. Each report type gathers a small
// data set with SQL, renders it into a plain-text prompt and forwards it to the
// configured completion client. Generated reports are stored in `ai_reports`.

use std::fmt::Write as _;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json as SqlJson;

use crate::{
    activity,
    error::{db_error, ApiError},
    extract::Json,
    llm::CompletionRequest,
    models::{ApiOk, AppState, ReportType},
    routes::report_routes::{self, ReportRow},
    validation::{FieldError, Validator, Vocabulary},
};

const REPORT_SYSTEM_PROMPT: &str = "You are an expert healthcare analyst. Generate comprehensive, \
accurate, and professional medical reports based on the provided data. Use medical terminology \
appropriately and provide actionable insights.";
const REPORT_MAX_TOKENS: u32 = 2000;
const REPORT_TEMPERATURE: f32 = 0.3;

const CHAT_SYSTEM_PROMPT: &str = "You are an AI assistant for a healthcare management system. ";
const CHAT_INSTRUCTIONS: &str =
    "Provide helpful, accurate, and professional assistance with healthcare management tasks.";
const CHAT_MAX_TOKENS: u32 = 1000;
const CHAT_TEMPERATURE: f32 = 0.5;

const DEFAULT_CUSTOM_PROMPT: &str = "Generate a custom healthcare report.";

#[derive(Debug, Deserialize)]
pub struct GenerateReportRequest {
    pub report_type: Option<String>,
    pub title: Option<String>,
    pub parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: Option<String>,
    pub context: Option<ChatContext>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatContext {
    pub patient_id: Option<i64>,
    pub department_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub response: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/generate-report", post(generate_report))
        .route("/reports", get(report_routes::list_reports))
        .route("/reports/{id}", get(report_routes::get_report))
        .route("/chat", post(chat))
}

/* ============================================================
   Report data
   ============================================================ */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PatientBrief {
    pub patient_number: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub blood_type: Option<String>,
    pub allergies: Option<String>,
    pub medical_history: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct AppointmentBrief {
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub status: String,
    pub doctor_first_name: String,
    pub doctor_last_name: String,
}

#[derive(Debug, sqlx::FromRow)]
pub struct RecordBrief {
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub diagnosis: Option<String>,
    pub treatment: Option<String>,
}

#[derive(Debug)]
pub struct PatientSummaryData {
    pub patient: PatientBrief,
    pub appointments: Vec<AppointmentBrief>,
    pub records: Vec<RecordBrief>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DepartmentBrief {
    pub name: String,
    pub description: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug)]
pub struct DepartmentAnalyticsData {
    pub department: DepartmentBrief,
    pub doctor_count: i64,
    pub total_appointments: i64,
    pub completed: i64,
    pub cancelled: i64,
}

#[derive(Debug, Default)]
pub struct FinancialData {
    pub invoice_count: i64,
    pub invoiced_cents: i64,
    pub paid_cents: i64,
    pub outstanding_cents: i64,
    pub overdue_count: i64,
    pub claim_count: i64,
    pub claimed_cents: i64,
    pub approved_claim_cents: i64,
    pub rejected_claim_count: i64,
}

#[derive(Debug, Default)]
pub struct OperationalData {
    pub total_patients: i64,
    pub total_doctors: i64,
    pub total_appointments: i64,
    pub total_departments: i64,
    pub occupied_rooms: i64,
    pub total_rooms: i64,
    pub available_ambulances: i64,
    pub open_emergency_calls: i64,
}

fn param_id(params: &Value, key: &str) -> Option<i64> {
    params.get(key).and_then(Value::as_i64)
}

async fn patient_summary_data(state: &AppState, params: &Value) -> Result<PatientSummaryData, ApiError> {
    let Some(patient_id) = param_id(params, "patient_id") else {
        return Err(ApiError::Validation(vec![FieldError::new(
            "parameters.patient_id",
            "is required",
        )]));
    };

    let patient = fetch_patient_brief(state, patient_id)
        .await?
        .ok_or_else(|| ApiError::BadRequest("INVALID_REFERENCE", "Patient not found".into()))?;

    let appointments: Vec<AppointmentBrief> = sqlx::query_as(
        r#"
        SELECT a.appointment_date, a.appointment_time, a.status,
               u.first_name AS doctor_first_name, u.last_name AS doctor_last_name
        FROM appointments a
        JOIN doctors doc ON a.doctor_id = doc.id
        JOIN users u ON doc.user_id = u.id
        WHERE a.patient_id = ?
        ORDER BY a.appointment_date DESC
        "#,
    )
    .bind(patient_id)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    let records: Vec<RecordBrief> = sqlx::query_as(
        r#"
        SELECT created_at, diagnosis, treatment
        FROM medical_records
        WHERE patient_id = ?
        ORDER BY created_at DESC
        "#,
    )
    .bind(patient_id)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    Ok(PatientSummaryData {
        patient,
        appointments,
        records,
    })
}

async fn department_analytics_data(
    state: &AppState,
    params: &Value,
) -> Result<DepartmentAnalyticsData, ApiError> {
    let Some(department_id) = param_id(params, "department_id") else {
        return Err(ApiError::Validation(vec![FieldError::new(
            "parameters.department_id",
            "is required",
        )]));
    };

    let department = fetch_department_brief(state, department_id)
        .await?
        .ok_or_else(|| ApiError::BadRequest("INVALID_REFERENCE", "Department not found".into()))?;

    let doctor_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM doctors WHERE department_id = ?")
        .bind(department_id)
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let (total_appointments, completed, cancelled): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
          COUNT(*),
          CAST(COALESCE(SUM(status = 'completed'), 0) AS SIGNED),
          CAST(COALESCE(SUM(status = 'cancelled'), 0) AS SIGNED)
        FROM appointments
        WHERE department_id = ?
        "#,
    )
    .bind(department_id)
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    Ok(DepartmentAnalyticsData {
        department,
        doctor_count,
        total_appointments,
        completed,
        cancelled,
    })
}

async fn financial_data(state: &AppState) -> Result<FinancialData, ApiError> {
    let (invoice_count, invoiced_cents, paid_cents, outstanding_cents, overdue_count): (
        i64,
        i64,
        i64,
        i64,
        i64,
    ) = sqlx::query_as(
        r#"
        SELECT
          COUNT(*),
          CAST(COALESCE(SUM(amount_cents), 0) AS SIGNED),
          CAST(COALESCE(SUM(CASE WHEN status = 'paid' THEN amount_cents END), 0) AS SIGNED),
          CAST(COALESCE(SUM(CASE WHEN status IN ('pending', 'overdue') THEN amount_cents END), 0) AS SIGNED),
          CAST(COALESCE(SUM(status = 'overdue'), 0) AS SIGNED)
        FROM invoices
        "#,
    )
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    let (claim_count, claimed_cents, approved_claim_cents, rejected_claim_count): (i64, i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT
              COUNT(*),
              CAST(COALESCE(SUM(amount_cents), 0) AS SIGNED),
              CAST(COALESCE(SUM(CASE WHEN status IN ('approved', 'paid') THEN amount_cents END), 0) AS SIGNED),
              CAST(COALESCE(SUM(status = 'rejected'), 0) AS SIGNED)
            FROM insurance_claims
            "#,
        )
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    Ok(FinancialData {
        invoice_count,
        invoiced_cents,
        paid_cents,
        outstanding_cents,
        overdue_count,
        claim_count,
        claimed_cents,
        approved_claim_cents,
        rejected_claim_count,
    })
}

async fn operational_data(state: &AppState) -> Result<OperationalData, ApiError> {
    let row: (i64, i64, i64, i64, i64, i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
          (SELECT COUNT(*) FROM patients),
          (SELECT COUNT(*) FROM doctors),
          (SELECT COUNT(*) FROM appointments),
          (SELECT COUNT(*) FROM departments WHERE is_active = TRUE),
          (SELECT COUNT(*) FROM rooms WHERE status = 'occupied'),
          (SELECT COUNT(*) FROM rooms),
          (SELECT COUNT(*) FROM ambulances WHERE status = 'available'),
          (SELECT COUNT(*) FROM emergency_calls WHERE status IN ('pending', 'dispatched', 'en_route'))
        "#,
    )
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    Ok(OperationalData {
        total_patients: row.0,
        total_doctors: row.1,
        total_appointments: row.2,
        total_departments: row.3,
        occupied_rooms: row.4,
        total_rooms: row.5,
        available_ambulances: row.6,
        open_emergency_calls: row.7,
    })
}

async fn fetch_patient_brief(state: &AppState, id: i64) -> Result<Option<PatientBrief>, ApiError> {
    sqlx::query_as(
        r#"
        SELECT patient_number, first_name, last_name, date_of_birth, gender, blood_type,
               allergies, medical_history
        FROM patients
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)
}

async fn fetch_department_brief(state: &AppState, id: i64) -> Result<Option<DepartmentBrief>, ApiError> {
    sqlx::query_as("SELECT name, description, location FROM departments WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)
}

/* ============================================================
   Prompts
   ============================================================ */

fn or_na<T: std::fmt::Display>(v: &Option<T>) -> String {
    match v {
        Some(x) => x.to_string(),
        None => "N/A".to_string(),
    }
}

fn money(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}${}.{:02}", abs / 100, abs % 100)
}

pub fn patient_summary_prompt(data: &PatientSummaryData) -> String {
    let p = &data.patient;
    let mut out = String::new();
    let _ = writeln!(out, "Generate a comprehensive patient summary report based on the following data:");
    let _ = writeln!(out);
    let _ = writeln!(out, "Patient Information:");
    let _ = writeln!(out, "- Name: {} {}", p.first_name, p.last_name);
    let _ = writeln!(out, "- Patient ID: {}", p.patient_number);
    let _ = writeln!(out, "- Date of Birth: {}", or_na(&p.date_of_birth));
    let _ = writeln!(out, "- Gender: {}", or_na(&p.gender));
    let _ = writeln!(out, "- Blood Type: {}", or_na(&p.blood_type));
    let _ = writeln!(out, "- Medical History: {}", or_na(&p.medical_history));
    let _ = writeln!(out, "- Allergies: {}", or_na(&p.allergies));
    let _ = writeln!(out);
    let _ = writeln!(out, "Appointments ({} total):", data.appointments.len());
    for a in &data.appointments {
        let _ = writeln!(
            out,
            "- {} {} with Dr. {} {} ({})",
            a.appointment_date,
            a.appointment_time.format("%H:%M"),
            a.doctor_first_name,
            a.doctor_last_name,
            a.status
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Medical Records ({} total):", data.records.len());
    for r in &data.records {
        let _ = writeln!(
            out,
            "- {}: {} - Treatment: {}",
            r.created_at.format("%Y-%m-%d"),
            or_na(&r.diagnosis),
            or_na(&r.treatment)
        );
    }
    let _ = writeln!(out);
    out.push_str(
        "Please provide:\n\
         1. Patient overview and current health status\n\
         2. Recent medical activity summary\n\
         3. Key health trends and patterns\n\
         4. Recommendations for future care\n\
         5. Risk factors and alerts",
    );
    out
}

pub fn department_analytics_prompt(data: &DepartmentAnalyticsData) -> String {
    let d = &data.department;
    format!(
        "Generate a department analytics report based on the following data:\n\n\
         Department: {}\n\
         Description: {}\n\
         Location: {}\n\
         Staff: {} doctors\n\
         Appointments: {} total, {} completed, {} cancelled\n\n\
         Please provide:\n\
         1. Department performance overview\n\
         2. Staff utilization analysis\n\
         3. Appointment efficiency metrics\n\
         4. Areas for improvement\n\
         5. Recommendations for optimization",
        d.name,
        or_na(&d.description),
        or_na(&d.location),
        data.doctor_count,
        data.total_appointments,
        data.completed,
        data.cancelled,
    )
}

pub fn financial_prompt(data: &FinancialData) -> String {
    format!(
        "Generate a financial report for the healthcare facility based on the following data:\n\n\
         Invoices: {} issued, {} billed, {} collected, {} outstanding, {} overdue\n\
         Insurance claims: {} filed, {} claimed, {} approved, {} rejected\n\n\
         Please provide:\n\
         1. Revenue analysis\n\
         2. Collections and receivables overview\n\
         3. Insurance claim performance\n\
         4. Financial risks\n\
         5. Financial recommendations",
        data.invoice_count,
        money(data.invoiced_cents),
        money(data.paid_cents),
        money(data.outstanding_cents),
        data.overdue_count,
        data.claim_count,
        money(data.claimed_cents),
        money(data.approved_claim_cents),
        data.rejected_claim_count,
    )
}

pub fn operational_prompt(data: &OperationalData) -> String {
    format!(
        "Generate an operational report based on the following metrics:\n\n\
         Total Patients: {}\n\
         Total Doctors: {}\n\
         Total Appointments: {}\n\
         Total Departments: {}\n\
         Room Occupancy: {} of {} rooms occupied\n\
         Available Ambulances: {}\n\
         Open Emergency Calls: {}\n\n\
         Please provide:\n\
         1. Overall operational overview\n\
         2. Key performance indicators\n\
         3. Resource utilization analysis\n\
         4. Operational efficiency metrics\n\
         5. Strategic recommendations",
        data.total_patients,
        data.total_doctors,
        data.total_appointments,
        data.total_departments,
        data.occupied_rooms,
        data.total_rooms,
        data.available_ambulances,
        data.open_emergency_calls,
    )
}

pub fn custom_prompt(params: &Value) -> String {
    params
        .get("custom_prompt")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_CUSTOM_PROMPT)
        .to_string()
}

pub fn chat_system_prompt(patient: Option<&PatientBrief>, department: Option<&DepartmentBrief>) -> String {
    let mut system = CHAT_SYSTEM_PROMPT.to_string();
    if let Some(p) = patient {
        let json = serde_json::to_string(p).unwrap_or_default();
        let _ = write!(system, "Patient context: {json} ");
    }
    if let Some(d) = department {
        let json = serde_json::to_string(d).unwrap_or_default();
        let _ = write!(system, "Department context: {json} ");
    }
    system.push_str(CHAT_INSTRUCTIONS);
    system
}

/* ============================================================
   Handlers
   ============================================================ */

fn validate_generate(req: &GenerateReportRequest) -> Result<(ReportType, String, Value), ApiError> {
    let mut v = Validator::new();
    let report_type = match req.report_type.as_deref() {
        Some(t) => v.one_of::<ReportType>("report_type", Some(t)),
        None => {
            v.push("report_type", "is required");
            None
        }
    };
    let title = v.required("title", req.title.as_deref());
    let parameters = req.parameters.clone().unwrap_or_else(|| Value::Object(Default::default()));
    if !parameters.is_object() {
        v.push("parameters", "must be an object");
    }
    v.finish()?;

    match (report_type, title) {
        (Some(t), Some(title)) => Ok((t, title, parameters)),
        _ => Err(ApiError::Internal("report request passed validation without its fields".into())),
    }
}

pub async fn generate_report(
    State(state): State<AppState>,
    Json(req): Json<GenerateReportRequest>,
) -> Result<(StatusCode, Json<ApiOk<ReportRow>>), ApiError> {
    let (report_type, title, parameters) = validate_generate(&req)?;

    let prompt = match report_type {
        ReportType::PatientSummary => patient_summary_prompt(&patient_summary_data(&state, &parameters).await?),
        ReportType::DepartmentAnalytics => {
            department_analytics_prompt(&department_analytics_data(&state, &parameters).await?)
        }
        ReportType::FinancialReport => financial_prompt(&financial_data(&state).await?),
        ReportType::OperationalReport => operational_prompt(&operational_data(&state).await?),
        ReportType::Custom => custom_prompt(&parameters),
    };

    tracing::info!(report_type = report_type.as_str(), prompt_len = prompt.len(), "generating AI report");

    let content = state
        .llm
        .complete(CompletionRequest {
            system: REPORT_SYSTEM_PROMPT.to_string(),
            user: prompt,
            max_tokens: REPORT_MAX_TOKENS,
            temperature: REPORT_TEMPERATURE,
        })
        .await?;

    let res = sqlx::query(
        "INSERT INTO ai_reports (report_type, title, content, parameters) VALUES (?, ?, ?, ?)",
    )
    .bind(report_type.as_str())
    .bind(&title)
    .bind(&content)
    .bind(SqlJson(parameters))
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    let id = res.last_insert_id() as i64;
    activity::record(&state.db, "ai_report", Some(id), "created", format!("AI report \"{title}\" generated")).await;

    let report = report_routes::fetch_report(&state, id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: report })))
}

pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ApiOk<ChatReply>>, ApiError> {
    let mut v = Validator::new();
    let message = v.required("message", req.message.as_deref());
    v.finish()?;
    let message = message.unwrap_or_default();

    let context = req.context.unwrap_or_default();
    let patient = match context.patient_id {
        Some(id) => fetch_patient_brief(&state, id).await?,
        None => None,
    };
    let department = match context.department_id {
        Some(id) => fetch_department_brief(&state, id).await?,
        None => None,
    };

    let response = state
        .llm
        .complete(CompletionRequest {
            system: chat_system_prompt(patient.as_ref(), department.as_ref()),
            user: message,
            max_tokens: CHAT_MAX_TOKENS,
            temperature: CHAT_TEMPERATURE,
        })
        .await?;

    Ok(Json(ApiOk {
        data: ChatReply { response },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patient() -> PatientBrief {
        PatientBrief {
            patient_number: "PAT1700000000000042".into(),
            first_name: "Alice".into(),
            last_name: "Johnson".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1985, 3, 15),
            gender: Some("female".into()),
            blood_type: Some("A+".into()),
            allergies: None,
            medical_history: Some("Hypertension".into()),
        }
    }

    #[test]
    fn patient_prompt_lists_history() {
        let data = PatientSummaryData {
            patient: patient(),
            appointments: vec![AppointmentBrief {
                appointment_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                appointment_time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
                status: "completed".into(),
                doctor_first_name: "John".into(),
                doctor_last_name: "Smith".into(),
            }],
            records: vec![],
        };
        let prompt = patient_summary_prompt(&data);
        assert!(prompt.contains("- Name: Alice Johnson"));
        assert!(prompt.contains("- Allergies: N/A"));
        assert!(prompt.contains("Appointments (1 total):"));
        assert!(prompt.contains("- 2024-03-01 09:30 with Dr. John Smith (completed)"));
        assert!(prompt.contains("Medical Records (0 total):"));
        assert!(prompt.ends_with("5. Risk factors and alerts"));
    }

    #[test]
    fn financial_prompt_formats_money() {
        let prompt = financial_prompt(&FinancialData {
            invoice_count: 3,
            invoiced_cents: 123_456,
            paid_cents: 100_000,
            outstanding_cents: 23_456,
            ..Default::default()
        });
        assert!(prompt.contains("3 issued, $1234.56 billed, $1000.00 collected, $234.56 outstanding"));
    }

    #[test]
    fn money_handles_sign_and_padding() {
        assert_eq!(money(5), "$0.05");
        assert_eq!(money(-1050), "-$10.50");
    }

    #[test]
    fn custom_prompt_falls_back() {
        assert_eq!(custom_prompt(&json!({})), DEFAULT_CUSTOM_PROMPT);
        assert_eq!(custom_prompt(&json!({"custom_prompt": "  "})), DEFAULT_CUSTOM_PROMPT);
        assert_eq!(
            custom_prompt(&json!({"custom_prompt": "Summarize bed usage"})),
            "Summarize bed usage"
        );
    }

    #[test]
    fn chat_prompt_embeds_context() {
        let system = chat_system_prompt(Some(&patient()), None);
        assert!(system.starts_with(CHAT_SYSTEM_PROMPT));
        assert!(system.contains("Patient context: {"));
        assert!(system.contains("\"patient_number\":\"PAT1700000000000042\""));
        assert!(system.ends_with(CHAT_INSTRUCTIONS));
        assert!(!system.contains("Department context"));
    }

    #[test]
    fn generate_request_is_validated() {
        let req = GenerateReportRequest {
            report_type: Some("weather".into()),
            title: Some(" ".into()),
            parameters: Some(json!([1, 2])),
        };
        let Err(ApiError::Validation(errors)) = validate_generate(&req) else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["report_type", "title", "parameters"]);
    }

    #[test]
    fn parameters_default_to_empty_object() {
        let req = GenerateReportRequest {
            report_type: Some("custom".into()),
            title: Some("Monthly".into()),
            parameters: None,
        };
        let (t, title, params) = validate_generate(&req).unwrap();
        assert_eq!(t, ReportType::Custom);
        assert_eq!(title, "Monthly");
        assert_eq!(params, json!({}));
    }
}
