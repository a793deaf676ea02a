// src/routes/meta_routes.rs
//
// Service metadata: liveness, the endpoint catalogue and the JSON 404 fallback.

use axum::{
    http::{Method, StatusCode, Uri},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{error::ErrorObject, models::AppState};

const SERVICE_TITLE: &str = "Healthcare CRM API";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// `(group, [(method and path, summary)])`, rendered by `GET /api/docs`.
const ENDPOINTS: &[(&str, &[(&str, &str)])] = &[
    (
        "users",
        &[
            ("GET /api/users", "List users"),
            ("GET /api/users/:id", "Get user by ID"),
            ("POST /api/users", "Create new user"),
            ("PUT /api/users/:id", "Update user"),
            ("DELETE /api/users/:id", "Delete user"),
            ("PUT /api/users/:id/reset-password", "Reset user password"),
            ("GET /api/users/stats/overview", "User statistics"),
        ],
    ),
    (
        "patients",
        &[
            ("GET /api/patients", "List patients"),
            ("GET /api/patients/:id", "Get patient with appointments and records"),
            ("POST /api/patients", "Register patient"),
            ("PUT /api/patients/:id", "Update patient"),
            ("DELETE /api/patients/:id", "Delete patient"),
            ("GET /api/patients/stats/overview", "Patient statistics"),
        ],
    ),
    (
        "doctors",
        &[
            ("GET /api/doctors", "List doctors"),
            ("GET /api/doctors/:id", "Get doctor with upcoming appointments"),
            ("POST /api/doctors", "Create doctor profile"),
            ("PUT /api/doctors/:id", "Update doctor profile"),
            ("GET /api/doctors/stats/overview", "Doctor statistics"),
        ],
    ),
    (
        "appointments",
        &[
            ("GET /api/appointments", "List appointments"),
            ("GET /api/appointments/:id", "Get appointment by ID"),
            ("POST /api/appointments", "Book appointment"),
            ("PUT /api/appointments/:id", "Update appointment"),
            ("DELETE /api/appointments/:id", "Delete appointment"),
            ("GET /api/appointments/stats/overview", "Appointment statistics"),
        ],
    ),
    (
        "departments",
        &[
            ("GET /api/departments", "List active departments"),
            ("GET /api/departments/:id", "Get department with doctors and statistics"),
            ("POST /api/departments", "Create department"),
            ("PUT /api/departments/:id", "Update department"),
            ("DELETE /api/departments/:id", "Deactivate department"),
        ],
    ),
    (
        "specializations",
        &[
            ("GET /api/specializations", "List specializations with doctor counts"),
            ("GET /api/specializations/:id", "Get specialization"),
            ("POST /api/specializations", "Add specialization"),
            ("PUT /api/specializations/:id", "Update specialization"),
            ("DELETE /api/specializations/:id", "Remove unused specialization"),
        ],
    ),
    (
        "records",
        &[
            ("GET /api/records", "List medical records"),
            ("GET /api/records/:id", "Get medical record"),
            ("POST /api/records", "Add medical record"),
            ("PUT /api/records/:id", "Update medical record"),
            ("DELETE /api/records/:id", "Delete medical record"),
        ],
    ),
    (
        "reports",
        &[
            ("GET /api/reports", "List stored AI reports"),
            ("GET /api/reports/:id", "Get stored AI report"),
            ("DELETE /api/reports/:id", "Delete stored AI report"),
        ],
    ),
    (
        "ai",
        &[
            ("POST /api/ai/generate-report", "Generate AI report"),
            ("GET /api/ai/reports", "List AI reports"),
            ("GET /api/ai/reports/:id", "Get AI report"),
            ("POST /api/ai/chat", "Chat with the AI assistant"),
        ],
    ),
    (
        "medicines",
        &[
            ("GET /api/medicines", "List medicines"),
            ("GET /api/medicines/:id", "Get medicine"),
            ("POST /api/medicines", "Add medicine"),
            ("PUT /api/medicines/:id", "Update medicine"),
            ("PATCH /api/medicines/:id/stock", "Adjust stock level"),
            ("DELETE /api/medicines/:id", "Delete medicine"),
        ],
    ),
    (
        "inventory_alerts",
        &[
            ("GET /api/inventory-alerts", "List stock alerts"),
            ("GET /api/inventory-alerts/:id", "Get stock alert"),
            ("POST /api/inventory-alerts", "Raise stock alert"),
            ("POST /api/inventory-alerts/scan", "Raise alerts for low-stock medicines"),
            ("PUT /api/inventory-alerts/:id", "Update or resolve stock alert"),
            ("DELETE /api/inventory-alerts/:id", "Delete stock alert"),
        ],
    ),
    (
        "suppliers",
        &[
            ("GET /api/suppliers", "List suppliers"),
            ("GET /api/suppliers/:id", "Get supplier"),
            ("POST /api/suppliers", "Add supplier"),
            ("PUT /api/suppliers/:id", "Update supplier"),
            ("DELETE /api/suppliers/:id", "Remove supplier"),
        ],
    ),
    (
        "prescriptions",
        &[
            ("GET /api/prescriptions", "List prescriptions"),
            ("GET /api/prescriptions/:id", "Get prescription"),
            ("POST /api/prescriptions", "Issue prescription"),
            ("PUT /api/prescriptions/:id", "Update prescription"),
            ("DELETE /api/prescriptions/:id", "Delete prescription"),
        ],
    ),
    (
        "prescription_templates",
        &[
            ("GET /api/prescription-templates", "List prescription templates"),
            ("GET /api/prescription-templates/:id", "Get prescription template"),
            ("POST /api/prescription-templates", "Create prescription template"),
            ("PUT /api/prescription-templates/:id", "Update prescription template"),
            ("POST /api/prescription-templates/:id/use", "Record template use"),
            ("DELETE /api/prescription-templates/:id", "Delete prescription template"),
        ],
    ),
    (
        "invoices",
        &[
            ("GET /api/invoices", "List invoices"),
            ("GET /api/invoices/:id", "Get invoice"),
            ("POST /api/invoices", "Create invoice"),
            ("PUT /api/invoices/:id", "Update invoice"),
            ("DELETE /api/invoices/:id", "Delete invoice"),
            ("GET /api/invoices/stats/overview", "Billing statistics"),
        ],
    ),
    (
        "insurance_claims",
        &[
            ("GET /api/insurance-claims", "List insurance claims"),
            ("GET /api/insurance-claims/:id", "Get insurance claim"),
            ("POST /api/insurance-claims", "File insurance claim"),
            ("PUT /api/insurance-claims/:id", "Update insurance claim"),
            ("DELETE /api/insurance-claims/:id", "Delete insurance claim"),
        ],
    ),
    (
        "ambulances",
        &[
            ("GET /api/ambulances", "List ambulances"),
            ("GET /api/ambulances/:id", "Get ambulance"),
            ("POST /api/ambulances", "Add ambulance"),
            ("PUT /api/ambulances/:id", "Update ambulance"),
            ("PATCH /api/ambulances/:id/status", "Set ambulance status"),
            ("DELETE /api/ambulances/:id", "Remove ambulance"),
        ],
    ),
    (
        "emergency_calls",
        &[
            ("GET /api/emergency-calls", "List emergency calls"),
            ("GET /api/emergency-calls/:id", "Get emergency call"),
            ("POST /api/emergency-calls", "Log emergency call"),
            ("PUT /api/emergency-calls/:id", "Update emergency call"),
            ("PATCH /api/emergency-calls/:id/status", "Set call status"),
            ("POST /api/emergency-calls/:id/dispatch", "Dispatch ambulance"),
            ("DELETE /api/emergency-calls/:id", "Delete emergency call"),
        ],
    ),
    (
        "staff",
        &[
            ("GET /api/staff", "List staff"),
            ("GET /api/staff/:id", "Get staff member"),
            ("POST /api/staff", "Add staff member"),
            ("PUT /api/staff/:id", "Update staff member"),
            ("DELETE /api/staff/:id", "Remove staff member"),
        ],
    ),
    (
        "attendance",
        &[
            ("GET /api/attendance", "List attendance records"),
            ("GET /api/attendance/summary", "Head count per status for a day"),
            ("GET /api/attendance/:id", "Get attendance record"),
            ("POST /api/attendance", "Record attendance"),
            ("PUT /api/attendance/:id", "Update attendance"),
            ("DELETE /api/attendance/:id", "Delete attendance record"),
        ],
    ),
    (
        "rooms",
        &[
            ("GET /api/rooms", "List rooms"),
            ("GET /api/rooms/:id", "Get room"),
            ("POST /api/rooms", "Add room"),
            ("PUT /api/rooms/:id", "Update room"),
            ("DELETE /api/rooms/:id", "Remove room"),
            ("GET /api/rooms/by-department/:department", "Department occupancy"),
        ],
    ),
    (
        "room_allotments",
        &[
            ("GET /api/room-allotments", "List room allotments"),
            ("GET /api/room-allotments/:id", "Get room allotment"),
            ("POST /api/room-allotments", "Allot room"),
            ("PUT /api/room-allotments/:id", "Update or discharge allotment"),
            ("DELETE /api/room-allotments/:id", "Remove allotment"),
        ],
    ),
    (
        "blood_bank",
        &[
            ("GET /api/blood-bank/stock", "Available units per blood type"),
            ("GET /api/blood-bank/units", "List blood units"),
            ("POST /api/blood-bank/units", "Register blood unit"),
            ("GET /api/blood-bank/units/:id", "Get blood unit"),
            ("PUT /api/blood-bank/units/:id", "Update blood unit"),
            ("DELETE /api/blood-bank/units/:id", "Remove blood unit"),
            ("GET /api/blood-bank/donors", "List donors"),
            ("POST /api/blood-bank/donors", "Register donor"),
            ("GET /api/blood-bank/donors/:id", "Get donor"),
            ("PUT /api/blood-bank/donors/:id", "Update donor"),
            ("DELETE /api/blood-bank/donors/:id", "Remove donor"),
            ("GET /api/blood-bank/issues", "List blood issues"),
            ("POST /api/blood-bank/issues", "Request blood issue"),
            ("GET /api/blood-bank/issues/:id", "Get blood issue"),
            ("PUT /api/blood-bank/issues/:id", "Update blood issue"),
        ],
    ),
    (
        "reviews",
        &[
            ("GET /api/reviews", "List reviews"),
            ("GET /api/reviews/:id", "Get review"),
            ("POST /api/reviews", "Post review"),
            ("PUT /api/reviews/:id", "Update or hide review"),
            ("DELETE /api/reviews/:id", "Delete review"),
        ],
    ),
    (
        "feedback",
        &[
            ("GET /api/feedback", "List feedback"),
            ("GET /api/feedback/:id", "Get feedback"),
            ("POST /api/feedback", "Submit feedback"),
            ("PUT /api/feedback/:id", "Update feedback status"),
            ("DELETE /api/feedback/:id", "Delete feedback"),
        ],
    ),
    (
        "dashboard",
        &[
            ("GET /api/dashboard/stats", "Headline counts and paid revenue"),
            ("GET /api/dashboard/recent-appointments", "Latest booked appointments"),
            ("GET /api/dashboard/revenue-chart", "Invoiced amount per month"),
            ("GET /api/dashboard/patient-growth", "Registered patients per month"),
        ],
    ),
    (
        "activity_logs",
        &[("GET /api/activity-logs", "Recent activity")],
    ),
];

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct Docs {
    pub title: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub endpoints: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct RouteNotFound {
    pub error: ErrorObject,
    pub path: String,
    pub method: String,
    pub available_routes: &'static str,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/docs", get(docs))
}

pub async fn health() -> Json<Health> {
    Json(Health {
        status: "OK",
        timestamp: Utc::now(),
        version: SERVICE_VERSION,
        message: format!("{SERVICE_TITLE} is running"),
    })
}

fn endpoint_catalogue() -> Map<String, Value> {
    ENDPOINTS
        .iter()
        .map(|(group, routes)| {
            let entries: Map<String, Value> = routes
                .iter()
                .map(|(route, summary)| (route.to_string(), Value::from(*summary)))
                .collect();
            (group.to_string(), Value::Object(entries))
        })
        .collect()
}

pub async fn docs() -> Json<Docs> {
    Json(Docs {
        title: SERVICE_TITLE,
        version: SERVICE_VERSION,
        description: "Hospital and clinic management API",
        endpoints: endpoint_catalogue(),
    })
}

pub async fn not_found(method: Method, uri: Uri) -> impl IntoResponse {
    tracing::debug!(%method, path = %uri.path(), "no route");
    (
        StatusCode::NOT_FOUND,
        Json(RouteNotFound {
            error: ErrorObject {
                code: "NOT_FOUND".to_string(),
                message: "Route not found".to_string(),
                details: None,
            },
            path: uri.path().to_string(),
            method: method.to_string(),
            available_routes: "/api/docs",
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_has_every_group() {
        let catalogue = endpoint_catalogue();
        assert_eq!(catalogue.len(), ENDPOINTS.len());
        assert!(catalogue["ai"]
            .as_object()
            .is_some_and(|routes| routes.contains_key("POST /api/ai/generate-report")));
        assert!(catalogue["dashboard"]
            .as_object()
            .is_some_and(|routes| routes.contains_key("GET /api/dashboard/stats")));
    }

    #[test]
    fn catalogue_routes_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for (_, routes) in ENDPOINTS {
            for (route, _) in *routes {
                assert!(seen.insert(*route), "duplicate catalogue entry {route}");
            }
        }
    }
}
