use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::llm::CompletionClient;
use crate::validation::Vocabulary;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::MySqlPool,
    pub llm: Arc<dyn CompletionClient>,
}

/* -------------------------
   Response envelopes
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct Paged<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

pub fn ok_deleted() -> ApiOk<OkData> {
    ApiOk {
        data: OkData { ok: true },
    }
}

/// `COUNT(*)` by a grouping key, as returned by the stats endpoints.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CountBy {
    pub label: Option<String>,
    pub count: i64,
}

/* -------------------------
   Pagination
--------------------------*/

pub const DEFAULT_PAGE_LIMIT: i64 = 10;
pub const MAX_PAGE_LIMIT: i64 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub pages: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: i64,
    pub limit: i64,
}

impl PageWindow {
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }

    pub fn with_total(&self, total: i64) -> Pagination {
        let pages = if total == 0 { 0 } else { (total + self.limit - 1) / self.limit };
        Pagination {
            page: self.page,
            limit: self.limit,
            total,
            pages,
        }
    }
}

impl PageQuery {
    pub fn window(&self) -> Result<PageWindow, ApiError> {
        let mut v = crate::validation::Validator::new();
        let page = v.min("page", self.page, 1).unwrap_or(1);
        let limit = v
            .range("limit", self.limit, 1, MAX_PAGE_LIMIT)
            .unwrap_or(DEFAULT_PAGE_LIMIT);
        v.finish()?;
        Ok(PageWindow { page, limit })
    }
}

/// Distinguishes a missing field (`None`) from an explicit `null` (`Some(None)`)
/// in PATCH/PUT bodies. Use with `#[serde(default, deserialize_with = ...)]`.
pub fn deserialize_double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    let inner = Option::<T>::deserialize(deserializer)?;
    Ok(Some(inner))
}

/// `"%term%"` for a LIKE search, or `None` when the term is blank.
pub fn like_pattern(term: Option<&str>) -> Option<String> {
    term.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{s}%"))
}

/// Human-facing reference number such as `PAT1700000000000042`:
/// prefix, epoch millis, three random digits.
pub fn generate_reference(prefix: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1000);
    format!("{prefix}{}{suffix:03}", Utc::now().timestamp_millis())
}

/* -------------------------
   Closed vocabularies
--------------------------*/

/// Reads a vocabulary value back out of a status column.
pub fn stored<T: Vocabulary>(column: &str, value: &str) -> Result<T, ApiError> {
    T::parse(value).ok_or_else(|| ApiError::Internal(format!("unexpected {column} value {value:?}")))
}

macro_rules! vocabulary {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl Vocabulary for $name {
            const ALL: &'static [Self] = &[$($name::$variant),+];

            fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }
    };
}

vocabulary!(Role {
    Admin => "admin",
    Doctor => "doctor",
    Nurse => "nurse",
    Receptionist => "receptionist",
});

vocabulary!(Gender {
    Male => "male",
    Female => "female",
    Other => "other",
});

vocabulary!(AppointmentStatus {
    Scheduled => "scheduled",
    Confirmed => "confirmed",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
    NoShow => "no_show",
});

impl AppointmentStatus {
    /// Statuses that hold a doctor's time slot.
    pub fn blocks_schedule(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }
}

vocabulary!(AppointmentType {
    Consultation => "consultation",
    FollowUp => "follow_up",
    Emergency => "emergency",
    Surgery => "surgery",
});

vocabulary!(ReportType {
    PatientSummary => "patient_summary",
    DepartmentAnalytics => "department_analytics",
    FinancialReport => "financial_report",
    OperationalReport => "operational_report",
    Custom => "custom",
});

vocabulary!(PrescriptionStatus {
    Active => "active",
    Completed => "completed",
    Cancelled => "cancelled",
});

vocabulary!(MedicineStatus {
    Active => "active",
    Discontinued => "discontinued",
});

vocabulary!(InvoiceStatus {
    Pending => "pending",
    Paid => "paid",
    Overdue => "overdue",
    Cancelled => "cancelled",
});

vocabulary!(ClaimStatus {
    Pending => "pending",
    Submitted => "submitted",
    Approved => "approved",
    Rejected => "rejected",
    Paid => "paid",
});

vocabulary!(AmbulanceStatus {
    Available => "available",
    OnDuty => "on_duty",
    Maintenance => "maintenance",
    OutOfService => "out_of_service",
});

vocabulary!(CallPriority {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

vocabulary!(CallStatus {
    Pending => "pending",
    Dispatched => "dispatched",
    EnRoute => "en_route",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl CallStatus {
    /// A call in one of these statuses no longer holds its ambulance.
    pub fn releases_ambulance(&self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Cancelled)
    }
}

vocabulary!(StaffStatus {
    Active => "active",
    OnLeave => "on_leave",
    Inactive => "inactive",
});

vocabulary!(RoomStatus {
    Available => "available",
    Occupied => "occupied",
    Maintenance => "maintenance",
    Reserved => "reserved",
});

vocabulary!(AllotmentStatus {
    Occupied => "occupied",
    Discharged => "discharged",
    Transferred => "transferred",
});

impl AllotmentStatus {
    pub fn holds_room(&self) -> bool {
        matches!(self, AllotmentStatus::Occupied)
    }
}

vocabulary!(BloodType {
    APos => "A+",
    ANeg => "A-",
    BPos => "B+",
    BNeg => "B-",
    AbPos => "AB+",
    AbNeg => "AB-",
    OPos => "O+",
    ONeg => "O-",
});

vocabulary!(BloodUnitStatus {
    Available => "available",
    Reserved => "reserved",
    Issued => "issued",
    Expired => "expired",
    Discarded => "discarded",
});

vocabulary!(BloodIssueStatus {
    Pending => "pending",
    Approved => "approved",
    Issued => "issued",
    Rejected => "rejected",
});

vocabulary!(DonorStatus {
    Active => "active",
    Deferred => "deferred",
    Inactive => "inactive",
});

vocabulary!(AlertStatus {
    LowStock => "low_stock",
    OutOfStock => "out_of_stock",
    Resolved => "resolved",
});

impl AlertStatus {
    /// Status an alert should carry for the given stock against its minimum.
    pub fn for_stock(current: i32, min_level: i32) -> AlertStatus {
        if current <= 0 {
            AlertStatus::OutOfStock
        } else if current <= min_level {
            AlertStatus::LowStock
        } else {
            AlertStatus::Resolved
        }
    }
}

// Suppliers and specializations.
vocabulary!(ListingStatus {
    Active => "active",
    Inactive => "inactive",
});

vocabulary!(AttendanceStatus {
    Present => "present",
    Absent => "absent",
    Late => "late",
    HalfDay => "half_day",
    OnLeave => "on_leave",
});

impl AttendanceStatus {
    /// Statuses that may carry check-in and check-out times.
    pub fn on_site(&self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Late | AttendanceStatus::HalfDay)
    }
}

vocabulary!(ReviewSubject {
    Doctor => "doctor",
    Department => "department",
    Service => "service",
    Facility => "facility",
});

vocabulary!(ReviewStatus {
    Active => "active",
    Hidden => "hidden",
});

vocabulary!(FeedbackCategory {
    General => "general",
    Complaint => "complaint",
    Suggestion => "suggestion",
    Appreciation => "appreciation",
});

vocabulary!(FeedbackStatus {
    Pending => "pending",
    Reviewed => "reviewed",
    Resolved => "resolved",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_window_defaults() {
        let w = PageQuery::default().window().unwrap();
        assert_eq!(w, PageWindow { page: 1, limit: 10 });
        assert_eq!(w.offset(), 0);
    }

    #[test]
    fn page_window_offset_and_pages() {
        let w = PageQuery {
            page: Some(3),
            limit: Some(25),
        }
        .window()
        .unwrap();
        assert_eq!(w.offset(), 50);
        assert_eq!(w.with_total(51).pages, 3);
        assert_eq!(w.with_total(50).pages, 2);
        assert_eq!(w.with_total(0).pages, 0);
    }

    #[test]
    fn page_window_rejects_out_of_range() {
        let q = PageQuery {
            page: Some(0),
            limit: Some(101),
        };
        let Err(ApiError::Validation(errors)) = q.window() else {
            panic!("expected validation error");
        };
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn double_option_tells_null_from_missing() {
        #[derive(Deserialize)]
        struct Patch {
            #[serde(default, deserialize_with = "deserialize_double_option")]
            notes: Option<Option<String>>,
        }
        let missing: Patch = serde_json::from_str("{}").unwrap();
        let null: Patch = serde_json::from_str(r#"{"notes":null}"#).unwrap();
        let set: Patch = serde_json::from_str(r#"{"notes":"x"}"#).unwrap();
        assert_eq!(missing.notes, None);
        assert_eq!(null.notes, Some(None));
        assert_eq!(set.notes, Some(Some("x".to_string())));
    }

    #[test]
    fn like_pattern_skips_blank_terms() {
        assert_eq!(like_pattern(Some("  smith ")), Some("%smith%".to_string()));
        assert_eq!(like_pattern(Some("   ")), None);
        assert_eq!(like_pattern(None), None);
    }

    #[test]
    fn references_are_prefixed_and_distinct_enough() {
        let a = generate_reference("PAT");
        assert!(a.starts_with("PAT"));
        assert!(a[3..].bytes().all(|b| b.is_ascii_digit()));
        assert!(a.len() >= 3 + 13 + 3);
    }

    #[test]
    fn vocabularies_round_trip_their_text() {
        for status in AppointmentStatus::ALL {
            assert_eq!(AppointmentStatus::parse(status.as_str()), Some(*status));
        }
        assert_eq!(BloodType::parse("ab-"), Some(BloodType::AbNeg));
        assert_eq!(BloodType::parse("C+"), None);
        assert_eq!(
            serde_json::to_value(AppointmentType::FollowUp).unwrap(),
            serde_json::json!("follow_up")
        );
    }

    #[test]
    fn alert_status_follows_stock() {
        assert_eq!(AlertStatus::for_stock(0, 10), AlertStatus::OutOfStock);
        assert_eq!(AlertStatus::for_stock(-2, 10), AlertStatus::OutOfStock);
        assert_eq!(AlertStatus::for_stock(10, 10), AlertStatus::LowStock);
        assert_eq!(AlertStatus::for_stock(11, 10), AlertStatus::Resolved);
    }

    #[test]
    fn schedule_blocking_statuses() {
        assert!(AppointmentStatus::Scheduled.blocks_schedule());
        assert!(AppointmentStatus::Confirmed.blocks_schedule());
        assert!(!AppointmentStatus::Cancelled.blocks_schedule());
        assert!(!AppointmentStatus::Completed.blocks_schedule());
    }
}
