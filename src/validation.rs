//! Request validation.
//!
//! Handlers run every check for a request through one [`Validator`] so that a
//! bad request reports all failing fields at once instead of the first one.

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use crate::error::ApiError;
use crate::scheduling::parse_clock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, message: &str) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Required, trimmed, non-empty string.
    pub fn required(&mut self, field: &str, value: Option<&str>) -> Option<String> {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => Some(v.to_string()),
            _ => {
                self.push(field, "is required");
                None
            }
        }
    }

    /// Optional string that, when present, must not be blank.
    pub fn not_blank(&mut self, field: &str, value: Option<&str>) -> Option<String> {
        let v = value?.trim();
        if v.is_empty() {
            self.push(field, "must not be empty");
            return None;
        }
        Some(v.to_string())
    }

    /// Optional email, normalized to lowercase.
    pub fn email(&mut self, field: &str, value: Option<&str>) -> Option<String> {
        let v = value?.trim();
        if v.is_empty() {
            return None;
        }
        if !is_email(v) {
            self.push(field, "must be a valid email");
            return None;
        }
        Some(v.to_ascii_lowercase())
    }

    pub fn phone(&mut self, field: &str, value: Option<&str>) -> Option<String> {
        let v = value?.trim();
        if v.is_empty() {
            return None;
        }
        if !is_phone(v) {
            self.push(field, "must be a valid phone number");
            return None;
        }
        Some(v.to_string())
    }

    /// `YYYY-MM-DD`; a full ISO-8601 timestamp is accepted and truncated to its date.
    pub fn date(&mut self, field: &str, value: Option<&str>) -> Option<NaiveDate> {
        let v = value?.trim();
        if v.is_empty() {
            return None;
        }
        let date_part = v.get(..10).unwrap_or(v);
        match NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
            Ok(d) => Some(d),
            Err(_) => {
                self.push(field, "must be an ISO-8601 date (YYYY-MM-DD)");
                None
            }
        }
    }

    pub fn clock(&mut self, field: &str, value: Option<&str>) -> Option<NaiveTime> {
        let v = value?.trim();
        match parse_clock(v) {
            Some(t) => Some(t),
            None => {
                self.push(field, "must be a time in HH:MM format");
                None
            }
        }
    }

    /// Value from a closed vocabulary, compared case-insensitively.
    pub fn one_of<T: Vocabulary>(&mut self, field: &str, value: Option<&str>) -> Option<T> {
        let v = value?.trim();
        match T::parse(v) {
            Some(parsed) => Some(parsed),
            None => {
                let allowed = T::ALL.iter().map(|x| x.as_str()).collect::<Vec<_>>().join(", ");
                self.push(field, &format!("must be one of: {allowed}"));
                None
            }
        }
    }

    pub fn range<T>(&mut self, field: &str, value: Option<T>, min: T, max: T) -> Option<T>
    where
        T: PartialOrd + Copy + std::fmt::Display,
    {
        let v = value?;
        if v < min || v > max {
            self.push(field, &format!("must be between {min} and {max}"));
            return None;
        }
        Some(v)
    }

    pub fn min<T>(&mut self, field: &str, value: Option<T>, min: T) -> Option<T>
    where
        T: PartialOrd + Copy + std::fmt::Display,
    {
        let v = value?;
        if v < min {
            self.push(field, &format!("must be at least {min}"));
            return None;
        }
        Some(v)
    }

    pub fn min_len(&mut self, field: &str, value: Option<&str>, min: usize) -> Option<String> {
        let v = value.unwrap_or_default();
        if v.chars().count() < min {
            self.push(field, &format!("must be at least {min} characters"));
            return None;
        }
        Some(v.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self.errors))
        }
    }
}

/// Closed set of string values stored in a VARCHAR column.
pub trait Vocabulary: Sized + Copy + 'static {
    const ALL: &'static [Self];

    fn as_str(&self) -> &'static str;

    fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(s))
    }
}

pub fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !s.chars().any(char::is_whitespace)
        && domain.split('.').count() >= 2
        && domain.split('.').all(|part| !part.is_empty())
}

pub fn is_phone(s: &str) -> bool {
    let allowed = s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')' | '.'));
    let digits = s.chars().filter(char::is_ascii_digit).count();
    allowed && (7..=15).contains(&digits) && !s.chars().skip(1).any(|c| c == '+')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Gender;

    #[test]
    fn collects_all_failures() {
        let mut v = Validator::new();
        v.required("first_name", Some("   "));
        v.email("email", Some("not-an-email"));
        v.one_of::<Gender>("gender", Some("unknown"));
        let Err(ApiError::Validation(errors)) = v.finish() else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["first_name", "email", "gender"]);
    }

    #[test]
    fn absent_optional_fields_pass() {
        let mut v = Validator::new();
        assert_eq!(v.email("email", None), None);
        assert_eq!(v.phone("phone", None), None);
        assert_eq!(v.date("date_of_birth", None), None);
        assert!(v.finish().is_ok());
    }

    #[test]
    fn email_is_normalized() {
        let mut v = Validator::new();
        assert_eq!(
            v.email("email", Some("  Alice.Johnson@Email.COM ")),
            Some("alice.johnson@email.com".to_string())
        );
        assert!(v.is_empty());
    }

    #[test]
    fn email_shapes() {
        assert!(is_email("dr.smith@hospital.com"));
        assert!(!is_email("dr.smith@hospital"));
        assert!(!is_email("@hospital.com"));
        assert!(!is_email("a@@b.com"));
        assert!(!is_email("a b@c.com"));
    }

    #[test]
    fn phone_shapes() {
        assert!(is_phone("+1-555-0101"));
        assert!(is_phone("(555) 123 4567"));
        assert!(!is_phone("12345"));
        assert!(!is_phone("555-CALL-NOW"));
        assert!(!is_phone("1+555123456"));
    }

    #[test]
    fn dates_accept_full_timestamps() {
        let mut v = Validator::new();
        assert_eq!(
            v.date("appointment_date", Some("2024-03-15T10:00:00Z")),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(v.date("appointment_date", Some("15/03/2024")), None);
        assert!(!v.is_empty());
    }

    #[test]
    fn vocabulary_is_case_insensitive() {
        let mut v = Validator::new();
        assert_eq!(v.one_of::<Gender>("gender", Some("Female")), Some(Gender::Female));
        assert!(v.is_empty());
    }

    #[test]
    fn numeric_bounds() {
        let mut v = Validator::new();
        assert_eq!(v.range("limit", Some(50), 1, 100), Some(50));
        assert_eq!(v.range("limit", Some(0), 1, 100), None);
        assert_eq!(v.min("experience_years", Some(-1), 0), None);
        assert_eq!(v.min_len("password", Some("abc"), 6), None);
        let Err(ApiError::Validation(errors)) = v.finish() else {
            panic!("expected validation error");
        };
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].message, "must be between 1 and 100");
    }
}
