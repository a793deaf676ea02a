//! Appointment time slots.
//!
//! Appointments are stored as a date, a wall-clock start time and a duration in
//! minutes. Two appointments of the same doctor on the same date conflict when
//! their `[start, start + duration)` intervals intersect.

use chrono::{NaiveTime, Timelike};

/// Longest bookable appointment.
pub const MAX_DURATION_MINUTES: i32 = 720;
pub const DEFAULT_DURATION_MINUTES: i32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlot {
    /// Minutes since midnight.
    pub start: i32,
    pub duration: i32,
}

impl TimeSlot {
    pub fn new(start: NaiveTime, duration_minutes: i32) -> Self {
        Self {
            start: (start.hour() * 60 + start.minute()) as i32,
            duration: duration_minutes,
        }
    }

    pub fn end(&self) -> i32 {
        self.start + self.duration
    }

    /// `(start <= new_start AND end > new_start) OR (new_start < end AND new_end > start)`.
    /// Back-to-back slots (one ends exactly when the other starts) do not overlap.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        (self.start <= other.start && self.end() > other.start)
            || (other.start < self.end() && other.end() > self.start)
    }
}

/// Parses `H:MM` / `HH:MM`, hours 0-23. `HH:MM:SS` is also accepted since that
/// is how MySQL renders TIME columns.
pub fn parse_clock(s: &str) -> Option<NaiveTime> {
    let mut parts = s.split(':');
    let hour = parts.next()?;
    let minute = parts.next()?;
    let second = parts.next();
    if parts.next().is_some() {
        return None;
    }

    if hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
        return None;
    }
    if !hour.bytes().chain(minute.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let sec = match second {
        Some(sec) if sec.len() == 2 && sec.bytes().all(|b| b.is_ascii_digit()) => sec.parse().ok()?,
        Some(_) => return None,
        None => 0,
    };

    NaiveTime::from_hms_opt(hour.parse().ok()?, minute.parse().ok()?, sec)
}

/// Returns the first existing slot the candidate overlaps, with its id.
pub fn find_conflict<I>(candidate: &TimeSlot, existing: I) -> Option<i64>
where
    I: IntoIterator<Item = (i64, TimeSlot)>,
{
    existing
        .into_iter()
        .find(|(_, slot)| slot.overlaps(candidate))
        .map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(hh: u32, mm: u32, duration: i32) -> TimeSlot {
        TimeSlot::new(NaiveTime::from_hms_opt(hh, mm, 0).unwrap(), duration)
    }

    #[test]
    fn identical_slots_overlap() {
        assert!(slot(9, 0, 30).overlaps(&slot(9, 0, 30)));
    }

    #[test]
    fn back_to_back_slots_do_not_overlap() {
        assert!(!slot(9, 0, 30).overlaps(&slot(9, 30, 30)));
        assert!(!slot(9, 30, 30).overlaps(&slot(9, 0, 30)));
    }

    #[test]
    fn partial_and_contained_overlaps() {
        // new starts inside existing
        assert!(slot(9, 0, 30).overlaps(&slot(9, 15, 30)));
        // new ends inside existing
        assert!(slot(9, 0, 30).overlaps(&slot(8, 45, 30)));
        // new swallows existing
        assert!(slot(9, 0, 15).overlaps(&slot(8, 0, 120)));
        // existing swallows new
        assert!(slot(8, 0, 120).overlaps(&slot(9, 0, 15)));
    }

    #[test]
    fn overlap_is_symmetric() {
        let pairs = [
            (slot(10, 0, 45), slot(10, 30, 15)),
            (slot(10, 0, 45), slot(11, 0, 15)),
            (slot(13, 10, 5), slot(13, 0, 10)),
        ];
        for (a, b) in pairs {
            assert_eq!(a.overlaps(&b), b.overlaps(&a));
        }
    }

    #[test]
    fn parses_clock_strings() {
        assert_eq!(parse_clock("9:05"), NaiveTime::from_hms_opt(9, 5, 0));
        assert_eq!(parse_clock("23:59"), NaiveTime::from_hms_opt(23, 59, 0));
        assert_eq!(parse_clock("14:30:00"), NaiveTime::from_hms_opt(14, 30, 0));
        assert_eq!(parse_clock("24:00"), None);
        assert_eq!(parse_clock("12:60"), None);
        assert_eq!(parse_clock("12:5"), None);
        assert_eq!(parse_clock("noon"), None);
        assert_eq!(parse_clock(""), None);
    }

    #[test]
    fn find_conflict_reports_first_overlapping_id() {
        let existing = vec![(1, slot(8, 0, 30)), (2, slot(9, 0, 30)), (3, slot(9, 20, 30))];
        assert_eq!(find_conflict(&slot(9, 10, 15), existing.clone()), Some(2));
        assert_eq!(find_conflict(&slot(8, 30, 30), existing), None);
    }
}
