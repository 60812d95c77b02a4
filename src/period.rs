//! Reporting-period math in the fixed reference timezone
//!
//! Every cycle targets the calendar month immediately preceding "today",
//! where "today" is computed in the portal's reference timezone rather
//! than the host timezone. Period boundaries span the first through the
//! last calendar day of that month, inclusive.

use chrono::{Datelike, NaiveDate, Utc};
use chrono_tz::Tz;

/// The fixed reference timezone for "today" and period boundaries.
pub const REFERENCE_TZ: Tz = chrono_tz::America::Porto_Velho;

/// Current date in the reference timezone.
pub fn today_reference() -> NaiveDate {
    Utc::now().with_timezone(&REFERENCE_TZ).date_naive()
}

/// One target reporting period: a full calendar month.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportingPeriod {
    /// First day of the month, inclusive
    pub start: NaiveDate,
    /// Last day of the month, inclusive
    pub end: NaiveDate,
}

impl ReportingPeriod {
    /// The calendar month immediately preceding `today`.
    pub fn previous_month(today: NaiveDate) -> Self {
        let first_of_current =
            NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap_or(today);
        let end = first_of_current.pred_opt().unwrap_or(first_of_current);
        let start = NaiveDate::from_ymd_opt(end.year(), end.month(), 1).unwrap_or(end);
        Self { start, end }
    }

    /// Compact period code, e.g. `202501`.
    pub fn code(&self) -> String {
        self.end.format("%Y%m").to_string()
    }

    /// First day in the portal's `DD/MM/YYYY` form.
    pub fn start_label(&self) -> String {
        self.start.format("%d/%m/%Y").to_string()
    }

    /// Last day in the portal's `DD/MM/YYYY` form.
    pub fn end_label(&self) -> String {
        self.end.format("%d/%m/%Y").to_string()
    }

    /// The localized period string the detail page shows, used for exact
    /// matching during reconciliation.
    pub fn label(&self) -> String {
        format!("{} a {}", self.start_label(), self.end_label())
    }
}
