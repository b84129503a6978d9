//! Derived metrics computed from row dates and amounts.
//!
//! Everything here is a pure function of its inputs (including "now"), so the
//! grid projection, the insights panel and the renewal endpoints all agree on
//! the same numbers.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref ISO_DATETIME_REGEX: Regex =
        Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})(?:[T ].*)?$").unwrap();
    static ref YMD_SLASH_REGEX: Regex = Regex::new(r"^(\d{4})/(\d{1,2})/(\d{1,2})$").unwrap();
    static ref DMY_REGEX: Regex = Regex::new(r"^(\d{1,2})[/.-](\d{1,2})[/.-](\d{4})$").unwrap();
}

const MS_PER_DAY: i64 = 86_400_000;

/// Signed whole days from `now` until the start of `end`, rounded up.
/// Negative means the date has passed.
pub fn days_remaining(end: NaiveDate, now: NaiveDateTime) -> i64 {
    let diff_ms = (end.and_time(NaiveTime::MIN) - now).num_milliseconds();
    let days = diff_ms / MS_PER_DAY;
    if diff_ms % MS_PER_DAY > 0 { days + 1 } else { days }
}

/// `days_remaining` measured from the start of `today`.
pub fn days_until(end: NaiveDate, today: NaiveDate) -> i64 {
    days_remaining(end, today.and_time(NaiveTime::MIN))
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct TierThresholds {
    /// Rows with `1..=warning_days` left are flagged red.
    pub warning_days: i64,
    /// Rows with `warning_days+1..=caution_days` left are flagged amber.
    pub caution_days: i64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        TierThresholds {
            warning_days: 60,
            caution_days: 90,
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryTier {
    Expired,
    ExpiresToday,
    Warning,
    Caution,
    Safe,
}

impl ExpiryTier {
    pub fn classify(days: i64, thresholds: &TierThresholds) -> Self {
        if days < 0 {
            ExpiryTier::Expired
        } else if days == 0 {
            ExpiryTier::ExpiresToday
        } else if days <= thresholds.warning_days {
            ExpiryTier::Warning
        } else if days <= thresholds.caution_days {
            ExpiryTier::Caution
        } else {
            ExpiryTier::Safe
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            ExpiryTier::Expired | ExpiryTier::ExpiresToday | ExpiryTier::Warning => "red",
            ExpiryTier::Caution => "amber",
            ExpiryTier::Safe => "green",
        }
    }

    /// Tiers that raise the "expiring soon" notification badge.
    pub fn needs_attention(self) -> bool {
        matches!(self, ExpiryTier::ExpiresToday | ExpiryTier::Warning)
    }
}

pub fn expiry_label(days: i64) -> String {
    match days {
        d if d < 0 => "Expired".to_string(),
        0 => "Expires today".to_string(),
        1 => "1 day left".to_string(),
        d => format!("{} days left", d),
    }
}

/// The contractor list's duration cell: days left until `end`, "Invalid dates"
/// when the contract ends before it starts, "-" when either date is missing.
pub fn duration_label(start: Option<NaiveDate>, end: Option<NaiveDate>, now: NaiveDateTime) -> String {
    match (start, end) {
        (Some(start), Some(end)) if end >= start => expiry_label(days_remaining(end, now)),
        (Some(_), Some(_)) => "Invalid dates".to_string(),
        _ => "-".to_string(),
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Expiry {
    pub days: i64,
    pub tier: ExpiryTier,
    pub label: String,
}

impl Expiry {
    pub fn compute(end: NaiveDate, now: NaiveDateTime, thresholds: &TierThresholds) -> Self {
        let days = days_remaining(end, now);
        Expiry {
            days,
            tier: ExpiryTier::classify(days, thresholds),
            label: expiry_label(days),
        }
    }
}

/// Buckets used by the expiry distribution chart of the analytics report.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExpiryBucket {
    Expired,
    Within30,
    Within90,
    Within180,
    Within365,
    Beyond365,
}

impl ExpiryBucket {
    pub const ALL: [ExpiryBucket; 6] = [
        ExpiryBucket::Expired,
        ExpiryBucket::Within30,
        ExpiryBucket::Within90,
        ExpiryBucket::Within180,
        ExpiryBucket::Within365,
        ExpiryBucket::Beyond365,
    ];

    pub fn from_days(days: i64) -> Self {
        match days {
            d if d < 0 => ExpiryBucket::Expired,
            0..=30 => ExpiryBucket::Within30,
            31..=90 => ExpiryBucket::Within90,
            91..=180 => ExpiryBucket::Within180,
            181..=365 => ExpiryBucket::Within365,
            _ => ExpiryBucket::Beyond365,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ExpiryBucket::Expired => "Expired",
            ExpiryBucket::Within30 => "0-30 days",
            ExpiryBucket::Within90 => "31-90 days",
            ExpiryBucket::Within180 => "91-180 days",
            ExpiryBucket::Within365 => "181-365 days",
            ExpiryBucket::Beyond365 => "365+ days",
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Critical,
    Warning,
    Normal,
}

impl Urgency {
    pub fn from_days(days: i64) -> Self {
        if days <= 7 {
            Urgency::Critical
        } else if days <= 30 {
            Urgency::Warning
        } else {
            Urgency::Normal
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: u8) -> Self {
        if score >= 70 {
            RiskLevel::High
        } else if score >= 40 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Additive heuristic: contract value tier + expiry tier + EPBG coverage tier,
/// clamped to 100. `coverage` is a percentage.
pub fn risk_score(value: f64, days_left: Option<i64>, coverage: f64) -> u8 {
    let value_risk = if value > 1_000_000.0 {
        30
    } else if value > 500_000.0 {
        20
    } else if value > 100_000.0 {
        10
    } else {
        0
    };

    let expiry_risk = match days_left {
        Some(d) if d < 30 => 40,
        Some(d) if d < 90 => 20,
        Some(d) if d < 180 => 10,
        _ => 0,
    };

    let coverage_risk = if coverage < 50.0 {
        30
    } else if coverage < 80.0 {
        15
    } else {
        0
    };

    let total: u32 = value_risk + expiry_risk + coverage_risk;
    total.min(100) as u8
}

/// Parse the date formats users type or import: ISO dates (optionally with a
/// time part), `YYYY/MM/DD`, and day-first `DD/MM/YYYY` / `DD-MM-YYYY`.
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    let ymd = ISO_DATETIME_REGEX
        .captures(s)
        .or_else(|| YMD_SLASH_REGEX.captures(s));
    if let Some(caps) = ymd {
        let y = caps[1].parse().ok()?;
        let m = caps[2].parse().ok()?;
        let d = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(y, m, d);
    }

    if let Some(caps) = DMY_REGEX.captures(s) {
        let d = caps[1].parse().ok()?;
        let m = caps[2].parse().ok()?;
        let y = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(y, m, d);
    }

    None
}

/// Convert a spreadsheet serial day number (1900 date system) to a date.
pub fn from_excel_serial(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.floor() as i64))
}

/// Lenient amount parsing: currency symbols, thousands separators and units
/// are stripped. Returns `None` when nothing numeric remains.
pub fn parse_amount(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    let negative = trimmed.starts_with('-');
    let digits: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if digits.is_empty() {
        return None;
    }
    let value: f64 = digits.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Indian-style abbreviation: crore, lakh, thousand.
pub fn format_inr(num: f64) -> String {
    if num >= 10_000_000.0 {
        format!("{:.2}Cr", num / 10_000_000.0)
    } else if num >= 100_000.0 {
        format!("{:.2}L", num / 100_000.0)
    } else if num >= 1_000.0 {
        format!("{:.2}K", num / 1_000.0)
    } else {
        format!("{:.2}", num)
    }
}
