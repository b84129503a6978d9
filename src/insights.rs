//! Rule-based analytics over the three tables.
//!
//! Every figure is computed from the rows passed in and the reference date;
//! nothing is sampled or forecast.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::backup::Workbook;
use crate::metrics::{ExpiryBucket, RiskLevel, days_until, format_inr, risk_score};
use crate::record::RowRecord;
use crate::schema::fold_name;

const LOW_COVERAGE_PERCENT: f64 = 50.0;
const HIGH_VALUE_CONTRACT: f64 = 1_000_000.0;
const HIGH_BILL_TOTAL: f64 = 5_000_000.0;
const MANY_BILLS: usize = 20;
const EXPIRING_SOON_DAYS: i64 = 30;

/// Sum of EPBG amounts per contractor, keyed by the folded contractor name.
fn guarantees_by_contractor(epbg: &[RowRecord]) -> BTreeMap<String, f64> {
    let mut totals = BTreeMap::new();
    for row in epbg {
        let name = fold_name(row.get("contractor"));
        if name.is_empty() {
            continue;
        }
        *totals.entry(name).or_insert(0.0) += row.amount("bgAmount").unwrap_or(0.0);
    }
    totals
}

/// EPBG coverage of one contract, in percent. Zero without a value or a guarantee.
pub fn coverage(contractor: &str, contract_value: f64, epbg: &[RowRecord]) -> f64 {
    if contract_value <= 0.0 {
        return 0.0;
    }
    let guaranteed = guarantees_by_contractor(epbg)
        .get(&fold_name(contractor))
        .copied()
        .unwrap_or(0.0);
    guaranteed / contract_value * 100.0
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ContractorRisk {
    pub contractor: String,
    pub efile: String,
    pub value: f64,
    pub days_left: Option<i64>,
    pub coverage: f64,
    pub score: u8,
    pub level: RiskLevel,
}

/// Risk of every named contractor, riskiest first.
pub fn risk_profile(contractors: &[RowRecord], epbg: &[RowRecord], today: NaiveDate) -> Vec<ContractorRisk> {
    let guarantees = guarantees_by_contractor(epbg);
    let mut profile: Vec<ContractorRisk> = contractors
        .iter()
        .filter(|row| !row.get("contractor").trim().is_empty())
        .map(|row| {
            let name = row.get("contractor").trim().to_string();
            let value = row.amount("value").unwrap_or(0.0);
            let days_left = row.date("endDate").map(|end| days_until(end, today));
            let guaranteed = guarantees.get(&fold_name(&name)).copied().unwrap_or(0.0);
            let coverage = if value > 0.0 { guaranteed / value * 100.0 } else { 0.0 };
            let score = risk_score(value, days_left, coverage);
            ContractorRisk {
                contractor: name,
                efile: row.get("efile").to_string(),
                value,
                days_left,
                coverage,
                score,
                level: RiskLevel::from_score(score),
            }
        })
        .collect();
    profile.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.contractor.cmp(&b.contractor)));
    profile
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Summary {
    pub total_contractors: usize,
    pub total_contract_value: f64,
    pub average_contract_value: f64,
    pub active_contracts: usize,
    pub expired_contracts: usize,
    pub expiring_within_30_days: usize,
    pub incomplete_contracts: usize,
    pub total_bills: usize,
    pub total_bill_value: f64,
    pub total_paid: f64,
    pub total_guarantees: usize,
    pub total_guarantee_amount: f64,
    /// Share of contractors with any guarantee at all, in percent.
    pub coverage_rate: f64,
    pub low_coverage_contractors: usize,
    pub high_value_contractors: usize,
}

pub fn summarize(workbook: &Workbook, today: NaiveDate) -> Summary {
    let contractors = &workbook.contractors;
    let profile = risk_profile(contractors, &workbook.epbg, today);

    let total_contract_value: f64 = contractors.iter().filter_map(|r| r.amount("value")).sum();
    let days: Vec<Option<i64>> = contractors
        .iter()
        .map(|r| r.date("endDate").map(|end| days_until(end, today)))
        .collect();

    let covered = profile.iter().filter(|p| p.coverage > 0.0).count();

    Summary {
        total_contractors: contractors.len(),
        total_contract_value,
        average_contract_value: if contractors.is_empty() {
            0.0
        } else {
            total_contract_value / contractors.len() as f64
        },
        active_contracts: days.iter().filter(|d| d.is_none_or(|d| d > 0)).count(),
        expired_contracts: days.iter().filter(|d| d.is_some_and(|d| d <= 0)).count(),
        expiring_within_30_days: days
            .iter()
            .filter(|d| d.is_some_and(|d| d > 0 && d < EXPIRING_SOON_DAYS))
            .count(),
        incomplete_contracts: contractors
            .iter()
            .filter(|r| r.get("value").trim().is_empty() || r.get("endDate").trim().is_empty())
            .count(),
        total_bills: workbook.bills.len(),
        total_bill_value: workbook.bills.iter().filter_map(|r| r.amount("approvedAmount")).sum(),
        total_paid: workbook.bills.iter().filter_map(|r| r.amount("paidAmount")).sum(),
        total_guarantees: workbook.epbg.len(),
        total_guarantee_amount: workbook.epbg.iter().filter_map(|r| r.amount("bgAmount")).sum(),
        coverage_rate: if profile.is_empty() {
            0.0
        } else {
            covered as f64 / profile.len() as f64 * 100.0
        },
        low_coverage_contractors: profile
            .iter()
            .filter(|p| p.coverage < LOW_COVERAGE_PERCENT)
            .count(),
        high_value_contractors: contractors
            .iter()
            .filter(|r| r.amount("value").is_some_and(|v| v > HIGH_VALUE_CONTRACT))
            .count(),
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Alert,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Insight {
    pub severity: Severity,
    pub text: String,
}

pub fn insights(summary: &Summary) -> Vec<Insight> {
    let mut out = Vec::new();
    let info = |text: String| Insight {
        severity: Severity::Info,
        text,
    };

    if summary.total_contractors > 0 {
        out.push(info(format!(
            "{} contractors with total value of ₹{}. Average contract value is ₹{}.",
            summary.total_contractors,
            format_inr(summary.total_contract_value),
            format_inr(summary.average_contract_value)
        )));
        if summary.expiring_within_30_days > 0 {
            out.push(Insight {
                severity: Severity::Warning,
                text: format!(
                    "{} contracts expiring within 30 days require immediate attention.",
                    summary.expiring_within_30_days
                ),
            });
        }
    }

    if summary.total_bills > 0 && summary.total_bill_value > 0.0 {
        out.push(info(format!(
            "{} bills processed with total value ₹{}. Average bill value is ₹{}.",
            summary.total_bills,
            format_inr(summary.total_bill_value),
            format_inr(summary.total_bill_value / summary.total_bills as f64)
        )));
    }

    if summary.total_contractors > 0 && summary.total_guarantees > 0 {
        out.push(info(format!(
            "EPBG coverage is {:.1}% across {} contractors.",
            summary.coverage_rate, summary.total_contractors
        )));
        if summary.low_coverage_contractors > 0 {
            out.push(Insight {
                severity: Severity::Alert,
                text: format!(
                    "{} contractors have low EPBG coverage (<50%), increasing financial risk exposure.",
                    summary.low_coverage_contractors
                ),
            });
        }
    }

    if summary.total_contractors > 0 {
        out.push(info(format!(
            "{:.1}% of contractors ({}/{}) are currently active.",
            summary.active_contracts as f64 / summary.total_contractors as f64 * 100.0,
            summary.active_contracts,
            summary.total_contractors
        )));
    }

    out
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Recommendation {
    pub priority: Priority,
    pub text: String,
}

pub fn recommendations(summary: &Summary) -> Vec<Recommendation> {
    let mut out = Vec::new();
    let mut push = |priority, text: String| out.push(Recommendation { priority, text });

    if summary.expiring_within_30_days > 0 {
        push(
            Priority::High,
            format!(
                "Renew {} expiring contracts within 30 days to avoid service disruption.",
                summary.expiring_within_30_days
            ),
        );
    }
    if summary.total_guarantees > 0 && summary.low_coverage_contractors > 0 {
        push(
            Priority::High,
            format!(
                "Increase EPBG coverage for {} contractors to reduce financial risk exposure.",
                summary.low_coverage_contractors
            ),
        );
    }
    if summary.total_bills > MANY_BILLS {
        push(
            Priority::Medium,
            format!(
                "Consider automating bill processing for {} bills to improve efficiency.",
                summary.total_bills
            ),
        );
    }
    if summary.high_value_contractors > 0 {
        push(
            Priority::Medium,
            format!(
                "{} high-value contractors (>₹10L) require regular performance reviews.",
                summary.high_value_contractors
            ),
        );
    }
    if summary.expired_contracts as f64 > summary.total_contractors as f64 * 0.2 {
        push(
            Priority::Medium,
            format!(
                "{} inactive contractors found. Consider contract renewal or termination review.",
                summary.expired_contracts
            ),
        );
    }
    if summary.total_bill_value > HIGH_BILL_TOTAL {
        push(
            Priority::Low,
            "Bill value exceeds ₹50L. Consider quarterly budget planning and cash flow review.".to_string(),
        );
    }
    if summary.incomplete_contracts > 0 {
        push(
            Priority::Low,
            format!(
                "{} contractors have incomplete data. Update contract values and end dates.",
                summary.incomplete_contracts
            ),
        );
    }

    out
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct BucketCount {
    pub bucket: ExpiryBucket,
    pub label: String,
    pub count: usize,
}

/// How many dated contracts fall in each expiry bucket, all buckets listed.
pub fn expiry_distribution(contractors: &[RowRecord], today: NaiveDate) -> Vec<BucketCount> {
    let mut counts: BTreeMap<ExpiryBucket, usize> = BTreeMap::new();
    for row in contractors {
        if let Some(end) = row.date("endDate") {
            *counts.entry(ExpiryBucket::from_days(days_until(end, today))).or_default() += 1;
        }
    }
    ExpiryBucket::ALL
        .iter()
        .map(|bucket| BucketCount {
            bucket: *bucket,
            label: bucket.label().to_string(),
            count: counts.get(bucket).copied().unwrap_or(0),
        })
        .collect()
}

/// Everything the analytics page shows, as one serializable document.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct AnalyticsReport {
    pub generated_at: NaiveDateTime,
    pub summary: Summary,
    pub insights: Vec<Insight>,
    pub recommendations: Vec<Recommendation>,
    pub risk_profile: Vec<ContractorRisk>,
    pub expiry_distribution: Vec<BucketCount>,
}

impl AnalyticsReport {
    pub fn build(workbook: &Workbook, now: NaiveDateTime) -> Self {
        let today = now.date();
        let summary = summarize(workbook, today);
        AnalyticsReport {
            generated_at: now,
            insights: insights(&summary),
            recommendations: recommendations(&summary),
            risk_profile: risk_profile(&workbook.contractors, &workbook.epbg, today),
            expiry_distribution: expiry_distribution(&workbook.contractors, today),
            summary,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
