use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::metrics::{RiskLevel, Urgency, days_until, format_inr, risk_score};
use crate::record::RowRecord;
use crate::schema::RowVariant;

/// Contracts expiring within this many days are offered for renewal.
pub const RENEWAL_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Error, PartialEq)]
pub enum RenewalError {
    #[error("contract {0} not found")]
    ContractNotFound(u32),
    #[error("renewal {0} not found")]
    RenewalNotFound(u64),
    #[error("renewal {id} is {status:?} and cannot be confirmed")]
    NotPending { id: u64, status: RenewalStatus },
}

/// The contract-level view of a contractor-list or bill-tracker row.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ContractRef {
    pub id: u32,
    pub source: RowVariant,
    pub contractor_name: String,
    pub efile: String,
    pub description: String,
    pub end_date: Option<NaiveDate>,
    pub value: f64,
}

impl ContractRef {
    pub fn from_row(variant: RowVariant, row: &RowRecord) -> Self {
        let schema = variant.schema();
        let text = |field: Option<&str>| field.map(|f| row.get(f).to_string()).unwrap_or_default();
        let contractor = row.get(schema.contractor_field).trim();

        ContractRef {
            id: row.sno,
            source: variant,
            contractor_name: if contractor.is_empty() {
                "Unknown Contractor".to_string()
            } else {
                contractor.to_string()
            },
            efile: text(schema.efile_field),
            description: text(schema.description_field),
            end_date: schema.expiry_field.and_then(|f| row.date(f)),
            value: schema.value_field.and_then(|f| row.amount(f)).unwrap_or(0.0),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ExpiringContract {
    #[serde(flatten)]
    pub contract: ContractRef,
    pub days_until_expiry: i64,
    pub urgency: Urgency,
}

/// Contractor-list and bill-tracker rows whose expiry falls within
/// `today..=today+window`, soonest first.
pub fn expiring_contracts(
    contractors: &[RowRecord],
    bills: &[RowRecord],
    today: NaiveDate,
    window: i64,
) -> Vec<ExpiringContract> {
    let sources = [
        (RowVariant::ContractorList, contractors),
        (RowVariant::BillTracker, bills),
    ];

    let mut expiring: Vec<ExpiringContract> = sources
        .iter()
        .flat_map(|(variant, rows)| rows.iter().map(move |row| ContractRef::from_row(*variant, row)))
        .filter_map(|contract| {
            let end = contract.end_date?;
            let days = days_until(end, today);
            if (0..=window).contains(&days) {
                Some(ExpiringContract {
                    contract,
                    days_until_expiry: days,
                    urgency: Urgency::from_days(days),
                })
            } else {
                None
            }
        })
        .collect();

    expiring.sort_by_key(|e| e.contract.end_date);
    expiring
}

/// Look a contract up by id, contractor list first, then the bill tracker.
pub fn find_contract(contractors: &[RowRecord], bills: &[RowRecord], id: u32) -> Option<ContractRef> {
    contractors
        .iter()
        .find(|r| r.sno == id)
        .map(|r| ContractRef::from_row(RowVariant::ContractorList, r))
        .or_else(|| {
            bills
                .iter()
                .find(|r| r.sno == id)
                .map(|r| ContractRef::from_row(RowVariant::BillTracker, r))
        })
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    Risk,
    Compliance,
    Negotiation,
    Renewal,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum Analysis {
    Risk {
        risk_level: RiskLevel,
        risk_score: u8,
        factors: Vec<String>,
        recommendations: Vec<String>,
    },
    Compliance {
        status: String,
        issues: Vec<String>,
        recommendations: Vec<String>,
    },
    Negotiation {
        leverage_points: Vec<String>,
        suggested_terms: Vec<String>,
    },
    Renewal {
        recommendation: String,
        reasoning: String,
        suggested_changes: Vec<String>,
    },
}

/// Rule-based contract review. `coverage` is the contractor's EPBG coverage in percent.
pub fn analyze(contract: &ContractRef, kind: AnalysisKind, today: NaiveDate, coverage: f64) -> Analysis {
    let days = contract
        .end_date
        .map(|end| days_until(end, today))
        .unwrap_or(RENEWAL_WINDOW_DAYS);

    match kind {
        AnalysisKind::Risk => {
            let score = risk_score(contract.value, Some(days), coverage);
            let level = if days <= 7 {
                RiskLevel::High
            } else {
                RiskLevel::from_score(score)
            };
            let mut factors = vec![format!("Contract expires in {} days", days)];
            if contract.value > 1_000_000.0 {
                factors.push(format!("High contract value (₹{})", format_inr(contract.value)));
            }
            if coverage < 50.0 {
                factors.push(format!("EPBG coverage is only {:.1}%", coverage));
            }
            if contract.description.trim().is_empty() {
                factors.push("No scope description recorded".to_string());
            }

            let mut recommendations = Vec::new();
            if days <= 7 {
                recommendations.push("Initiate renewal process immediately".to_string());
            } else {
                recommendations.push("Schedule renewal review before expiry".to_string());
            }
            if coverage < 80.0 {
                recommendations.push("Obtain additional bank guarantee before renewal".to_string());
            }
            recommendations.push("Clarify payment terms before renewal".to_string());

            Analysis::Risk {
                risk_level: level,
                risk_score: score,
                factors,
                recommendations,
            }
        }
        AnalysisKind::Compliance => {
            let mut issues = Vec::new();
            if contract.efile.trim().is_empty() {
                issues.push("Missing e-file reference".to_string());
            }
            if contract.end_date.is_none() {
                issues.push("No end date recorded".to_string());
            }
            if contract.value <= 0.0 {
                issues.push("Contract value not recorded".to_string());
            }
            let status = if issues.is_empty() {
                "Compliant"
            } else {
                "Mostly Compliant"
            };
            Analysis::Compliance {
                status: status.to_string(),
                issues,
                recommendations: vec![
                    "Add standard compliance clauses".to_string(),
                    "Include legal review in renewal process".to_string(),
                ],
            }
        }
        AnalysisKind::Negotiation => {
            let mut leverage_points = vec!["Long-term relationship with vendor".to_string()];
            if contract.value > 500_000.0 {
                leverage_points.push("Contract volume justifies a volume discount".to_string());
            }
            leverage_points.push("Multiple vendors available for similar services".to_string());
            Analysis::Negotiation {
                leverage_points,
                suggested_terms: vec![
                    "Request 5-10% discount on renewal".to_string(),
                    "Extend contract term to 24 months".to_string(),
                    "Include performance-based incentives".to_string(),
                ],
            }
        }
        AnalysisKind::Renewal => {
            let (recommendation, reasoning) = if days < 0 {
                ("Re-tender", "Contract has already expired")
            } else if coverage < 50.0 {
                ("Renew with Modifications", "Guarantee coverage is too low for a straight renewal")
            } else {
                ("Renew", "Contract is current and adequately guaranteed")
            };
            Analysis::Renewal {
                recommendation: recommendation.to_string(),
                reasoning: reasoning.to_string(),
                suggested_changes: vec![
                    "Add quarterly review meetings".to_string(),
                    "Include service level agreements".to_string(),
                ],
            }
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RenewalAction {
    Renew,
    Cancel,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RenewalStatus {
    Pending,
    Cancelled,
    Confirmed,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct RenewalRequest {
    pub contract_id: u32,
    pub user_action: RenewalAction,
    #[serde(default)]
    pub new_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub renewal_amount: Option<f64>,
    #[serde(default)]
    pub renewal_terms: String,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Renewal {
    pub id: u64,
    pub contract_id: u32,
    pub source: RowVariant,
    pub contractor_name: String,
    pub old_end_date: Option<NaiveDate>,
    pub new_end_date: Option<NaiveDate>,
    pub renewal_amount: Option<f64>,
    pub renewal_terms: String,
    pub user_action: RenewalAction,
    pub status: RenewalStatus,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct PaymentRequest {
    #[serde(default)]
    pub renewal_id: Option<u64>,
    #[serde(default = "default_payment_method")]
    pub payment_method: String,
    #[serde(default)]
    pub amount: f64,
}

fn default_payment_method() -> String {
    "card".to_string()
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct PaymentReceipt {
    pub payment_id: u64,
    pub renewal_id: Option<u64>,
    pub transaction_ref: String,
    pub payment_method: String,
    pub amount: f64,
    pub status: String,
}

/// Renewal decisions and (prototype) payments. No money moves; receipts are
/// marked `prototype`.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct RenewalLedger {
    next_id: u64,
    renewals: BTreeMap<u64, Renewal>,
    payments: Vec<PaymentReceipt>,
}

impl RenewalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_renewal(&mut self, contract: &ContractRef, request: &RenewalRequest) -> Renewal {
        self.next_id += 1;
        let renew = request.user_action == RenewalAction::Renew;
        let renewal = Renewal {
            id: self.next_id,
            contract_id: contract.id,
            source: contract.source,
            contractor_name: contract.contractor_name.clone(),
            old_end_date: contract.end_date,
            new_end_date: if renew { request.new_end_date } else { None },
            renewal_amount: if renew { request.renewal_amount } else { None },
            renewal_terms: request.renewal_terms.clone(),
            user_action: request.user_action,
            status: if renew {
                RenewalStatus::Pending
            } else {
                RenewalStatus::Cancelled
            },
        };
        self.renewals.insert(renewal.id, renewal.clone());
        renewal
    }

    pub fn process_payment(&mut self, request: &PaymentRequest, now: NaiveDateTime) -> PaymentReceipt {
        let receipt = PaymentReceipt {
            payment_id: self.payments.len() as u64 + 1,
            renewal_id: request.renewal_id,
            transaction_ref: format!("txn_{}", now.format("%Y%m%d_%H%M%S")),
            payment_method: request.payment_method.clone(),
            amount: request.amount,
            status: "prototype".to_string(),
        };
        self.payments.push(receipt.clone());
        receipt
    }

    /// Pending → confirmed. Confirming twice is a no-op; cancelled renewals stay cancelled.
    pub fn confirm(&mut self, renewal_id: u64) -> Result<&Renewal, RenewalError> {
        let renewal = self
            .renewals
            .get_mut(&renewal_id)
            .ok_or(RenewalError::RenewalNotFound(renewal_id))?;
        match renewal.status {
            RenewalStatus::Pending => renewal.status = RenewalStatus::Confirmed,
            RenewalStatus::Confirmed => {}
            RenewalStatus::Cancelled => {
                return Err(RenewalError::NotPending {
                    id: renewal_id,
                    status: renewal.status,
                });
            }
        }
        Ok(renewal)
    }

    pub fn get(&self, renewal_id: u64) -> Option<&Renewal> {
        self.renewals.get(&renewal_id)
    }

    pub fn renewals(&self) -> impl Iterator<Item = &Renewal> {
        self.renewals.values()
    }

    pub fn payments(&self) -> &[PaymentReceipt] {
        &self.payments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract_row(sno: u32, name: &str, end: &str, value: &str) -> RowRecord {
        let mut row = RowRecord::from_pairs(
            RowVariant::ContractorList,
            [("contractor", name), ("endDate", end), ("value", value)],
        );
        row.sno = sno;
        row
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn expiring_window_and_urgency() {
        let contractors = vec![
            contract_row(1, "Late", "2024-06-25", "100"),
            contract_row(2, "Soon", "2024-06-05", "100"),
            contract_row(3, "Past", "2024-05-20", "100"),
            contract_row(4, "Far", "2024-09-01", "100"),
        ];
        let mut bill = RowRecord::from_pairs(
            RowVariant::BillTracker,
            [("contractor", "Biller"), ("billDueDate", "2024-06-10")],
        );
        bill.sno = 1;

        let expiring = expiring_contracts(&contractors, &[bill], today(), RENEWAL_WINDOW_DAYS);
        let names: Vec<&str> = expiring.iter().map(|e| e.contract.contractor_name.as_str()).collect();
        assert_eq!(names, vec!["Soon", "Biller", "Late"]);
        assert_eq!(expiring[0].urgency, Urgency::Critical);
        assert_eq!(expiring[1].urgency, Urgency::Warning);
        assert_eq!(expiring[1].contract.source, RowVariant::BillTracker);
    }

    #[test]
    fn ledger_transitions() {
        let contract = ContractRef::from_row(
            RowVariant::ContractorList,
            &contract_row(1, "Acme", "2024-06-10", "5000"),
        );
        let mut ledger = RenewalLedger::new();

        let renew = ledger.process_renewal(
            &contract,
            &RenewalRequest {
                contract_id: 1,
                user_action: RenewalAction::Renew,
                new_end_date: NaiveDate::from_ymd_opt(2025, 6, 10),
                renewal_amount: Some(5200.0),
                renewal_terms: String::new(),
            },
        );
        assert_eq!(renew.status, RenewalStatus::Pending);

        let cancel = ledger.process_renewal(
            &contract,
            &RenewalRequest {
                contract_id: 1,
                user_action: RenewalAction::Cancel,
                new_end_date: NaiveDate::from_ymd_opt(2025, 6, 10),
                renewal_amount: None,
                renewal_terms: String::new(),
            },
        );
        assert_eq!(cancel.status, RenewalStatus::Cancelled);
        assert_eq!(cancel.new_end_date, None);

        assert_eq!(ledger.confirm(renew.id).unwrap().status, RenewalStatus::Confirmed);
        assert_eq!(ledger.confirm(renew.id).unwrap().status, RenewalStatus::Confirmed);
        assert!(matches!(ledger.confirm(cancel.id), Err(RenewalError::NotPending { .. })));
        assert_eq!(ledger.confirm(99), Err(RenewalError::RenewalNotFound(99)));
    }

    #[test]
    fn risk_analysis_is_high_inside_a_week() {
        let contract = ContractRef::from_row(
            RowVariant::ContractorList,
            &contract_row(1, "Acme", "2024-06-04", "1500000"),
        );
        match analyze(&contract, AnalysisKind::Risk, today(), 90.0) {
            Analysis::Risk { risk_level, risk_score, .. } => {
                assert_eq!(risk_level, RiskLevel::High);
                assert_eq!(risk_score, 70);
            }
            other => panic!("unexpected analysis {:?}", other),
        }
    }
}
