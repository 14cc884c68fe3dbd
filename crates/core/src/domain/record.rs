use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

pub const CATEGORY: &str = "category";
pub const AMOUNT: &str = "amount";
pub const PAYMENT_METHOD: &str = "payment_method";
pub const PURCHASED_ITEM: &str = "purchased_item";
pub const PAYMENT_OWNER: &str = "payment_owner";
pub const PURCHASE_LOCATION: &str = "purchase_location";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Spending,
    BudgetLimit,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spending => "spending",
            Self::BudgetLimit => "budget_limit",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "spending" | "spent" | "expense" => Some(Self::Spending),
            "budget_limit" | "limit" | "budget" => Some(Self::BudgetLimit),
            _ => None,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Amount(Decimal),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Amount(_) => None,
        }
    }

    pub fn as_amount(&self) -> Option<Decimal> {
        match self {
            Self::Amount(amount) => Some(*amount),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Amount(amount) => write!(f, "{amount}"),
        }
    }
}

/// Slot-filling progress for one record. Absent keys are unfilled slots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialRecord {
    pub record_type: RecordType,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl PartialRecord {
    pub fn new(record_type: RecordType) -> Self {
        Self { record_type, fields: BTreeMap::new() }
    }

    pub fn with_field(mut self, name: &str, value: FieldValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: FieldValue) {
        self.fields.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_text)
    }

    pub fn amount(&self, name: &str) -> Option<Decimal> {
        self.get(name).and_then(FieldValue::as_amount)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingRecord {
    pub category: String,
    pub amount: Decimal,
    pub payment_method: String,
    pub purchased_item: String,
    pub payment_owner: String,
    pub purchase_location: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLimitRecord {
    pub category: String,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletedRecord {
    Spending(SpendingRecord),
    BudgetLimit(BudgetLimitRecord),
}

impl CompletedRecord {
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Spending(_) => RecordType::Spending,
            Self::BudgetLimit(_) => RecordType::BudgetLimit,
        }
    }

    /// Short human-readable summary used in confirmation messages.
    pub fn summary(&self) -> String {
        match self {
            Self::Spending(record) => format!(
                "gasto de R$ {} em {} ({}) no {}, pago com {} por {}",
                record.amount,
                record.category,
                record.purchased_item,
                record.purchase_location,
                record.payment_method,
                record.payment_owner
            ),
            Self::BudgetLimit(record) => {
                format!("limite de R$ {} para a categoria {}", record.amount, record.category)
            }
        }
    }
}

impl TryFrom<&PartialRecord> for CompletedRecord {
    type Error = DomainError;

    /// Structural conversion only; vocabulary membership is the evaluator's job.
    fn try_from(record: &PartialRecord) -> Result<Self, Self::Error> {
        let mut missing = Vec::new();

        let completed = match record.record_type {
            RecordType::Spending => CompletedRecord::Spending(SpendingRecord {
                category: required_text(record, CATEGORY, &mut missing),
                amount: positive_amount(record, &mut missing),
                payment_method: required_text(record, PAYMENT_METHOD, &mut missing),
                purchased_item: required_text(record, PURCHASED_ITEM, &mut missing),
                payment_owner: required_text(record, PAYMENT_OWNER, &mut missing),
                purchase_location: required_text(record, PURCHASE_LOCATION, &mut missing),
            }),
            RecordType::BudgetLimit => CompletedRecord::BudgetLimit(BudgetLimitRecord {
                category: required_text(record, CATEGORY, &mut missing),
                amount: positive_amount(record, &mut missing),
            }),
        };

        if missing.is_empty() {
            Ok(completed)
        } else {
            Err(DomainError::IncompleteRecord {
                record_type: record.record_type,
                missing_fields: missing,
            })
        }
    }
}

fn required_text(record: &PartialRecord, name: &str, missing: &mut Vec<String>) -> String {
    match record.text(name).map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => value.to_string(),
        None => {
            missing.push(name.to_string());
            String::new()
        }
    }
}

fn positive_amount(record: &PartialRecord, missing: &mut Vec<String>) -> Decimal {
    match record.amount(AMOUNT) {
        Some(amount) if amount > Decimal::ZERO => amount,
        _ => {
            missing.push(AMOUNT.to_string());
            Decimal::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{
        CompletedRecord, FieldValue, PartialRecord, RecordType, AMOUNT, CATEGORY, PAYMENT_METHOD,
    };
    use crate::errors::DomainError;

    #[test]
    fn record_type_parses_common_aliases() {
        assert_eq!(RecordType::parse("spending"), Some(RecordType::Spending));
        assert_eq!(RecordType::parse("Budget-Limit"), Some(RecordType::BudgetLimit));
        assert_eq!(RecordType::parse("limit"), Some(RecordType::BudgetLimit));
        assert_eq!(RecordType::parse("off_topic"), None);
    }

    #[test]
    fn budget_limit_converts_when_all_fields_present() {
        let record = PartialRecord::new(RecordType::BudgetLimit)
            .with_field(CATEGORY, FieldValue::Text("lazer".to_string()))
            .with_field(AMOUNT, FieldValue::Amount(Decimal::new(2000, 0)));

        let completed = CompletedRecord::try_from(&record).expect("complete limit");
        assert_eq!(completed.record_type(), RecordType::BudgetLimit);
        assert!(completed.summary().contains("lazer"));
    }

    #[test]
    fn spending_conversion_reports_every_missing_field() {
        let record = PartialRecord::new(RecordType::Spending)
            .with_field(PAYMENT_METHOD, FieldValue::Text("itau".to_string()))
            .with_field(AMOUNT, FieldValue::Amount(Decimal::new(-5, 0)));

        let error = CompletedRecord::try_from(&record).expect_err("incomplete spending");
        match error {
            DomainError::IncompleteRecord { record_type, missing_fields } => {
                assert_eq!(record_type, RecordType::Spending);
                assert!(missing_fields.contains(&"amount".to_string()));
                assert!(missing_fields.contains(&"category".to_string()));
                assert!(!missing_fields.contains(&"payment_method".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn partial_record_serializes_to_tagged_json() {
        let record = PartialRecord::new(RecordType::Spending)
            .with_field(AMOUNT, FieldValue::Amount(Decimal::new(50, 0)));
        let json = serde_json::to_value(&record).expect("serialize");

        assert_eq!(json["record_type"], "spending");
        assert_eq!(json["fields"]["amount"]["amount"], "50");
        let back: PartialRecord = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, record);
    }
}
