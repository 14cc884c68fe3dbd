use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{json, Value};
use thiserror::Error;

use finchat_core::domain::record::{CompletedRecord, RecordType};

/// Why a completed record did not reach the finance store. Each kind gets
/// its own user-facing annotation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommitFailure {
    #[error("finance store unreachable: {0}")]
    Unreachable(String),
    #[error("finance store rejected the record (status {status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("finance store internal error (status {status})")]
    StoreInternalError { status: u16 },
}

impl CommitFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "unreachable",
            Self::Rejected { .. } => "rejected",
            Self::StoreInternalError { .. } => "store_internal_error",
        }
    }

    /// Degraded-service notice appended to the confirmation message.
    pub fn annotation(&self) -> String {
        match self {
            Self::Unreachable(_) => "⚠️ O serviço financeiro está fora do ar no momento e o \
                registro ainda não foi salvo. Seus dados foram guardados; envie uma nova \
                mensagem para tentar novamente."
                .to_string(),
            Self::Rejected { detail, .. } => format!(
                "⚠️ O serviço financeiro recusou o registro ({detail}). Seus dados foram \
                 guardados; corrija a informação indicada e envie novamente."
            ),
            Self::StoreInternalError { .. } => "⚠️ O serviço financeiro apresentou um erro \
                interno e o registro ainda não foi salvo. Seus dados foram guardados; envie \
                uma nova mensagem para tentar novamente."
                .to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CommitReceipt {
    pub record_type: RecordType,
    /// Entity echoed back by the store, `Null` when the body was not JSON.
    pub created: Value,
}

/// Write side of the finance store. A call is attempted exactly once.
#[async_trait]
pub trait FinanceStore: Send + Sync {
    async fn commit(&self, record: &CompletedRecord) -> Result<CommitReceipt, CommitFailure>;
}

/// Collection path and JSON body for a completed record.
pub fn commit_payload(record: &CompletedRecord) -> (&'static str, Value) {
    match record {
        CompletedRecord::Spending(spending) => (
            "spents",
            json!({
                "category": spending.category,
                "amount": amount_number(spending.amount),
                "payment_method": spending.payment_method,
                "payment_owner": spending.payment_owner,
                "location": spending.purchase_location,
            }),
        ),
        CompletedRecord::BudgetLimit(limit) => (
            "limits",
            json!({
                "category": limit.category,
                "amount": amount_number(limit.amount),
            }),
        ),
    }
}

fn amount_number(amount: rust_decimal::Decimal) -> Value {
    amount.to_f64().map(Value::from).unwrap_or_else(|| Value::String(amount.to_string()))
}

/// Classifies a non-success status from the store.
pub fn classify_status(status: u16, body: &str) -> CommitFailure {
    if status >= 500 {
        CommitFailure::StoreInternalError { status }
    } else {
        let detail = body.trim();
        let detail = if detail.is_empty() { format!("status {status}") } else { detail.to_string() };
        CommitFailure::Rejected { status, detail }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use finchat_core::domain::record::{BudgetLimitRecord, CompletedRecord, SpendingRecord};

    use super::{classify_status, commit_payload, CommitFailure};

    #[test]
    fn spending_payload_uses_store_field_names() {
        let record = CompletedRecord::Spending(SpendingRecord {
            category: "mercado".to_string(),
            amount: Decimal::new(5050, 2),
            payment_method: "itau".to_string(),
            purchased_item: "comida".to_string(),
            payment_owner: "joao_lucas".to_string(),
            purchase_location: "mercado central".to_string(),
        });

        let (path, body) = commit_payload(&record);
        assert_eq!(path, "spents");
        assert_eq!(
            body,
            json!({
                "category": "mercado",
                "amount": 50.5,
                "payment_method": "itau",
                "payment_owner": "joao_lucas",
                "location": "mercado central",
            })
        );
    }

    #[test]
    fn limit_payload_has_category_and_amount_only() {
        let record = CompletedRecord::BudgetLimit(BudgetLimitRecord {
            category: "lazer".to_string(),
            amount: Decimal::from(300),
        });
        let (path, body) = commit_payload(&record);
        assert_eq!(path, "limits");
        assert_eq!(body, json!({ "category": "lazer", "amount": 300.0 }));
    }

    #[test]
    fn statuses_split_into_rejection_and_store_error() {
        assert_eq!(
            classify_status(422, "{\"detail\":\"invalid category\"}"),
            CommitFailure::Rejected {
                status: 422,
                detail: "{\"detail\":\"invalid category\"}".to_string()
            }
        );
        assert_eq!(classify_status(502, ""), CommitFailure::StoreInternalError { status: 502 });
        assert!(classify_status(400, "").annotation().contains("status 400"));
    }
}
