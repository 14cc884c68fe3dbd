use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use finchat_core::config::FinanceConfig;
use finchat_core::domain::record::CompletedRecord;
use finchat_core::domain::vocabulary::{Vocabulary, VocabularyEntry, VocabularyKind};

use crate::commit::{classify_status, commit_payload, CommitFailure, CommitReceipt, FinanceStore};
use crate::vocabulary::{RetryPolicy, VocabularyError, VocabularySource};

const PAGE_SIZE: u32 = 100;
const MAX_PAGES: u32 = 50;

/// Pooled HTTP client for the finance store, shared by vocabulary reads and
/// record commits.
#[derive(Clone)]
pub struct HttpFinanceClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct Page {
    items: Vec<VocabularyEntry>,
    #[serde(default)]
    pages: u32,
}

impl HttpFinanceClient {
    pub fn new(http: reqwest::Client, base_url: &str, retry: RetryPolicy) -> Self {
        Self { http, base_url: base_url.trim_end_matches('/').to_string(), retry }
    }

    pub fn from_config(config: &FinanceConfig) -> Result<Self, reqwest::Error> {
        let http =
            reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;
        Ok(Self::new(http, &config.base_url, RetryPolicy::from_config(config)))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Single GET on the store root, used by readiness checks.
    pub async fn probe(&self) -> Result<u16, reqwest::Error> {
        let response = self.http.get(format!("{}/", self.base_url)).send().await?;
        Ok(response.status().as_u16())
    }

    async fn fetch_page_once(
        &self,
        kind: VocabularyKind,
        page: u32,
    ) -> Result<Page, VocabularyError> {
        let url = format!("{}/{}/", self.base_url, kind.resource_path());
        let response = self
            .http
            .get(&url)
            .query(&[("page", page), ("size", PAGE_SIZE)])
            .send()
            .await
            .map_err(|error| VocabularyError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VocabularyError::Status { status: status.as_u16() });
        }
        response.json::<Page>().await.map_err(|error| VocabularyError::Decode(error.to_string()))
    }

    async fn fetch_page(&self, kind: VocabularyKind, page: u32) -> Result<Page, VocabularyError> {
        let mut attempt = 0;
        loop {
            match self.fetch_page_once(kind, page).await {
                Ok(page) => return Ok(page),
                Err(error) if error.is_retryable() && attempt < self.retry.retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    tracing::debug!(
                        event_name = "vocabulary.retry",
                        vocabulary = kind.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying vocabulary read"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[async_trait]
impl VocabularySource for HttpFinanceClient {
    async fn fetch(&self, kind: VocabularyKind) -> Result<Vocabulary, VocabularyError> {
        let first = self.fetch_page(kind, 1).await?;
        let pages = first.pages.min(MAX_PAGES);
        let mut entries = first.items;

        for page in 2..=pages {
            entries.extend(self.fetch_page(kind, page).await?.items);
        }
        Ok(Vocabulary::new(entries))
    }
}

#[async_trait]
impl FinanceStore for HttpFinanceClient {
    async fn commit(&self, record: &CompletedRecord) -> Result<CommitReceipt, CommitFailure> {
        let (collection, payload) = commit_payload(record);
        let url = format!("{}/{collection}/", self.base_url);

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|error| CommitFailure::Unreachable(error.to_string()))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &body));
        }

        Ok(CommitReceipt {
            record_type: record.record_type(),
            created: serde_json::from_str(&body).unwrap_or(Value::Null),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use rust_decimal::Decimal;
    use serde_json::{json, Value};

    use finchat_core::domain::record::{BudgetLimitRecord, CompletedRecord, SpendingRecord};
    use finchat_core::domain::vocabulary::VocabularyKind;

    use super::HttpFinanceClient;
    use crate::commit::{CommitFailure, FinanceStore};
    use crate::vocabulary::{RetryPolicy, VocabularyError, VocabularySource};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{address}")
    }

    fn fast_retry(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn limit() -> CompletedRecord {
        CompletedRecord::BudgetLimit(BudgetLimitRecord {
            category: "lazer".to_string(),
            amount: Decimal::from(300),
        })
    }

    fn spending() -> CompletedRecord {
        CompletedRecord::Spending(SpendingRecord {
            category: "mercado".to_string(),
            amount: Decimal::from(50),
            payment_method: "itau".to_string(),
            purchased_item: "comida".to_string(),
            payment_owner: "joao_lucas".to_string(),
            purchase_location: "mercado".to_string(),
        })
    }

    #[tokio::test]
    async fn vocabulary_reads_follow_every_page() {
        async fn categories(Query(query): Query<HashMap<String, u32>>) -> Json<Value> {
            let page = query.get("page").copied().unwrap_or(1);
            let item = if page == 1 {
                json!({ "key": "mercado", "display_name": "Mercado" })
            } else {
                json!({ "key": "viagem", "display_name": "Viagem" })
            };
            Json(json!({ "items": [item], "total": 2, "page": page, "size": 1, "pages": 2 }))
        }

        let base_url = serve(Router::new().route("/categories/", get(categories))).await;
        let client = HttpFinanceClient::new(reqwest::Client::new(), &base_url, fast_retry(0));

        let vocabulary = client.fetch(VocabularyKind::Category).await.expect("vocabulary");
        assert_eq!(vocabulary.keys(), vec!["mercado", "viagem"]);
    }

    #[tokio::test]
    async fn vocabulary_reads_retry_server_errors() {
        async fn flaky(State(calls): State<Arc<AtomicU32>>) -> Response {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
            Json(json!({
                "items": [{ "key": "nubank", "display_name": "Nubank" }],
                "total": 1, "page": 1, "size": 100, "pages": 1
            }))
            .into_response()
        }

        let calls = Arc::new(AtomicU32::new(0));
        let app = Router::new().route("/payment-methods/", get(flaky)).with_state(calls.clone());
        let base_url = serve(app).await;

        let client = HttpFinanceClient::new(reqwest::Client::new(), &base_url, fast_retry(3));
        let vocabulary = client.fetch(VocabularyKind::PaymentMethod).await.expect("vocabulary");
        assert_eq!(vocabulary.keys(), vec!["nubank"]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        calls.store(0, Ordering::SeqCst);
        let impatient = HttpFinanceClient::new(reqwest::Client::new(), &base_url, fast_retry(0));
        let error = impatient.fetch(VocabularyKind::PaymentMethod).await.expect_err("no retries");
        assert_eq!(error, VocabularyError::Status { status: 503 });
    }

    #[tokio::test]
    async fn commits_are_posted_once_and_classified() {
        async fn rejecting(State(calls): State<Arc<AtomicU32>>) -> (StatusCode, &'static str) {
            calls.fetch_add(1, Ordering::SeqCst);
            (StatusCode::UNPROCESSABLE_ENTITY, "{\"detail\":\"invalid category\"}")
        }
        async fn broken(State(calls): State<Arc<AtomicU32>>) -> StatusCode {
            calls.fetch_add(1, Ordering::SeqCst);
            StatusCode::INTERNAL_SERVER_ERROR
        }

        let calls = Arc::new(AtomicU32::new(0));
        let app = Router::new()
            .route("/limits/", post(rejecting))
            .route("/spents/", post(broken))
            .with_state(calls.clone());
        let base_url = serve(app).await;
        let client = HttpFinanceClient::new(reqwest::Client::new(), &base_url, fast_retry(3));

        let rejected = client.commit(&limit()).await.expect_err("rejected");
        assert!(matches!(rejected, CommitFailure::Rejected { status: 422, ref detail }
            if detail.contains("invalid category")));

        let failed = client.commit(&spending()).await.expect_err("store error");
        assert_eq!(failed, CommitFailure::StoreInternalError { status: 500 });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn successful_commit_returns_the_created_entity() {
        async fn created(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
            (StatusCode::CREATED, Json(json!({ "id": 7, "category": body["category"] })))
        }

        let base_url = serve(Router::new().route("/limits/", post(created))).await;
        let client = HttpFinanceClient::new(reqwest::Client::new(), &base_url, fast_retry(0));

        let receipt = client.commit(&limit()).await.expect("committed");
        assert_eq!(receipt.created, json!({ "id": 7, "category": "lazer" }));
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let client =
            HttpFinanceClient::new(reqwest::Client::new(), "http://127.0.0.1:1", fast_retry(0));
        let failure = client.commit(&limit()).await.expect_err("unreachable");
        assert_eq!(failure.kind(), "unreachable");
    }
}
