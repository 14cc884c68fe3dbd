use finchat_agent::{build_llm_client, HttpFinanceClient};
use finchat_core::config::{AppConfig, LoadOptions};
use finchat_db::{connect_with_settings, ping};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(check_llm_client(&config));
            match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => {
                    checks.push(runtime.block_on(check_database_connectivity(&config)));
                    checks.push(runtime.block_on(check_finance_store(&config)));
                }
                Err(error) => {
                    let details = format!("failed to initialize async runtime: {error}");
                    checks.push(DoctorCheck::fail("database_connectivity", details.clone()));
                    checks.push(DoctorCheck::fail("finance_store", details));
                }
            }
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.push(DoctorCheck::skipped("llm_client"));
            checks.push(DoctorCheck::skipped("database_connectivity"));
            checks.push(DoctorCheck::skipped("finance_store"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_client(config: &AppConfig) -> DoctorCheck {
    match build_llm_client(&config.llm) {
        Ok(client) => DoctorCheck::pass(
            "llm_client",
            format!("{} client ready for model `{}`", client.name(), config.llm.model),
        ),
        Err(error) => DoctorCheck::fail("llm_client", error.to_string()),
    }
}

async fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let pool = match connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    {
        Ok(pool) => pool,
        Err(error) => {
            return DoctorCheck::fail(
                "database_connectivity",
                format!("failed to connect to database: {error}"),
            );
        }
    };

    let result = ping(&pool).await;
    pool.close().await;
    match result {
        Ok(()) => DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        ),
        Err(error) => {
            DoctorCheck::fail("database_connectivity", format!("database query failed: {error}"))
        }
    }
}

/// Any HTTP answer below 500 counts as reachable; the root path is not part
/// of the store's API.
async fn check_finance_store(config: &AppConfig) -> DoctorCheck {
    let client = match HttpFinanceClient::from_config(&config.finance) {
        Ok(client) => client,
        Err(error) => {
            return DoctorCheck::fail("finance_store", format!("failed to build client: {error}"));
        }
    };

    match client.probe().await {
        Ok(status) if status < 500 => DoctorCheck::pass(
            "finance_store",
            format!("`{}` answered with status {status}", client.base_url()),
        ),
        Ok(status) => DoctorCheck::fail(
            "finance_store",
            format!("`{}` answered with status {status}", client.base_url()),
        ),
        Err(error) => DoctorCheck::fail(
            "finance_store",
            format!("`{}` is unreachable: {error}", client.base_url()),
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
