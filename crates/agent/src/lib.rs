//! Conversation runtime for the finance assistant.
//!
//! A turn flows through these pieces:
//! 1. **Guardrails** (`guardrails`) reject empty or oversized messages.
//! 2. **Extraction** (`oracle`) asks a chat model (`providers`) to classify
//!    the conversation and pull record fields out of it.
//! 3. **Evaluation** happens in `finchat-core`; the model never decides
//!    whether a record is complete.
//! 4. **Commit** (`commit`, `finance_client`) writes the finished record to
//!    the finance store exactly once.
//!
//! `runtime::TurnOrchestrator` ties them together and persists each turn
//! through `finchat-db`.

pub mod commit;
pub mod finance_client;
pub mod guardrails;
pub mod llm;
pub mod oracle;
pub mod providers;
pub mod runtime;
pub mod session_lock;
pub mod vocabulary;

pub use commit::{CommitFailure, CommitReceipt, FinanceStore};
pub use finance_client::HttpFinanceClient;
pub use llm::{LlmClient, LlmRequest, ProviderError, ProviderErrorKind};
pub use oracle::{ExtractionOracle, ExtractionResult, LlmExtractionOracle, OracleError};
pub use providers::build_llm_client;
pub use runtime::{TurnDependencies, TurnError, TurnOrchestrator, TurnOutcome, TurnReply};
pub use vocabulary::{load_vocabularies, StaticVocabularySource, VocabularySource};
