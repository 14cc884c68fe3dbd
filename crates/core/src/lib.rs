pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod slots;

pub use domain::conversation::{ChatMessage, ConversationState, Role, SessionId};
pub use domain::record::{
    BudgetLimitRecord, CompletedRecord, FieldValue, PartialRecord, RecordType, SpendingRecord,
};
pub use domain::vocabulary::{Vocabularies, Vocabulary, VocabularyEntry, VocabularyKind};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{FlowEngine, SlotFillingFlow, TurnEvent, TurnStage};
pub use slots::{evaluate, Evaluation, SlotSchema};
