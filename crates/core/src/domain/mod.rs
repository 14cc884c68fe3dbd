pub mod conversation;
pub mod record;
pub mod vocabulary;

pub use conversation::{ChatMessage, ConversationState, Role, SessionId};
pub use record::{
    BudgetLimitRecord, CompletedRecord, FieldValue, PartialRecord, RecordType, SpendingRecord,
};
pub use vocabulary::{Vocabularies, Vocabulary, VocabularyEntry, VocabularyKind};
