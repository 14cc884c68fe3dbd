pub mod evaluator;
pub mod schema;

pub use evaluator::{canonicalize, evaluate, merge, Evaluation};
pub use schema::{schema_for, FieldKind, SlotField, SlotSchema};
