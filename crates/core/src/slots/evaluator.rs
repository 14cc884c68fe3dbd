use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::record::{FieldValue, PartialRecord};
use crate::domain::vocabulary::{normalize_free_text, Vocabularies};
use crate::slots::schema::{schema_for, FieldKind, SlotField};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub is_complete: bool,
    /// Missing or invalid fields, in schema order.
    pub missing_fields: Vec<String>,
}

/// Pure completion check of `record` against its schema and the vocabularies.
pub fn evaluate(record: &PartialRecord, vocabularies: &Vocabularies) -> Evaluation {
    let schema = schema_for(record.record_type);
    let missing_fields: Vec<String> = schema
        .fields
        .iter()
        .filter(|field| !field_is_valid(field, record.get(field.name), vocabularies))
        .map(|field| field.name.to_string())
        .collect();

    Evaluation { is_complete: missing_fields.is_empty(), missing_fields }
}

fn field_is_valid(field: &SlotField, value: Option<&FieldValue>, vocabularies: &Vocabularies) -> bool {
    match (field.kind, value) {
        (_, None) => false,
        (FieldKind::PositiveDecimal, Some(FieldValue::Amount(amount))) => *amount > Decimal::ZERO,
        (FieldKind::PositiveDecimal, Some(FieldValue::Text(_))) => false,
        (FieldKind::FreeText, Some(FieldValue::Text(text))) => !text.trim().is_empty(),
        (FieldKind::Vocabulary(kind), Some(FieldValue::Text(text))) => {
            vocabularies.get(kind).contains(text)
        }
        (_, Some(FieldValue::Amount(_))) => false,
    }
}

/// Field-wise merge of this turn's extraction into the pending record.
/// Fields absent from `update` keep their previous values. A record type
/// change starts over from the update alone. Fields outside the schema are
/// dropped.
pub fn merge(base: Option<&PartialRecord>, update: &PartialRecord) -> PartialRecord {
    let schema = schema_for(update.record_type);
    let mut merged = match base {
        Some(base) if base.record_type == update.record_type => base.clone(),
        _ => PartialRecord::new(update.record_type),
    };

    for (name, value) in &update.fields {
        if schema.field(name).is_some() {
            merged.set(name, value.clone());
        }
    }
    merged.fields.retain(|name, _| schema.field(name).is_some());
    merged
}

/// Rewrites vocabulary fields to their canonical key and normalises free text.
/// Values that match nothing are kept as typed so the evaluator reports them.
pub fn canonicalize(record: &PartialRecord, vocabularies: &Vocabularies) -> PartialRecord {
    let schema = schema_for(record.record_type);
    let mut canonical = record.clone();

    for field in schema.fields {
        let Some(FieldValue::Text(text)) = record.get(field.name) else {
            continue;
        };
        let value = match field.kind {
            FieldKind::Vocabulary(kind) => vocabularies
                .get(kind)
                .resolve(text)
                .map(|entry| normalize_free_text(&entry.key))
                .unwrap_or_else(|| normalize_free_text(text)),
            FieldKind::FreeText | FieldKind::PositiveDecimal => normalize_free_text(text),
        };
        canonical.set(field.name, FieldValue::Text(value));
    }

    canonical
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{canonicalize, evaluate, merge};
    use crate::domain::record::{
        FieldValue, PartialRecord, RecordType, AMOUNT, CATEGORY, PAYMENT_METHOD, PAYMENT_OWNER,
        PURCHASED_ITEM, PURCHASE_LOCATION,
    };
    use crate::domain::vocabulary::Vocabularies;

    fn text(value: &str) -> FieldValue {
        FieldValue::Text(value.to_string())
    }

    fn amount(value: i64) -> FieldValue {
        FieldValue::Amount(Decimal::new(value, 0))
    }

    fn spending_without_location() -> PartialRecord {
        PartialRecord::new(RecordType::Spending)
            .with_field(CATEGORY, text("mercado"))
            .with_field(AMOUNT, amount(50))
            .with_field(PAYMENT_METHOD, text("itau"))
            .with_field(PURCHASED_ITEM, text("comida"))
            .with_field(PAYMENT_OWNER, text("joao_lucas"))
    }

    #[test]
    fn spending_missing_only_location_is_incomplete() {
        let evaluation = evaluate(&spending_without_location(), &Vocabularies::fallback());

        assert!(!evaluation.is_complete);
        assert_eq!(evaluation.missing_fields, vec!["purchase_location".to_string()]);
    }

    #[test]
    fn missing_fields_follow_schema_order() {
        let record = PartialRecord::new(RecordType::Spending)
            .with_field(PURCHASE_LOCATION, text("mercado extra"))
            .with_field(PAYMENT_METHOD, text("itau"));

        let evaluation = evaluate(&record, &Vocabularies::fallback());
        assert_eq!(
            evaluation.missing_fields,
            vec!["category", "amount", "purchased_item", "payment_owner"]
        );
    }

    #[test]
    fn evaluation_is_repeatable_for_any_record() {
        let vocabularies = Vocabularies::fallback();
        let records = [
            PartialRecord::new(RecordType::Spending),
            PartialRecord::new(RecordType::BudgetLimit).with_field(AMOUNT, amount(-1)),
            spending_without_location(),
            spending_without_location().with_field(PURCHASE_LOCATION, text("feira")),
        ];

        for record in &records {
            assert_eq!(evaluate(record, &vocabularies), evaluate(record, &vocabularies));
        }
        assert!(evaluate(&records[3], &vocabularies).is_complete);
    }

    #[test]
    fn invalid_values_count_as_missing() {
        let record = PartialRecord::new(RecordType::BudgetLimit)
            .with_field(CATEGORY, text("viagem espacial"))
            .with_field(AMOUNT, text("muito"));

        let evaluation = evaluate(&record, &Vocabularies::fallback());
        assert_eq!(evaluation.missing_fields, vec!["category", "amount"]);

        let zero = PartialRecord::new(RecordType::BudgetLimit)
            .with_field(CATEGORY, text("lazer"))
            .with_field(AMOUNT, amount(0));
        assert_eq!(evaluate(&zero, &Vocabularies::fallback()).missing_fields, vec!["amount"]);
    }

    #[test]
    fn merge_preserves_fields_not_supplied_this_turn() {
        let pending =
            PartialRecord::new(RecordType::Spending).with_field(PAYMENT_METHOD, text("itau"));
        let update = PartialRecord::new(RecordType::Spending).with_field(AMOUNT, amount(50));

        let merged = merge(Some(&pending), &update);
        assert_eq!(merged.text(PAYMENT_METHOD), Some("itau"));
        assert_eq!(merged.amount(AMOUNT), Some(Decimal::new(50, 0)));
    }

    #[test]
    fn merge_overwrites_supplied_fields_and_drops_unknown_ones() {
        let pending = PartialRecord::new(RecordType::BudgetLimit)
            .with_field(CATEGORY, text("lazer"))
            .with_field(AMOUNT, amount(100));
        let update = PartialRecord::new(RecordType::BudgetLimit)
            .with_field(AMOUNT, amount(250))
            .with_field(PAYMENT_OWNER, text("lailla"));

        let merged = merge(Some(&pending), &update);
        assert_eq!(merged.amount(AMOUNT), Some(Decimal::new(250, 0)));
        assert_eq!(merged.text(CATEGORY), Some("lazer"));
        assert!(merged.get(PAYMENT_OWNER).is_none());
    }

    #[test]
    fn merge_starts_over_when_record_type_changes() {
        let pending = spending_without_location();
        let update = PartialRecord::new(RecordType::BudgetLimit).with_field(AMOUNT, amount(900));

        let merged = merge(Some(&pending), &update);
        assert_eq!(merged.record_type, RecordType::BudgetLimit);
        assert!(merged.get(CATEGORY).is_none());
        assert_eq!(merged.fields.len(), 1);
    }

    #[test]
    fn canonicalize_maps_mixed_case_and_display_names_to_keys() {
        let record = PartialRecord::new(RecordType::Spending)
            .with_field(CATEGORY, text("  Mercado "))
            .with_field(PAYMENT_METHOD, text("Itaú"))
            .with_field(PURCHASE_LOCATION, text(" Feira Livre "));

        let canonical = canonicalize(&record, &Vocabularies::fallback());
        assert_eq!(canonical.text(CATEGORY), Some("mercado"));
        assert_eq!(canonical.text(PAYMENT_METHOD), Some("itau"));
        assert_eq!(canonical.text(PURCHASE_LOCATION), Some("feira livre"));
    }
}
