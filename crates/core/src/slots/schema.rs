use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::domain::record::{
    FieldValue, RecordType, AMOUNT, CATEGORY, PAYMENT_METHOD, PAYMENT_OWNER, PURCHASED_ITEM,
    PURCHASE_LOCATION,
};
use crate::domain::vocabulary::{normalize_free_text, VocabularyKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Vocabulary(VocabularyKind),
    FreeText,
    PositiveDecimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotField {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Phrase used when asking the user for this value.
    pub prompt: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotSchema {
    pub record_type: RecordType,
    pub label: &'static str,
    pub fields: &'static [SlotField],
}

static SPENDING_FIELDS: [SlotField; 6] = [
    SlotField {
        name: CATEGORY,
        kind: FieldKind::Vocabulary(VocabularyKind::Category),
        prompt: "a categoria do gasto",
    },
    SlotField { name: AMOUNT, kind: FieldKind::PositiveDecimal, prompt: "o valor gasto" },
    SlotField {
        name: PAYMENT_METHOD,
        kind: FieldKind::Vocabulary(VocabularyKind::PaymentMethod),
        prompt: "o método de pagamento (cartão)",
    },
    SlotField { name: PURCHASED_ITEM, kind: FieldKind::FreeText, prompt: "o item comprado" },
    SlotField {
        name: PAYMENT_OWNER,
        kind: FieldKind::Vocabulary(VocabularyKind::PaymentOwner),
        prompt: "quem fez o gasto",
    },
    SlotField { name: PURCHASE_LOCATION, kind: FieldKind::FreeText, prompt: "o local da compra" },
];

static BUDGET_LIMIT_FIELDS: [SlotField; 2] = [
    SlotField {
        name: CATEGORY,
        kind: FieldKind::Vocabulary(VocabularyKind::Category),
        prompt: "a categoria do limite",
    },
    SlotField { name: AMOUNT, kind: FieldKind::PositiveDecimal, prompt: "o valor do limite" },
];

pub static SPENDING_SCHEMA: SlotSchema =
    SlotSchema { record_type: RecordType::Spending, label: "registro de gasto", fields: &SPENDING_FIELDS };

pub static BUDGET_LIMIT_SCHEMA: SlotSchema = SlotSchema {
    record_type: RecordType::BudgetLimit,
    label: "limite de gastos",
    fields: &BUDGET_LIMIT_FIELDS,
};

pub fn schema_for(record_type: RecordType) -> &'static SlotSchema {
    match record_type {
        RecordType::Spending => &SPENDING_SCHEMA,
        RecordType::BudgetLimit => &BUDGET_LIMIT_SCHEMA,
    }
}

pub fn all_schemas() -> [&'static SlotSchema; 2] {
    [&SPENDING_SCHEMA, &BUDGET_LIMIT_SCHEMA]
}

impl SlotSchema {
    pub fn field(&self, name: &str) -> Option<&SlotField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|field| field.name).collect()
    }
}

impl SlotField {
    /// Converts a raw extracted value into a field value. `None` means the
    /// extraction did not populate the slot (null, blank, or a "null" marker).
    /// Values of the wrong shape are kept so the evaluator can reject them.
    pub fn coerce(&self, raw: &Value) -> Option<FieldValue> {
        match (self.kind, raw) {
            (_, Value::Null) => None,
            (FieldKind::PositiveDecimal, Value::Number(number)) => {
                to_decimal(&number.to_string()).map(FieldValue::Amount)
            }
            (FieldKind::PositiveDecimal, Value::String(text)) => {
                let text = present_text(text)?;
                Some(match parse_amount(&text) {
                    Some(amount) => FieldValue::Amount(amount),
                    None => FieldValue::Text(text),
                })
            }
            (_, Value::String(text)) => present_text(text).map(FieldValue::Text),
            (_, Value::Number(number)) => Some(FieldValue::Text(number.to_string())),
            _ => None,
        }
    }
}

fn present_text(raw: &str) -> Option<String> {
    let normalized = normalize_free_text(raw);
    match normalized.as_str() {
        "" | "null" | "none" => None,
        _ => Some(normalized),
    }
}

/// Parses amounts such as `50`, `50.5`, `R$ 1.234,56`, `R$ 2.000` or
/// `120 reais`.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String =
        raw.chars().filter(|ch| ch.is_ascii_digit() || matches!(ch, ',' | '.' | '-')).collect();
    if !cleaned.chars().any(|ch| ch.is_ascii_digit()) {
        return None;
    }

    let canonical = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) if cleaned.matches(',').count() == 1 => cleaned.replace(',', "."),
        (Some(_), None) => cleaned.replace(',', ""),
        (None, Some(_)) if is_dot_grouped(&cleaned) => cleaned.replace('.', ""),
        (None, _) => cleaned,
    };

    to_decimal(&canonical)
}

/// `1.500` or `1.234.567`: dots as thousands separators, no decimal part.
fn is_dot_grouped(cleaned: &str) -> bool {
    let digits = cleaned.strip_prefix('-').unwrap_or(cleaned);
    let mut groups = digits.split('.');
    let Some(head) = groups.next() else {
        return false;
    };
    let all_digits = |group: &str| group.chars().all(|ch| ch.is_ascii_digit());

    let head_ok = (1..=3).contains(&head.len()) && all_digits(head) && !head.starts_with('0');
    let mut tail_len = 0;
    let tail_ok = groups.all(|group| {
        tail_len += 1;
        group.len() == 3 && all_digits(group)
    });
    head_ok && tail_ok && tail_len > 0
}

fn to_decimal(canonical: &str) -> Option<Decimal> {
    Decimal::from_str(canonical)
        .or_else(|_| Decimal::from_scientific(canonical))
        .ok()
        .map(|amount| amount.normalize())
}
