use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VocabularyKind {
    Category,
    PaymentMethod,
    PaymentOwner,
}

impl VocabularyKind {
    pub const ALL: [VocabularyKind; 3] =
        [VocabularyKind::Category, VocabularyKind::PaymentMethod, VocabularyKind::PaymentOwner];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::PaymentMethod => "payment_method",
            Self::PaymentOwner => "payment_owner",
        }
    }

    /// Finance store collection that owns this vocabulary.
    pub fn resource_path(&self) -> &'static str {
        match self {
            Self::Category => "categories",
            Self::PaymentMethod => "payment-methods",
            Self::PaymentOwner => "payment-owners",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyEntry {
    pub key: String,
    pub display_name: String,
}

impl VocabularyEntry {
    pub fn new(key: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self { key: key.into(), display_name: display_name.into() }
    }
}

/// Controlled set of values for one field. Keys are unique ignoring case;
/// later duplicates are dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Vocabulary {
    entries: Vec<VocabularyEntry>,
}

impl Vocabulary {
    pub fn new(entries: impl IntoIterator<Item = VocabularyEntry>) -> Self {
        let mut seen = HashSet::new();
        let entries = entries
            .into_iter()
            .filter(|entry| !entry.key.trim().is_empty())
            .filter(|entry| seen.insert(normalize_free_text(&entry.key)))
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[VocabularyEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.key.as_str()).collect()
    }

    /// Matches a raw value against keys first, then display names. Comparison
    /// is case-insensitive and ignores surrounding whitespace.
    pub fn resolve(&self, raw: &str) -> Option<&VocabularyEntry> {
        let needle = normalize_free_text(raw);
        if needle.is_empty() {
            return None;
        }

        self.entries
            .iter()
            .find(|entry| normalize_free_text(&entry.key) == needle)
            .or_else(|| {
                self.entries.iter().find(|entry| normalize_free_text(&entry.display_name) == needle)
            })
    }

    pub fn contains(&self, raw: &str) -> bool {
        self.resolve(raw).is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vocabularies {
    pub categories: Vocabulary,
    pub payment_methods: Vocabulary,
    pub payment_owners: Vocabulary,
}

impl Vocabularies {
    pub fn get(&self, kind: VocabularyKind) -> &Vocabulary {
        match kind {
            VocabularyKind::Category => &self.categories,
            VocabularyKind::PaymentMethod => &self.payment_methods,
            VocabularyKind::PaymentOwner => &self.payment_owners,
        }
    }

    pub fn set(&mut self, kind: VocabularyKind, vocabulary: Vocabulary) {
        match kind {
            VocabularyKind::Category => self.categories = vocabulary,
            VocabularyKind::PaymentMethod => self.payment_methods = vocabulary,
            VocabularyKind::PaymentOwner => self.payment_owners = vocabulary,
        }
    }

    /// Built-in lists used when the finance store cannot be reached.
    pub fn fallback() -> Self {
        Self {
            categories: fallback_for(VocabularyKind::Category),
            payment_methods: fallback_for(VocabularyKind::PaymentMethod),
            payment_owners: fallback_for(VocabularyKind::PaymentOwner),
        }
    }
}

impl Default for Vocabularies {
    fn default() -> Self {
        Self::fallback()
    }
}

pub fn fallback_for(kind: VocabularyKind) -> Vocabulary {
    let pairs: &[(&str, &str)] = match kind {
        VocabularyKind::Category => &[
            ("mercado", "Mercado"),
            ("comer_fora", "Comer fora"),
            ("transporte", "Transporte"),
            ("lazer", "Lazer"),
            ("farmacia", "Farmácia"),
            ("roupas", "Roupas"),
            ("casa", "Casa"),
            ("saude", "Saúde"),
            ("educacao", "Educação"),
            ("emergencias", "Emergências"),
        ],
        VocabularyKind::PaymentMethod => &[
            ("itau", "Itaú"),
            ("picpay", "PicPay"),
            ("xp", "XP"),
            ("nubank", "Nubank"),
            ("c6", "C6"),
        ],
        VocabularyKind::PaymentOwner => &[("joao_lucas", "João Lucas"), ("lailla", "Lailla")],
    };

    Vocabulary::new(pairs.iter().map(|(key, display_name)| VocabularyEntry::new(*key, *display_name)))
}

/// Free-text normalisation shared by record fields and vocabulary lookup.
pub fn normalize_free_text(raw: &str) -> String {
    raw.trim().to_lowercase()
}
