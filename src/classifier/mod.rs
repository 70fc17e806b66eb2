//! Preference classifier
//!
//! Turns a customer message (plus recent history and the current profile)
//! into a profile delta, an optional reply and a readiness signal.
//! `KeywordClassifier` keeps the system functional without an LLM.

use crate::conversation::history::ConversationMessage;
use crate::eligibility::normalize_key;
use crate::models::{BodyType, CustomerProfile, Usage};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod gemini;
pub use gemini::GeminiClassifier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierInput {
    pub message: String,
    pub history: Vec<ConversationMessage>,
    pub profile: CustomerProfile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierOutput {
    /// Only `Some` fields are merged into the profile.
    pub delta: CustomerProfile,
    pub reply: Option<String>,
    pub ready_to_recommend: bool,
}

/// Capability that extracts customer preferences from free text
#[async_trait]
pub trait PreferenceClassifier: Send + Sync {
    fn name(&self) -> &'static str;
    async fn classify(&self, input: &ClassifierInput) -> Result<ClassifierOutput>;
}

//
// ================= Keyword classifier =================
//

/// Static keyword lists, matched on accent-free lowercase words
const FAMILY_WORDS: &[&str] = &["familia", "filhos", "filho", "criancas", "esposa", "marido"];
const WORK_WORDS: &[&str] = &["trabalho", "trabalhar", "aplicativo", "app", "uber", "99", "corridas"];
const PERSONAL_WORDS: &[&str] = &["passeio", "lazer", "pessoal"];
const READY_WORDS: &[&str] = &["opcoes", "mostra", "mostre", "recomenda", "recomende", "sugere", "sugestao", "indica"];
const TRADE_IN_NEGATIVE: &[&str] = &["sem troca", "nao tenho carro", "nao tenho troca", "nao vou dar carro"];
const TRADE_IN_POSITIVE: &[&str] = &["troca", "meu carro atual", "dar meu carro", "dar o meu carro"];

/// Multi-word models first so "onix plus" wins over "onix".
const KNOWN_MODELS: &[&str] = &[
    "onix plus", "t-cross", "hr-v", "corolla cross", "grand siena",
    "compass", "renegade", "commander", "corolla", "yaris", "etios", "hilux", "sw4",
    "civic", "city", "fit", "wr-v", "hb20s", "hb20", "creta", "tucson", "onix", "tracker",
    "spin", "cruze", "s10", "kicks", "versa", "sentra", "frontier", "polo", "virtus", "nivus",
    "taos", "jetta", "gol", "voyage", "saveiro", "argo", "cronos", "mobi", "pulse", "fastback",
    "toro", "strada", "sandero", "logan", "duster", "kwid", "captur", "ka", "ecosport", "ranger",
    "208", "2008", "c3", "c4 cactus", "kardian",
];

const NUMBER_WORDS: &[(&str, u8)] = &[
    ("duas", 2), ("dois", 2), ("tres", 3), ("quatro", 4), ("cinco", 5), ("seis", 6), ("sete", 7),
];

pub struct KeywordClassifier;

#[async_trait]
impl PreferenceClassifier for KeywordClassifier {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn classify(&self, input: &ClassifierInput) -> Result<ClassifierOutput> {
        Ok(classify_keywords(&input.message, &input.profile))
    }
}

/// Deterministic extraction shared by the keyword and Gemini classifiers.
pub fn classify_keywords(message: &str, profile: &CustomerProfile) -> ClassifierOutput {
    let text = normalize_key(message);
    let words = split_words(&text);
    let padded = format!(" {} ", words.join(" "));

    let delta = CustomerProfile {
        budget: parse_budget(&words),
        body_type: words.iter().find_map(|w| BodyType::parse(w)),
        usage: parse_usage(&padded, &words),
        people_count: parse_people_count(&words),
        has_trade_in: parse_trade_in(&padded),
        preferred_model: KNOWN_MODELS
            .iter()
            .find(|model| padded.contains(&format!(" {} ", model)))
            .map(|model| model.to_string()),
        customer_name: parse_name(message),
    };

    let mut merged = profile.clone();
    merged.merge(&delta);
    let asked = READY_WORDS.iter().any(|w| words.contains(w));
    let ready_to_recommend = merged.has_search_anchor()
        && (merged.budget.is_some() || merged.usage.is_some() || asked);

    ClassifierOutput {
        delta,
        reply: None,
        ready_to_recommend,
    }
}

fn split_words(normalized: &str) -> Vec<&str> {
    normalized
        .split(' ')
        .map(|w| w.trim_matches(|c: char| ",.!?;:()\"'".contains(c)))
        .filter(|w| !w.is_empty())
        .collect()
}

/// Budget from free text, e.g. a string field in an LLM answer.
pub fn parse_budget_text(raw: &str) -> Option<f64> {
    let text = normalize_key(raw);
    parse_budget(&split_words(&text))
}

fn parse_usage(padded: &str, words: &[&str]) -> Option<Usage> {
    let has_any = |list: &[&str]| list.iter().any(|w| words.contains(w));

    if words.contains(&"black") {
        Some(Usage::UberBlack)
    } else if words.contains(&"comfort") {
        Some(Usage::UberComfort)
    } else if padded.contains(" uber x ") || words.contains(&"uberx") {
        Some(Usage::UberX)
    } else if has_any(FAMILY_WORDS) {
        Some(Usage::Family)
    } else if has_any(WORK_WORDS) {
        Some(Usage::Work)
    } else if has_any(PERSONAL_WORDS) {
        Some(Usage::Personal)
    } else {
        None
    }
}

fn parse_trade_in(padded: &str) -> Option<bool> {
    if TRADE_IN_NEGATIVE.iter().any(|p| padded.contains(p)) {
        Some(false)
    } else if TRADE_IN_POSITIVE.iter().any(|p| padded.contains(p)) {
        Some(true)
    } else {
        None
    }
}

/// "80 mil", "80mil", "120k", "R$ 95.000", "95.000,00". Bare numbers below
/// 10 000 without a currency marker are ignored so model years do not read
/// as budgets.
fn parse_budget(words: &[&str]) -> Option<f64> {
    for (i, word) in words.iter().enumerate() {
        let currency = word.starts_with("r$") || (i > 0 && words[i - 1] == "r$");
        let token = word.trim_start_matches("r$");

        let digits_end = token
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
            .unwrap_or(token.len());
        let (digits, suffix) = token.split_at(digits_end);
        if !digits.chars().any(|c| c.is_ascii_digit()) {
            continue;
        }

        let next = words.get(i + 1).copied().unwrap_or("");
        let thousands = matches!(suffix, "mil" | "k") || (suffix.is_empty() && matches!(next, "mil" | "k"));

        if thousands {
            if let Ok(value) = digits.replace(',', ".").parse::<f64>() {
                if value > 0.0 {
                    return Some(value * 1000.0);
                }
            }
            continue;
        }

        if !suffix.is_empty() {
            continue;
        }

        let Ok(value) = digits.replace('.', "").replace(',', ".").parse::<f64>() else {
            continue;
        };
        let grouped = digits.contains('.');
        if (currency && value >= 1000.0) || (grouped && value >= 1000.0) || value >= 10_000.0 {
            return Some(value);
        }
    }

    None
}

fn parse_people_count(words: &[&str]) -> Option<u8> {
    words.windows(2).find_map(|pair| {
        let (count, noun) = (pair[0], pair[1]);
        if !(noun.starts_with("pessoa") || noun.starts_with("lugar")) {
            return None;
        }
        count.parse::<u8>().ok().filter(|n| *n > 0).or_else(|| {
            NUMBER_WORDS
                .iter()
                .find(|(word, _)| *word == count)
                .map(|(_, n)| *n)
        })
    })
}

/// "me chamo Ana", "meu nome é Carlos"
fn parse_name(message: &str) -> Option<String> {
    let original: Vec<&str> = message.split_whitespace().collect();
    let normalized: Vec<String> = original.iter().map(|w| normalize_key(w)).collect();

    for i in 0..normalized.len() {
        let name_index = if normalized[i] == "chamo" && i > 0 && normalized[i - 1] == "me" {
            i + 1
        } else if normalized[i] == "nome"
            && i > 0
            && normalized[i - 1] == "meu"
            && normalized.get(i + 1).map(String::as_str) == Some("e")
        {
            i + 2
        } else {
            continue;
        };

        let name = original
            .get(name_index)?
            .trim_matches(|c: char| !c.is_alphabetic());
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }

    None
}
