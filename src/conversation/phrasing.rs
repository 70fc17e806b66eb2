//! Reply phrasing
//!
//! Variants are picked with an injected, seedable RNG so replies are
//! reproducible in tests.

use crate::models::{CustomerProfile, RecommendationCandidate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Mutex;

const ASK_BUDGET: &[&str] = &[
    "Qual é o valor que você pretende investir?",
    "Até quanto você pensa em pagar no carro?",
    "Você tem um orçamento em mente?",
];

const ASK_BODY_TYPE: &[&str] = &[
    "Você prefere hatch, sedã ou SUV?",
    "Que tipo de carro combina mais com você: hatch, sedã ou SUV?",
];

const ASK_USAGE: &[&str] = &[
    "O carro vai ser para uso pessoal, para a família ou para trabalhar com aplicativo?",
    "Como você pretende usar o carro no dia a dia?",
];

const ASK_MORE: &[&str] = &[
    "Tem algum modelo que você já gosta?",
    "Quer me contar mais alguma preferência?",
];

const REPROMPT: &[&str] = &[
    "Desculpe, não consegui entender. Pode repetir de outro jeito?",
    "Hmm, não entendi bem. Pode me explicar de novo?",
];

const HANDOFF: &[&str] = &[
    "Claro! Vou chamar um dos nossos vendedores para continuar com você.",
    "Certo, já estou transferindo você para um atendente.",
];

const CLOSING: &[&str] = &[
    "Tudo bem! Obrigado pelo contato e até a próxima.",
    "Combinado, encerrando por aqui. Qualquer coisa é só chamar!",
];

const CLOSED: &[&str] = &["Esta conversa foi encerrada. Obrigado pelo contato!"];

const NO_MATCHES: &[&str] = &[
    "Não encontrei veículos que atendam a tudo isso agora. Quer ajustar alguma preferência?",
    "No momento nada no estoque bate com esse perfil. Podemos mudar o orçamento ou o tipo de carro?",
];

const RECOMMENDATION_INTRO: &[&str] = &[
    "Separei algumas opções para você:",
    "Olha só o que encontrei no estoque:",
];

pub struct Phrasebook {
    rng: Mutex<StdRng>,
}

impl Phrasebook {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }

    fn pick(&self, options: &[&str]) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        options.choose(&mut *rng).copied().unwrap_or_default().to_string()
    }

    /// Question for the first missing discovery field.
    pub fn ask_next(&self, profile: &CustomerProfile) -> String {
        if profile.budget.is_none() {
            self.pick(ASK_BUDGET)
        } else if profile.body_type.is_none() {
            self.pick(ASK_BODY_TYPE)
        } else if profile.usage.is_none() {
            self.pick(ASK_USAGE)
        } else {
            self.pick(ASK_MORE)
        }
    }

    pub fn reprompt(&self) -> String {
        self.pick(REPROMPT)
    }

    pub fn handoff(&self, profile: &CustomerProfile) -> String {
        let line = self.pick(HANDOFF);
        match profile.customer_name.as_deref() {
            Some(name) => format!("{}, {}", name, lowercase_first(&line)),
            None => line,
        }
    }

    pub fn closing(&self) -> String {
        self.pick(CLOSING)
    }

    pub fn closed(&self) -> String {
        self.pick(CLOSED)
    }

    pub fn no_matches(&self) -> String {
        self.pick(NO_MATCHES)
    }

    pub fn recommendations(&self, candidates: &[RecommendationCandidate]) -> String {
        let mut reply = self.pick(RECOMMENDATION_INTRO);
        for (position, candidate) in candidates.iter().enumerate() {
            reply.push_str(&format!(
                "\n{}. {} - R$ {}",
                position + 1,
                candidate.label,
                format_price(candidate.price)
            ));
        }
        reply
    }
}

fn lowercase_first(line: &str) -> String {
    let mut chars = line.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// 89900.0 → "89.900"
fn format_price(price: f64) -> String {
    let digits = format!("{:.0}", price.max(0.0));
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_same_seed_same_phrasing() {
        let a = Phrasebook::new(Some(7));
        let b = Phrasebook::new(Some(7));
        let profile = CustomerProfile::default();

        for _ in 0..5 {
            assert_eq!(a.ask_next(&profile), b.ask_next(&profile));
        }
    }

    #[test]
    fn test_asks_for_first_missing_field() {
        let phrases = Phrasebook::new(Some(1));
        let mut profile = CustomerProfile::default();
        assert!(ASK_BUDGET.contains(&phrases.ask_next(&profile).as_str()));

        profile.budget = Some(60_000.0);
        assert!(ASK_BODY_TYPE.contains(&phrases.ask_next(&profile).as_str()));
    }

    #[test]
    fn test_recommendation_listing() {
        let phrases = Phrasebook::new(Some(3));
        let candidates = vec![RecommendationCandidate {
            vehicle_id: Uuid::new_v4(),
            similarity_score: 0.9,
            eligibility_tags: Vec::new(),
            composite_score: 0.8,
            label: "Jeep Compass 2020".to_string(),
            price: 119_900.0,
        }];

        let reply = phrases.recommendations(&candidates);
        assert!(reply.ends_with("1. Jeep Compass 2020 - R$ 119.900"));
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(999.0), "999");
        assert_eq!(format_price(1_000.0), "1.000");
        assert_eq!(format_price(89_900.4), "89.900");
        assert_eq!(format_price(1_250_000.0), "1.250.000");
    }

    #[test]
    fn test_handoff_uses_name() {
        let phrases = Phrasebook::new(Some(2));
        let profile = CustomerProfile {
            customer_name: Some("Ana".to_string()),
            ..Default::default()
        };
        assert!(phrases.handoff(&profile).starts_with("Ana, "));
    }
}
