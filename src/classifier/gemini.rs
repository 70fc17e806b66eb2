//! Gemini-powered preference classifier
//!
//! Asks Gemini for a JSON object describing what the customer said. The
//! answer is parsed leniently: unknown or malformed fields are dropped, and
//! the deterministic keyword extraction fills whatever the model missed.

use super::{
    classify_keywords, parse_budget_text, ClassifierInput, ClassifierOutput, PreferenceClassifier,
};
use crate::config::ClassifierConfig;
use crate::conversation::history::ConversationHistory;
use crate::error::AdvisorError;
use crate::gemini::GeminiClient;
use crate::models::{BodyType, CustomerProfile, Usage};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

const SYSTEM_PROMPT: &str = r#"Você é o assistente de uma loja de carros seminovos.
Extraia as preferências do cliente a partir da última mensagem e do histórico.

Responda SOMENTE com um objeto JSON:
{
  "budget": number | null,
  "body_type": "hatch" | "sedan" | "suv" | "minivan" | "pickup" | "coupe" | "wagon" | null,
  "usage": "personal" | "family" | "work" | "uber_x" | "uber_comfort" | "uber_black" | null,
  "people_count": number | null,
  "has_trade_in": boolean | null,
  "preferred_model": string | null,
  "customer_name": string | null,
  "reply": "próxima pergunta curta e cordial em português",
  "ready_to_recommend": boolean
}

Regras:
- Use null quando o cliente não informou o campo
- ready_to_recommend só é true quando já dá para sugerir veículos
- Não invente valores"#;

pub struct GeminiClassifier {
    client: GeminiClient,
}

impl GeminiClassifier {
    pub fn new(cfg: &ClassifierConfig) -> Result<Self> {
        Ok(Self {
            client: GeminiClient::new(cfg)?,
        })
    }

    fn build_prompt(input: &ClassifierInput) -> Result<String> {
        Ok(format!(
            "PERFIL ATUAL:\n{}\n\nHISTÓRICO:\n{}\nÚLTIMA MENSAGEM:\n{}",
            serde_json::to_string(&input.profile)?,
            ConversationHistory::format_transcript(&input.history),
            input.message,
        ))
    }
}

#[async_trait]
impl PreferenceClassifier for GeminiClassifier {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn classify(&self, input: &ClassifierInput) -> Result<ClassifierOutput> {
        let prompt = Self::build_prompt(input)?;
        let response = self.client.generate_json(SYSTEM_PROMPT, &prompt).await?;

        let mut output = parse_classifier_response(&response)?;
        let keywords = classify_keywords(&input.message, &input.profile);
        fill_missing(&mut output.delta, &keywords.delta);
        output.ready_to_recommend |= keywords.ready_to_recommend;

        debug!(ready = output.ready_to_recommend, "Gemini classification parsed");
        Ok(output)
    }
}

fn fill_missing(delta: &mut CustomerProfile, fallback: &CustomerProfile) {
    let mut filled = fallback.clone();
    filled.merge(delta);
    *delta = filled;
}

/// Lenient parse of the model's JSON answer. Only a missing or unparseable
/// object is an error.
pub fn parse_classifier_response(response: &str) -> Result<ClassifierOutput> {
    let cleaned = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let object = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => {
            return Err(AdvisorError::ExternalService(format!(
                "Classifier response has no JSON object | raw={}",
                response
            )))
        }
    };

    let json: Value = serde_json::from_str(object).map_err(|e| {
        AdvisorError::ExternalService(format!("Failed to parse classifier response: {}", e))
    })?;

    let text = |key: &str| {
        json.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    let budget = match json.get("budget") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            parse_budget_text(s).or_else(|| s.trim().parse::<f64>().ok())
        }
        _ => None,
    }
    .filter(|b| b.is_finite() && *b > 0.0);

    let people_count = json
        .get("people_count")
        .and_then(Value::as_u64)
        .and_then(|n| u8::try_from(n).ok())
        .filter(|n| *n > 0);

    let delta = CustomerProfile {
        budget,
        body_type: text("body_type").and_then(BodyType::parse),
        usage: text("usage").and_then(Usage::parse),
        people_count,
        has_trade_in: json.get("has_trade_in").and_then(Value::as_bool),
        preferred_model: text("preferred_model").map(str::to_string),
        customer_name: text("customer_name").map(str::to_string),
    };

    Ok(ClassifierOutput {
        delta,
        reply: text("reply").map(str::to_string),
        ready_to_recommend: json
            .get("ready_to_recommend")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_fenced_json() {
        let raw = r#"```json
{"budget": 80000, "body_type": "SUV", "usage": "uber_black", "people_count": 4,
 "has_trade_in": true, "preferred_model": "Compass", "customer_name": null,
 "reply": "Ótimo! Prefere automático?", "ready_to_recommend": true}
```"#;
        let output = parse_classifier_response(raw).unwrap();
        assert_eq!(output.delta.budget, Some(80_000.0));
        assert_eq!(output.delta.body_type, Some(BodyType::Suv));
        assert_eq!(output.delta.usage, Some(Usage::UberBlack));
        assert_eq!(output.delta.people_count, Some(4));
        assert_eq!(output.delta.has_trade_in, Some(true));
        assert_eq!(output.delta.preferred_model.as_deref(), Some("Compass"));
        assert!(output.delta.customer_name.is_none());
        assert!(output.ready_to_recommend);
    }

    #[test]
    fn test_string_budgets_keep_decimal_comma_and_multiplier() {
        let budget = |raw: &str| {
            parse_classifier_response(&serde_json::json!({ "budget": raw }).to_string())
                .unwrap()
                .delta
                .budget
        };
        assert_eq!(budget("R$ 90.000,00"), Some(90_000.0));
        assert_eq!(budget("80 mil"), Some(80_000.0));
        assert_eq!(budget("120k"), Some(120_000.0));
        assert_eq!(budget("75000"), Some(75_000.0));
        assert_eq!(budget("não sei"), None);
    }

    #[test]
    fn test_malformed_fields_are_dropped() {
        let raw = r#"Claro! {"budget": "R$ 90.000", "body_type": "nave espacial",
            "people_count": 900, "usage": 3, "reply": "  "}"#;
        let output = parse_classifier_response(raw).unwrap();
        assert_eq!(output.delta.budget, Some(90_000.0));
        assert!(output.delta.body_type.is_none());
        assert!(output.delta.people_count.is_none());
        assert!(output.delta.usage.is_none());
        assert!(output.reply.is_none());
        assert!(!output.ready_to_recommend);
    }

    #[test]
    fn test_non_json_is_error() {
        let result = parse_classifier_response("desculpe, não entendi");
        assert!(matches!(result, Err(AdvisorError::ExternalService(_))));
    }

    #[test]
    fn test_keywords_fill_gaps_without_overriding() {
        let mut delta = CustomerProfile {
            budget: Some(70_000.0),
            ..Default::default()
        };
        let keywords = classify_keywords("um sedan até 90 mil", &CustomerProfile::default());
        fill_missing(&mut delta, &keywords.delta);

        assert_eq!(delta.budget, Some(70_000.0));
        assert_eq!(delta.body_type, Some(BodyType::Sedan));
    }
}
