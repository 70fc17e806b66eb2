//! Core data models for the vehicle advisor

use crate::conversation::history::ConversationHistory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

//
// ================= Vehicle Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BodyType {
    Hatch,
    Sedan,
    Suv,
    Minivan,
    Pickup,
    Coupe,
    Wagon,
}

impl BodyType {
    /// Lenient parse of catalog/customer wording. Unknown wording yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "hatch" | "hatchback" => Some(BodyType::Hatch),
            "sedan" | "sedã" | "seda" => Some(BodyType::Sedan),
            "suv" | "utilitario" | "utilitário" => Some(BodyType::Suv),
            "minivan" | "van" => Some(BodyType::Minivan),
            "pickup" | "picape" | "caminhonete" => Some(BodyType::Pickup),
            "coupe" | "cupê" | "cupe" => Some(BodyType::Coupe),
            "wagon" | "perua" | "station wagon" => Some(BodyType::Wagon),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Fuel {
    Flex,
    Gasoline,
    Ethanol,
    Diesel,
    Hybrid,
    Electric,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Transmission {
    Manual,
    Automatic,
    Cvt,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum FuelEconomyTier {
    Low,
    Medium,
    High,
}

impl FuelEconomyTier {
    pub fn from_km_per_liter(km_per_liter: f32) -> Self {
        if km_per_liter < 9.0 {
            FuelEconomyTier::Low
        } else if km_per_liter < 13.0 {
            FuelEconomyTier::Medium
        } else {
            FuelEconomyTier::High
        }
    }
}

//
// ================= Ride-hailing =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RideCategory {
    X,
    Comfort,
    Black,
}

impl RideCategory {
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_lowercase().replace(['_', '-', ' '], "");
        match lowered.trim_start_matches("uber") {
            "x" => Some(RideCategory::X),
            "comfort" => Some(RideCategory::Comfort),
            "black" => Some(RideCategory::Black),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RideCategory::X => "x",
            RideCategory::Comfort => "comfort",
            RideCategory::Black => "black",
        }
    }
}

impl fmt::Display for RideCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RideCategory::X => "Uber X",
            RideCategory::Comfort => "Uber Comfort",
            RideCategory::Black => "Uber Black",
        };
        write!(f, "{}", s)
    }
}

/// What the customer intends to do with the vehicle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Usage {
    Personal,
    Family,
    Work,
    UberX,
    UberComfort,
    UberBlack,
}

impl Usage {
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_lowercase();
        if let Some(category) = RideCategory::parse(&lowered) {
            return Some(match category {
                RideCategory::X => Usage::UberX,
                RideCategory::Comfort => Usage::UberComfort,
                RideCategory::Black => Usage::UberBlack,
            });
        }
        match lowered.as_str() {
            "personal" | "pessoal" | "passeio" => Some(Usage::Personal),
            "family" | "familia" | "família" => Some(Usage::Family),
            "work" | "trabalho" | "aplicativo" | "app" | "uber" => Some(Usage::Work),
            _ => None,
        }
    }

    /// Tag a vehicle must carry to stay in the candidate list.
    pub fn required_tag(&self) -> Option<EligibilityTag> {
        match self {
            Usage::Personal => None,
            Usage::Family => Some(EligibilityTag::Family),
            Usage::Work => Some(EligibilityTag::Work),
            Usage::UberX => Some(EligibilityTag::UberX),
            Usage::UberComfort => Some(EligibilityTag::UberComfort),
            Usage::UberBlack => Some(EligibilityTag::UberBlack),
        }
    }
}

//
// ================= Vehicle =================
//

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VehicleFeatures {
    #[serde(default)]
    pub air_conditioning: bool,
    #[serde(default)]
    pub power_steering: bool,
    #[serde(default)]
    pub power_windows: bool,
    #[serde(default)]
    pub airbags: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vehicle {
    pub id: Uuid,
    pub brand: String,
    pub model: String,
    pub year: i32,
    #[serde(default)]
    pub mileage_km: u32,
    pub price: f64,
    #[serde(default)]
    pub body_type: Option<BodyType>,
    #[serde(default)]
    pub fuel: Option<Fuel>,
    #[serde(default)]
    pub transmission: Option<Transmission>,
    pub door_count: u8,
    #[serde(default)]
    pub features: VehicleFeatures,
    #[serde(default)]
    pub km_per_liter: Option<f32>,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

impl Vehicle {
    pub fn age(&self, reference_year: i32) -> i32 {
        reference_year - self.year
    }

    /// Explicit consumption wins; electrified drivetrains are High without it.
    pub fn fuel_economy_tier(&self) -> Option<FuelEconomyTier> {
        match (self.km_per_liter, self.fuel) {
            (Some(kml), _) => Some(FuelEconomyTier::from_km_per_liter(kml)),
            (None, Some(Fuel::Hybrid | Fuel::Electric)) => Some(FuelEconomyTier::High),
            _ => None,
        }
    }

    pub fn label(&self) -> String {
        format!("{} {} {}", self.brand, self.model, self.year)
    }

    /// Text fed to the embedding provider. Changing any field used here
    /// changes the fingerprint and forces re-embedding.
    pub fn descriptive_text(&self) -> String {
        let mut text = format!("{} {} {}", self.brand, self.model, self.year);

        if let Some(body) = self.body_type {
            text.push_str(&format!(" {:?}", body).to_lowercase());
        }
        if let Some(fuel) = self.fuel {
            text.push_str(&format!(" {:?}", fuel).to_lowercase());
        }
        if let Some(transmission) = self.transmission {
            text.push_str(&format!(" {:?}", transmission).to_lowercase());
        }
        text.push_str(&format!(" {} portas", self.door_count));

        let features = &self.features;
        for (present, name) in [
            (features.air_conditioning, "ar-condicionado"),
            (features.power_steering, "direção hidráulica"),
            (features.power_windows, "vidros elétricos"),
            (features.airbags, "airbags"),
        ] {
            if present {
                text.push(' ');
                text.push_str(name);
            }
        }

        text
    }
}

//
// ================= Customer Profile =================
//

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CustomerProfile {
    pub budget: Option<f64>,
    pub body_type: Option<BodyType>,
    pub usage: Option<Usage>,
    pub people_count: Option<u8>,
    pub has_trade_in: Option<bool>,
    pub preferred_model: Option<String>,
    pub customer_name: Option<String>,
}

impl CustomerProfile {
    /// Non-destructive merge: only `Some` values in the delta overwrite.
    /// Returns true when any field changed.
    pub fn merge(&mut self, delta: &CustomerProfile) -> bool {
        let before = self.clone();

        if delta.budget.is_some() {
            self.budget = delta.budget;
        }
        if delta.body_type.is_some() {
            self.body_type = delta.body_type;
        }
        if delta.usage.is_some() {
            self.usage = delta.usage;
        }
        if delta.people_count.is_some() {
            self.people_count = delta.people_count;
        }
        if delta.has_trade_in.is_some() {
            self.has_trade_in = delta.has_trade_in;
        }
        if let Some(model) = delta.preferred_model.as_ref() {
            self.preferred_model = Some(model.clone());
        }
        if let Some(name) = delta.customer_name.as_ref() {
            self.customer_name = Some(name.clone());
        }

        *self != before
    }

    /// Enough to search on: budget, body type or a preferred model.
    pub fn has_search_anchor(&self) -> bool {
        self.budget.is_some() || self.body_type.is_some() || self.preferred_model.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == CustomerProfile::default()
    }

    /// Free-text intent used to query the similarity store.
    pub fn intent_text(&self, message: &str) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let Some(model) = &self.preferred_model {
            parts.push(model.clone());
        }
        if let Some(body) = self.body_type {
            parts.push(format!("{:?}", body).to_lowercase());
        }
        if let Some(usage) = self.usage {
            parts.push(format!("{:?}", usage).to_lowercase());
        }
        if let Some(budget) = self.budget {
            parts.push(format!("até {:.0}", budget));
        }
        parts.push(message.trim().to_string());

        parts.join(" ")
    }
}

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Discovery,
    Negotiation,
    Handoff,
    Closed,
}

impl Stage {
    /// Discovery → Negotiation; Handoff and Closed from anywhere; Closed is terminal.
    pub fn can_transition_to(self, next: Stage) -> bool {
        match (self, next) {
            (Stage::Closed, _) => false,
            (_, Stage::Closed) | (_, Stage::Handoff) => true,
            (Stage::Discovery, Stage::Negotiation) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Discovery => "discovery",
            Stage::Negotiation => "negotiation",
            Stage::Handoff => "handoff",
            Stage::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversationFlag {
    HandoffRequested,
    RecommendationsShown,
    TradeInInterest,
    ClassifierFallback,
}

/// Append-only set of session flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct FlagSet(BTreeSet<ConversationFlag>);

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the flag was not present before.
    pub fn insert(&mut self, flag: ConversationFlag) -> bool {
        self.0.insert(flag)
    }

    pub fn contains(&self, flag: ConversationFlag) -> bool {
        self.0.contains(&flag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversationFlag> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub channel: String,
    pub stage: Stage,
    pub profile: CustomerProfile,
    pub flags: FlagSet,
    pub history: ConversationHistory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(channel: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Self::id_for_channel(channel),
            channel: channel.to_string(),
            stage: Stage::Discovery,
            profile: CustomerProfile::default(),
            flags: FlagSet::new(),
            history: ConversationHistory::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Stable conversation id for a channel identifier (e.g. a phone number).
    pub fn id_for_channel(channel: &str) -> Uuid {
        let hash = Sha256::digest(channel.trim().as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash[..16]);

        // Set UUID version (4) and variant (RFC4122) bits.
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        Uuid::from_bytes(bytes)
    }
}

//
// ================= Eligibility =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EligibilityRuleRow {
    pub city_slug: String,
    pub category: RideCategory,
    pub brand: String,
    pub model: String,
    pub min_year: i32,
    pub source_url: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Eligibility {
    pub uber_x: bool,
    pub uber_comfort: bool,
    pub uber_black: bool,
    pub family_suitable: bool,
    pub work_suitable: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityTag {
    UberX,
    UberComfort,
    UberBlack,
    Family,
    Work,
}

impl Eligibility {
    pub fn has(&self, tag: EligibilityTag) -> bool {
        match tag {
            EligibilityTag::UberX => self.uber_x,
            EligibilityTag::UberComfort => self.uber_comfort,
            EligibilityTag::UberBlack => self.uber_black,
            EligibilityTag::Family => self.family_suitable,
            EligibilityTag::Work => self.work_suitable,
        }
    }

    pub fn tags(&self) -> Vec<EligibilityTag> {
        [
            EligibilityTag::UberX,
            EligibilityTag::UberComfort,
            EligibilityTag::UberBlack,
            EligibilityTag::Family,
            EligibilityTag::Work,
        ]
        .into_iter()
        .filter(|tag| self.has(*tag))
        .collect()
    }
}

//
// ================= Recommendation =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationCandidate {
    pub vehicle_id: Uuid,
    pub similarity_score: f32,
    pub eligibility_tags: Vec<EligibilityTag>,
    pub composite_score: f64,
    pub label: String,
    pub price: f64,
}

//
// ================= Turn I/O =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub conversation_id: Uuid,
    pub stage: Stage,
    pub profile: CustomerProfile,
    pub flags: FlagSet,
    pub response: String,
    pub continue_conversation: bool,
    pub recommendations: Vec<RecommendationCandidate>,
}

/// Payload delivered to the lead sink when a customer asks for a human.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffLead {
    pub lead_id: Uuid,
    pub conversation_id: Uuid,
    pub triggering_message: String,
    pub profile_snapshot: CustomerProfile,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_never_clears_fields() {
        let mut profile = CustomerProfile {
            budget: Some(80_000.0),
            body_type: Some(BodyType::Suv),
            customer_name: Some("Ana".to_string()),
            ..Default::default()
        };

        let changed = profile.merge(&CustomerProfile::default());
        assert!(!changed);
        assert_eq!(profile.budget, Some(80_000.0));
        assert_eq!(profile.body_type, Some(BodyType::Suv));
        assert_eq!(profile.customer_name.as_deref(), Some("Ana"));
    }

    #[test]
    fn test_merge_overwrites_supplied_fields() {
        let mut profile = CustomerProfile {
            budget: Some(80_000.0),
            ..Default::default()
        };

        let delta = CustomerProfile {
            budget: Some(95_000.0),
            usage: Some(Usage::UberBlack),
            ..Default::default()
        };

        assert!(profile.merge(&delta));
        assert_eq!(profile.budget, Some(95_000.0));
        assert_eq!(profile.usage, Some(Usage::UberBlack));
    }

    #[test]
    fn test_eligibility_serializes_snake_case() {
        let eligibility = Eligibility {
            uber_black: true,
            work_suitable: true,
            ..Default::default()
        };
        let json = serde_json::to_value(eligibility).unwrap();
        assert_eq!(json["uber_black"], true);
        assert_eq!(json["work_suitable"], true);
        assert_eq!(json["family_suitable"], false);
        assert!(json.get("uberBlack").is_none());
    }

    #[test]
    fn test_flag_set_semantics() {
        let mut flags = FlagSet::new();
        assert!(flags.insert(ConversationFlag::HandoffRequested));
        assert!(!flags.insert(ConversationFlag::HandoffRequested));
        assert_eq!(flags.len(), 1);
        assert!(flags.contains(ConversationFlag::HandoffRequested));

        let json = serde_json::to_string(&flags).unwrap();
        assert_eq!(json, r#"["handoff_requested"]"#);
    }

    #[test]
    fn test_stage_transitions() {
        assert!(Stage::Discovery.can_transition_to(Stage::Negotiation));
        assert!(Stage::Discovery.can_transition_to(Stage::Handoff));
        assert!(Stage::Negotiation.can_transition_to(Stage::Closed));
        assert!(Stage::Handoff.can_transition_to(Stage::Closed));
        assert!(!Stage::Negotiation.can_transition_to(Stage::Discovery));
        assert!(!Stage::Handoff.can_transition_to(Stage::Negotiation));
        assert!(!Stage::Closed.can_transition_to(Stage::Handoff));
    }

    #[test]
    fn test_channel_id_is_stable() {
        let a = Conversation::id_for_channel("+5511999990000");
        let b = Conversation::id_for_channel(" +5511999990000 ");
        let c = Conversation::id_for_channel("+5511999990001");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.get_version_num(), 4);
    }

    #[test]
    fn test_parsers() {
        assert_eq!(BodyType::parse("Sedã"), Some(BodyType::Sedan));
        assert_eq!(BodyType::parse("crossover-ish"), None);
        assert_eq!(RideCategory::parse("UberBlack"), Some(RideCategory::Black));
        assert_eq!(RideCategory::parse("uber_comfort"), Some(RideCategory::Comfort));
        assert_eq!(Usage::parse("uber x"), Some(Usage::UberX));
        assert_eq!(Usage::parse("família"), Some(Usage::Family));
    }

    #[test]
    fn test_fuel_economy_tier() {
        let mut vehicle = Vehicle {
            id: Uuid::new_v4(),
            brand: "Toyota".to_string(),
            model: "Corolla".to_string(),
            year: 2022,
            mileage_km: 30_000,
            price: 120_000.0,
            body_type: Some(BodyType::Sedan),
            fuel: Some(Fuel::Hybrid),
            transmission: Some(Transmission::Cvt),
            door_count: 4,
            features: VehicleFeatures::default(),
            km_per_liter: None,
            available: true,
        };
        assert_eq!(vehicle.fuel_economy_tier(), Some(FuelEconomyTier::High));

        vehicle.km_per_liter = Some(8.0);
        assert_eq!(vehicle.fuel_economy_tier(), Some(FuelEconomyTier::Low));

        vehicle.km_per_liter = None;
        vehicle.fuel = Some(Fuel::Flex);
        assert_eq!(vehicle.fuel_economy_tier(), None);
    }
}
