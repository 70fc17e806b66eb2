//! Conversation state machine
//!
//! One inbound message is one turn:
//!
//! ```text
//! lock(conversation) → load or create → exit / handoff triggers
//!   → classifier (bounded, falls back) → merge delta → transition
//!   → recommendations (Negotiation) → reply → persist → unlock
//! ```
//!
//! Stages: Discovery → Negotiation; Handoff and Closed from anywhere;
//! Closed is terminal.

use super::history::ConversationMessage;
use super::locks::SessionLocks;
use super::phrasing::Phrasebook;
use super::store::ConversationStore;
use super::triggers::{requests_exit, requests_handoff};
use crate::classifier::{ClassifierInput, ClassifierOutput, PreferenceClassifier};
use crate::config::AdvisorConfig;
use crate::eligibility::{RuleSet, RuleStore};
use crate::error::AdvisorError;
use crate::lead::LeadSink;
use crate::models::{
    Conversation, ConversationFlag, HandoffLead, InboundMessage, RecommendationCandidate, Stage,
    TurnOutcome,
};
use crate::recommend::RecommendationScorer;
use crate::Result;
use chrono::{Datelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Stored history is capped independently of the classifier window.
const MAX_STORED_MESSAGES: usize = 200;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub exit_keyword: String,
    pub history_window: usize,
    pub recommendation_limit: usize,
    pub city_slug: String,
    /// Current UTC year when unset
    pub reference_year: Option<i32>,
    pub classifier_timeout: Duration,
    pub rule_timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &AdvisorConfig) -> Self {
        Self {
            exit_keyword: config.exit_keyword.clone(),
            history_window: config.history_window,
            recommendation_limit: config.recommendation_limit,
            city_slug: config.default_city.clone(),
            reference_year: config.reference_year,
            classifier_timeout: Duration::from_millis(config.classifier.timeout_ms),
            rule_timeout: Duration::from_secs(2),
        }
    }

    fn reference_year(&self) -> i32 {
        self.reference_year.unwrap_or_else(|| Utc::now().year())
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&AdvisorConfig::default())
    }
}

pub struct ConversationEngine {
    store: Arc<dyn ConversationStore>,
    classifier: Arc<dyn PreferenceClassifier>,
    scorer: Arc<RecommendationScorer>,
    rules: Arc<dyn RuleStore>,
    leads: Arc<dyn LeadSink>,
    phrasebook: Phrasebook,
    locks: SessionLocks,
    settings: EngineSettings,
}

impl ConversationEngine {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        classifier: Arc<dyn PreferenceClassifier>,
        scorer: Arc<RecommendationScorer>,
        rules: Arc<dyn RuleStore>,
        leads: Arc<dyn LeadSink>,
        phrasebook: Phrasebook,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            classifier,
            scorer,
            rules,
            leads,
            phrasebook,
            locks: SessionLocks::new(),
            settings,
        }
    }

    /// Process one inbound message. Turns for the same channel are
    /// serialized; component failures degrade the reply instead of failing
    /// the turn. Only a missing channel or a store failure is an error.
    pub async fn handle_turn(&self, inbound: InboundMessage) -> Result<TurnOutcome> {
        let channel = inbound.channel.trim();
        if channel.is_empty() {
            return Err(AdvisorError::UserInput("channel is required".to_string()));
        }

        let conversation_id = Conversation::id_for_channel(channel);
        let guard = self.locks.acquire(conversation_id).await;
        let outcome = self.run_turn(conversation_id, channel, inbound.message.trim()).await;
        drop(guard);
        self.locks.prune();

        outcome
    }

    pub async fn load_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        self.store.load(conversation_id).await
    }

    /// Remove a conversation; the next message on its channel starts fresh.
    pub async fn delete_conversation(&self, conversation_id: Uuid) -> Result<bool> {
        let deleted = self.store.delete(conversation_id).await?;
        if deleted {
            info!(%conversation_id, "Conversation deleted");
        }
        Ok(deleted)
    }

    async fn run_turn(
        &self,
        conversation_id: Uuid,
        channel: &str,
        message: &str,
    ) -> Result<TurnOutcome> {
        let loaded = self.store.load(conversation_id).await?;
        let is_new = loaded.is_none();
        let mut conversation = loaded.unwrap_or_else(|| Conversation::new(channel));

        if conversation.stage == Stage::Closed {
            debug!(%conversation_id, "Message on closed conversation");
            return Ok(outcome(&conversation, self.phrasebook.closed(), Vec::new()));
        }

        let classifier_history = conversation
            .history
            .recent_messages(self.settings.history_window);
        conversation
            .history
            .add_message(ConversationMessage::customer(message));

        // ================= Deterministic triggers =================

        let exit = requests_exit(message, &self.settings.exit_keyword);

        if requests_handoff(message) {
            if conversation.flags.insert(ConversationFlag::HandoffRequested) {
                self.emit_lead(&conversation, message).await;
            }
            if !exit {
                transition(&mut conversation, Stage::Handoff);
            }
        }

        if exit {
            transition(&mut conversation, Stage::Closed);
            let reply = self.phrasebook.closing();
            return self.finish(conversation, is_new, reply, Vec::new()).await;
        }

        // ================= Classifier =================

        let input = ClassifierInput {
            message: message.to_string(),
            history: classifier_history,
            profile: conversation.profile.clone(),
        };
        let classified = self.classify(conversation_id, &input).await;
        let classifier_failed = classified.is_none();

        let mut ready = false;
        let mut classifier_reply = None;
        match classified {
            Some(output) => {
                if conversation.profile.merge(&output.delta) {
                    debug!(%conversation_id, "Profile updated");
                }
                if output.delta.has_trade_in == Some(true) {
                    conversation.flags.insert(ConversationFlag::TradeInInterest);
                }
                ready = output.ready_to_recommend;
                classifier_reply = output.reply;
            }
            None => {
                conversation.flags.insert(ConversationFlag::ClassifierFallback);
            }
        }

        if conversation.stage == Stage::Discovery && ready && conversation.profile.has_search_anchor() {
            transition(&mut conversation, Stage::Negotiation);
        }

        // ================= Reply =================

        let mut recommendations = Vec::new();
        let reply = if conversation.stage == Stage::Handoff {
            self.phrasebook.handoff(&conversation.profile)
        } else if classifier_failed {
            self.phrasebook.reprompt()
        } else if conversation.stage == Stage::Negotiation && ready {
            recommendations = self.recommend(&conversation, message).await;
            if recommendations.is_empty() {
                self.phrasebook.no_matches()
            } else {
                conversation.flags.insert(ConversationFlag::RecommendationsShown);
                self.phrasebook.recommendations(&recommendations)
            }
        } else {
            classifier_reply.unwrap_or_else(|| self.phrasebook.ask_next(&conversation.profile))
        };

        self.finish(conversation, is_new, reply, recommendations).await
    }

    /// None when the classifier failed or timed out.
    async fn classify(&self, conversation_id: Uuid, input: &ClassifierInput) -> Option<ClassifierOutput> {
        match tokio::time::timeout(self.settings.classifier_timeout, self.classifier.classify(input)).await {
            Ok(Ok(output)) => Some(output),
            Ok(Err(error)) => {
                warn!(
                    %conversation_id,
                    classifier = self.classifier.name(),
                    %error,
                    "Classifier failed, keeping prior profile"
                );
                None
            }
            Err(_) => {
                warn!(
                    %conversation_id,
                    classifier = self.classifier.name(),
                    timeout_ms = self.settings.classifier_timeout.as_millis() as u64,
                    "Classifier timed out, keeping prior profile"
                );
                None
            }
        }
    }

    async fn emit_lead(&self, conversation: &Conversation, message: &str) {
        let lead = HandoffLead {
            lead_id: Uuid::new_v4(),
            conversation_id: conversation.id,
            triggering_message: message.to_string(),
            profile_snapshot: conversation.profile.clone(),
            created_at: Utc::now(),
        };

        if let Err(error) = self.leads.emit(lead).await {
            error!(conversation_id = %conversation.id, %error, "Failed to emit handoff lead");
        }
    }

    async fn recommend(&self, conversation: &Conversation, message: &str) -> Vec<RecommendationCandidate> {
        let city = &self.settings.city_slug;

        let rules = match tokio::time::timeout(self.settings.rule_timeout, self.rules.rules_for_city(city)).await {
            Ok(Ok(rows)) => RuleSet::from_rows(&rows),
            Ok(Err(error)) => {
                warn!(city = %city, %error, "Rule store failed, using static rules only");
                RuleSet::empty()
            }
            Err(_) => {
                warn!(city = %city, "Rule store timed out, using static rules only");
                RuleSet::empty()
            }
        };

        let intent = conversation.profile.intent_text(message);
        match self
            .scorer
            .rank(
                &conversation.profile,
                &intent,
                city,
                self.settings.reference_year(),
                &rules,
                self.settings.recommendation_limit,
            )
            .await
        {
            Ok(candidates) => candidates,
            Err(error) => {
                warn!(conversation_id = %conversation.id, %error, "Recommendation failed");
                Vec::new()
            }
        }
    }

    async fn finish(
        &self,
        mut conversation: Conversation,
        is_new: bool,
        reply: String,
        recommendations: Vec<RecommendationCandidate>,
    ) -> Result<TurnOutcome> {
        conversation
            .history
            .add_message(ConversationMessage::assistant(reply.clone()));
        conversation.history.trim_to_recent(MAX_STORED_MESSAGES);
        conversation.updated_at = Utc::now();

        if is_new {
            self.store.create(&conversation).await?;
        } else if !self.store.update(&conversation).await? {
            info!(
                conversation_id = %conversation.id,
                "Conversation deleted during turn, not persisting"
            );
        }

        info!(
            conversation_id = %conversation.id,
            stage = %conversation.stage,
            flags = conversation.flags.len(),
            recommendations = recommendations.len(),
            "Turn completed"
        );

        Ok(outcome(&conversation, reply, recommendations))
    }
}

fn transition(conversation: &mut Conversation, next: Stage) {
    if conversation.stage == next {
        return;
    }
    if conversation.stage.can_transition_to(next) {
        info!(
            conversation_id = %conversation.id,
            from = %conversation.stage,
            to = %next,
            "Stage transition"
        );
        conversation.stage = next;
    } else {
        debug!(
            conversation_id = %conversation.id,
            from = %conversation.stage,
            to = %next,
            "Transition not allowed"
        );
    }
}

fn outcome(
    conversation: &Conversation,
    response: String,
    recommendations: Vec<RecommendationCandidate>,
) -> TurnOutcome {
    TurnOutcome {
        conversation_id: conversation.id,
        stage: conversation.stage,
        profile: conversation.profile.clone(),
        flags: conversation.flags.clone(),
        response,
        continue_conversation: matches!(conversation.stage, Stage::Discovery | Stage::Negotiation),
        recommendations,
    }
}
