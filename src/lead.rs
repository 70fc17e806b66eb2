//! Handoff lead sink
//!
//! Leads are what a human seller picks up after a customer asks for one.

use crate::models::HandoffLead;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[async_trait::async_trait]
pub trait LeadSink: Send + Sync {
    async fn emit(&self, lead: HandoffLead) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadRecord {
    pub lead: HandoffLead,
    pub received_at: DateTime<Utc>,
}

/// In-memory lead store
pub struct LeadLog {
    records: Arc<RwLock<HashMap<Uuid, LeadRecord>>>,
}

impl LeadLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Leads for a conversation, oldest first
    pub async fn list_for_conversation(&self, conversation_id: Uuid) -> Vec<LeadRecord> {
        let records = self.records.read().await;

        let mut items: Vec<_> = records
            .values()
            .filter(|record| record.lead.conversation_id == conversation_id)
            .cloned()
            .collect();

        items.sort_by_key(|record| record.lead.created_at);
        items
    }
}

impl Default for LeadLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LeadSink for LeadLog {
    async fn emit(&self, lead: HandoffLead) -> Result<()> {
        let record = LeadRecord {
            received_at: Utc::now(),
            lead,
        };

        info!(
            lead_id = %record.lead.lead_id,
            conversation_id = %record.lead.conversation_id,
            "Handoff lead recorded"
        );

        let mut records = self.records.write().await;
        records.insert(record.lead.lead_id, record);
        Ok(())
    }
}
