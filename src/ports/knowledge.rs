use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Topic under which protocol reliability scores are filed
pub const RELIABILITY_TOPIC: &str = "protocol_reliability";

/// Score assumed for protocols the knowledge base knows nothing about
pub const DEFAULT_RELIABILITY: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchFact {
    pub topic: String,
    /// Usually a protocol name
    pub subject: String,
    /// Historical reliability in [0, 1], when the fact carries one
    pub reliability: Option<f64>,
    pub note: String,
}

/// Read-only research lookups (reliability scores, historical notes)
#[cfg_attr(test, mockall::automock)]
pub trait KnowledgeBase: Send + Sync {
    fn query(&self, topic: &str) -> Vec<ResearchFact>;
}

/// Protocol → reliability lookup built once per query
#[derive(Debug, Clone, Default)]
pub struct ReliabilityTable {
    scores: HashMap<String, f64>,
}

impl ReliabilityTable {
    pub fn from_knowledge(kb: &dyn KnowledgeBase) -> Self {
        let scores = kb
            .query(RELIABILITY_TOPIC)
            .into_iter()
            .filter_map(|f| f.reliability.map(|r| (f.subject.to_ascii_lowercase(), r.clamp(0.0, 1.0))))
            .collect();
        Self { scores }
    }

    pub fn score(&self, protocol: &str) -> f64 {
        self.scores
            .get(&protocol.to_ascii_lowercase())
            .copied()
            .unwrap_or(DEFAULT_RELIABILITY)
    }
}
