//! Configuration-backed research and risk parameter sources

use std::collections::BTreeMap;

use crate::config::loader::KnowledgeSection;
use crate::config::Config;
use crate::domain::{ProfileError, RiskLevel, RiskProfile};
use crate::ports::{KnowledgeBase, ResearchFact, RiskParameters, RELIABILITY_TOPIC};

/// In-memory knowledge base; facts are fixed for the process lifetime
#[derive(Debug, Clone, Default)]
pub struct StaticKnowledgeBase {
    facts: Vec<ResearchFact>,
}

impl StaticKnowledgeBase {
    pub fn new(facts: Vec<ResearchFact>) -> Self {
        Self { facts }
    }

    pub fn from_section(section: &KnowledgeSection) -> Self {
        let mut facts: Vec<ResearchFact> = section
            .reliability
            .iter()
            .map(|(protocol, score)| ResearchFact {
                topic: RELIABILITY_TOPIC.to_string(),
                subject: protocol.clone(),
                reliability: Some(*score),
                note: String::new(),
            })
            .collect();

        facts.extend(section.notes.iter().map(|n| ResearchFact {
            topic: n.topic.clone(),
            subject: n.subject.clone(),
            reliability: None,
            note: n.note.clone(),
        }));

        Self { facts }
    }
}

impl KnowledgeBase for StaticKnowledgeBase {
    fn query(&self, topic: &str) -> Vec<ResearchFact> {
        self.facts.iter().filter(|f| f.topic == topic).cloned().collect()
    }
}

/// Risk profiles read from the `[risk]` section
#[derive(Debug, Clone)]
pub struct ConfigRiskParameters {
    profiles: BTreeMap<RiskLevel, RiskProfile>,
}

impl ConfigRiskParameters {
    pub fn from_config(config: &Config) -> Self {
        Self {
            profiles: RiskLevel::ALL
                .iter()
                .map(|level| (*level, config.profile(*level)))
                .collect(),
        }
    }

    pub fn from_profiles(profiles: impl IntoIterator<Item = RiskProfile>) -> Self {
        Self {
            profiles: profiles.into_iter().map(|p| (p.level, p)).collect(),
        }
    }
}

impl RiskParameters for ConfigRiskParameters {
    fn load(&self, level: RiskLevel) -> Result<RiskProfile, ProfileError> {
        self.profiles
            .get(&level)
            .cloned()
            .ok_or(ProfileError::MissingProfile(level))
    }
}
