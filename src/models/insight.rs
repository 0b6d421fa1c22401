// AI insights - persisted results of AI operations attached to instances

//! # AI Insights
//!
//! An `AIInsight` is the durable residue of an AI operation: the produced
//! text, a confidence estimate, and which model on which provider produced
//! it. Raw prompts and responses are never persisted - only the insight
//! summary survives.
//!
//! Insights usually hang off an instance. Detaching one (clearing
//! `instance_id`) lets it outlive an admin instance delete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of AI operation that produced an insight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Summarize,
    Analyze,
    Suggest,
    Classify,
    Extract,
    Translate,
    Generate,
}

impl std::fmt::Display for InsightKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InsightKind::Summarize => "summarize",
            InsightKind::Analyze => "analyze",
            InsightKind::Suggest => "suggest",
            InsightKind::Classify => "classify",
            InsightKind::Extract => "extract",
            InsightKind::Translate => "translate",
            InsightKind::Generate => "generate",
        };
        write!(f, "{}", s)
    }
}

/// A persisted AI result, optionally attached to an instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIInsight {
    pub id: Uuid,

    /// `None` for detached insights
    #[serde(default)]
    pub instance_id: Option<Uuid>,

    pub kind: InsightKind,

    pub content: String,

    /// 0.0..=1.0
    pub confidence: f64,

    pub model_id: String,
    pub provider_id: String,

    pub created_at: DateTime<Utc>,
}

impl AIInsight {
    pub fn new(
        instance_id: Option<Uuid>,
        kind: InsightKind,
        content: String,
        confidence: f64,
        model_id: String,
        provider_id: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id,
            kind,
            content,
            confidence: confidence.clamp(0.0, 1.0),
            model_id,
            provider_id,
            created_at: Utc::now(),
        }
    }

    /// Detach from the owning instance so the insight survives a cascade
    pub fn detach(&mut self) {
        self.instance_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped() {
        let insight = AIInsight::new(
            None,
            InsightKind::Summarize,
            "short summary".to_string(),
            1.4,
            "model-a".to_string(),
            "provider-a".to_string(),
        );
        assert_eq!(insight.confidence, 1.0);
    }
}
