//! Per-family translate-now / defer decisions.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::access::{AccessTracker, UsagePattern};
use crate::error::StoreError;
use crate::store::{PersistenceStore, StrategyName};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationDecision {
    pub translate_now: bool,
    pub strategy: StrategyName,
    /// Human-readable explanation, for logs and diagnostics.
    pub reason: String,
}

/// Suggestion for a family's stored strategy, from its observed usage.
pub fn recommended_strategy(pattern: UsagePattern) -> StrategyName {
    if pattern.avg_accesses_per_day > 10.0 && pattern.content_reuse_rate > 0.6 {
        StrategyName::Immediate
    } else if pattern.avg_accesses_per_day < 3.0 {
        StrategyName::OnDemand
    } else {
        StrategyName::Hybrid
    }
}

pub struct StrategyAdvisor {
    tracker: Arc<AccessTracker>,
    store: Arc<dyn PersistenceStore>,
}

impl StrategyAdvisor {
    pub fn new(tracker: Arc<AccessTracker>, store: Arc<dyn PersistenceStore>) -> Self {
        Self { tracker, store }
    }

    /// Never fails: a strategy lookup error defers translation.
    pub async fn decide(&self, content_id: &str, family_id: &str) -> TranslationDecision {
        let strategy = match self.store.get_family_strategy(family_id).await {
            Ok(strategy) => strategy,
            Err(e) => {
                warn!(family_id, content_id, error = %e, "strategy lookup failed, deferring");
                return TranslationDecision {
                    translate_now: false,
                    strategy: StrategyName::default(),
                    reason: format!("strategy lookup failed: {e}"),
                };
            }
        };

        let decision = match strategy {
            StrategyName::Immediate => TranslationDecision {
                translate_now: true,
                strategy,
                reason: "family translates all content immediately".to_string(),
            },
            StrategyName::OnDemand => TranslationDecision {
                translate_now: false,
                strategy,
                reason: "family translates only on request".to_string(),
            },
            StrategyName::Hybrid => {
                let metrics = self.tracker.metrics_for(family_id);
                let high_usage = metrics.is_high_usage_family();
                let dual_language = metrics.is_dual_language_active();
                TranslationDecision {
                    translate_now: high_usage && dual_language,
                    strategy,
                    reason: format!(
                        "hybrid: avg {:.1} accesses/content (high usage: {high_usage}), \
                         {} languages (dual-language active: {dual_language})",
                        metrics.avg_accesses_per_content,
                        metrics.language_breakdown.len(),
                    ),
                }
            }
        };
        debug!(
            content_id,
            family_id,
            strategy = %decision.strategy,
            translate_now = decision.translate_now,
            reason = %decision.reason,
            "translation decision"
        );
        decision
    }

    pub async fn should_translate_now(&self, content_id: &str, family_id: &str) -> bool {
        self.decide(content_id, family_id).await.translate_now
    }

    pub fn suggest_strategy(&self, family_id: &str) -> StrategyName {
        recommended_strategy(self.tracker.usage_pattern(family_id))
    }

    /// Store the suggested strategy if it differs from the current one.
    /// Returns the strategy in effect afterwards.
    pub async fn apply_suggested_strategy(&self, family_id: &str) -> Result<StrategyName, StoreError> {
        let suggested = self.suggest_strategy(family_id);
        let current = self.store.get_family_strategy(family_id).await?;
        if current != suggested {
            self.store.set_family_strategy(family_id, suggested).await?;
            info!(family_id, from = %current, to = %suggested, "family strategy updated");
        }
        Ok(suggested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(avg_accesses_per_day: f64, content_reuse_rate: f64) -> UsagePattern {
        UsagePattern {
            avg_accesses_per_day,
            content_reuse_rate,
        }
    }

    #[test]
    fn recommendation_thresholds() {
        assert_eq!(recommended_strategy(pattern(12.0, 0.7)), StrategyName::Immediate);
        assert_eq!(recommended_strategy(pattern(12.0, 0.6)), StrategyName::Hybrid);
        assert_eq!(recommended_strategy(pattern(10.0, 0.9)), StrategyName::Hybrid);
        assert_eq!(recommended_strategy(pattern(2.9, 0.9)), StrategyName::OnDemand);
        assert_eq!(recommended_strategy(pattern(3.0, 0.0)), StrategyName::Hybrid);
    }
}
