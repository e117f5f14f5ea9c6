//! Multi-domain fan-out: every handler assesses the question, the ones
//! above the threshold retrieve. Calls run concurrently within one step.

use std::sync::Arc;

use futures::future::join_all;

use super::state::DomainContribution;
use crate::pipeline::handlers::{DomainHandler, HandlerContext, RelevanceAssessment};

/// Relevance from every handler, in handler order.
pub async fn assess_all(
    handlers: &[Arc<dyn DomainHandler>],
    question: &str,
    ctx: &HandlerContext,
) -> Vec<RelevanceAssessment> {
    join_all(handlers.iter().map(|h| h.assess_relevance(question, ctx))).await
}

/// Assessments scoring strictly above `threshold`.
pub fn select_relevant(assessments: &[RelevanceAssessment], threshold: f32) -> Vec<&RelevanceAssessment> {
    assessments
        .iter()
        .filter(|a| a.relevance_score > threshold)
        .collect()
}

/// Retrieves from every selected domain with its suggested strategy.
/// A domain that fails to retrieve is left out with a warning.
pub async fn retrieve_selected(
    handlers: &[Arc<dyn DomainHandler>],
    selected: &[&RelevanceAssessment],
    ctx: &HandlerContext,
) -> Vec<DomainContribution> {
    let jobs = selected.iter().filter_map(|assessment| {
        let handler = handlers
            .iter()
            .find(|h| h.category() == assessment.category)?
            .clone();
        Some(async move {
            let result = handler.retrieve(&assessment.strategy, ctx).await;
            (assessment, result)
        })
    });

    join_all(jobs)
        .await
        .into_iter()
        .filter_map(|(assessment, result)| match result {
            Ok(dataset) => Some(DomainContribution {
                category: assessment.category.clone(),
                relevance_score: assessment.relevance_score,
                dataset,
            }),
            Err(e) => {
                tracing::warn!(category = %assessment.category, error = %e, "Domain retrieval failed; skipping");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::mock::MockLanguageModel;
    use crate::pipeline::handlers::common::testing::{context, deps_with};
    use crate::pipeline::handlers::{HandlerRegistry, RetrievalStrategy};

    fn assessment(category: &str, score: f32) -> RelevanceAssessment {
        RelevanceAssessment {
            category: category.into(),
            is_relevant: score > 0.5,
            relevance_score: score,
            strategy: RetrievalStrategy::new(30, 10),
            reasoning: String::new(),
        }
    }

    #[test]
    fn threshold_is_strict() {
        let all = vec![assessment("lab", 0.5), assessment("vitals", 0.51), assessment("pharmacy", 0.9)];
        let picked: Vec<&str> = select_relevant(&all, 0.5)
            .into_iter()
            .map(|a| a.category.as_str())
            .collect();
        assert_eq!(picked, vec!["vitals", "pharmacy"]);
    }

    #[tokio::test]
    async fn every_handler_is_assessed() {
        let llm = MockLanguageModel::new(r#"{"relevance_score": 0.1}"#)
            .on("DOMAIN: lab\n", r#"{"relevance_score": 0.8, "is_relevant": true}"#);
        let (deps, _) = deps_with(llm);
        let registry = HandlerRegistry::with_builtin_handlers(deps);
        let handlers = registry.handlers();

        let assessments = assess_all(&handlers, "how is my cholesterol?", &context()).await;
        assert_eq!(assessments.len(), 4);
        let selected = select_relevant(&assessments, 0.5);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].category, "lab");

        let contributions = retrieve_selected(&handlers, &selected, &context()).await;
        assert_eq!(contributions.len(), 1);
        assert_eq!(contributions[0].category, "lab");
        assert!(contributions[0].dataset.is_empty());
    }
}
