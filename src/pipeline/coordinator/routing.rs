use std::time::Duration;

use serde::Deserialize;

use super::state::{RouteKind, RoutingDecision};
use crate::capabilities::{with_timeout, LanguageModel};
use crate::models::lenient;
use crate::pipeline::structuring::prompt::route_question_messages;
use crate::pipeline::structuring::{normalize_category_label, salvage_json};

/// Thresholds and defaults the router applies to the model's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingPolicy {
    pub confidence_threshold: f32,
    /// Label used when the answer is missing or unreadable.
    pub default_domain: String,
}

#[derive(Debug, Deserialize)]
struct RawRoute {
    #[serde(default, alias = "category", alias = "route", deserialize_with = "lenient::opt_string")]
    domain: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    reasoning: Option<String>,
}

fn decision(route: RouteKind, domain: Option<String>, confidence: f32, reasoning: String, raw_label: &str) -> RoutingDecision {
    RoutingDecision {
        route,
        domain,
        confidence,
        reasoning,
        raw_label: raw_label.to_string(),
        widened: false,
    }
}

/// Maps a label onto a route, without any confidence check.
fn route_for_label(label: &str, domains: &[String]) -> Option<(RouteKind, Option<String>)> {
    let label = normalize_category_label(label);
    if domains.iter().any(|d| d == &label) {
        return Some((RouteKind::SingleDomain, Some(label)));
    }
    match label.as_str() {
        "medical_consultation" | "consultation" | "general" | "general_medical" => {
            Some((RouteKind::Consultation, None))
        }
        "multi_domain" | "multi" | "multiple" | "all" => Some((RouteKind::MultiDomain, None)),
        _ => None,
    }
}

/// Turns a routing reply into a decision.
///
/// Unknown or unclear labels widen to multi-domain, as do single-domain
/// answers below the confidence threshold. A reply with no label at all
/// uses the policy default.
pub fn resolve_route(reply: &str, domains: &[String], policy: &RoutingPolicy) -> RoutingDecision {
    let (label, confidence, reasoning) = match salvage_json(reply) {
        Ok((value, _)) => match serde_json::from_value::<RawRoute>(value) {
            Ok(raw) => (
                raw.domain.unwrap_or_default(),
                raw.confidence.map(|c| c.clamp(0.0, 1.0) as f32),
                raw.reasoning.unwrap_or_default(),
            ),
            Err(_) => (String::new(), None, String::new()),
        },
        Err(_) => (
            reply.lines().find(|l| !l.trim().is_empty()).unwrap_or("").to_string(),
            None,
            String::new(),
        ),
    };

    if label.trim().is_empty() {
        return default_route(domains, policy, "no routing label");
    }

    match route_for_label(&label, domains) {
        Some((RouteKind::SingleDomain, domain)) => {
            let confidence = confidence.unwrap_or(1.0);
            if confidence < policy.confidence_threshold {
                tracing::info!(
                    domain = ?domain,
                    confidence,
                    threshold = policy.confidence_threshold,
                    "Low-confidence route widened to multi-domain"
                );
                let mut d = decision(RouteKind::MultiDomain, None, confidence, reasoning, &label);
                d.widened = true;
                return d;
            }
            decision(RouteKind::SingleDomain, domain, confidence, reasoning, &label)
        }
        Some((route, domain)) => decision(route, domain, confidence.unwrap_or(1.0), reasoning, &label),
        None => {
            tracing::info!(label = %label, "Unclear route widened to multi-domain");
            let mut d = decision(RouteKind::MultiDomain, None, confidence.unwrap_or(0.0), reasoning, &label);
            d.widened = true;
            d
        }
    }
}

fn default_route(domains: &[String], policy: &RoutingPolicy, reason: &str) -> RoutingDecision {
    let (route, domain) = route_for_label(&policy.default_domain, domains)
        .unwrap_or((RouteKind::MultiDomain, None));
    decision(route, domain, 0.0, reason.to_string(), &policy.default_domain)
}

/// Asks the model which domain answers `question`. Never fails.
pub async fn route_question(
    llm: &dyn LanguageModel,
    question: &str,
    domains: &[String],
    policy: &RoutingPolicy,
    timeout: Duration,
) -> RoutingDecision {
    let messages = route_question_messages(question, domains);
    match with_timeout("llm.route_question", timeout, llm.invoke(&messages)).await {
        Ok(reply) => resolve_route(&reply, domains, policy),
        Err(e) => {
            tracing::warn!(error = %e, default = %policy.default_domain, "Question routing failed");
            default_route(domains, policy, "router unavailable")
        }
    }
}
