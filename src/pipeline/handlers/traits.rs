//! The contract every data domain implements.

use async_trait::async_trait;

use super::error::HandlerError;
use super::types::{
    DomainDataset, ExtractionResult, HandlerContext, RelevanceAssessment, RetrievalStrategy,
    StorageReport,
};

/// One data category (vitals, lab, ...): extraction, dedup-aware storage,
/// retrieval with derived views, and relevance to a question.
///
/// Handlers are created once and shared across requests, so they must not
/// keep per-request state.
#[async_trait]
pub trait DomainHandler: Send + Sync {
    /// Registry key, also the classification label.
    fn category(&self) -> &str;

    /// One-line description used in routing and relevance prompts.
    fn description(&self) -> &str;

    /// Lookback and row cap used when no model strategy is available.
    fn default_strategy(&self) -> RetrievalStrategy;

    /// Structures raw document text.
    async fn extract(
        &self,
        raw_text: &str,
        ctx: &HandlerContext,
    ) -> Result<ExtractionResult, HandlerError>;

    /// Persists an extraction. Must be idempotent: storing the same
    /// extraction twice creates each record once.
    async fn store(
        &self,
        extraction: &ExtractionResult,
        ctx: &HandlerContext,
    ) -> Result<StorageReport, HandlerError>;

    /// Loads stored records and computes this domain's derived views.
    async fn retrieve(
        &self,
        strategy: &RetrievalStrategy,
        ctx: &HandlerContext,
    ) -> Result<DomainDataset, HandlerError>;

    /// Never fails; problems degrade to "not relevant, score 0".
    async fn assess_relevance(&self, question: &str, ctx: &HandlerContext) -> RelevanceAssessment;
}
