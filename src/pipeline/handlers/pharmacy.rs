use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};

use super::common::{provenance, rejected_record, resolve_record_date, HandlerDeps};
use super::duplicate::{fingerprint, format_number, name_stem, normalize_part, primary_key};
use super::error::HandlerError;
use super::traits::DomainHandler;
use super::trends::summarize_trend;
use super::types::{
    DomainDataset, ExtractedPayload, ExtractionResult, HandlerContext, Highlight,
    RelevanceAssessment, RetrievalStrategy, StorageReport, StoredRecord,
};
use crate::capabilities::CandidateRecord;
use crate::models::enums::TrendDirection;
use crate::models::{PharmacyItem, PharmacyReceipt};

const CATEGORY: &str = "pharmacy";
const DESCRIPTION: &str = "pharmacy purchases: receipts, purchased medicines and products, \
    quantities, prices and spending per pharmacy";

const TOP_ITEMS: usize = 5;

const SCHEMA: &str = r#"{
  "pharmacy_name": "name or null",
  "purchase_date": "YYYY-MM-DD or null",
  "receipt_number": "text or null",
  "items": [
    {
      "item_name": "product as written",
      "strength": "e.g. 500 mg or null",
      "quantity": number or null,
      "unit_price": number or null,
      "total_price": number or null
    }
  ],
  "total_amount": number or null
}"#;

/// Pharmacy receipts, stored one record per purchased item.
pub struct PharmacyHandler {
    deps: HandlerDeps,
}

impl PharmacyHandler {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }

    fn prepare(&self, receipt: &PharmacyReceipt) -> (Vec<CandidateRecord>, Vec<StoredRecord>) {
        let mut candidates = Vec::new();
        let mut rejected = Vec::new();

        for item in &receipt.items {
            let name = item.item_name.trim();
            if name.is_empty() {
                rejected.push(rejected_record(CATEGORY, "unknown", "missing item name"));
                continue;
            }
            let date = match resolve_record_date(None, receipt.purchase_date.as_deref(), None) {
                Ok(date) => date,
                Err(reason) => {
                    rejected.push(rejected_record(CATEGORY, name, reason));
                    continue;
                }
            };

            let mut payload = serde_json::to_value(item).unwrap_or_default();
            if let Value::Object(fields) = &mut payload {
                fields.insert("item_name".into(), json!(name));
                fields.insert("pharmacy_name".into(), json!(receipt.pharmacy_name));
                fields.insert("purchase_date".into(), json!(date));
                fields.insert("receipt_number".into(), json!(receipt.receipt_number));
            }

            let price = item.line_total().map(format_number).unwrap_or_default();
            let quantity = item.quantity.map(format_number).unwrap_or_default();
            let date_str = date.to_string();
            let secondary = fingerprint(&[
                &name_stem(name),
                &price,
                &quantity,
                item.strength.as_deref().unwrap_or(""),
                receipt.receipt_number.as_deref().unwrap_or(""),
                &date_str,
            ]);

            candidates.push(CandidateRecord {
                label: name.to_string(),
                record_date: date,
                source: receipt.pharmacy_name.clone(),
                primary_key: primary_key(name, date, receipt.pharmacy_name.as_deref()),
                secondary_key: Some(secondary),
                payload,
            });
        }

        (candidates, rejected)
    }
}

#[async_trait]
impl DomainHandler for PharmacyHandler {
    fn category(&self) -> &str {
        CATEGORY
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn default_strategy(&self) -> RetrievalStrategy {
        RetrievalStrategy::new(180, 50)
    }

    async fn extract(&self, raw_text: &str, ctx: &HandlerContext) -> Result<ExtractionResult, HandlerError> {
        let (receipt, strategy): (PharmacyReceipt, _) = self
            .deps
            .extract_document(CATEGORY, SCHEMA, raw_text, "items")
            .await?;
        let valid = receipt
            .items
            .iter()
            .filter(|i| !i.item_name.trim().is_empty())
            .count();
        tracing::debug!(request_id = %ctx.request_id, items = receipt.items.len(), valid, "Extracted pharmacy receipt");

        Ok(ExtractionResult {
            category: CATEGORY.to_string(),
            provenance: provenance(raw_text, strategy, receipt.items.len(), valid),
            payload: ExtractedPayload::Pharmacy(receipt),
        })
    }

    async fn store(&self, extraction: &ExtractionResult, ctx: &HandlerContext) -> Result<StorageReport, HandlerError> {
        let ExtractedPayload::Pharmacy(receipt) = &extraction.payload else {
            return Err(HandlerError::PayloadMismatch {
                expected: CATEGORY.to_string(),
                found: extraction.category.clone(),
            });
        };
        let (candidates, rejected) = self.prepare(receipt);
        self.deps.insert_candidates(ctx, CATEGORY, candidates, rejected).await
    }

    async fn retrieve(&self, strategy: &RetrievalStrategy, ctx: &HandlerContext) -> Result<DomainDataset, HandlerError> {
        let rows = self.deps.load_rows(ctx, CATEGORY, strategy).await?;
        let mut dataset = DomainDataset::empty(CATEGORY, strategy.days_back);
        dataset.total_records = rows.len();

        let mut spend_by_pharmacy: BTreeMap<String, f64> = BTreeMap::new();
        let mut quantity_by_item: BTreeMap<String, (String, f64)> = BTreeMap::new();
        let mut prices: BTreeMap<String, (String, Vec<(NaiveDate, Option<f64>)>)> = BTreeMap::new();

        for row in &rows {
            let Ok(item) = serde_json::from_value::<PharmacyItem>(row.data.clone()) else {
                continue;
            };
            let pharmacy = row.source.clone().unwrap_or_else(|| "unknown".to_string());
            *spend_by_pharmacy.entry(pharmacy).or_default() += item.line_total().unwrap_or(0.0);

            let key = normalize_part(&row.label);
            quantity_by_item
                .entry(key.clone())
                .or_insert_with(|| (row.label.clone(), 0.0))
                .1 += item.quantity.unwrap_or(1.0);

            let unit_price = item
                .unit_price
                .or_else(|| Some(item.total_price? / item.quantity.filter(|q| *q > 0.0)?));
            prices
                .entry(key)
                .or_insert_with(|| (row.label.clone(), Vec::new()))
                .1
                .push((row.record_date, unit_price));
        }

        for (label, points) in prices.values() {
            let trend = summarize_trend(label, None, points);
            if trend.direction == TrendDirection::Increasing {
                if let (Some((date, _)), Some(last)) = (points.first(), trend.last_value) {
                    dataset.highlights.push(Highlight {
                        subject: label.clone(),
                        record_date: *date,
                        value: format_number(last),
                        reason: format!(
                            "unit price up {}%",
                            format_number(trend.change_percent.unwrap_or(0.0))
                        ),
                    });
                }
            }
            dataset.trends.push(trend);
        }

        let mut top: Vec<_> = quantity_by_item.into_values().collect();
        top.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(TOP_ITEMS);

        let spend: serde_json::Map<String, Value> = spend_by_pharmacy
            .into_iter()
            .map(|(pharmacy, total)| (pharmacy, json!((total * 100.0).round() / 100.0)))
            .collect();
        dataset.summary = json!({
            "spend_by_pharmacy": spend,
            "top_items": top
                .into_iter()
                .map(|(name, quantity)| json!({ "item_name": name, "quantity": quantity }))
                .collect::<Vec<_>>(),
        });
        dataset.records = rows;
        Ok(dataset)
    }

    async fn assess_relevance(&self, question: &str, _ctx: &HandlerContext) -> RelevanceAssessment {
        self.deps
            .assess_with_llm(CATEGORY, DESCRIPTION, self.default_strategy(), question)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::common::testing::*;
    use super::super::types::BatchOutcome;
    use super::*;
    use crate::capabilities::mock::MockLanguageModel;

    const RECEIPT: &str = r#"{
        "pharmacy_name": "Pharmacie Centrale",
        "purchase_date": "12 mars 2024",
        "receipt_number": "R-981",
        "items": [
            {"item_name": "Doliprane", "strength": "1000 mg", "quantity": 2, "unit_price": "3.50"},
            {"item_name": "Vitamin D", "quantity": 1, "total_price": 8.9},
            {"quantity": 1}
        ],
        "total_amount": 15.9
    }"#;

    #[tokio::test]
    async fn items_become_records() {
        let (deps, _) = deps_with(MockLanguageModel::new(RECEIPT));
        let h = PharmacyHandler::new(deps);
        let ctx = context();
        let extraction = h.extract("receipt", &ctx).await.unwrap();
        assert_eq!(extraction.payload.entry_count(), 3);

        let report = h.store(&extraction, &ctx).await.unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.records[0].fields["purchase_date"], "2024-03-12");
        assert_eq!(report.records[0].fields["receipt_number"], "R-981");

        let again = h.store(&extraction, &ctx).await.unwrap();
        assert_eq!(again.outcome, BatchOutcome::DuplicateSkipped);
    }

    #[tokio::test]
    async fn unpriced_items_on_one_receipt_are_distinct() {
        let (deps, _) = deps_with(MockLanguageModel::new(
            r#"{"pharmacy_name": "Main St", "purchase_date": "2024-06-01",
                "items": [{"item_name": "Paracetamol"}, {"item_name": "Ibuprofen"}]}"#,
        ));
        let h = PharmacyHandler::new(deps);
        let ctx = context();
        let extraction = h.extract("receipt", &ctx).await.unwrap();
        let report = h.store(&extraction, &ctx).await.unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.duplicates_skipped, 0);

        let again = h.store(&extraction, &ctx).await.unwrap();
        assert_eq!(again.duplicates_skipped, 2);
    }

    #[tokio::test]
    async fn retrieve_summarizes_spend_and_prices() {
        let ctx = context();
        let (deps, _) = deps_with(MockLanguageModel::new(RECEIPT).on(
            "second receipt",
            r#"{"pharmacy_name": "Pharmacie Centrale", "purchase_date": "2024-06-01",
                "items": [{"item_name": "doliprane", "quantity": 1, "unit_price": 4.2}]}"#,
        ));
        let h = PharmacyHandler::new(deps);
        for text in ["first receipt", "second receipt"] {
            let extraction = h.extract(text, &ctx).await.unwrap();
            h.store(&extraction, &ctx).await.unwrap();
        }

        let dataset = h.retrieve(&h.default_strategy(), &ctx).await.unwrap();
        assert_eq!(dataset.total_records, 3);
        assert_eq!(dataset.summary["spend_by_pharmacy"]["Pharmacie Centrale"], 20.1);
        assert_eq!(dataset.summary["top_items"][0]["quantity"], 3.0);
        let doliprane = dataset.trends.iter().find(|t| t.subject.eq_ignore_ascii_case("doliprane")).unwrap();
        assert_eq!(doliprane.direction, TrendDirection::Increasing);
        assert_eq!(dataset.highlights.len(), 1);
    }
}
