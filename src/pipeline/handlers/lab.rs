use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;

use super::common::{provenance, rejected_record, resolve_record_date, HandlerDeps};
use super::duplicate::{format_number, normalize_part, primary_key, secondary_key};
use super::error::HandlerError;
use super::traits::DomainHandler;
use super::trends::summarize_trend;
use super::types::{
    DomainDataset, ExtractedPayload, ExtractionResult, HandlerContext, Highlight,
    RelevanceAssessment, RetrievalStrategy, StorageReport, StoredRecord,
};
use crate::capabilities::CandidateRecord;
use crate::models::{LabEntry, LabReport};

const CATEGORY: &str = "lab";
const DESCRIPTION: &str = "laboratory test results: blood work, urinalysis, cholesterol, \
    glucose, HbA1c, kidney and liver panels, with reference ranges and abnormal flags";

const SCHEMA: &str = r#"{
  "report_date": "YYYY-MM-DD or null",
  "lab_facility": "laboratory name or null",
  "tests": [
    {
      "test_name": "name as written",
      "test_category": "hematology|chemistry|lipids|endocrine|urinalysis|other or null",
      "value": number or null,
      "value_text": "non-numeric result or null",
      "unit": "unit or null",
      "reference_range_low": number or null,
      "reference_range_high": number or null,
      "reference_range_text": "range as printed or null",
      "abnormal_flag": "normal|low|high|critical_low|critical_high or null",
      "test_date": "YYYY-MM-DD or null"
    }
  ]
}"#;

pub struct LabHandler {
    deps: HandlerDeps,
}

impl LabHandler {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }

    fn prepare(&self, report: &LabReport) -> (Vec<CandidateRecord>, Vec<StoredRecord>) {
        let mut candidates = Vec::new();
        let mut rejected = Vec::new();

        for test in &report.tests {
            let name = test.test_name.trim();
            if name.is_empty() {
                rejected.push(rejected_record(CATEGORY, "unknown", "missing test name"));
                continue;
            }
            let value = test
                .value
                .map(format_number)
                .or_else(|| test.value_text.clone().filter(|t| !t.trim().is_empty()));
            let Some(value) = value else {
                rejected.push(rejected_record(CATEGORY, name, "no result value"));
                continue;
            };
            let date = match resolve_record_date(
                test.test_date.as_deref(),
                report.report_date.as_deref(),
                None,
            ) {
                Ok(date) => date,
                Err(reason) => {
                    rejected.push(rejected_record(CATEGORY, name, reason));
                    continue;
                }
            };

            let mut entry = test.clone();
            entry.test_name = name.to_string();
            entry.test_date = Some(date.to_string());
            entry.abnormal_flag = entry.effective_flag().map(|f| f.as_str().to_string());
            if entry.lab_facility.is_none() {
                entry.lab_facility = report.lab_facility.clone();
            }
            let range = entry.reference_range();

            candidates.push(CandidateRecord {
                label: entry.test_name.clone(),
                record_date: date,
                source: entry.lab_facility.clone(),
                primary_key: primary_key(&entry.test_name, date, entry.lab_facility.as_deref()),
                secondary_key: secondary_key(
                    &entry.test_name,
                    Some(&value),
                    entry.unit.as_deref(),
                    range.as_deref(),
                    date,
                ),
                payload: serde_json::to_value(&entry).unwrap_or_default(),
            });
        }

        (candidates, rejected)
    }
}

#[async_trait]
impl DomainHandler for LabHandler {
    fn category(&self) -> &str {
        CATEGORY
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn default_strategy(&self) -> RetrievalStrategy {
        RetrievalStrategy::new(365, 50)
    }

    async fn extract(&self, raw_text: &str, ctx: &HandlerContext) -> Result<ExtractionResult, HandlerError> {
        let (report, strategy): (LabReport, _) = self
            .deps
            .extract_document(CATEGORY, SCHEMA, raw_text, "tests")
            .await?;
        let valid = report
            .tests
            .iter()
            .filter(|t| !t.test_name.trim().is_empty() && (t.value.is_some() || t.value_text.is_some()))
            .count();
        tracing::debug!(request_id = %ctx.request_id, tests = report.tests.len(), valid, "Extracted lab report");

        Ok(ExtractionResult {
            category: CATEGORY.to_string(),
            provenance: provenance(raw_text, strategy, report.tests.len(), valid),
            payload: ExtractedPayload::Lab(report),
        })
    }

    async fn store(&self, extraction: &ExtractionResult, ctx: &HandlerContext) -> Result<StorageReport, HandlerError> {
        let ExtractedPayload::Lab(report) = &extraction.payload else {
            return Err(HandlerError::PayloadMismatch {
                expected: CATEGORY.to_string(),
                found: extraction.category.clone(),
            });
        };
        let (candidates, rejected) = self.prepare(report);
        self.deps.insert_candidates(ctx, CATEGORY, candidates, rejected).await
    }

    async fn retrieve(&self, strategy: &RetrievalStrategy, ctx: &HandlerContext) -> Result<DomainDataset, HandlerError> {
        let rows = self.deps.load_rows(ctx, CATEGORY, strategy).await?;
        let mut dataset = DomainDataset::empty(CATEGORY, strategy.days_back);
        dataset.total_records = rows.len();

        let mut by_test: BTreeMap<String, (String, Vec<(NaiveDate, LabEntry)>)> = BTreeMap::new();
        let mut by_category: BTreeMap<String, usize> = BTreeMap::new();

        for row in &rows {
            let Ok(entry) = serde_json::from_value::<LabEntry>(row.data.clone()) else {
                continue;
            };
            let category = entry
                .test_category
                .clone()
                .unwrap_or_else(|| "uncategorized".to_string());
            *by_category.entry(category).or_default() += 1;

            if let Some(flag) = entry.effective_flag().filter(|f| f.is_abnormal()) {
                let range = entry
                    .reference_range()
                    .map(|r| format!(" (reference {r})"))
                    .unwrap_or_default();
                dataset.highlights.push(Highlight {
                    subject: row.label.clone(),
                    record_date: row.record_date,
                    value: entry.display_value().unwrap_or_default(),
                    reason: format!("flagged {flag}{range}"),
                });
            }

            by_test
                .entry(normalize_part(&row.label))
                .or_insert_with(|| (row.label.clone(), Vec::new()))
                .1
                .push((row.record_date, entry));
        }

        for (label, results) in by_test.values() {
            let unit = results.first().and_then(|(_, e)| e.unit.clone());
            let points: Vec<_> = results.iter().map(|(d, e)| (*d, e.value)).collect();
            dataset.trends.push(summarize_trend(label, unit.as_deref(), &points));
        }

        dataset.summary = json!({
            "tests_by_category": by_category,
            "abnormal_results": dataset.highlights.len(),
            "distinct_tests": by_test.len(),
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
