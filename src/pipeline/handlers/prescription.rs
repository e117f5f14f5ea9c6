use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde_json::json;

use super::common::{provenance, rejected_record, resolve_record_date, HandlerDeps};
use super::duplicate::{fingerprint, name_stem, normalize_part, primary_key};
use super::error::HandlerError;
use super::traits::DomainHandler;
use super::trends::summarize_trend;
use super::types::{
    DomainDataset, ExtractedPayload, ExtractionResult, HandlerContext, Highlight,
    RelevanceAssessment, RetrievalStrategy, StorageReport, StoredRecord,
};
use crate::capabilities::CandidateRecord;
use crate::models::enums::TrendDirection;
use crate::models::{MedicationEntry, PrescriptionDocument};

const CATEGORY: &str = "prescription";
const DESCRIPTION: &str = "prescribed medications: drug names, dosages, frequencies, \
    treatment durations and prescribing doctors";

/// Medications with no stated duration count as active this long.
const OPEN_ENDED_ACTIVE_DAYS: i64 = 90;

const SCHEMA: &str = r#"{
  "prescription_date": "YYYY-MM-DD or null",
  "prescribing_doctor": "name or null",
  "facility": "clinic or null",
  "medications": [
    {
      "medication_name": "name as written",
      "dosage": "e.g. 500 mg or null",
      "frequency": "e.g. twice daily or null",
      "route": "oral|topical|injection|... or null",
      "duration": "e.g. 30 days or null",
      "instructions": "text or null",
      "quantity": "text or null",
      "refills": "text or null"
    }
  ]
}"#;

pub struct PrescriptionHandler {
    deps: HandlerDeps,
}

impl PrescriptionHandler {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }

    fn prepare(&self, doc: &PrescriptionDocument) -> (Vec<CandidateRecord>, Vec<StoredRecord>) {
        let mut candidates = Vec::new();
        let mut rejected = Vec::new();

        for medication in &doc.medications {
            let name = medication.medication_name.trim();
            if name.is_empty() {
                rejected.push(rejected_record(CATEGORY, "unknown", "missing medication name"));
                continue;
            }
            let date = match resolve_record_date(
                medication.prescription_date.as_deref(),
                doc.prescription_date.as_deref(),
                None,
            ) {
                Ok(date) => date,
                Err(reason) => {
                    rejected.push(rejected_record(CATEGORY, name, reason));
                    continue;
                }
            };

            let mut entry = medication.clone();
            entry.medication_name = name.to_string();
            entry.prescription_date = Some(date.to_string());
            if entry.prescribing_doctor.is_none() {
                entry.prescribing_doctor = doc.prescribing_doctor.clone();
            }

            let date_str = date.to_string();
            let secondary = fingerprint(&[
                entry.dosage.as_deref().unwrap_or(""),
                entry.frequency.as_deref().unwrap_or(""),
                entry.route.as_deref().unwrap_or(""),
                &date_str,
                &name_stem(name),
            ]);

            candidates.push(CandidateRecord {
                label: entry.medication_name.clone(),
                record_date: date,
                source: entry.prescribing_doctor.clone(),
                primary_key: primary_key(name, date, entry.prescribing_doctor.as_deref()),
                secondary_key: Some(secondary),
                payload: serde_json::to_value(&entry).unwrap_or_default(),
            });
        }

        (candidates, rejected)
    }
}

/// Last day a medication started on `start` is taken, if known.
/// Durations past the calendar range count as open-ended.
fn end_date(entry: &MedicationEntry, start: NaiveDate) -> Option<NaiveDate> {
    let days = Duration::try_days(entry.duration_days()?)?;
    start.checked_add_signed(days)
}

fn is_active(entry: &MedicationEntry, start: NaiveDate, today: NaiveDate) -> bool {
    match end_date(entry, start) {
        Some(end) => end >= today,
        None => (today - start).num_days() <= OPEN_ENDED_ACTIVE_DAYS,
    }
}

#[async_trait]
impl DomainHandler for PrescriptionHandler {
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
        let (doc, strategy): (PrescriptionDocument, _) = self
            .deps
            .extract_document(CATEGORY, SCHEMA, raw_text, "medications")
            .await?;
        let valid = doc
            .medications
            .iter()
            .filter(|m| !m.medication_name.trim().is_empty())
            .count();
        tracing::debug!(request_id = %ctx.request_id, medications = doc.medications.len(), valid, "Extracted prescription");

        Ok(ExtractionResult {
            category: CATEGORY.to_string(),
            provenance: provenance(raw_text, strategy, doc.medications.len(), valid),
            payload: ExtractedPayload::Prescription(doc),
        })
    }

    async fn store(&self, extraction: &ExtractionResult, ctx: &HandlerContext) -> Result<StorageReport, HandlerError> {
        let ExtractedPayload::Prescription(doc) = &extraction.payload else {
            return Err(HandlerError::PayloadMismatch {
                expected: CATEGORY.to_string(),
                found: extraction.category.clone(),
            });
        };
        let (candidates, rejected) = self.prepare(doc);
        self.deps.insert_candidates(ctx, CATEGORY, candidates, rejected).await
    }

    async fn retrieve(&self, strategy: &RetrievalStrategy, ctx: &HandlerContext) -> Result<DomainDataset, HandlerError> {
        let rows = self.deps.load_rows(ctx, CATEGORY, strategy).await?;
        let mut dataset = DomainDataset::empty(CATEGORY, strategy.days_back);
        dataset.total_records = rows.len();

        let mut by_medication: BTreeMap<String, (String, Vec<(NaiveDate, MedicationEntry)>)> = BTreeMap::new();
        let mut by_prescriber: BTreeMap<String, usize> = BTreeMap::new();
        for row in &rows {
            let Ok(entry) = serde_json::from_value::<MedicationEntry>(row.data.clone()) else {
                continue;
            };
            let prescriber = entry
                .prescribing_doctor
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            *by_prescriber.entry(prescriber).or_default() += 1;
            by_medication
                .entry(normalize_part(&row.label))
                .or_insert_with(|| (row.label.clone(), Vec::new()))
                .1
                .push((row.record_date, entry));
        }

        let mut active = Vec::new();
        for (label, history) in by_medication.values() {
            // Newest first: the head is the current prescription.
            if let Some((start, entry)) = history.first() {
                if is_active(entry, *start, ctx.today) {
                    active.push(json!({
                        "medication_name": label,
                        "dosage": entry.dosage,
                        "frequency": entry.frequency,
                        "started": start,
                        "ends": end_date(entry, *start),
                    }));
                }
            }

            let points: Vec<_> = history.iter().map(|(d, e)| (*d, e.dose_mg())).collect();
            let trend = summarize_trend(label, Some("mg"), &points);
            if matches!(trend.direction, TrendDirection::Increasing | TrendDirection::Decreasing) {
                if let (Some((date, latest)), Some(first), Some(last)) =
                    (history.first(), trend.first_value, trend.last_value)
                {
                    dataset.highlights.push(Highlight {
                        subject: label.clone(),
                        record_date: *date,
                        value: latest.dosage.clone().unwrap_or_default(),
                        reason: format!("dose {} from {first} mg to {last} mg", trend.direction),
                    });
                }
            }
            dataset.trends.push(trend);
        }

        dataset.summary = json!({
            "active_medications": active,
            "prescriptions_by_doctor": by_prescriber,
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
