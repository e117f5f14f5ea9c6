use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;

use super::common::{provenance, rejected_record, resolve_record_date, HandlerDeps};
use super::duplicate::{fingerprint, format_number, primary_key};
use super::error::HandlerError;
use super::traits::DomainHandler;
use super::trends::summarize_trend;
use super::types::{
    DomainDataset, ExtractedPayload, ExtractionResult, HandlerContext, Highlight,
    RelevanceAssessment, RetrievalStrategy, StorageReport, StoredRecord,
};
use crate::capabilities::CandidateRecord;
use crate::models::enums::VitalType;
use crate::models::{VitalEntry, VitalsLog};

const CATEGORY: &str = "vitals";
const DESCRIPTION: &str = "vital signs such as blood pressure, heart rate, temperature, \
    oxygen saturation, blood glucose, respiratory rate, weight and height";

const SCHEMA: &str = r#"{
  "measured_on": "YYYY-MM-DD or null",
  "source": "device, clinic or null",
  "readings": [
    {
      "vital_type": "blood_pressure|heart_rate|temperature|oxygen_saturation|blood_glucose|respiratory_rate|weight|height",
      "value_primary": number,
      "value_secondary": number or null,
      "value_text": "reading as written, e.g. 120/80",
      "unit": "unit or null",
      "measured_on": "YYYY-MM-DD or null",
      "measured_at": "HH:MM or null",
      "notes": "text or null"
    }
  ]
}"#;

/// Vital-sign readings. Self-reported readings with no date are filed
/// under the request's date.
pub struct VitalsHandler {
    deps: HandlerDeps,
}

impl VitalsHandler {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }

    fn prepare(&self, log: &VitalsLog, ctx: &HandlerContext) -> (Vec<CandidateRecord>, Vec<StoredRecord>) {
        let mut candidates = Vec::new();
        let mut rejected = Vec::new();

        for reading in &log.readings {
            let mut entry = reading.clone();
            entry.normalize_values();
            let label = if entry.vital_type.trim().is_empty() {
                "unknown"
            } else {
                entry.vital_type.as_str()
            }
            .to_string();

            let Some(vital_type) = entry.known_type() else {
                rejected.push(rejected_record(CATEGORY, &label, "unknown vital type"));
                continue;
            };
            let Some(primary) = entry.value_primary else {
                rejected.push(rejected_record(CATEGORY, vital_type.as_str(), "no numeric value"));
                continue;
            };
            let date = match resolve_record_date(
                entry.measured_on.as_deref(),
                log.measured_on.as_deref(),
                Some(ctx.today),
            ) {
                Ok(date) => date,
                Err(reason) => {
                    rejected.push(rejected_record(CATEGORY, vital_type.as_str(), reason));
                    continue;
                }
            };

            entry.vital_type = vital_type.as_str().to_string();
            entry.measured_on = Some(date.to_string());
            if entry.unit.is_none() {
                entry.unit = Some(vital_type.default_unit().to_string());
            }
            if entry.source.is_none() {
                entry.source = log.source.clone();
            }

            let time = entry.measured_at.clone().unwrap_or_default();
            let value = match entry.value_secondary {
                Some(secondary) => format!("{}/{}", format_number(primary), format_number(secondary)),
                None => format_number(primary),
            };
            let date_str = date.to_string();
            let unit = entry.unit.clone().unwrap_or_default();

            candidates.push(CandidateRecord {
                label: vital_type.as_str().to_string(),
                record_date: date,
                source: entry.source.clone(),
                primary_key: primary_key(
                    &format!("{} {time}", vital_type.as_str()),
                    date,
                    entry.source.as_deref(),
                ),
                secondary_key: Some(fingerprint(&[vital_type.as_str(), &value, &unit, &date_str, &time])),
                payload: serde_json::to_value(&entry).unwrap_or_default(),
            });
        }

        (candidates, rejected)
    }
}

#[async_trait]
impl DomainHandler for VitalsHandler {
    fn category(&self) -> &str {
        CATEGORY
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn default_strategy(&self) -> RetrievalStrategy {
        RetrievalStrategy::new(90, 100)
    }

    async fn extract(&self, raw_text: &str, ctx: &HandlerContext) -> Result<ExtractionResult, HandlerError> {
        let (mut log, strategy): (VitalsLog, _) = self
            .deps
            .extract_document(CATEGORY, SCHEMA, raw_text, "readings")
            .await?;
        for reading in &mut log.readings {
            reading.normalize_values();
        }
        let valid = log
            .readings
            .iter()
            .filter(|r| r.known_type().is_some() && r.value_primary.is_some())
            .count();
        tracing::debug!(request_id = %ctx.request_id, readings = log.readings.len(), valid, "Extracted vitals");

        Ok(ExtractionResult {
            category: CATEGORY.to_string(),
            provenance: provenance(raw_text, strategy, log.readings.len(), valid),
            payload: ExtractedPayload::Vitals(log),
        })
    }

    async fn store(&self, extraction: &ExtractionResult, ctx: &HandlerContext) -> Result<StorageReport, HandlerError> {
        let ExtractedPayload::Vitals(log) = &extraction.payload else {
            return Err(HandlerError::PayloadMismatch {
                expected: CATEGORY.to_string(),
                found: extraction.category.clone(),
            });
        };
        let (candidates, rejected) = self.prepare(log, ctx);
        self.deps.insert_candidates(ctx, CATEGORY, candidates, rejected).await
    }

    async fn retrieve(&self, strategy: &RetrievalStrategy, ctx: &HandlerContext) -> Result<DomainDataset, HandlerError> {
        let rows = self.deps.load_rows(ctx, CATEGORY, strategy).await?;
        let mut dataset = DomainDataset::empty(CATEGORY, strategy.days_back);
        dataset.total_records = rows.len();

        // Rows come newest first, so the first entry per type is the latest.
        let mut by_type: BTreeMap<String, Vec<(chrono::NaiveDate, VitalEntry)>> = BTreeMap::new();
        for row in &rows {
            if let Ok(entry) = serde_json::from_value::<VitalEntry>(row.data.clone()) {
                by_type
                    .entry(row.label.clone())
                    .or_default()
                    .push((row.record_date, entry));
            }
        }

        let mut latest = serde_json::Map::new();
        for (label, readings) in &by_type {
            let unit = readings.first().and_then(|(_, e)| e.unit.clone());
            let points: Vec<_> = readings.iter().map(|(d, e)| (*d, e.value_primary)).collect();
            dataset.trends.push(summarize_trend(label, unit.as_deref(), &points));

            if let Some((date, entry)) = readings.first() {
                latest.insert(
                    label.clone(),
                    json!({
                        "value": entry.display_value(),
                        "unit": entry.unit,
                        "measured_on": date,
                        "readings": readings.len(),
                    }),
                );
            }

            let range = VitalType::from_label(label).and_then(|t| t.normal_range());
            if let Some((low, high)) = range {
                for (date, entry) in readings {
                    let Some(value) = entry.value_primary else { continue };
                    let reason = if value < low {
                        format!("below normal range ({}-{})", format_number(low), format_number(high))
                    } else if value > high {
                        format!("above normal range ({}-{})", format_number(low), format_number(high))
                    } else {
                        continue;
                    };
                    dataset.highlights.push(Highlight {
                        subject: label.clone(),
                        record_date: *date,
                        value: entry.display_value().unwrap_or_else(|| format_number(value)),
                        reason,
                    });
                }
            }
        }

        dataset.summary = json!({ "latest": latest });
        dataset.records = rows;
        Ok(dataset)
    }

    async fn assess_relevance(&self, question: &str, _ctx: &HandlerContext) -> RelevanceAssessment {
        self.deps
            .assess_with_llm(CATEGORY, DESCRIPTION, self.default_strategy(), question)
            .await
    }
}
