use std::sync::LazyLock;

use regex::Regex;

use super::types::{Violation, ViolationCategory};

/// A compiled pattern with its violation metadata.
struct SafetyPattern {
    regex: Regex,
    category: ViolationCategory,
    description: &'static str,
}

static DIAGNOSTIC_PATTERNS: LazyLock<Vec<SafetyPattern>> = LazyLock::new(|| {
    vec![
        pattern(
            r"(?i)\byou\s+(?:have\s+been|are)\s+diagnosed\s+with\b",
            ViolationCategory::DiagnosticLanguage,
            "Diagnosis claim without document attribution",
        ),
        pattern(
            r"(?i)\byou\s+are\s+suffering\s+from\b",
            ViolationCategory::DiagnosticLanguage,
            "Direct diagnosis: 'you are suffering from'",
        ),
        pattern(
            r"(?i)\byou\s+(?:likely|probably|possibly|definitely)\s+have\b",
            ViolationCategory::DiagnosticLanguage,
            "Speculative diagnosis: 'you likely/probably have'",
        ),
        pattern(
            r"(?i)\bthis\s+(?:means|indicates|confirms)\s+(?:you|that\s+you)\s+have\b",
            ViolationCategory::DiagnosticLanguage,
            "Indirect diagnosis: 'this means you have'",
        ),
        pattern(
            r"(?i)\byou\s+(?:appear|seem)\s+to\s+have\b",
            ViolationCategory::DiagnosticLanguage,
            "Implied diagnosis: 'you appear to have'",
        ),
    ]
});

static PRESCRIPTIVE_PATTERNS: LazyLock<Vec<SafetyPattern>> = LazyLock::new(|| {
    vec![
        pattern(
            r"(?i)\byou\s+should\s+(?:stop|start|increase|decrease|double|discontinue)\s+(?:taking\s+)?(?:your\s+)?\w+",
            ViolationCategory::PrescriptiveLanguage,
            "Dose or medication change instruction",
        ),
        pattern(
            r"(?i)\bI\s+(?:prescribe|recommend\s+taking)\b",
            ViolationCategory::PrescriptiveLanguage,
            "Direct prescription",
        ),
        pattern(
            r"(?i)\b(?:take|increase\s+to|reduce\s+to)\s+\d+(?:\.\d+)?\s*(?:mg|mcg|g|ml|units?)\b",
            ViolationCategory::PrescriptiveLanguage,
            "Specific dosing instruction",
        ),
    ]
});

static ALARM_PATTERNS: LazyLock<Vec<SafetyPattern>> = LazyLock::new(|| {
    vec![
        pattern(
            r"(?i)\b(?:life[- ]threatening|fatal|deadly|lethal)\b",
            ViolationCategory::AlarmLanguage,
            "Alarming severity language",
        ),
        pattern(
            r"(?i)\byou\s+(?:will|are\s+going\s+to)\s+die\b",
            ViolationCategory::AlarmLanguage,
            "Mortality prediction",
        ),
    ]
});

fn pattern(regex_str: &str, category: ViolationCategory, description: &'static str) -> SafetyPattern {
    SafetyPattern {
        regex: Regex::new(regex_str).expect("Invalid safety regex pattern"),
        category,
        description,
    }
}

/// Scan generated text for diagnostic, prescriptive and alarm language.
pub fn scan_keywords(text: &str) -> Vec<Violation> {
    let mut violations = Vec::new();

    for patterns in [&*DIAGNOSTIC_PATTERNS, &*PRESCRIPTIVE_PATTERNS, &*ALARM_PATTERNS] {
        for sp in patterns {
            for mat in sp.regex.find_iter(text) {
                violations.push(Violation {
                    category: sp.category,
                    matched_text: mat.as_str().to_string(),
                    offset: mat.start(),
                    length: mat.len(),
                    reason: sp.description.to_string(),
                });
            }
        }
    }

    deduplicate_violations(&mut violations);
    violations
}

/// Remove overlapping violations, keeping the longer match.
fn deduplicate_violations(violations: &mut Vec<Violation>) {
    violations.sort_by_key(|v| (v.offset, std::cmp::Reverse(v.length)));
    let mut last_end = 0usize;
    violations.retain(|v| {
        if v.offset < last_end {
            return false;
        }
        last_end = v.offset + v.length;
        true
    });
}
