use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::session::AssessmentSession;

/// Qualitative banding of a posterior probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLabel {
    VeryLow,
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl ConfidenceLabel {
    pub fn from_probability(p: f64) -> Self {
        if p >= 0.8 {
            ConfidenceLabel::VeryHigh
        } else if p >= 0.6 {
            ConfidenceLabel::High
        } else if p >= 0.4 {
            ConfidenceLabel::Moderate
        } else if p >= 0.2 {
            ConfidenceLabel::Low
        } else {
            ConfidenceLabel::VeryLow
        }
    }
}

/// How well-supported the differential is, from interview depth and
/// whether any high-weight symptom informed the leading hypotheses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceQuality {
    Insufficient,
    Limited,
    Adequate,
    Strong,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCondition {
    pub id: String,
    pub name: String,
    pub probability: f64,
    pub label: ConfidenceLabel,
}

/// The terminal output of a completed assessment. Always framed as
/// provisional, pending clinical confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub differential: Vec<RankedCondition>,
    pub confidence: f64,
    pub summary: String,
    pub evidence_quality: EvidenceQuality,
    pub recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_summary: Option<String>,
    pub questions_asked: usize,
}

const HIGH_WEIGHT: f64 = 0.8;

pub fn build_report(catalog: &Catalog, session: &AssessmentSession) -> DiagnosticReport {
    let region = session.body_region.clone();
    let region_table = region.as_deref().and_then(|r| catalog.region_conditions(r));

    let ranked = session.condition.posterior.ranked();
    let differential: Vec<RankedCondition> = ranked
        .iter()
        .take(3)
        .map(|(id, probability)| {
            let name = region_table
                .and_then(|t| t.conditions.get(id))
                .map(|c| c.name.clone())
                .unwrap_or_else(|| id.clone());
            RankedCondition {
                id: id.clone(),
                name,
                probability: *probability,
                label: ConfidenceLabel::from_probability(*probability),
            }
        })
        .collect();

    let confidence = session.condition.posterior.confidence();
    let questions_asked = session.answers.len();
    let evidence_quality = evidence_quality(catalog, session);
    let summary = summary_text(session, &differential, confidence);

    let mut recommendations: Vec<String> = differential
        .first()
        .and_then(|top| {
            region_table
                .and_then(|t| t.conditions.get(&top.id))
                .map(|c| c.recommendations.clone())
        })
        .unwrap_or_default();
    if recommendations.is_empty() {
        recommendations.push(
            "Arrange a full clinical assessment to establish a working diagnosis.".to_string(),
        );
    }
    recommendations
        .push("These findings are provisional and require clinical confirmation.".to_string());

    let source_summary = session
        .source_result
        .as_ref()
        .map(|r| r.clinical_implication.clone());
    if let Some(result) = &session.source_result {
        if !result.is_local {
            let target = result
                .new_region
                .clone()
                .or_else(|| {
                    result
                        .top_source
                        .as_ref()
                        .and_then(|s| s.refers_to_region.clone())
                })
                .unwrap_or_else(|| "the referring region".to_string());
            recommendations.push(format!(
                "Pain appears referred; direct clinical attention to the {}.",
                target.replace('_', " ")
            ));
        }
    }

    DiagnosticReport {
        region,
        differential,
        confidence,
        summary,
        evidence_quality,
        recommendations,
        source_summary,
        questions_asked,
    }
}

fn summary_text(
    session: &AssessmentSession,
    differential: &[RankedCondition],
    confidence: f64,
) -> String {
    let Some(top) = differential.first() else {
        return "The interview gathered insufficient evidence to rank conditions; \
                a full clinical assessment is recommended."
            .to_string();
    };
    let separation = session.condition.posterior.separation();
    let runner_up = differential.get(1);

    let mut summary = if top.probability >= 0.6 && separation > 0.25 {
        format!(
            "The assessment most strongly supports {} ({:.0}% probability).",
            top.name,
            top.probability * 100.0
        )
    } else if let Some(second) = runner_up.filter(|s| top.probability - s.probability <= 0.15) {
        format!(
            "The findings are split between {} ({:.0}%) and {} ({:.0}%); \
             clinical examination should differentiate them.",
            top.name,
            top.probability * 100.0,
            second.name,
            second.probability * 100.0
        )
    } else if confidence < 0.3 {
        format!(
            "Evidence is insufficient for a confident ranking; {} leads at {:.0}% \
             but a full clinical assessment is recommended.",
            top.name,
            top.probability * 100.0
        )
    } else {
        format!(
            "The leading explanation is {} ({:.0}%), though alternatives remain plausible.",
            top.name,
            top.probability * 100.0
        )
    };

    if let Some(result) = &session.source_result {
        if !result.is_local {
            summary.push(' ');
            summary.push_str(&result.clinical_implication);
        }
    }
    summary
}

/// Interview depth alone cannot make evidence strong: the top hypotheses
/// must also have been informed by at least one high-weight symptom.
fn evidence_quality(catalog: &Catalog, session: &AssessmentSession) -> EvidenceQuality {
    let count = session.answers.len();
    let region_table = session
        .body_region
        .as_deref()
        .and_then(|r| catalog.region_conditions(r));

    let top_two: Vec<String> = session
        .condition
        .posterior
        .ranked()
        .into_iter()
        .take(2)
        .map(|(id, _)| id)
        .collect();

    let high_weight_observed = region_table
        .map(|table| {
            session.observations.keys().any(|symptom| {
                top_two.iter().any(|condition| {
                    table
                        .conditions
                        .get(condition)
                        .and_then(|c| c.symptoms.get(symptom))
                        .map(|l| l.weight > HIGH_WEIGHT)
                        .unwrap_or(false)
                })
            })
        })
        .unwrap_or(false);

    if count >= 10 && high_weight_observed {
        EvidenceQuality::Strong
    } else if (count >= 5 && high_weight_observed) || count >= 8 {
        EvidenceQuality::Adequate
    } else if count >= 3 {
        EvidenceQuality::Limited
    } else {
        EvidenceQuality::Insufficient
    }
}
