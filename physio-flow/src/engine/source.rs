use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::{Catalog, QuestionDefinition, QuestionPhase, SourceEntry, SymptomCategory, SymptomLikelihood};
use crate::posterior::{Observation, Posterior, likelihood_of};
use crate::session::AnswerValue;

use super::{answer_scenarios, observations_for_answer};

/// The assessment redirects to another body region only when the leading
/// non-local source clears this probability. Deliberately conservative:
/// re-routing the whole workflow on weak evidence is worse than a few
/// extra local questions.
pub const REGION_SWITCH_THRESHOLD: f64 = 0.55;

/// Sources below this posterior are ignored when weighing which source
/// question to boost next.
const PLAUSIBLE_SOURCE_FLOOR: f64 = 0.2;

/// Per-session state of the referral-source engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceState {
    pub region: Option<String>,
    pub posterior: Posterior,
    pub questions_asked: u32,
    pub red_flag_detected: bool,
    pub findings: Vec<String>,
}

/// One ranked pain-source candidate in the engine output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedSource {
    pub id: String,
    pub name: String,
    pub probability: f64,
    pub is_local: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refers_to_region: Option<String>,
}

/// Outcome of source identification for the reported pain site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceIdentificationResult {
    pub pain_site: String,
    pub is_local: bool,
    pub top_source: Option<RankedSource>,
    pub all_sources: Vec<RankedSource>,
    pub should_switch_region: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_region: Option<String>,
    pub confidence: f64,
    pub supporting_findings: Vec<String>,
    pub clinical_implication: String,
    pub red_flag_detected: bool,
}

/// Determines whether the most probable explanation for the reported pain
/// is a locally situated structure or a referring region/organ. Shares the
/// Bayesian mechanics with the condition engine; only question eligibility
/// and result shaping differ.
pub struct SourceEngine<'a> {
    catalog: &'a Catalog,
}

impl<'a> SourceEngine<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        SourceEngine { catalog }
    }

    /// Fresh source state scoped to the region's source table. Returns an
    /// empty posterior when no table is configured; the orchestrator skips
    /// the phase in that case.
    pub fn initialize_for_region(&self, region: &str) -> SourceState {
        match self.catalog.region_sources(region) {
            Some(table) => SourceState {
                region: Some(region.to_string()),
                posterior: Posterior::from_priors(
                    table.iter().map(|(id, s)| (id.clone(), s.base_probability)),
                ),
                questions_asked: 0,
                red_flag_detected: false,
                findings: Vec::new(),
            },
            None => {
                warn!(region, "No source table for region, skipping source identification");
                SourceState {
                    region: Some(region.to_string()),
                    ..SourceState::default()
                }
            }
        }
    }

    fn source_entry(&self, state: &SourceState, source: &str) -> Option<&SourceEntry> {
        let region = state.region.as_deref()?;
        self.catalog.region_sources(region)?.get(source)
    }

    fn likelihood_entry(
        &self,
        state: &SourceState,
        source: &str,
        symptom: &str,
    ) -> Option<&SymptomLikelihood> {
        self.source_entry(state, source)?.symptoms.get(symptom)
    }

    pub fn observe(&self, state: &mut SourceState, symptom: &str, observation: &Observation) {
        let updated = state.posterior.updated(|source| {
            likelihood_of(self.likelihood_entry(state, source, symptom), observation)
        });
        state.posterior = updated;
        debug!(symptom, leader = ?state.posterior.top(), "Source posterior updated");
    }

    /// Record one answered source question. Single-select answers arrive
    /// already expanded with their mutual-exclusivity correction (chosen
    /// option present, sibling options absent).
    pub fn apply_answer(
        &self,
        state: &mut SourceState,
        question: &QuestionDefinition,
        answer: &AnswerValue,
    ) {
        for (symptom, observation) in observations_for_answer(question, answer) {
            self.observe(state, &symptom, &observation);
            self.record_finding(state, &symptom, &observation);
        }
        state.questions_asked += 1;
        if question.red_flag && answer.is_affirmative() {
            state.red_flag_detected = true;
        }
    }

    /// Keep a human-readable note when a positive finding squarely fits
    /// the current leading source.
    fn record_finding(&self, state: &mut SourceState, symptom: &str, observation: &Observation) {
        let Some((leader, _)) = state.posterior.top() else {
            return;
        };
        let Some(entry) = self.likelihood_entry(state, &leader, symptom) else {
            return;
        };
        let supports = match observation {
            Observation::Bool(true) => entry.present >= 0.7,
            Observation::Bool(false) => false,
            Observation::Value(value) => entry.for_value(value) >= 0.65,
        };
        if supports {
            let name = self
                .source_entry(state, &leader)
                .map(|s| s.name.clone())
                .unwrap_or_else(|| leader.clone());
            let finding = format!("{} is consistent with {}", symptom.replace('_', " "), name);
            if !state.findings.contains(&finding) {
                state.findings.push(finding);
            }
        }
    }

    pub fn confidence(&self, state: &SourceState) -> f64 {
        state.posterior.confidence()
    }

    /// Information-gain ranking over source-identification questions. The
    /// category boost only weighs sources still plausible (posterior above
    /// 0.2); a pathognomonic symptom of an already-discarded source should
    /// not pull questioning toward it.
    pub fn next_question<F>(
        &self,
        state: &SourceState,
        mut eligible: F,
    ) -> Option<&QuestionDefinition>
    where
        F: FnMut(&QuestionDefinition) -> bool,
    {
        if state.posterior.is_empty() {
            return None;
        }
        let mut best: Option<(&QuestionDefinition, f64)> = None;
        for question in self
            .catalog
            .questions_in_phase(QuestionPhase::SourceIdentification)
        {
            if !eligible(question) {
                continue;
            }
            let scenarios = answer_scenarios(question);
            let gain = state
                .posterior
                .expected_information_gain(&scenarios, |source, symptom| {
                    self.likelihood_entry(state, source, symptom)
                });
            let score = gain
                * question.diagnostic_weight
                * question.information_gain_potential
                * self.category_boost(state, question);
            debug!(question = %question.id, gain, score, "Scored source question");
            match best {
                Some((_, best_score)) if best_score >= score => {}
                _ => best = Some((question, score)),
            }
        }
        best.map(|(question, _)| question)
    }

    fn category_boost(&self, state: &SourceState, question: &QuestionDefinition) -> f64 {
        let plausible: Vec<(String, f64)> = state
            .posterior
            .iter()
            .filter(|(_, p)| *p > PLAUSIBLE_SOURCE_FLOOR)
            .map(|(id, p)| (id.to_string(), p))
            .collect();
        let mut ranked = plausible.clone();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let top_ids: Vec<&str> = ranked.iter().take(3).map(|(id, _)| id.as_str()).collect();

        let mut boost: f64 = 1.0;
        for symptom in &question.tests_symptoms {
            for (source, probability) in &plausible {
                let Some(entry) = self.likelihood_entry(state, source, symptom) else {
                    continue;
                };
                match entry.category {
                    SymptomCategory::Pathognomonic if *probability > 0.7 => {
                        boost = boost.max(1.5);
                    }
                    SymptomCategory::Confirmation if top_ids.contains(&source.as_str()) => {
                        boost = boost.max(1.3);
                    }
                    _ => {}
                }
            }
        }
        boost
    }

    /// Source-identification stopping rules.
    pub fn should_stop(&self, state: &SourceState) -> bool {
        let Some((_, top)) = state.posterior.top() else {
            return true;
        };
        let confidence = state.posterior.confidence();
        let asked = state.questions_asked;

        (top > 0.85 && confidence > 0.8)
            || (top > 0.7 && state.posterior.separation() > 0.35)
            || asked >= 30
            || (asked >= 6 && confidence > 0.85)
            || (asked >= 10 && confidence > 0.75)
    }

    /// Shape the final source-identification verdict. The region switch
    /// fires only for a non-local leader above the conservative threshold
    /// with a known target region.
    pub fn result(&self, state: &SourceState) -> SourceIdentificationResult {
        let pain_site = state.region.clone().unwrap_or_default();
        let all_sources: Vec<RankedSource> = state
            .posterior
            .ranked()
            .into_iter()
            .filter_map(|(id, probability)| {
                self.source_entry(state, &id).map(|entry| RankedSource {
                    id: id.clone(),
                    name: entry.name.clone(),
                    probability,
                    is_local: entry.is_local,
                    refers_to_region: entry.refers_to_region.clone(),
                })
            })
            .collect();

        let top_source = all_sources.first().cloned();
        let is_local = top_source.as_ref().map(|s| s.is_local).unwrap_or(true);
        let top_probability = top_source.as_ref().map(|s| s.probability).unwrap_or(0.0);
        let new_region = top_source
            .as_ref()
            .and_then(|s| s.refers_to_region.clone());
        let should_switch_region = !is_local
            && top_probability > REGION_SWITCH_THRESHOLD
            && new_region.is_some();

        let top_is_red_flag = top_source
            .as_ref()
            .and_then(|s| self.source_entry(state, &s.id))
            .map(|entry| entry.is_red_flag)
            .unwrap_or(false);

        let clinical_implication = match &top_source {
            None => "No source table is available for this region; assess locally.".to_string(),
            Some(top) => {
                let note = self
                    .source_entry(state, &top.id)
                    .and_then(|entry| entry.clinical_note.clone());
                if state.red_flag_detected || top_is_red_flag {
                    format!(
                        "Findings raise concern for {}; urgent clinical review is required.",
                        top.name
                    )
                } else if !top.is_local {
                    let target = top
                        .refers_to_region
                        .clone()
                        .unwrap_or_else(|| "another region".to_string());
                    match note {
                        Some(note) => format!(
                            "Pain at the {} appears referred from the {} ({}).",
                            pain_site.replace('_', " "),
                            target.replace('_', " "),
                            note
                        ),
                        None => format!(
                            "Pain at the {} appears referred from the {}.",
                            pain_site.replace('_', " "),
                            target.replace('_', " ")
                        ),
                    }
                } else {
                    match note {
                        Some(note) => format!(
                            "Findings are consistent with a local source: {} ({}).",
                            top.name, note
                        ),
                        None => {
                            format!("Findings are consistent with a local source: {}.", top.name)
                        }
                    }
                }
            }
        };

        SourceIdentificationResult {
            pain_site,
            is_local,
            top_source,
            all_sources,
            should_switch_region,
            new_region: if should_switch_region { new_region } else { None },
            confidence: state.posterior.confidence(),
            supporting_findings: state.findings.clone(),
            clinical_implication,
            red_flag_detected: state.red_flag_detected,
        }
    }
}
