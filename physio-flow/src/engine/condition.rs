use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::{Catalog, QuestionDefinition, QuestionPhase, SymptomCategory, SymptomLikelihood};
use crate::posterior::{Observation, Posterior, likelihood_of};
use crate::session::AnswerValue;

use super::{answer_scenarios, observations_for_answer};

/// Per-session state of the condition engine, carried inside the session
/// so sessions stay serializable. The engine itself is stateless logic
/// over the shared catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionState {
    pub region: Option<String>,
    pub posterior: Posterior,
    pub questions_asked: u32,
}

/// Tracks the posterior over candidate conditions for the active body
/// region and ranks the next differential question by expected
/// information gain.
pub struct ConditionEngine<'a> {
    catalog: &'a Catalog,
}

impl<'a> ConditionEngine<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        ConditionEngine { catalog }
    }

    /// Seed the posterior from the region's base probabilities. An unknown
    /// region yields an empty posterior; the caller treats that as
    /// "cannot diagnose here" and proceeds generically.
    pub fn initialize(&self, region: &str) -> ConditionState {
        match self.catalog.region_conditions(region) {
            Some(table) => ConditionState {
                region: Some(region.to_string()),
                posterior: Posterior::from_priors(
                    table
                        .conditions
                        .iter()
                        .map(|(id, c)| (id.clone(), c.base_probability)),
                ),
                questions_asked: 0,
            },
            None => {
                warn!(region, "No condition table for region, inference disabled");
                ConditionState {
                    region: Some(region.to_string()),
                    posterior: Posterior::default(),
                    questions_asked: 0,
                }
            }
        }
    }

    fn likelihood_entry(
        &self,
        state: &ConditionState,
        hypothesis: &str,
        symptom: &str,
    ) -> Option<&SymptomLikelihood> {
        let region = state.region.as_deref()?;
        self.catalog
            .region_conditions(region)?
            .conditions
            .get(hypothesis)?
            .symptoms
            .get(symptom)
    }

    /// One Bayesian step for a single observed symptom.
    pub fn observe(&self, state: &mut ConditionState, symptom: &str, observation: &Observation) {
        let updated = state.posterior.updated(|hypothesis| {
            likelihood_of(self.likelihood_entry(state, hypothesis, symptom), observation)
        });
        state.posterior = updated;
        debug!(
            symptom,
            leader = ?state.posterior.top(),
            "Condition posterior updated"
        );
    }

    /// Record one answered question: expand it to symptom observations,
    /// fold each into the posterior, and count the question against the
    /// region budget.
    pub fn apply_answer(
        &self,
        state: &mut ConditionState,
        question: &QuestionDefinition,
        answer: &AnswerValue,
    ) {
        for (symptom, observation) in observations_for_answer(question, answer) {
            self.observe(state, &symptom, &observation);
        }
        state.questions_asked += 1;
    }

    pub fn confidence(&self, state: &ConditionState) -> f64 {
        state.posterior.confidence()
    }

    /// The not-yet-asked differential question with the highest
    /// `EIG × diagnostic_weight × information_gain_potential ×
    /// category_boost` score. Eligibility (asked set, region scope,
    /// conditional gates) is the orchestrator's call, injected as a
    /// predicate.
    pub fn next_question<F>(
        &self,
        state: &ConditionState,
        mut eligible: F,
    ) -> Option<&QuestionDefinition>
    where
        F: FnMut(&QuestionDefinition) -> bool,
    {
        if state.posterior.is_empty() {
            return None;
        }
        let mut best: Option<(&QuestionDefinition, f64)> = None;
        for question in self.catalog.questions_in_phase(QuestionPhase::Differential) {
            if !eligible(question) {
                continue;
            }
            let scenarios = answer_scenarios(question);
            let gain = state
                .posterior
                .expected_information_gain(&scenarios, |hypothesis, symptom| {
                    self.likelihood_entry(state, hypothesis, symptom)
                });
            let score = gain
                * question.diagnostic_weight
                * question.information_gain_potential
                * self.category_boost(state, question);
            debug!(question = %question.id, gain, score, "Scored differential question");
            match best {
                Some((_, best_score)) if best_score >= score => {}
                _ => best = Some((question, score)),
            }
        }
        best.map(|(question, _)| question)
    }

    /// Boost questions that test a pathognomonic symptom of a strongly
    /// plausible hypothesis, or a confirmation symptom of a top-ranked
    /// one.
    fn category_boost(&self, state: &ConditionState, question: &QuestionDefinition) -> f64 {
        let ranked = state.posterior.ranked();
        let top_ids: Vec<&str> = ranked.iter().take(3).map(|(id, _)| id.as_str()).collect();
        let mut boost: f64 = 1.0;
        for symptom in &question.tests_symptoms {
            for (hypothesis, probability) in state.posterior.iter() {
                let Some(entry) = self.likelihood_entry(state, hypothesis, symptom) else {
                    continue;
                };
                match entry.category {
                    SymptomCategory::Pathognomonic if probability > 0.7 => {
                        boost = boost.max(1.5);
                    }
                    SymptomCategory::Confirmation if top_ids.contains(&hypothesis) => {
                        boost = boost.max(1.3);
                    }
                    _ => {}
                }
            }
        }
        boost
    }

    /// Differential stopping rules: dominant leader, decisive separation,
    /// exhausted region budget, or a confident late-differential state.
    pub fn should_stop(&self, state: &ConditionState, in_differential: bool) -> bool {
        let Some((_, top)) = state.posterior.top() else {
            return true;
        };
        let confidence = state.posterior.confidence();
        let cap = state
            .region
            .as_deref()
            .map(|r| self.catalog.question_cap(r))
            .unwrap_or(12);

        (top > 0.85 && confidence > 0.8)
            || (top > 0.7 && state.posterior.separation() > 0.4)
            || state.questions_asked > cap
            || (in_differential && confidence > 0.6 && state.questions_asked >= 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    /// Two conditions, one decisive symptom: `present` strongly favors A,
    /// `absent` strongly favors B.
    fn two_condition_catalog() -> Catalog {
        let conditions = r#"{
            "regions": {
                "ankle": {
                    "name": "Ankle",
                    "conditions": {
                        "cond_a": {
                            "name": "Condition A",
                            "base_probability": 0.5,
                            "symptoms": {
                                "decisive": {"present": 0.95, "absent": 0.05, "weight": 0.9}
                            }
                        },
                        "cond_b": {
                            "name": "Condition B",
                            "base_probability": 0.5,
                            "symptoms": {
                                "decisive": {"present": 0.05, "absent": 0.95, "weight": 0.9}
                            }
                        }
                    }
                }
            }
        }"#;
        let questions = r#"{
            "main": [
                {"id": "q_decisive", "phase": "differential", "text": "Decisive?",
                 "question_type": "yes_no", "tests_symptoms": ["decisive"],
                 "diagnostic_weight": 0.9, "information_gain_potential": 0.9},
                {"id": "q_noise", "phase": "differential", "text": "Noise?",
                 "question_type": "yes_no", "tests_symptoms": ["unrelated"],
                 "diagnostic_weight": 0.9, "information_gain_potential": 0.9}
            ]
        }"#;
        Catalog::from_json(conditions, r#"{ "regions": {} }"#, questions).unwrap()
    }

    #[test]
    fn one_decisive_answer_triggers_the_stopping_rule() {
        let catalog = two_condition_catalog();
        let engine = ConditionEngine::new(&catalog);
        let mut state = engine.initialize("ankle");

        let question = catalog.question("q_decisive").unwrap();
        engine.apply_answer(&mut state, question, &AnswerValue::Bool(true));

        let (leader, top) = state.posterior.top().unwrap();
        assert_eq!(leader, "cond_a");
        assert!(top > 0.85, "top was {top}");
        assert!(engine.should_stop(&state, false));
    }

    #[test]
    fn ranking_prefers_the_discriminative_question() {
        let catalog = two_condition_catalog();
        let engine = ConditionEngine::new(&catalog);
        let state = engine.initialize("ankle");

        let next = engine.next_question(&state, |_| true).unwrap();
        assert_eq!(next.id, "q_decisive");
    }

    #[test]
    fn unknown_region_disables_inference() {
        let catalog = two_condition_catalog();
        let engine = ConditionEngine::new(&catalog);
        let state = engine.initialize("elbow");
        assert!(state.posterior.is_empty());
        assert!(engine.next_question(&state, |_| true).is_none());
        assert!(engine.should_stop(&state, false));
    }

    #[test]
    fn budget_exhaustion_stops_questioning() {
        let catalog = two_condition_catalog();
        let engine = ConditionEngine::new(&catalog);
        let mut state = engine.initialize("ankle");
        // Neutral answers keep the distribution flat; only the budget can stop it.
        state.questions_asked = 13;
        assert!(engine.should_stop(&state, false));
        state.questions_asked = 5;
        assert!(!engine.should_stop(&state, false));
    }

    #[test]
    fn eligibility_predicate_filters_candidates() {
        let catalog = two_condition_catalog();
        let engine = ConditionEngine::new(&catalog);
        let state = engine.initialize("ankle");

        let next = engine.next_question(&state, |q| q.id != "q_decisive").unwrap();
        assert_eq!(next.id, "q_noise");
        assert!(engine.next_question(&state, |_| false).is_none());
    }
}
