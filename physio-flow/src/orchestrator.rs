use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::{Catalog, QuestionDefinition, QuestionPhase, QuestionType};
use crate::engine::condition::ConditionEngine;
use crate::engine::source::{SourceEngine, SourceIdentificationResult};
use crate::engine::observations_for_answer;
use crate::error::{AssessmentError, Result};
use crate::report::{DiagnosticReport, build_report};
use crate::session::{AnswerValue, AssessmentPhase, AssessmentSession};

/// Interview progress metadata attached to every served question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub questions_asked: usize,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leading_hypothesis: Option<String>,
    pub phase: AssessmentPhase,
}

/// What the orchestrator hands back after `start`/`answer`/`next`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssessmentStep {
    /// The next question to put to the patient.
    Question {
        question: QuestionDefinition,
        progress: Progress,
    },
    /// Source identification finished mid-stream; the interview continues
    /// on the next call, possibly in a different body region.
    SourceIdentified {
        result: SourceIdentificationResult,
        progress: Progress,
    },
    /// A red flag fired: stop questioning and direct to urgent care.
    Referral {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        triggered_by: Option<String>,
    },
    /// Terminal ranked differential with recommendations.
    Diagnosis { report: DiagnosticReport },
}

/// The assessment orchestrator: a phase state machine that sequences
/// safety → context → region selection → source identification →
/// functional → differential questioning, delegating symptom updates to
/// the two inference engines. It is the sole writer of a session and
/// processes one answer at a time to completion.
pub struct Assessment {
    catalog: Arc<Catalog>,
}

impl Assessment {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Assessment { catalog }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// First question of a fresh session.
    pub fn start(&self, session: &mut AssessmentSession) -> Result<AssessmentStep> {
        info!(session_id = %session.id, "Starting assessment");
        self.next(session)
    }

    /// Clear the session and serve the first question again.
    pub fn reset(&self, session: &mut AssessmentSession) -> Result<AssessmentStep> {
        info!(session_id = %session.id, "Resetting assessment");
        session.reset();
        self.next(session)
    }

    /// Record an answer, delegate the Bayesian update to the owning
    /// engine, advance the phase machine, and return the next step.
    pub fn answer(
        &self,
        session: &mut AssessmentSession,
        question_id: &str,
        value: AnswerValue,
    ) -> Result<AssessmentStep> {
        if session.phase.is_terminal() {
            return Err(AssessmentError::AssessmentComplete(session.id.clone()));
        }
        let question = self
            .catalog
            .question(question_id)
            .ok_or_else(|| AssessmentError::QuestionNotFound(question_id.to_string()))?
            .clone();
        if session.answers.contains_key(question_id) {
            return Err(AssessmentError::QuestionAlreadyAnswered(
                question_id.to_string(),
            ));
        }

        session.asked_questions.insert(question.id.clone());
        session.answers.insert(question.id.clone(), value.clone());
        session.pending_question = None;
        session.touch();

        // Hard safety override: an affirmative red-flag answer halts all
        // further questioning, regardless of confidence or budget.
        if question.red_flag && value.is_affirmative() {
            warn!(
                session_id = %session.id,
                question = %question.id,
                "Red flag answered affirmatively, halting assessment"
            );
            session.red_flag_detected = true;
            session.red_flag_question = Some(question.id.clone());
            if question.phase == QuestionPhase::SourceIdentification {
                session.source.red_flag_detected = true;
            }
            session.phase = AssessmentPhase::ReferralRequired;
            return Ok(self.referral_step(session));
        }

        for (symptom, observation) in observations_for_answer(&question, &value) {
            session.observations.insert(symptom, observation);
        }

        if question.question_type == QuestionType::BodySelection {
            match value.as_choice() {
                Some(region) => {
                    let region = region.to_string();
                    self.set_region(session, &region);
                }
                None => warn!(
                    session_id = %session.id,
                    question = %question.id,
                    "Unusable body-selection answer, region remains unset"
                ),
            }
        } else if question.phase == QuestionPhase::SourceIdentification {
            let engine = SourceEngine::new(&self.catalog);
            engine.apply_answer(&mut session.source, &question, &value);
        } else if session.body_region.is_some() {
            let engine = ConditionEngine::new(&self.catalog);
            engine.apply_answer(&mut session.condition, &question, &value);
        }
        // Before region selection the condition posterior does not exist
        // yet; the recorded observations are replayed into it when the
        // region becomes known.

        self.next(session)
    }

    /// Serve the next step for the session's current state. Idempotent: a
    /// pending unanswered question is served again rather than skipped.
    pub fn next(&self, session: &mut AssessmentSession) -> Result<AssessmentStep> {
        if session.red_flag_detected {
            session.phase = AssessmentPhase::ReferralRequired;
            return Ok(self.referral_step(session));
        }
        if let Some(pending) = session.pending_question.clone() {
            if let Some(question) = self.catalog.question(&pending) {
                return Ok(self.question_step(session, question.clone()));
            }
            session.pending_question = None;
        }

        loop {
            match session.phase {
                AssessmentPhase::ReferralRequired => return Ok(self.referral_step(session)),
                AssessmentPhase::DiagnosisComplete => {
                    let report = build_report(&self.catalog, session);
                    return Ok(AssessmentStep::Diagnosis { report });
                }
                AssessmentPhase::Safety => {
                    if let Some(question) = self.next_catalog_question(session, QuestionPhase::Safety)
                    {
                        return Ok(self.question_step(session, question));
                    }
                    self.advance(session);
                }
                AssessmentPhase::Context => {
                    if let Some(question) = self.pending_safety_question(session) {
                        return Ok(self.question_step(session, question));
                    }
                    if let Some(question) =
                        self.next_catalog_question(session, QuestionPhase::Context)
                    {
                        return Ok(self.question_step(session, question));
                    }
                    self.advance(session);
                }
                AssessmentPhase::RegionSelection => {
                    if session.body_region.is_some() {
                        self.advance(session);
                        continue;
                    }
                    if let Some(question) =
                        self.next_catalog_question(session, QuestionPhase::RegionSelection)
                    {
                        return Ok(self.question_step(session, question));
                    }
                    // No region question authored: proceed generically.
                    warn!(session_id = %session.id, "No region-selection question available");
                    self.advance(session);
                }
                AssessmentPhase::SourceIdentification => {
                    if session.source.posterior.is_empty() {
                        self.advance(session);
                        continue;
                    }
                    let engine = SourceEngine::new(&self.catalog);
                    if engine.should_stop(&session.source) {
                        return self.finalize_source(session);
                    }
                    if let Some(question) = self.pending_safety_question(session) {
                        return Ok(self.question_step(session, question));
                    }
                    let next = engine
                        .next_question(&session.source, |q| self.is_eligible(session, q))
                        .cloned();
                    match next {
                        Some(question) => return Ok(self.question_step(session, question)),
                        None => return self.finalize_source(session),
                    }
                }
                AssessmentPhase::Functional => {
                    if session.body_region.is_none() {
                        self.advance(session);
                        continue;
                    }
                    if let Some(question) = self.pending_safety_question(session) {
                        return Ok(self.question_step(session, question));
                    }
                    // Fast track: a confident posterior skips straight to
                    // the differential questioning.
                    let engine = ConditionEngine::new(&self.catalog);
                    if engine.confidence(&session.condition) > 0.7 {
                        info!(
                            session_id = %session.id,
                            "Confidence above fast-track threshold, advancing to differential"
                        );
                        self.advance(session);
                        continue;
                    }
                    if let Some(question) =
                        self.next_catalog_question(session, QuestionPhase::Functional)
                    {
                        return Ok(self.question_step(session, question));
                    }
                    self.advance(session);
                }
                AssessmentPhase::Differential => {
                    if session.condition.posterior.is_empty() {
                        session.phase = AssessmentPhase::DiagnosisComplete;
                        continue;
                    }
                    let engine = ConditionEngine::new(&self.catalog);
                    if engine.should_stop(&session.condition, true) {
                        session.phase = AssessmentPhase::DiagnosisComplete;
                        continue;
                    }
                    let next = engine
                        .next_question(&session.condition, |q| self.is_eligible(session, q))
                        .cloned();
                    match next {
                        Some(question) => return Ok(self.question_step(session, question)),
                        None => {
                            session.phase = AssessmentPhase::DiagnosisComplete;
                        }
                    }
                }
            }
        }
    }

    /// Pure phase-transition function. The only branch point is whether a
    /// source table exists for the selected region.
    fn next_phase(&self, session: &AssessmentSession) -> AssessmentPhase {
        match session.phase {
            AssessmentPhase::Safety => AssessmentPhase::Context,
            AssessmentPhase::Context => AssessmentPhase::RegionSelection,
            AssessmentPhase::RegionSelection => {
                if !session.source.posterior.is_empty() {
                    AssessmentPhase::SourceIdentification
                } else {
                    AssessmentPhase::Functional
                }
            }
            AssessmentPhase::SourceIdentification => AssessmentPhase::Functional,
            AssessmentPhase::Functional => AssessmentPhase::Differential,
            AssessmentPhase::Differential => AssessmentPhase::DiagnosisComplete,
            terminal => terminal,
        }
    }

    fn advance(&self, session: &mut AssessmentSession) {
        let next = self.next_phase(session);
        if next != session.phase {
            info!(
                session_id = %session.id,
                from = ?session.phase,
                to = ?next,
                "Phase transition"
            );
            session.phase = next;
        }
    }

    /// A question is eligible when unasked, applicable to the known body
    /// region, and its conditional gate (if any) is satisfied. Functional
    /// and differential questions additionally require the region to be
    /// known, even when authored with an "all" scope.
    fn is_eligible(&self, session: &AssessmentSession, question: &QuestionDefinition) -> bool {
        if session.asked_questions.contains(&question.id) {
            return false;
        }
        if !question
            .body_regions
            .applies_to(session.body_region.as_deref())
        {
            return false;
        }
        if matches!(
            question.phase,
            QuestionPhase::Functional | QuestionPhase::Differential
        ) && session.body_region.is_none()
        {
            return false;
        }
        match &question.conditional_on {
            None => true,
            Some(gate) => session
                .answers
                .get(&gate.question)
                .map(|answer| answer.as_text() == gate.answer)
                .unwrap_or(false),
        }
    }

    fn next_catalog_question(
        &self,
        session: &AssessmentSession,
        phase: QuestionPhase,
    ) -> Option<QuestionDefinition> {
        self.catalog
            .questions_in_phase(phase)
            .find(|q| self.is_eligible(session, q))
            .cloned()
    }

    /// Safety screens take precedence in every questioning phase; a
    /// region-specific safety check becomes eligible the moment its
    /// region is selected, even though the safety phase has passed.
    fn pending_safety_question(&self, session: &AssessmentSession) -> Option<QuestionDefinition> {
        self.next_catalog_question(session, QuestionPhase::Safety)
    }

    /// Select the body region: initialize the condition engine for it,
    /// replay the retained general observations into the fresh posterior,
    /// and set up the source state. On a region switch, answers to the old
    /// region's specific questions are discarded first.
    fn set_region(&self, session: &mut AssessmentSession, region: &str) {
        let previous = session.body_region.replace(region.to_string());
        if let Some(previous) = previous.filter(|p| p.as_str() != region) {
            info!(
                session_id = %session.id,
                from = %previous,
                to = %region,
                "Switching body region"
            );
            self.prune_region_specific(session, &previous);
        }

        let condition_engine = ConditionEngine::new(&self.catalog);
        let mut state = condition_engine.initialize(region);
        for (symptom, observation) in &session.observations {
            condition_engine.observe(&mut state, symptom, observation);
        }
        state.questions_asked = self.informing_question_count(session);
        session.condition = state;

        let source_engine = SourceEngine::new(&self.catalog);
        session.source = source_engine.initialize_for_region(region);
    }

    /// Discard answers, asked marks and observations belonging to
    /// questions specific to the abandoned region; general safety and
    /// context answers are retained and replayed.
    fn prune_region_specific(&self, session: &mut AssessmentSession, old_region: &str) {
        let discarded: Vec<String> = session
            .asked_questions
            .iter()
            .filter(|id| {
                self.catalog
                    .question(id)
                    .map(|q| {
                        !q.body_regions.is_all() && q.body_regions.applies_to(Some(old_region))
                    })
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        for id in &discarded {
            session.asked_questions.remove(id);
            session.answers.remove(id);
        }
        if !discarded.is_empty() {
            info!(
                session_id = %session.id,
                count = discarded.len(),
                "Discarded region-specific answers from previous region"
            );
        }

        // Rebuild the observation map from the retained answers so no
        // stale region-specific evidence survives the switch.
        session.observations.clear();
        let answers: Vec<(String, AnswerValue)> = session
            .answers
            .iter()
            .map(|(id, v)| (id.clone(), v.clone()))
            .collect();
        for (id, value) in answers {
            if let Some(question) = self.catalog.question(&id) {
                for (symptom, observation) in observations_for_answer(question, &value) {
                    session.observations.insert(symptom, observation);
                }
            }
        }
    }

    /// How many answered questions carried symptom evidence into the
    /// condition posterior (region selection itself carries none).
    fn informing_question_count(&self, session: &AssessmentSession) -> u32 {
        session
            .answers
            .keys()
            .filter(|id| {
                self.catalog
                    .question(id)
                    .map(|q| {
                        q.question_type != QuestionType::BodySelection
                            && (!q.tests_symptoms.is_empty() || q.option_symptoms.is_some())
                    })
                    .unwrap_or(false)
            })
            .count() as u32
    }

    /// Complete source identification: persist the result, honor its red
    /// flag, apply the region switch, and notify the caller.
    fn finalize_source(&self, session: &mut AssessmentSession) -> Result<AssessmentStep> {
        let engine = SourceEngine::new(&self.catalog);
        let result = engine.result(&session.source);

        if result.red_flag_detected {
            session.red_flag_detected = true;
            session.phase = AssessmentPhase::ReferralRequired;
            session.source_result = Some(result);
            return Ok(self.referral_step(session));
        }

        info!(
            session_id = %session.id,
            is_local = result.is_local,
            switch = result.should_switch_region,
            "Source identification complete"
        );
        session.source_result = Some(result.clone());

        if result.should_switch_region {
            if let Some(new_region) = &result.new_region {
                self.set_region(session, new_region);
            }
        }
        session.phase = AssessmentPhase::Functional;

        let progress = self.progress(session);
        Ok(AssessmentStep::SourceIdentified { result, progress })
    }

    fn question_step(
        &self,
        session: &mut AssessmentSession,
        question: QuestionDefinition,
    ) -> AssessmentStep {
        session.pending_question = Some(question.id.clone());
        let progress = self.progress(session);
        AssessmentStep::Question { question, progress }
    }

    fn referral_step(&self, session: &AssessmentSession) -> AssessmentStep {
        let triggered_by = session.red_flag_question.clone();
        AssessmentStep::Referral {
            message: "Your answers indicate a condition that needs prompt medical attention. \
                      Please seek urgent clinical care rather than continuing this assessment."
                .to_string(),
            triggered_by,
        }
    }

    fn progress(&self, session: &AssessmentSession) -> Progress {
        let (confidence, leading_hypothesis) =
            if session.phase == AssessmentPhase::SourceIdentification {
                let leader = session.source.posterior.top().and_then(|(id, _)| {
                    session.body_region.as_deref().and_then(|region| {
                        self.catalog
                            .region_sources(region)
                            .and_then(|table| table.get(&id))
                            .map(|entry| entry.name.clone())
                    })
                });
                (session.source.posterior.confidence(), leader)
            } else {
                let leader = session.condition.posterior.top().and_then(|(id, _)| {
                    session.body_region.as_deref().and_then(|region| {
                        self.catalog
                            .region_conditions(region)
                            .and_then(|table| table.conditions.get(&id))
                            .map(|entry| entry.name.clone())
                    })
                });
                (session.condition.posterior.confidence(), leader)
            };

        Progress {
            questions_asked: session.answers.len(),
            confidence,
            leading_hypothesis,
            phase: session.phase,
        }
    }
}
