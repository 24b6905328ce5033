use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::QuestionPhase;
use crate::engine::condition::ConditionState;
use crate::engine::source::{SourceIdentificationResult, SourceState};
use crate::posterior::Observation;

/// The interview state machine. Phases advance strictly forward except for
/// the region switch, which re-enters the regional phases for the new
/// region. `ReferralRequired` and `DiagnosisComplete` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentPhase {
    Safety,
    Context,
    RegionSelection,
    SourceIdentification,
    Functional,
    Differential,
    ReferralRequired,
    DiagnosisComplete,
}

impl AssessmentPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AssessmentPhase::ReferralRequired | AssessmentPhase::DiagnosisComplete
        )
    }

    /// The catalog question phase served while in this session phase.
    pub fn question_phase(&self) -> Option<QuestionPhase> {
        match self {
            AssessmentPhase::Safety => Some(QuestionPhase::Safety),
            AssessmentPhase::Context => Some(QuestionPhase::Context),
            AssessmentPhase::RegionSelection => Some(QuestionPhase::RegionSelection),
            AssessmentPhase::SourceIdentification => Some(QuestionPhase::SourceIdentification),
            AssessmentPhase::Functional => Some(QuestionPhase::Functional),
            AssessmentPhase::Differential => Some(QuestionPhase::Differential),
            AssessmentPhase::ReferralRequired | AssessmentPhase::DiagnosisComplete => None,
        }
    }
}

/// A raw answer as supplied by the caller. Untagged so the HTTP layer can
/// pass JSON booleans, strings or string arrays straight through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

impl AnswerValue {
    /// Whether this answer counts as affirmative. Unexpected shapes fall
    /// back to "non-empty means yes" so the interview keeps moving; the
    /// caller logs the data-quality warning.
    pub fn is_affirmative(&self) -> bool {
        match self {
            AnswerValue::Bool(b) => *b,
            AnswerValue::Text(text) => {
                let text = text.trim().to_ascii_lowercase();
                !text.is_empty() && text != "no" && text != "false" && text != "none"
            }
            AnswerValue::List(items) => !items.is_empty(),
        }
    }

    /// Canonical string form used to match `conditional_on` gates.
    pub fn as_text(&self) -> String {
        match self {
            AnswerValue::Bool(true) => "yes".to_string(),
            AnswerValue::Bool(false) => "no".to_string(),
            AnswerValue::Text(text) => text.clone(),
            AnswerValue::List(items) => items.join(","),
        }
    }

    /// The selected option for a single-select question, tolerating a
    /// stray multi-select payload by taking its first element.
    pub fn as_choice(&self) -> Option<&str> {
        match self {
            AnswerValue::Text(text) if !text.is_empty() => Some(text),
            AnswerValue::List(items) => items.first().map(|s| s.as_str()),
            _ => None,
        }
    }
}

/// One patient interaction. Mutated exclusively by the orchestrator, one
/// answer at a time; independent sessions share nothing mutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub phase: AssessmentPhase,
    pub body_region: Option<String>,
    pub asked_questions: BTreeSet<String>,
    pub answers: BTreeMap<String, AnswerValue>,
    pub observations: BTreeMap<String, Observation>,
    pub condition: ConditionState,
    pub source: SourceState,
    pub source_result: Option<SourceIdentificationResult>,
    pub red_flag_detected: bool,
    pub red_flag_question: Option<String>,
    /// The question most recently served and not yet answered.
    pub pending_question: Option<String>,
}

impl AssessmentSession {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(id: String) -> Self {
        let now = Utc::now();
        AssessmentSession {
            id,
            created_at: now,
            updated_at: now,
            phase: AssessmentPhase::Safety,
            body_region: None,
            asked_questions: BTreeSet::new(),
            answers: BTreeMap::new(),
            observations: BTreeMap::new(),
            condition: ConditionState::default(),
            source: SourceState::default(),
            source_result: None,
            red_flag_detected: false,
            red_flag_question: None,
            pending_question: None,
        }
    }

    /// Clear all interview state, keeping the session id.
    pub fn reset(&mut self) {
        let id = self.id.clone();
        let created_at = self.created_at;
        *self = AssessmentSession::with_id(id);
        self.created_at = created_at;
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for AssessmentSession {
    fn default() -> Self {
        Self::new()
    }
}
