//! AssessmentRunner – convenience wrapper that loads a session, applies
//! exactly **one** interview step, and persists the updated session back
//! to storage.
//!
//! Interactive callers (a web service handling one answer per request, a
//! terminal client) usually want the load → step → save round trip as a
//! one-liner. Callers that need custom persistence (batch replays,
//! optimistic locking) can drive [`Assessment`] directly and save when it
//! suits them; both paths are fully compatible.

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::error::{AssessmentError, Result};
use crate::orchestrator::{Assessment, AssessmentStep};
use crate::session::{AnswerValue, AssessmentSession};
use crate::storage::SessionStorage;

/// High-level helper orchestrating the common _load → step → save_ pattern.
#[derive(Clone)]
pub struct AssessmentRunner {
    assessment: Arc<Assessment>,
    storage: Arc<dyn SessionStorage>,
}

impl AssessmentRunner {
    pub fn new(catalog: Arc<Catalog>, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            assessment: Arc::new(Assessment::new(catalog)),
            storage,
        }
    }

    /// Create a fresh session, serve its first question, and persist it.
    /// Returns the new session id alongside the step.
    pub async fn start(&self) -> Result<(String, AssessmentStep)> {
        let mut session = AssessmentSession::new();
        let step = self.assessment.start(&mut session)?;
        let id = session.id.clone();
        self.storage.save(session).await?;
        Ok((id, step))
    }

    /// Record one answer for the session and persist the updated state.
    pub async fn answer(
        &self,
        session_id: &str,
        question_id: &str,
        value: AnswerValue,
    ) -> Result<AssessmentStep> {
        let mut session = self.load(session_id).await?;
        let step = self.assessment.answer(&mut session, question_id, value)?;
        self.storage.save(session).await?;
        Ok(step)
    }

    /// Re-serve the current step without recording an answer.
    pub async fn current(&self, session_id: &str) -> Result<AssessmentStep> {
        let mut session = self.load(session_id).await?;
        let step = self.assessment.next(&mut session)?;
        self.storage.save(session).await?;
        Ok(step)
    }

    /// Clear the session state and serve the first question again.
    pub async fn reset(&self, session_id: &str) -> Result<AssessmentStep> {
        let mut session = self.load(session_id).await?;
        let step = self.assessment.reset(&mut session)?;
        self.storage.save(session).await?;
        Ok(step)
    }

    pub async fn session(&self, session_id: &str) -> Result<AssessmentSession> {
        self.load(session_id).await
    }

    async fn load(&self, session_id: &str) -> Result<AssessmentSession> {
        self.storage
            .get(session_id)
            .await?
            .ok_or_else(|| AssessmentError::SessionNotFound(session_id.to_string()))
    }
}
