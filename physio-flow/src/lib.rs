pub mod catalog;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod posterior;
pub mod report;
pub mod runner;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use catalog::{
    Catalog, ConditionEntry, QuestionDefinition, QuestionPhase, QuestionType, RegionScope,
    SourceEntry, SymptomCategory, SymptomLikelihood,
};
pub use engine::condition::{ConditionEngine, ConditionState};
pub use engine::source::{SourceEngine, SourceIdentificationResult, SourceState};
pub use error::{AssessmentError, Result};
pub use orchestrator::{Assessment, AssessmentStep, Progress};
pub use posterior::{Observation, Posterior};
pub use report::{ConfidenceLabel, DiagnosticReport, EvidenceQuality, RankedCondition};
pub use runner::AssessmentRunner;
pub use session::{AnswerValue, AssessmentPhase, AssessmentSession};
pub use storage::{InMemorySessionStorage, SessionStorage};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tiny_catalog() -> Catalog {
        let conditions = r#"{
            "regions": {
                "ankle": {
                    "name": "Ankle",
                    "conditions": {
                        "sprain": {
                            "name": "Lateral ligament sprain",
                            "base_probability": 0.6,
                            "symptoms": {
                                "inversion_injury": {"present": 0.9, "absent": 0.1, "weight": 0.9}
                            },
                            "recommendations": ["Relative rest and early protected movement."]
                        },
                        "tendinopathy": {
                            "name": "Peroneal tendinopathy",
                            "base_probability": 0.4,
                            "symptoms": {
                                "inversion_injury": {"present": 0.2, "absent": 0.7}
                            }
                        }
                    }
                }
            }
        }"#;
        let questions = r#"{
            "main": [
                {"id": "q_region", "phase": "region_selection", "text": "Where is the pain?",
                 "question_type": "body_selection", "options": ["ankle"]},
                {"id": "q_inversion", "phase": "differential",
                 "text": "Did the injury involve rolling the ankle inward?",
                 "question_type": "yes_no", "tests_symptoms": ["inversion_injury"],
                 "diagnostic_weight": 0.9, "information_gain_potential": 0.8}
            ]
        }"#;
        Catalog::from_json(conditions, r#"{ "regions": {} }"#, questions).unwrap()
    }

    #[tokio::test]
    async fn runner_drives_a_session_end_to_end() {
        let storage: Arc<dyn SessionStorage> = Arc::new(InMemorySessionStorage::new());
        let runner = AssessmentRunner::new(Arc::new(tiny_catalog()), storage);

        let (session_id, step) = runner.start().await.unwrap();
        let AssessmentStep::Question { question, .. } = step else {
            panic!("expected the region question first");
        };
        assert_eq!(question.id, "q_region");

        let step = runner
            .answer(&session_id, "q_region", AnswerValue::Text("ankle".into()))
            .await
            .unwrap();
        let AssessmentStep::Question { question, .. } = step else {
            panic!("expected a differential question after region selection");
        };
        assert_eq!(question.id, "q_inversion");

        let step = runner
            .answer(&session_id, "q_inversion", AnswerValue::Bool(true))
            .await
            .unwrap();
        let AssessmentStep::Diagnosis { report } = step else {
            panic!("expected a terminal diagnosis");
        };
        assert_eq!(report.differential[0].id, "sprain");
        assert!(report.differential[0].probability > 0.6);
    }

    #[tokio::test]
    async fn unknown_session_is_an_error() {
        let storage: Arc<dyn SessionStorage> = Arc::new(InMemorySessionStorage::new());
        let runner = AssessmentRunner::new(Arc::new(tiny_catalog()), storage);
        let result = runner.current("nope").await;
        assert!(matches!(result, Err(AssessmentError::SessionNotFound(_))));
    }
}
