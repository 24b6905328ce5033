pub mod condition;
pub mod source;

use tracing::warn;

use crate::catalog::{QuestionDefinition, QuestionType};
use crate::posterior::Observation;
use crate::session::AnswerValue;

/// Possible answer outcomes of a question, each expanded to the symptom
/// observations it would produce. Used to simulate updates when ranking
/// questions by expected information gain.
pub(crate) fn answer_scenarios(question: &QuestionDefinition) -> Vec<Vec<(String, Observation)>> {
    match question.question_type {
        QuestionType::YesNo => vec![
            symptom_set(&question.tests_symptoms, Observation::Bool(true)),
            symptom_set(&question.tests_symptoms, Observation::Bool(false)),
        ],
        QuestionType::MultipleChoice => question
            .options
            .iter()
            .map(|option| expand_choice(question, option))
            .collect(),
        // Region selection carries no symptom evidence; the orchestrator
        // handles it outside the ranking.
        QuestionType::BodySelection => Vec::new(),
    }
}

/// Map a concrete answer to symptom observations.
///
/// Single-select questions with `option_symptoms` wiring are one-of-N
/// mutually exclusive indicators: the chosen option's symptoms are
/// asserted present and every sibling option's symptoms explicitly absent,
/// so stale evidence from a contradictory option cannot linger.
/// Malformed answers degrade to "non-empty means affirmative" with a
/// data-quality warning rather than stalling the interview.
pub(crate) fn observations_for_answer(
    question: &QuestionDefinition,
    answer: &AnswerValue,
) -> Vec<(String, Observation)> {
    match question.question_type {
        QuestionType::YesNo => {
            if !matches!(answer, AnswerValue::Bool(_)) {
                warn!(
                    question = %question.id,
                    answer = %answer.as_text(),
                    "Non-boolean answer to yes/no question, using affirmative fallback"
                );
            }
            symptom_set(&question.tests_symptoms, Observation::Bool(answer.is_affirmative()))
        }
        QuestionType::MultipleChoice => match answer.as_choice() {
            Some(choice) => {
                if matches!(answer, AnswerValue::List(items) if items.len() > 1) {
                    warn!(
                        question = %question.id,
                        "Multi-select answer to single-select question, using first option"
                    );
                }
                expand_choice(question, choice)
            }
            None => {
                warn!(
                    question = %question.id,
                    answer = %answer.as_text(),
                    "Unusable answer to multiple-choice question, using affirmative fallback"
                );
                symptom_set(&question.tests_symptoms, Observation::Bool(answer.is_affirmative()))
            }
        },
        QuestionType::BodySelection => Vec::new(),
    }
}

fn expand_choice(question: &QuestionDefinition, choice: &str) -> Vec<(String, Observation)> {
    match &question.option_symptoms {
        Some(option_symptoms) => {
            let mut observations = Vec::new();
            for (option, symptoms) in option_symptoms {
                let present = option == choice;
                for symptom in symptoms {
                    observations.push((symptom.clone(), Observation::Bool(present)));
                }
            }
            observations
        }
        None => symptom_set(
            &question.tests_symptoms,
            Observation::Value(choice.to_string()),
        ),
    }
}

fn symptom_set(symptoms: &[String], observation: Observation) -> Vec<(String, Observation)> {
    symptoms
        .iter()
        .map(|s| (s.clone(), observation.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{QuestionPhase, RegionScope};
    use std::collections::BTreeMap;

    fn question(question_type: QuestionType) -> QuestionDefinition {
        QuestionDefinition {
            id: "q".to_string(),
            phase: QuestionPhase::Differential,
            text: "?".to_string(),
            question_type,
            options: vec![],
            body_regions: RegionScope::default(),
            tests_symptoms: vec!["swelling".to_string()],
            option_symptoms: None,
            diagnostic_weight: 0.5,
            information_gain_potential: 0.5,
            red_flag: false,
            conditional_on: None,
        }
    }

    #[test]
    fn yes_no_maps_all_tested_symptoms() {
        let q = question(QuestionType::YesNo);
        let obs = observations_for_answer(&q, &AnswerValue::Bool(true));
        assert_eq!(obs, vec![("swelling".to_string(), Observation::Bool(true))]);
    }

    #[test]
    fn malformed_yes_no_answer_falls_back_to_affirmative() {
        let q = question(QuestionType::YesNo);
        let obs = observations_for_answer(&q, &AnswerValue::Text("a bit".into()));
        assert_eq!(obs, vec![("swelling".to_string(), Observation::Bool(true))]);
        let obs = observations_for_answer(&q, &AnswerValue::List(vec![]));
        assert_eq!(obs, vec![("swelling".to_string(), Observation::Bool(false))]);
    }

    #[test]
    fn plain_choice_feeds_value_observations() {
        let mut q = question(QuestionType::MultipleChoice);
        q.options = vec!["mild".to_string(), "severe".to_string()];
        let obs = observations_for_answer(&q, &AnswerValue::Text("mild".into()));
        assert_eq!(
            obs,
            vec![("swelling".to_string(), Observation::Value("mild".into()))]
        );
    }

    #[test]
    fn option_wiring_asserts_siblings_absent() {
        let mut q = question(QuestionType::MultipleChoice);
        q.options = vec!["movement".to_string(), "rest".to_string()];
        q.option_symptoms = Some(BTreeMap::from([
            ("movement".to_string(), vec!["pain_on_movement".to_string()]),
            ("rest".to_string(), vec!["pain_at_rest".to_string()]),
        ]));
        let obs = observations_for_answer(&q, &AnswerValue::Text("movement".into()));
        assert!(obs.contains(&("pain_on_movement".to_string(), Observation::Bool(true))));
        assert!(obs.contains(&("pain_at_rest".to_string(), Observation::Bool(false))));
    }

    #[test]
    fn scenarios_cover_every_answer_outcome() {
        let mut q = question(QuestionType::MultipleChoice);
        q.options = vec!["mild".to_string(), "severe".to_string()];
        assert_eq!(answer_scenarios(&q).len(), 2);

        let q = question(QuestionType::YesNo);
        assert_eq!(answer_scenarios(&q).len(), 2);

        let q = question(QuestionType::BodySelection);
        assert!(answer_scenarios(&q).is_empty());
    }
}
