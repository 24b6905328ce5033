use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

/// How strongly a symptom discriminates between hypotheses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymptomCategory {
    Screening,
    Confirmation,
    Pathognomonic,
}

impl Default for SymptomCategory {
    fn default() -> Self {
        SymptomCategory::Screening
    }
}

/// Conditional likelihoods of one symptom given one hypothesis.
///
/// `present` and `absent` are direct P(state | hypothesis) terms; they are
/// not normalized against each other. `values` carries the value-specific
/// likelihoods for multi-valued symptoms; a value with no entry falls back
/// to a neutral 0.5 so a data-authoring gap can never eliminate a
/// hypothesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymptomLikelihood {
    pub present: f64,
    pub absent: f64,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub category: SymptomCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<BTreeMap<String, f64>>,
}

pub const NEUTRAL_LIKELIHOOD: f64 = 0.5;

impl SymptomLikelihood {
    pub fn for_bool(&self, present: bool) -> f64 {
        if present { self.present } else { self.absent }
    }

    /// Value-specific likelihood for a multi-valued symptom, neutral when
    /// the table does not define the value.
    pub fn for_value(&self, value: &str) -> f64 {
        self.values
            .as_ref()
            .and_then(|m| m.get(value).copied())
            .unwrap_or(NEUTRAL_LIKELIHOOD)
    }
}

fn default_weight() -> f64 {
    0.5
}

fn default_gain_potential() -> f64 {
    0.5
}

fn default_question_cap() -> u32 {
    12
}

/// One candidate condition within a body region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionEntry {
    pub name: String,
    pub base_probability: f64,
    #[serde(default)]
    pub symptoms: BTreeMap<String, SymptomLikelihood>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// The condition table for one body region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConditions {
    pub name: String,
    /// Questioning budget for this region. Anatomically complex regions
    /// author a higher cap.
    #[serde(default = "default_question_cap")]
    pub question_cap: u32,
    pub conditions: BTreeMap<String, ConditionEntry>,
}

/// One candidate pain source for a body region: either a local structure
/// or a referring region/organ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub name: String,
    pub base_probability: f64,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub is_red_flag: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refers_to_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinical_note: Option<String>,
    #[serde(default)]
    pub symptoms: BTreeMap<String, SymptomLikelihood>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    YesNo,
    MultipleChoice,
    BodySelection,
}

/// The interview phase a question belongs to. This is catalog data; the
/// session-level state machine lives in [`crate::session::AssessmentPhase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionPhase {
    Safety,
    Context,
    RegionSelection,
    SourceIdentification,
    Functional,
    Differential,
}

/// Which body regions a question applies to: the keyword `"all"` or an
/// explicit region list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegionScope {
    Keyword(String),
    Regions(Vec<String>),
}

impl Default for RegionScope {
    fn default() -> Self {
        RegionScope::Keyword("all".to_string())
    }
}

impl RegionScope {
    pub fn is_all(&self) -> bool {
        matches!(self, RegionScope::Keyword(_))
    }

    /// A region-unrestricted question applies always; a region-specific one
    /// only once the session's body region is known and listed.
    pub fn applies_to(&self, region: Option<&str>) -> bool {
        match self {
            RegionScope::Keyword(_) => true,
            RegionScope::Regions(regions) => match region {
                Some(r) => regions.iter().any(|candidate| candidate == r),
                None => false,
            },
        }
    }
}

/// Gate making a question eligible only after another question received a
/// specific answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalOn {
    pub question: String,
    pub answer: String,
}

/// Immutable catalog entry describing one interview question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionDefinition {
    pub id: String,
    pub phase: QuestionPhase,
    pub text: String,
    pub question_type: QuestionType,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub body_regions: RegionScope,
    #[serde(default)]
    pub tests_symptoms: Vec<String>,
    /// Single-select sibling wiring: the chosen option's symptoms are
    /// asserted present and every other option's symptoms absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_symptoms: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default = "default_weight")]
    pub diagnostic_weight: f64,
    #[serde(default = "default_gain_potential")]
    pub information_gain_potential: f64,
    #[serde(default)]
    pub red_flag: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional_on: Option<ConditionalOn>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionCatalog {
    #[serde(default)]
    pub regions: BTreeMap<String, RegionConditions>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceCatalog {
    #[serde(default)]
    pub regions: BTreeMap<String, BTreeMap<String, SourceEntry>>,
}

/// On-disk question catalog: the main interview flow and the
/// referral-source question set are authored separately and merged into
/// one addressable question space at load time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct QuestionFile {
    #[serde(default)]
    main: Vec<QuestionDefinition>,
    #[serde(default)]
    referral: Vec<QuestionDefinition>,
}

/// The complete static knowledge base, loaded once per process and shared
/// immutably between sessions.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub conditions: ConditionCatalog,
    pub sources: SourceCatalog,
    questions: Vec<QuestionDefinition>,
    index: BTreeMap<String, usize>,
}

impl Catalog {
    pub fn from_json(conditions: &str, sources: &str, questions: &str) -> Result<Self> {
        let conditions: ConditionCatalog = serde_json::from_str(conditions)?;
        let sources: SourceCatalog = serde_json::from_str(sources)?;
        let question_file: QuestionFile = serde_json::from_str(questions)?;

        let mut merged = question_file.main;
        merged.extend(question_file.referral);

        let mut catalog = Catalog {
            conditions,
            sources,
            questions: merged,
            index: BTreeMap::new(),
        };
        catalog.validate();
        catalog.reindex();

        info!(
            regions = catalog.conditions.regions.len(),
            source_regions = catalog.sources.regions.len(),
            questions = catalog.questions.len(),
            "Knowledge catalog loaded"
        );
        Ok(catalog)
    }

    /// One-time load from a knowledge directory containing
    /// `conditions.json`, `sources.json` and `questions.json`.
    pub async fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let conditions = tokio::fs::read_to_string(dir.join("conditions.json")).await?;
        let sources = tokio::fs::read_to_string(dir.join("sources.json")).await?;
        let questions = tokio::fs::read_to_string(dir.join("questions.json")).await?;
        Self::from_json(&conditions, &sources, &questions)
    }

    pub fn question(&self, id: &str) -> Option<&QuestionDefinition> {
        self.index.get(id).map(|&i| &self.questions[i])
    }

    pub fn questions(&self) -> &[QuestionDefinition] {
        &self.questions
    }

    pub fn questions_in_phase(
        &self,
        phase: QuestionPhase,
    ) -> impl Iterator<Item = &QuestionDefinition> {
        self.questions.iter().filter(move |q| q.phase == phase)
    }

    pub fn region_conditions(&self, region: &str) -> Option<&RegionConditions> {
        self.conditions.regions.get(region)
    }

    pub fn region_sources(&self, region: &str) -> Option<&BTreeMap<String, SourceEntry>> {
        self.sources.regions.get(region)
    }

    pub fn question_cap(&self, region: &str) -> u32 {
        self.region_conditions(region)
            .map(|r| r.question_cap)
            .unwrap_or_else(default_question_cap)
    }

    fn reindex(&mut self) {
        self.index = self
            .questions
            .iter()
            .enumerate()
            .map(|(i, q)| (q.id.clone(), i))
            .collect();
    }

    /// Load-time hygiene: clamp out-of-range probabilities, drop duplicate
    /// question ids and dangling references. Violations are logged and
    /// repaired, never fatal, so a data-authoring slip degrades one entry
    /// rather than the whole knowledge base.
    fn validate(&mut self) {
        for (region_id, region) in self.conditions.regions.iter_mut() {
            for (condition_id, condition) in region.conditions.iter_mut() {
                clamp_probability(region_id, condition_id, "base", &mut condition.base_probability);
                for (symptom_id, likelihood) in condition.symptoms.iter_mut() {
                    clamp_likelihood(region_id, symptom_id, likelihood);
                }
            }
        }
        let known_regions: BTreeSet<String> =
            self.conditions.regions.keys().cloned().collect();
        for (region_id, sources) in self.sources.regions.iter_mut() {
            for (source_id, source) in sources.iter_mut() {
                clamp_probability(region_id, source_id, "base", &mut source.base_probability);
                for (symptom_id, likelihood) in source.symptoms.iter_mut() {
                    clamp_likelihood(region_id, symptom_id, likelihood);
                }
                if let Some(target) = &source.refers_to_region {
                    if !known_regions.contains(target) {
                        warn!(
                            region = %region_id,
                            source = %source_id,
                            target = %target,
                            "refers_to_region targets an unknown region, clearing"
                        );
                        source.refers_to_region = None;
                    }
                }
            }
        }

        let mut seen = BTreeSet::new();
        self.questions.retain(|q| {
            let fresh = seen.insert(q.id.clone());
            if !fresh {
                warn!(question = %q.id, "Duplicate question id, dropping later entry");
            }
            fresh
        });

        for question in self.questions.iter_mut() {
            if let RegionScope::Keyword(keyword) = &question.body_regions {
                if keyword != "all" {
                    warn!(
                        question = %question.id,
                        keyword = %keyword,
                        "Unknown region scope keyword, treating as \"all\""
                    );
                }
            }
            if let Some(option_symptoms) = &question.option_symptoms {
                for option in option_symptoms.keys() {
                    if !question.options.iter().any(|o| o == option) {
                        warn!(
                            question = %question.id,
                            option = %option,
                            "option_symptoms entry does not match any option"
                        );
                    }
                }
            }
        }

        let conditionals: Vec<(String, String)> = self
            .questions
            .iter()
            .filter_map(|q| {
                q.conditional_on
                    .as_ref()
                    .map(|c| (q.id.clone(), c.question.clone()))
            })
            .collect();
        for (question_id, target) in conditionals {
            if !seen.contains(&target) {
                warn!(
                    question = %question_id,
                    target = %target,
                    "conditional_on targets an unknown question, dropping gate"
                );
                if let Some(q) = self.questions.iter_mut().find(|q| q.id == question_id) {
                    q.conditional_on = None;
                }
            }
        }
    }
}

fn clamp_probability(scope: &str, id: &str, field: &str, value: &mut f64) {
    if !(0.0..=1.0).contains(value) || value.is_nan() {
        warn!(scope, id, field, value = *value, "Probability out of range, clamping");
        *value = value.clamp(0.0, 1.0);
        if value.is_nan() {
            *value = 0.0;
        }
    }
}

fn clamp_likelihood(scope: &str, symptom: &str, likelihood: &mut SymptomLikelihood) {
    clamp_probability(scope, symptom, "present", &mut likelihood.present);
    clamp_probability(scope, symptom, "absent", &mut likelihood.absent);
    if !(0.0..=1.0).contains(&likelihood.weight) || likelihood.weight.is_nan() {
        warn!(scope, symptom, weight = likelihood.weight, "Weight out of range, clamping");
        likelihood.weight = likelihood.weight.clamp(0.0, 1.0);
        if likelihood.weight.is_nan() {
            likelihood.weight = 0.5;
        }
    }
    if let Some(values) = likelihood.values.as_mut() {
        for (value, probability) in values.iter_mut() {
            clamp_probability(scope, symptom, value, probability);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_sources() -> &'static str {
        r#"{ "regions": {} }"#
    }

    #[test]
    fn merges_main_and_referral_question_spaces() {
        let questions = r#"{
            "main": [
                {"id": "q_onset", "phase": "context", "text": "When did the pain start?",
                 "question_type": "multiple_choice", "options": ["recent", "weeks", "months"]}
            ],
            "referral": [
                {"id": "q_neck", "phase": "source_identification", "text": "Does neck movement change the pain?",
                 "question_type": "yes_no", "tests_symptoms": ["neck_movement_provokes"]}
            ]
        }"#;
        let catalog =
            Catalog::from_json(r#"{ "regions": {} }"#, empty_sources(), questions).unwrap();
        assert!(catalog.question("q_onset").is_some());
        assert!(catalog.question("q_neck").is_some());
        assert_eq!(catalog.questions().len(), 2);
    }

    #[test]
    fn clamps_out_of_range_probabilities() {
        let conditions = r#"{
            "regions": {
                "ankle": {
                    "name": "Ankle",
                    "conditions": {
                        "sprain": {
                            "name": "Lateral ligament sprain",
                            "base_probability": 1.7,
                            "symptoms": {
                                "swelling": {"present": -0.2, "absent": 0.4}
                            }
                        }
                    }
                }
            }
        }"#;
        let catalog = Catalog::from_json(conditions, empty_sources(), r#"{}"#).unwrap();
        let sprain = &catalog.region_conditions("ankle").unwrap().conditions["sprain"];
        assert_eq!(sprain.base_probability, 1.0);
        assert_eq!(sprain.symptoms["swelling"].present, 0.0);
    }

    #[test]
    fn drops_dangling_references() {
        let sources = r#"{
            "regions": {
                "shoulder": {
                    "cervical_referral": {
                        "name": "Cervical referral",
                        "base_probability": 0.3,
                        "is_local": false,
                        "refers_to_region": "no_such_region"
                    }
                }
            }
        }"#;
        let questions = r#"{
            "main": [
                {"id": "q_a", "phase": "context", "text": "A?", "question_type": "yes_no",
                 "conditional_on": {"question": "missing", "answer": "yes"}}
            ]
        }"#;
        let catalog = Catalog::from_json(r#"{ "regions": {} }"#, sources, questions).unwrap();
        let source = &catalog.region_sources("shoulder").unwrap()["cervical_referral"];
        assert!(source.refers_to_region.is_none());
        assert!(catalog.question("q_a").unwrap().conditional_on.is_none());
    }

    #[test]
    fn duplicate_question_ids_keep_first_entry() {
        let questions = r#"{
            "main": [
                {"id": "q_dup", "phase": "context", "text": "first", "question_type": "yes_no"},
                {"id": "q_dup", "phase": "context", "text": "second", "question_type": "yes_no"}
            ]
        }"#;
        let catalog =
            Catalog::from_json(r#"{ "regions": {} }"#, empty_sources(), questions).unwrap();
        assert_eq!(catalog.questions().len(), 1);
        assert_eq!(catalog.question("q_dup").unwrap().text, "first");
    }

    #[test]
    fn value_likelihood_falls_back_to_neutral() {
        let likelihood = SymptomLikelihood {
            present: 0.8,
            absent: 0.2,
            weight: 0.5,
            category: SymptomCategory::Screening,
            values: Some(BTreeMap::from([("mild".to_string(), 0.7)])),
        };
        assert_eq!(likelihood.for_value("mild"), 0.7);
        assert_eq!(likelihood.for_value("unheard_of"), NEUTRAL_LIKELIHOOD);
    }

    #[test]
    fn region_scope_gates_region_specific_questions() {
        let all = RegionScope::default();
        assert!(all.applies_to(None));
        assert!(all.applies_to(Some("ankle")));

        let scoped = RegionScope::Regions(vec!["ankle".to_string()]);
        assert!(!scoped.applies_to(None));
        assert!(scoped.applies_to(Some("ankle")));
        assert!(!scoped.applies_to(Some("shoulder")));
    }
}
