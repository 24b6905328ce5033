//! Generic naive-Bayes posterior tracker over a set of named hypotheses.
//!
//! Both inference engines (conditions and referral sources) share this
//! math; they differ only in question eligibility and result shaping. The
//! posterior is a plain map from hypothesis id to probability, replaced
//! wholesale on every update, which keeps each Bayesian step a pure
//! function that is easy to test in isolation from the session state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::{NEUTRAL_LIKELIHOOD, SymptomLikelihood};

/// Evidence probabilities are floored here before division so that an
/// observation no hypothesis supports cannot produce NaN posteriors.
pub const EVIDENCE_FLOOR: f64 = 1e-3;

/// One observed symptom state: a boolean finding or a selected value of a
/// multi-valued symptom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Observation {
    Bool(bool),
    Value(String),
}

/// Likelihood of an observation under one hypothesis. A missing table
/// entry is neutral, never zero: a data-authoring gap must not silently
/// eliminate a hypothesis.
pub fn likelihood_of(entry: Option<&SymptomLikelihood>, observation: &Observation) -> f64 {
    match entry {
        None => NEUTRAL_LIKELIHOOD,
        Some(likelihood) => match observation {
            Observation::Bool(present) => likelihood.for_bool(*present),
            Observation::Value(value) => likelihood.for_value(value),
        },
    }
}

/// A probability distribution over named hypotheses, summing to 1 unless
/// empty. Empty distributions arise when a region has no table; callers
/// treat that as "cannot infer here" and degrade gracefully.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Posterior {
    probabilities: BTreeMap<String, f64>,
}

impl Posterior {
    /// Seed from base probabilities, normalized to sum to 1.
    pub fn from_priors<I, S>(priors: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let probabilities: BTreeMap<String, f64> = priors
            .into_iter()
            .map(|(id, p)| (id.into(), p.max(0.0)))
            .collect();
        Posterior {
            probabilities: normalized(probabilities),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn get(&self, hypothesis: &str) -> Option<f64> {
        self.probabilities.get(hypothesis).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.probabilities.iter().map(|(id, &p)| (id.as_str(), p))
    }

    /// Hypotheses ranked by descending probability. Ties break on id so
    /// the ordering is deterministic.
    pub fn ranked(&self) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .probabilities
            .iter()
            .map(|(id, &p)| (id.clone(), p))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked
    }

    pub fn top(&self) -> Option<(String, f64)> {
        self.ranked().into_iter().next()
    }

    /// Probability gap between the leading and second hypothesis; the full
    /// top probability when only one hypothesis exists.
    pub fn separation(&self) -> f64 {
        let ranked = self.ranked();
        match (ranked.first(), ranked.get(1)) {
            (Some((_, top)), Some((_, second))) => top - second,
            (Some((_, top)), None) => *top,
            _ => 0.0,
        }
    }

    /// Shannon entropy in nats.
    pub fn entropy(&self) -> f64 {
        -self
            .probabilities
            .values()
            .filter(|&&p| p > 0.0)
            .map(|&p| p * p.ln())
            .sum::<f64>()
    }

    /// `sqrt(max_posterior * (1 - entropy/max_entropy))`: how dominant the
    /// leader is, tempered by how peaked the whole distribution is. With
    /// fewer than two hypotheses the entropy ratio is undefined and the
    /// top posterior stands alone.
    pub fn confidence(&self) -> f64 {
        let Some((_, top)) = self.top() else {
            return 0.0;
        };
        if self.len() < 2 {
            return top;
        }
        let max_entropy = (self.len() as f64).ln();
        let peakedness = 1.0 - (self.entropy() / max_entropy).clamp(0.0, 1.0);
        (top * peakedness).sqrt()
    }

    /// One naive-Bayes step: `posterior ∝ likelihood × prior`, with the
    /// evidence term floored and the result renormalized. Returns a new
    /// distribution; the caller swaps it in wholesale.
    pub fn updated<F>(&self, likelihood: F) -> Posterior
    where
        F: Fn(&str) -> f64,
    {
        if self.is_empty() {
            return self.clone();
        }
        let evidence: f64 = self
            .probabilities
            .iter()
            .map(|(id, &prior)| likelihood(id) * prior)
            .sum::<f64>()
            .max(EVIDENCE_FLOOR);

        let probabilities: BTreeMap<String, f64> = self
            .probabilities
            .iter()
            .map(|(id, &prior)| (id.clone(), likelihood(id) * prior / evidence))
            .collect();
        Posterior {
            probabilities: normalized(probabilities),
        }
    }

    /// Expected entropy reduction from asking a question whose possible
    /// answers produce the given observation sets. Each answer scenario is
    /// a list of (symptom, observation) pairs; `table` resolves the
    /// likelihood entry for a (hypothesis, symptom) pair.
    pub fn expected_information_gain<'t, T>(
        &self,
        scenarios: &[Vec<(String, Observation)>],
        table: T,
    ) -> f64
    where
        T: Fn(&str, &str) -> Option<&'t SymptomLikelihood>,
    {
        if self.is_empty() || scenarios.is_empty() {
            return 0.0;
        }
        let current_entropy = self.entropy();

        // P(answer) = Σ_h P(answer | h) · P(h), renormalized across the
        // scenario set since the scenarios need not be exhaustive.
        let mut weighted_entropy = 0.0;
        let mut total_mass = 0.0;
        for scenario in scenarios {
            let scenario_likelihood = |hypothesis: &str| -> f64 {
                scenario
                    .iter()
                    .map(|(symptom, obs)| likelihood_of(table(hypothesis, symptom.as_str()), obs))
                    .product()
            };
            let mass: f64 = self
                .probabilities
                .iter()
                .map(|(id, &prior)| scenario_likelihood(id) * prior)
                .sum();
            let simulated = self.updated(&scenario_likelihood);
            weighted_entropy += mass * simulated.entropy();
            total_mass += mass;
        }
        if total_mass <= 0.0 {
            return 0.0;
        }
        (current_entropy - weighted_entropy / total_mass).max(0.0)
    }
}

fn normalized(mut probabilities: BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    let total: f64 = probabilities.values().sum();
    if total > 0.0 {
        for p in probabilities.values_mut() {
            *p /= total;
        }
    } else if !probabilities.is_empty() {
        // Degenerate all-zero mass: fall back to uniform rather than
        // leaving an unnormalizable distribution.
        let uniform = 1.0 / probabilities.len() as f64;
        for p in probabilities.values_mut() {
            *p = uniform;
        }
    }
    probabilities
}
