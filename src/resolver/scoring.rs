use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;

use super::fuzzy;
use crate::catalog::{ModelCandidate, QuantTag};

const SIMILARITY_WEIGHT: f32 = 0.70;
const QUANTIZATION_WEIGHT: f32 = 0.20;
const INSTRUCT_WEIGHT: f32 = 0.10;

/// Caller preferences applied on top of textual similarity.
#[derive(Debug, Clone)]
pub struct Constraints {
    /// Preferred quantization; the default ordering applies when `None`
    pub quantization: Option<QuantTag>,
    /// Whether instruction/chat tuned variants get a bonus
    pub prefer_instruct: bool,
}

impl Default for Constraints {
    fn default() -> Self {
        Constraints {
            quantization: None,
            prefer_instruct: true,
        }
    }
}

impl Constraints {
    pub fn with_quantization(mut self, quant: Option<QuantTag>) -> Self {
        if quant.is_some() {
            self.quantization = quant;
        }
        self
    }
}

/// A candidate together with the resolver's combined score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredCandidate {
    pub candidate: ModelCandidate,
    pub score: f32,
    pub similarity: f32,
    pub quant_bonus: f32,
    pub instruct_bonus: f32,
}

pub fn score(query: &str, candidate: ModelCandidate, constraints: &Constraints) -> ScoredCandidate {
    let similarity = fuzzy::similarity(query, &candidate.display_name)
        .max(fuzzy::similarity(query, &candidate.repo_id));

    let quant_bonus = match (&constraints.quantization, &candidate.quantization) {
        (Some(preferred), Some(actual)) if preferred == actual => 1.0,
        (Some(_), _) => 0.0,
        (None, Some(actual)) => actual.default_rank_bonus(),
        (None, None) => 0.0,
    };

    let instruct_bonus = if constraints.prefer_instruct && candidate.is_instruct() {
        1.0
    } else {
        0.0
    };

    let score = SIMILARITY_WEIGHT * similarity
        + QUANTIZATION_WEIGHT * quant_bonus
        + INSTRUCT_WEIGHT * instruct_bonus;

    ScoredCandidate {
        candidate,
        score,
        similarity,
        quant_bonus,
        instruct_bonus,
    }
}

/// Ordering: higher score first, then the lighter file, then file name.
fn compare(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| match (a.candidate.size_bytes, b.candidate.size_bytes) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.candidate.filename.cmp(&b.candidate.filename))
}

/// De-duplicates on (repository, file), scores and sorts.
pub fn rank(query: &str, candidates: Vec<ModelCandidate>, constraints: &Constraints) -> Vec<ScoredCandidate> {
    let mut seen = HashSet::new();
    let mut ranked: Vec<ScoredCandidate> = candidates
        .into_iter()
        .filter(|c| seen.insert((c.repo_id.clone(), c.filename.clone())))
        .map(|c| score(query, c, constraints))
        .collect();
    ranked.sort_by(compare);
    ranked
}

/// Outcome of applying the confidence rule to a ranked list.
#[derive(Debug, Clone)]
pub enum Selection {
    Confident(ScoredCandidate),
    Ambiguous(Vec<ScoredCandidate>),
}

/// Auto-selects the leader when it clears `threshold` and leads the
/// runner-up by at least `margin`; otherwise returns the top `top_k`.
/// `None` for an empty list.
pub fn select(mut ranked: Vec<ScoredCandidate>, threshold: f32, margin: f32, top_k: usize) -> Option<Selection> {
    let leader = ranked.first()?;
    let lead = match ranked.get(1) {
        Some(runner_up) => leader.score - runner_up.score,
        None => f32::INFINITY,
    };

    if leader.score >= threshold && lead >= margin {
        let leader = ranked.swap_remove(0);
        return Some(Selection::Confident(leader));
    }

    ranked.truncate(top_k.max(1));
    Some(Selection::Ambiguous(ranked))
}
