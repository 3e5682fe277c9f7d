//! Candidate Selection
//!
//! Two strategies pick one candidate out of the generated set:
//! - Consensus: majority vote over normalized SQL
//! - Execution-guided: run every candidate and prefer the one returning
//!   the most rows, falling back to consensus when nothing returns rows

use crate::candidate::{Candidate, Explanation, GeneratedSql};
use crate::db::SqlExecutor;
use crate::sql_normalizer::SqlNormalizer;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// How the chosen candidate was selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionFlag {
    /// No two candidates agreed after normalization
    Divergent,
    /// At least two candidates agreed
    Consensus,
    /// Chosen by execution row count
    ExecGuided,
}

impl fmt::Display for SelectionFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionFlag::Divergent => write!(f, "DIVERGENT"),
            SelectionFlag::Consensus => write!(f, "CONSENSUS"),
            SelectionFlag::ExecGuided => write!(f, "EXEC_GUIDED"),
        }
    }
}

/// Which of several equally good candidates wins.
///
/// The only policy is `FirstGenerated`: the earliest candidate in the order
/// the generation service returned them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    FirstGenerated,
}

impl TieBreak {
    fn pick(&self, tied: impl IntoIterator<Item = usize>) -> Option<usize> {
        match self {
            TieBreak::FirstGenerated => tied.into_iter().min(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub sql: GeneratedSql,
    pub explanation: Explanation,
    pub flag: SelectionFlag,
    /// Position of the chosen candidate in the generated list
    pub index: usize,
}

impl SelectionResult {
    fn from_candidate(candidate: &Candidate, flag: SelectionFlag, index: usize) -> Self {
        Self {
            sql: candidate.sql().clone(),
            explanation: candidate.explanation().clone(),
            flag,
            index,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct CandidateSelector {
    normalizer: SqlNormalizer,
    tie_break: TieBreak,
}

impl CandidateSelector {
    pub fn new(tie_break: TieBreak) -> Self {
        Self {
            normalizer: SqlNormalizer::new(),
            tie_break,
        }
    }

    /// Execution-guided selection when an executor is available, consensus
    /// otherwise.
    pub async fn select(&self, candidates: &[Candidate], executor: Option<&dyn SqlExecutor>) -> SelectionResult {
        match executor {
            Some(executor) => self.select_by_execution(candidates, executor).await,
            None => self.select_by_consensus(candidates),
        }
    }

    pub fn select_by_consensus(&self, candidates: &[Candidate]) -> SelectionResult {
        if candidates.is_empty() {
            warn!("No candidates to select from");
            return SelectionResult {
                sql: GeneratedSql::Invalid,
                explanation: Explanation::GenerationFailed,
                flag: SelectionFlag::Divergent,
                index: 0,
            };
        }

        // Padding slots are not answers and get no vote
        let votes: Vec<(usize, String)> = candidates
            .iter()
            .enumerate()
            .filter(|(_, candidate)| !candidate.is_padding())
            .map(|(idx, candidate)| (idx, self.normalizer.normalize(candidate.sql().render())))
            .collect();
        let frequencies = votes.iter().map(|(_, key)| key).counts();
        let max_frequency = frequencies.values().copied().max().unwrap_or(0);

        if max_frequency <= 1 {
            let voters = votes.iter().map(|(idx, _)| *idx);
            let index = self.tie_break.pick(voters).unwrap_or(0);
            debug!(
                "All {} returned candidates diverge, taking candidate {}",
                votes.len(),
                index
            );
            return SelectionResult::from_candidate(&candidates[index], SelectionFlag::Divergent, index);
        }

        let tied = votes
            .iter()
            .filter(|(_, key)| frequencies.get(key).copied() == Some(max_frequency))
            .map(|(idx, _)| *idx);
        let index = self.tie_break.pick(tied).unwrap_or(0);
        debug!(
            "Consensus on candidate {} ({} of {} agree)",
            index,
            max_frequency,
            votes.len()
        );
        SelectionResult::from_candidate(&candidates[index], SelectionFlag::Consensus, index)
    }

    pub async fn select_by_execution(
        &self,
        candidates: &[Candidate],
        executor: &dyn SqlExecutor,
    ) -> SelectionResult {
        let mut scores = Vec::with_capacity(candidates.len());
        for (idx, candidate) in candidates.iter().enumerate() {
            let score = match candidate.sql().as_sql() {
                Some(sql) => match executor.query(sql).await {
                    Ok(table) => table.row_count(),
                    Err(e) => {
                        debug!("Candidate {} failed to execute: {}", idx, e);
                        0
                    }
                },
                None => 0,
            };
            scores.push(score);
        }
        debug!("Execution scores: {:?}", scores);

        let max_score = scores.iter().copied().max().unwrap_or(0);
        if max_score == 0 {
            return self.select_by_consensus(candidates);
        }

        let tied = scores
            .iter()
            .enumerate()
            .filter(|(_, score)| **score == max_score)
            .map(|(idx, _)| idx);
        let index = self.tie_break.pick(tied).unwrap_or(0);
        SelectionResult::from_candidate(&candidates[index], SelectionFlag::ExecGuided, index)
    }
}
