//! Reaction planning: the pure half of reaction synchronization.
//!
//! A [`DesiredState`] is always re-derived from live pull request state and
//! turned into an ordered [`ReactionPlan`]. Applying the same plan twice is a
//! no-op the second time because every step is idempotent.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::pull_request::{PrState, ReviewOutcome, TerminalState};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionVocabulary {
    pub approved: String,
    pub changes_requested: String,
    pub commented: String,
    pub closed: String,
    pub merged: String,
    /// Reaction a PR author adds to ask for a bot message to be removed.
    pub delete: String,
}

impl Default for ReactionVocabulary {
    fn default() -> Self {
        Self {
            approved: "white_check_mark".to_string(),
            changes_requested: "warning".to_string(),
            commented: "speech_balloon".to_string(),
            closed: "no_entry_sign".to_string(),
            merged: "tada".to_string(),
            delete: "wastebasket".to_string(),
        }
    }
}

impl ReactionVocabulary {
    pub fn outcome(&self, outcome: ReviewOutcome) -> &str {
        match outcome {
            ReviewOutcome::Approved => &self.approved,
            ReviewOutcome::ChangesRequested => &self.changes_requested,
            ReviewOutcome::Commented => &self.commented,
        }
    }

    pub fn terminal(&self, terminal: TerminalState) -> &str {
        match terminal {
            TerminalState::Closed => &self.closed,
            TerminalState::Merged => &self.merged,
        }
    }

    pub fn is_delete_request(&self, reaction: &str) -> bool {
        normalize_reaction(reaction) == normalize_reaction(&self.delete)
    }

    /// Every reaction the sync engine owns; anything else on a message is left alone.
    pub fn managed(&self) -> BTreeSet<String> {
        [&self.approved, &self.changes_requested, &self.commented, &self.closed, &self.merged]
            .into_iter()
            .map(|name| normalize_reaction(name))
            .collect()
    }
}

/// Strips colons and skin-tone suffixes so `:+1::skin-tone-2:` matches `+1`.
pub fn normalize_reaction(reaction: &str) -> String {
    let trimmed = reaction.trim().trim_matches(':');
    let base = trimmed.split("::").next().unwrap_or(trimmed);
    base.to_ascii_lowercase()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewTarget {
    /// Leave review-outcome reactions as they are (outcome could not be re-derived).
    Unchanged,
    /// No review reaction at all, e.g. after a dismissal.
    Cleared,
    Outcome(ReviewOutcome),
}

impl ReviewTarget {
    pub fn from_outcome(outcome: Option<ReviewOutcome>) -> Self {
        outcome.map(Self::Outcome).unwrap_or(Self::Cleared)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    pub review: ReviewTarget,
    pub terminal: Option<TerminalState>,
}

impl DesiredState {
    pub fn open(review: ReviewTarget) -> Self {
        Self { review, terminal: None }
    }

    pub fn closed(terminal: TerminalState, review: ReviewTarget) -> Self {
        Self { review, terminal: Some(terminal) }
    }

    pub fn from_live(state: PrState, outcome: Option<ReviewOutcome>) -> Self {
        Self { review: ReviewTarget::from_outcome(outcome), terminal: state.terminal() }
    }

    /// The semantic state name: none, approved, changes_requested, commented, closed or merged.
    pub fn label(&self) -> &'static str {
        match (self.terminal, self.review) {
            (Some(terminal), _) => terminal.as_str(),
            (None, ReviewTarget::Outcome(outcome)) => outcome.as_str(),
            (None, ReviewTarget::Cleared | ReviewTarget::Unchanged) => "none",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReactionStep {
    Add(String),
    Remove(String),
}

impl ReactionStep {
    pub fn name(&self) -> &str {
        match self {
            Self::Add(name) | Self::Remove(name) => name,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReactionPlan {
    steps: Vec<ReactionStep>,
}

impl ReactionPlan {
    pub fn for_state(desired: &DesiredState, vocabulary: &ReactionVocabulary) -> Self {
        let mut plan = Self::default();
        match desired.terminal {
            None => {
                // A PR back in the open state must not keep a stale terminal reaction.
                plan.remove(vocabulary.terminal(TerminalState::Closed));
                plan.remove(vocabulary.terminal(TerminalState::Merged));
                plan.review(desired.review, vocabulary);
            }
            Some(terminal) => {
                plan.review(desired.review, vocabulary);
                let opposite = match terminal {
                    TerminalState::Closed => TerminalState::Merged,
                    TerminalState::Merged => TerminalState::Closed,
                };
                plan.remove(vocabulary.terminal(opposite));
                plan.add(vocabulary.terminal(terminal));
            }
        }
        plan
    }

    fn review(&mut self, target: ReviewTarget, vocabulary: &ReactionVocabulary) {
        match target {
            ReviewTarget::Unchanged => {}
            ReviewTarget::Cleared => {
                for outcome in ReviewOutcome::ALL {
                    self.remove(vocabulary.outcome(outcome));
                }
            }
            ReviewTarget::Outcome(desired) => {
                for outcome in ReviewOutcome::ALL.into_iter().filter(|outcome| *outcome != desired) {
                    self.remove(vocabulary.outcome(outcome));
                }
                self.add(vocabulary.outcome(desired));
            }
        }
    }

    fn add(&mut self, name: &str) {
        self.steps.push(ReactionStep::Add(normalize_reaction(name)));
    }

    fn remove(&mut self, name: &str) {
        self.steps.push(ReactionStep::Remove(normalize_reaction(name)));
    }

    pub fn steps(&self) -> &[ReactionStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Only the steps that change `current`.
    pub fn delta(&self, current: &BTreeSet<String>) -> Self {
        let current: BTreeSet<String> = current.iter().map(|name| normalize_reaction(name)).collect();
        let steps = self
            .steps
            .iter()
            .filter(|step| match step {
                ReactionStep::Add(name) => !current.contains(name),
                ReactionStep::Remove(name) => current.contains(name),
            })
            .cloned()
            .collect();
        Self { steps }
    }

    /// The reaction set that results from applying this plan to `current`.
    pub fn applied_to(&self, current: &BTreeSet<String>) -> BTreeSet<String> {
        let mut result: BTreeSet<String> =
            current.iter().map(|name| normalize_reaction(name)).collect();
        for step in &self.steps {
            match step {
                ReactionStep::Add(name) => {
                    result.insert(name.clone());
                }
                ReactionStep::Remove(name) => {
                    result.remove(name);
                }
            }
        }
        result
    }
}
