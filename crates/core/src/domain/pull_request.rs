use serde::{Deserialize, Serialize};

/// Outcome of the most recent effective review on a pull request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    Approved,
    ChangesRequested,
    Commented,
}

impl ReviewOutcome {
    pub const ALL: [ReviewOutcome; 3] = [Self::Approved, Self::ChangesRequested, Self::Commented];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::ChangesRequested => "changes_requested",
            Self::Commented => "commented",
        }
    }

    /// Accepts both webhook (`approved`) and REST (`APPROVED`) spellings.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" => Some(Self::Approved),
            "changes_requested" => Some(Self::ChangesRequested),
            "commented" => Some(Self::Commented),
            _ => None,
        }
    }
}

/// Terminal pull request states. An open PR has no terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Closed,
    Merged,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Merged => "merged",
        }
    }

    pub fn from_close(merged: bool) -> Self {
        if merged {
            Self::Merged
        } else {
            Self::Closed
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

impl PrState {
    pub fn from_parts(state: &str, merged: bool) -> Self {
        if merged {
            Self::Merged
        } else if state.eq_ignore_ascii_case("closed") {
            Self::Closed
        } else {
            Self::Open
        }
    }

    pub fn terminal(&self) -> Option<TerminalState> {
        match self {
            Self::Open => None,
            Self::Closed => Some(TerminalState::Closed),
            Self::Merged => Some(TerminalState::Merged),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PrState, ReviewOutcome, TerminalState};

    #[test]
    fn review_outcome_parses_rest_and_webhook_spellings() {
        assert_eq!(ReviewOutcome::parse("APPROVED"), Some(ReviewOutcome::Approved));
        assert_eq!(ReviewOutcome::parse("changes_requested"), Some(ReviewOutcome::ChangesRequested));
        assert_eq!(ReviewOutcome::parse("DISMISSED"), None);
        assert_eq!(ReviewOutcome::parse("pending"), None);
    }

    #[test]
    fn merged_flag_wins_over_state_string() {
        assert_eq!(PrState::from_parts("closed", true), PrState::Merged);
        assert_eq!(PrState::from_parts("closed", false), PrState::Closed);
        assert_eq!(PrState::from_parts("open", false), PrState::Open);
        assert_eq!(PrState::Merged.terminal(), Some(TerminalState::Merged));
        assert_eq!(PrState::Open.terminal(), None);
    }
}
