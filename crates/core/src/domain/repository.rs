use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::workspace::{ChannelId, WorkspaceId};

/// Repository full name in `owner/repo` form, compared case-insensitively.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoFullName(pub String);

impl RepoFullName {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (owner, name) = raw.trim().split_once('/')?;
        let valid = |part: &str| {
            !part.is_empty()
                && part.chars().all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
        };
        (valid(owner) && valid(name)).then(|| Self::new(format!("{owner}/{name}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RepoFullName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRegistration {
    pub repo: RepoFullName,
    pub workspace_id: WorkspaceId,
    pub enabled: bool,
    pub default_channel_id: Option<ChannelId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RepoRegistration {
    pub fn new(
        repo: RepoFullName,
        workspace_id: WorkspaceId,
        default_channel_id: Option<ChannelId>,
    ) -> Self {
        let now = Utc::now();
        Self { repo, workspace_id, enabled: true, default_channel_id, created_at: now, updated_at: now }
    }
}

#[cfg(test)]
mod tests {
    use super::RepoFullName;

    #[test]
    fn repo_names_are_normalized_to_lowercase() {
        assert_eq!(RepoFullName::new(" Octo/Repo "), RepoFullName("octo/repo".to_string()));
    }

    #[test]
    fn parse_rejects_names_without_owner_or_with_illegal_characters() {
        assert_eq!(RepoFullName::parse("octo/repo.rs"), Some(RepoFullName::new("octo/repo.rs")));
        assert_eq!(RepoFullName::parse("repo"), None);
        assert_eq!(RepoFullName::parse("/repo"), None);
        assert_eq!(RepoFullName::parse("octo/re po"), None);
    }
}
