//! Detection of pull request links inside free-form chat text.

use crate::domain::repository::RepoFullName;

pub const DEFAULT_WEB_HOST: &str = "github.com";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PrReference {
    pub repo: RepoFullName,
    pub number: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkScan {
    NoReference,
    Single(PrReference),
    /// More than one distinct pull request; the message is not tracked.
    Ambiguous(Vec<PrReference>),
}

/// Distinct pull request references in order of first appearance.
pub fn find_pr_references(text: &str, web_host: &str) -> Vec<PrReference> {
    let needle = format!("{}/", web_host.trim().trim_end_matches('/').to_ascii_lowercase());
    let lowered = text.to_ascii_lowercase();
    let mut references: Vec<PrReference> = Vec::new();
    let mut search_from = 0;

    while let Some(offset) = lowered[search_from..].find(&needle) {
        let start = search_from + offset;
        search_from = start + needle.len();

        let preceded_ok = start == 0
            || matches!(lowered.as_bytes()[start - 1], b'/' | b'.' | b'<' | b' ' | b'(');
        if !preceded_ok {
            continue;
        }

        if let Some(reference) = parse_path(&text[search_from..]) {
            if !references.contains(&reference) {
                references.push(reference);
            }
        }
    }

    references
}

pub fn scan_message(text: &str, web_host: &str) -> LinkScan {
    let mut references = find_pr_references(text, web_host);
    match references.len() {
        0 => LinkScan::NoReference,
        1 => LinkScan::Single(references.remove(0)),
        _ => LinkScan::Ambiguous(references),
    }
}

fn parse_path(path: &str) -> Option<PrReference> {
    let mut segments = path.splitn(4, '/');
    let owner = segments.next()?;
    let name = segments.next()?;
    if segments.next()? != "pull" {
        return None;
    }
    let tail = segments.next()?;
    let digits: String = tail.chars().take_while(char::is_ascii_digit).collect();
    let boundary = tail[digits.len()..].chars().next();
    if digits.is_empty() || boundary.is_some_and(|ch| ch.is_ascii_alphanumeric()) {
        return None;
    }

    let repo = RepoFullName::parse(&format!("{owner}/{name}"))?;
    let number = digits.parse::<u64>().ok().filter(|number| *number > 0)?;
    Some(PrReference { repo, number })
}

#[cfg(test)]
mod tests {
    use super::{find_pr_references, scan_message, LinkScan, PrReference, DEFAULT_WEB_HOST};
    use crate::domain::repository::RepoFullName;

    fn reference(repo: &str, number: u64) -> PrReference {
        PrReference { repo: RepoFullName::new(repo), number }
    }

    #[test]
    fn finds_plain_and_slack_wrapped_links() {
        assert_eq!(
            scan_message("please review https://github.com/Octo/Repo/pull/99", DEFAULT_WEB_HOST),
            LinkScan::Single(reference("octo/repo", 99))
        );
        assert_eq!(
            scan_message("<https://github.com/o/r/pull/7/files|o/r#7> when you can", DEFAULT_WEB_HOST),
            LinkScan::Single(reference("o/r", 7))
        );
    }

    #[test]
    fn repeated_links_to_the_same_pr_are_not_ambiguous() {
        let text = "https://github.com/o/r/pull/5 and again <https://github.com/o/r/pull/5#discussion_r1>";
        assert_eq!(scan_message(text, DEFAULT_WEB_HOST), LinkScan::Single(reference("o/r", 5)));
    }

    #[test]
    fn two_distinct_prs_are_ambiguous() {
        let text = "https://github.com/o/r/pull/5 vs https://github.com/o/r/pull/6";
        assert_eq!(
            scan_message(text, DEFAULT_WEB_HOST),
            LinkScan::Ambiguous(vec![reference("o/r", 5), reference("o/r", 6)])
        );
    }

    #[test]
    fn ignores_issues_lookalike_hosts_and_malformed_numbers() {
        assert_eq!(scan_message("https://github.com/o/r/issues/5", DEFAULT_WEB_HOST), LinkScan::NoReference);
        assert_eq!(scan_message("https://notgithub.com/o/r/pull/5", DEFAULT_WEB_HOST), LinkScan::NoReference);
        assert_eq!(scan_message("https://github.com/o/r/pull/5abc", DEFAULT_WEB_HOST), LinkScan::NoReference);
        assert_eq!(scan_message("https://github.com/o/r/pull/", DEFAULT_WEB_HOST), LinkScan::NoReference);
    }

    #[test]
    fn supports_enterprise_hosts() {
        let found = find_pr_references("https://git.example.com/team/svc/pull/12", "git.example.com");
        assert_eq!(found, vec![reference("team/svc", 12)]);
    }
}
