//! Notification directives embedded in a pull request description.
//!
//! ```text
//! <!-- prsync: channel=#backend-reviews mention=@alice,U024BE7LH emoji=rocket -->
//! <!-- prsync: skip -->
//! ```
//!
//! The first `prsync:` comment in the body wins; unknown keys are ignored.

use crate::domain::workspace::ChannelId;

const MARKER: &str = "prsync:";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Annotation {
    Skip,
    Notify(NotifyDirective),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NotifyDirective {
    pub channel: Option<ChannelRef>,
    pub mentions: Vec<String>,
    pub emoji: Option<String>,
}

/// Channel named by a user. Names must be resolved per workspace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelRef {
    Id(ChannelId),
    Name(String),
}

impl ChannelRef {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(inner) = raw.strip_prefix("<#").and_then(|rest| rest.strip_suffix('>')) {
            let id = inner.split('|').next().unwrap_or_default();
            return looks_like_channel_id(id).then(|| Self::Id(ChannelId(id.to_string())));
        }
        if let Some(name) = raw.strip_prefix('#') {
            return valid_channel_name(name).then(|| Self::Name(name.to_ascii_lowercase()));
        }
        if looks_like_channel_id(raw) {
            return Some(Self::Id(ChannelId(raw.to_string())));
        }
        valid_channel_name(raw).then(|| Self::Name(raw.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => write!(f, "#{name}"),
        }
    }
}

pub fn parse_annotation(body: &str) -> Option<Annotation> {
    let mut rest = body;
    while let Some(start) = rest.find("<!--") {
        let after_open = &rest[start + 4..];
        let Some(end) = after_open.find("-->") else {
            return None;
        };
        let comment = after_open[..end].trim();
        rest = &after_open[end + 3..];

        let Some(directive) = strip_marker(comment) else {
            continue;
        };
        return parse_directive(directive);
    }
    None
}

fn strip_marker(comment: &str) -> Option<&str> {
    let head = comment.get(..MARKER.len())?;
    head.eq_ignore_ascii_case(MARKER).then(|| &comment[MARKER.len()..])
}

fn parse_directive(directive: &str) -> Option<Annotation> {
    let mut notify = NotifyDirective::default();
    let mut recognized = false;

    for token in directive.split_whitespace() {
        if token.eq_ignore_ascii_case("skip") {
            return Some(Annotation::Skip);
        }
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "channel" => {
                if let Some(channel) = ChannelRef::parse(value) {
                    notify.channel = Some(channel);
                    recognized = true;
                }
            }
            "mention" | "mentions" | "cc" => {
                let mentions = value
                    .split(',')
                    .map(|mention| mention.trim().trim_start_matches('@'))
                    .filter(|mention| !mention.is_empty())
                    .map(str::to_string);
                notify.mentions.extend(mentions);
                recognized = recognized || !notify.mentions.is_empty();
            }
            "emoji" => {
                let emoji = value.trim().trim_matches(':');
                if !emoji.is_empty() {
                    notify.emoji = Some(emoji.to_ascii_lowercase());
                    recognized = true;
                }
            }
            _ => {}
        }
    }

    recognized.then_some(Annotation::Notify(notify))
}

fn looks_like_channel_id(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 9
        && matches!(bytes[0], b'C' | b'G' | b'D')
        && bytes.iter().all(|byte| byte.is_ascii_uppercase() || byte.is_ascii_digit())
}

fn valid_channel_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 80
        && name.chars().all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}

/// Renders a mention for message text: Slack user ids become `<@U…>` links,
/// anything else is shown as a plain handle.
pub fn render_mention(mention: &str) -> String {
    let bytes = mention.as_bytes();
    let is_user_id = bytes.len() >= 9
        && matches!(bytes[0], b'U' | b'W')
        && bytes.iter().all(|byte| byte.is_ascii_uppercase() || byte.is_ascii_digit());
    if is_user_id {
        format!("<@{mention}>")
    } else {
        format!("@{mention}")
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_annotation, render_mention, Annotation, ChannelRef, NotifyDirective};
    use crate::domain::workspace::ChannelId;

    #[test]
    fn parses_channel_mentions_and_emoji() {
        let body = "Fixes the thing.\n\n<!-- prsync: channel=#Backend-Reviews mention=@alice,U024BE7LH emoji=:rocket: -->";

        assert_eq!(
            parse_annotation(body),
            Some(Annotation::Notify(NotifyDirective {
                channel: Some(ChannelRef::Name("backend-reviews".to_string())),
                mentions: vec!["alice".to_string(), "U024BE7LH".to_string()],
                emoji: Some("rocket".to_string()),
            }))
        );
    }

    #[test]
    fn skip_directive_wins_within_its_comment() {
        assert_eq!(parse_annotation("<!-- prsync: channel=#x skip -->"), Some(Annotation::Skip));
        assert_eq!(parse_annotation("<!--PRSYNC:skip-->"), Some(Annotation::Skip));
    }

    #[test]
    fn first_marker_comment_wins_and_other_comments_are_ignored() {
        let body = "<!-- template: fill me in -->\n<!-- prsync: channel=C0123456789 -->\n<!-- prsync: skip -->";
        assert_eq!(
            parse_annotation(body),
            Some(Annotation::Notify(NotifyDirective {
                channel: Some(ChannelRef::Id(ChannelId("C0123456789".to_string()))),
                ..NotifyDirective::default()
            }))
        );
    }

    #[test]
    fn bodies_without_directives_have_no_annotation() {
        assert_eq!(parse_annotation(""), None);
        assert_eq!(parse_annotation("plain description"), None);
        assert_eq!(parse_annotation("<!-- prsync: unknown=1 -->"), None);
        assert_eq!(parse_annotation("<!-- prsync: channel=#x"), None);
    }

    #[test]
    fn slack_formatted_channel_links_resolve_to_ids() {
        assert_eq!(
            ChannelRef::parse("<#C0123456789|general>"),
            Some(ChannelRef::Id(ChannelId("C0123456789".to_string())))
        );
        assert_eq!(ChannelRef::parse("#bad name"), None);
    }

    #[test]
    fn mentions_render_slack_ids_as_links() {
        assert_eq!(render_mention("U024BE7LH"), "<@U024BE7LH>");
        assert_eq!(render_mention("alice"), "@alice");
    }
}
