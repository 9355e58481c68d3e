use regex::Regex;
use std::sync::LazyLock;

pub const MAX_TITLE_CHARS: usize = 100;

// <https://example.com|label>, <https://example.com>
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?P<url>(?:https?|mailto):[^|>]+)(?:\|(?P<label>[^>]*))?>").unwrap()
});

// <@U123>, <@U123|name>
static USER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@(?P<id>[A-Z0-9]+)(?:\|[^>]*)?>").unwrap());

// <#C123|general>, <#C123>
static CHANNEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<#(?P<id>[A-Z0-9]+)(?:\|(?P<name>[^>]*))?>").unwrap()
});

// <!here>, <!channel>, <!subteam^S123|@team>
static SPECIAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!(?P<cmd>[a-z^A-Z0-9]+)(?:\|(?P<label>[^>]*))?>").unwrap()
});

static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Turn Slack `mrkdwn` message text into a single-line task title.
pub fn title_from_message(text: &str) -> String {
    let s = LINK_RE.replace_all(text, |c: &regex::Captures| match c.name("label") {
        Some(label) if !label.as_str().is_empty() => label.as_str().to_string(),
        _ => c["url"].to_string(),
    });
    let s = USER_RE.replace_all(&s, "@$id");
    let s = CHANNEL_RE.replace_all(&s, |c: &regex::Captures| match c.name("name") {
        Some(name) if !name.as_str().is_empty() => format!("#{}", name.as_str()),
        _ => format!("#{}", &c["id"]),
    });
    let s = SPECIAL_RE.replace_all(&s, |c: &regex::Captures| match c.name("label") {
        Some(label) => label.as_str().to_string(),
        None => format!("@{}", &c["cmd"]),
    });
    let s = s
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");
    let s = SPACE_RE.replace_all(s.trim(), " ");

    if s.is_empty() {
        return "Untitled".to_string();
    }
    truncate(&s, MAX_TITLE_CHARS)
}

/// Cut `text` to at most `max` characters, ending with `…` when cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
