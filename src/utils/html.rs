// src/utils/html.rs

use std::collections::HashSet;

/// Clean HTML content using the ammonia library.
///
/// Whitelist-based: safe formatting tags (<b>, <p>, <a href>) survive,
/// <script>/<iframe> and event-handler attributes are stripped.
/// Used for lesson bodies and course descriptions, which are rendered as HTML.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

/// Reduce user input to plain text: every tag is removed, text content kept.
/// Used for discussion posts, replies, feedback comments and chat messages.
pub fn strip_tags(input: &str) -> String {
    let mut builder = ammonia::Builder::default();
    builder.tags(HashSet::new());
    let cleaned = builder.clean(input).to_string();
    // ammonia escapes entities for HTML output; the API stores plain text.
    cleaned
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}
