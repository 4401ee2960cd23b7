//! Page text cleanup for fetched content.
//!
//! Extracted text still carries image markup, and direct fetches return raw
//! HTML. Both are reduced to plain prose before they reach a prompt.

use std::sync::OnceLock;

use dossier_core::text::take_chars;
use regex::Regex;

fn pattern(cell: &'static OnceLock<Option<Regex>>, source: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(source).ok()).as_ref()
}

fn replace_all(text: String, re: Option<&Regex>, with: &str) -> String {
    match re {
        Some(re) => re.replace_all(&text, with).into_owned(),
        None => text,
    }
}

/// Remove images in markdown and HTML form, plus inline base64 image data.
pub fn strip_images(content: &str) -> String {
    static MD_IMAGE: OnceLock<Option<Regex>> = OnceLock::new();
    static MD_REF_IMAGE: OnceLock<Option<Regex>> = OnceLock::new();
    static BLOCKS: OnceLock<Option<Regex>> = OnceLock::new();
    static IMG_TAG: OnceLock<Option<Regex>> = OnceLock::new();
    static DATA_URL: OnceLock<Option<Regex>> = OnceLock::new();

    let mut text = content.to_string();
    text = replace_all(text, pattern(&MD_IMAGE, r"!\[[^\]]*\]\([^)]+\)"), "");
    text = replace_all(text, pattern(&MD_REF_IMAGE, r"!\[[^\]]*\]\[[^\]]*\]"), "");
    text = replace_all(
        text,
        pattern(&BLOCKS, r"(?is)<picture[^>]*>.*?</picture>|<svg[^>]*>.*?</svg>|<figure[^>]*>.*?</figure>"),
        "",
    );
    text = replace_all(text, pattern(&IMG_TAG, r"(?i)<(?:img|source)[^>]*/?>"), "");
    text = replace_all(
        text,
        pattern(&DATA_URL, r"data:image/[a-zA-Z]+;base64,[a-zA-Z0-9+/=]+"),
        "[image data removed]",
    );
    collapse_blank_lines(text)
}

/// Reduce an HTML document to its visible text.
pub fn html_to_text(html: &str) -> String {
    static NON_CONTENT: OnceLock<Option<Regex>> = OnceLock::new();
    static BLOCK_END: OnceLock<Option<Regex>> = OnceLock::new();
    static TAG: OnceLock<Option<Regex>> = OnceLock::new();
    static SPACES: OnceLock<Option<Regex>> = OnceLock::new();

    let mut text = strip_images(html);
    text = replace_all(
        text,
        pattern(
            &NON_CONTENT,
            r"(?is)<!--.*?-->|<script[^>]*>.*?</script>|<style[^>]*>.*?</style>|<noscript[^>]*>.*?</noscript>|<head[^>]*>.*?</head>",
        ),
        " ",
    );
    text = replace_all(
        text,
        pattern(&BLOCK_END, r"(?i)<br\s*/?>|</(?:p|div|li|h[1-6]|tr|section|article|blockquote)>"),
        "\n",
    );
    text = replace_all(text, pattern(&TAG, r"<[^>]+>"), " ");
    text = decode_entities(&text);
    text = replace_all(text, pattern(&SPACES, r"[ \t\r\f]+"), " ");

    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    collapse_blank_lines(lines.join("\n")).trim().to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&rsquo;", "'")
        .replace("&lsquo;", "'")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&mdash;", "-")
        .replace("&ndash;", "-")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn collapse_blank_lines(text: String) -> String {
    static BLANKS: OnceLock<Option<Regex>> = OnceLock::new();
    replace_all(text, pattern(&BLANKS, r"\n\s*\n(?:\s*\n)+"), "\n\n")
}

/// Clean fetched content and cap it at `max_chars` characters.
pub fn clean_page(raw: &str, max_chars: usize) -> String {
    let looks_like_html = raw.trim_start().starts_with('<') || raw.contains("</");
    let cleaned = if looks_like_html {
        html_to_text(raw)
    } else {
        strip_images(raw).trim().to_string()
    };
    take_chars(&cleaned, max_chars).to_string()
}
