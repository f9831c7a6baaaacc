//! Utility functions for file naming and text cleanup

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Extension used when a media URL carries none
pub const DEFAULT_MEDIA_EXTENSION: &str = "mp3";

/// Extension used when an artwork URL carries none
pub const DEFAULT_IMAGE_EXTENSION: &str = "jpg";

/// Characters replaced with a dash in file names
static ILLEGAL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r#"[!&#+:;?*"<>|\\\x00-\x1f]"#).expect("literal pattern")
});

static DASH_RUN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"-{2,}").expect("literal pattern")
});

static LINE_BREAK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"(?i)<br\s*/?>|</p\s*>").expect("literal pattern")
});

static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"<[^>]*>").expect("literal pattern")
});

/// Replace accented letters with plain ASCII spellings.
///
/// German and Nordic letters expand (`ü` -> `ue`, `å` -> `aa`, `ø` -> `oe`);
/// other characters without a mapping pass through unchanged.
pub fn transliterate(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        let mapped = match c {
            'à' | 'á' | 'â' | 'ã' => "a",
            'ä' | 'æ' => "ae",
            'å' => "aa",
            'À' | 'Á' | 'Â' | 'Ã' | 'Ä' => "A",
            'Å' => "AA",
            'Æ' => "AE",
            'ç' | 'ć' | 'č' => "c",
            'Ç' | 'Ć' | 'Č' => "C",
            'è' | 'é' | 'ê' | 'ë' | 'ę' | 'ě' => "e",
            'È' | 'É' | 'Ê' | 'Ë' | 'Ę' | 'Ě' => "E",
            'ì' | 'í' | 'î' | 'ï' => "i",
            'Ì' | 'Í' | 'Î' | 'Ï' => "I",
            'ł' => "l",
            'Ł' => "L",
            'ñ' | 'ń' | 'ň' => "n",
            'Ñ' | 'Ń' | 'Ň' => "N",
            'ò' | 'ó' | 'ô' | 'õ' => "o",
            'ö' | 'ø' | 'œ' => "oe",
            'Ò' | 'Ó' | 'Ô' | 'Õ' => "O",
            'Ö' | 'Ø' | 'Œ' => "OE",
            'ß' => "ss",
            'š' | 'ś' => "s",
            'Š' | 'Ś' => "S",
            'ù' | 'ú' | 'û' | 'ů' => "u",
            'ü' => "ue",
            'Ù' | 'Ú' | 'Û' | 'Ů' => "U",
            'Ü' => "UE",
            'ý' | 'ÿ' => "y",
            'Ý' => "Y",
            'ž' | 'ź' | 'ż' => "z",
            'Ž' | 'Ź' | 'Ż' => "Z",
            _ => {
                out.push(c);
                continue;
            }
        };
        out.push_str(mapped);
    }
    out
}

/// Make a single path component out of arbitrary text.
///
/// Dots and slashes become dashes (so the result can never climb out of its
/// directory), separators like `!&#+:` become dashes, runs of dashes collapse,
/// accents are transliterated, and surrounding whitespace is trimmed. Spaces
/// inside the name are kept.
///
/// ```
/// use podkeep::utils::sanitize_name;
///
/// assert_eq!(sanitize_name("my.file/name.txt"), "my-file-name-txt");
/// assert_eq!(sanitize_name("Café: Müller & Co"), "Cafe- Mueller - Co");
/// ```
pub fn sanitize_name(input: &str) -> String {
    let flattened: String = input
        .chars()
        .map(|c| if c == '.' || c == '/' { '-' } else { c })
        .collect();
    let ascii = transliterate(&flattened);
    let replaced = ILLEGAL_NAME.replace_all(&ascii, "-");
    let collapsed = DASH_RUN.replace_all(&replaced, "-");
    collapsed.trim().to_string()
}

/// Convert an HTML summary into plain text.
///
/// `<br>` and closing `</p>` become newlines, remaining tags are dropped and a
/// small set of typographic entities is decoded. `&lt;`/`&gt;` stay escaped so
/// the text never reintroduces markup.
pub fn html_to_text(input: &str) -> String {
    let with_breaks = LINE_BREAK_TAG.replace_all(input, "\n");
    let stripped = ANY_TAG.replace_all(&with_breaks, "");

    let mut text = stripped.into_owned();
    for (entity, replacement) in [
        ("&#8216;", "'"),
        ("&#8217;", "'"),
        ("&#8220;", "\""),
        ("&#8221;", "\""),
        ("&#39;", "'"),
        ("&nbsp;", " "),
        ("&quot;", "\""),
        ("&apos;", "'"),
        ("&amp;", "&"),
    ] {
        text = text.replace(entity, replacement);
    }
    text
}

/// File extension taken from the last path segment of `url`.
///
/// Query strings are ignored. Falls back to `default` when the segment has no
/// short alphanumeric extension.
pub fn url_extension(url: &str, default: &str) -> String {
    let segment = url::Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(|s| s.to_string()))
    });

    segment
        .and_then(|s| urlencoding::decode(&s).ok().map(|d| d.into_owned()))
        .and_then(|name| {
            Path::new(&name)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
        })
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| default.to_string())
}

/// Directory holding every file of one feed
pub fn feed_dir(root: &Path, feed_title: &str) -> PathBuf {
    let name = sanitize_name(feed_title);
    root.join(if name.is_empty() { "untitled-feed" } else { &name })
}

/// Deterministic destination for an episode file.
///
/// `<root>/<feed title>/<item title>.<ext>`, each component sanitized. When the
/// title sanitizes to nothing, `fallback` names the file instead.
pub fn episode_path(
    root: &Path,
    feed_title: &str,
    item_title: &str,
    fallback: &str,
    media_url: &str,
) -> PathBuf {
    let mut stem = sanitize_name(item_title);
    if stem.is_empty() {
        stem = sanitize_name(fallback);
    }
    let ext = url_extension(media_url, DEFAULT_MEDIA_EXTENSION);
    feed_dir(root, feed_title).join(format!("{}.{}", stem, ext))
}

/// Temporary path a transfer writes to before the final rename
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}
