//! HTML sanitizer and image inliner for outbound email.
//!
//! Mail clients are hostile renderers: arbitrary attributes get emails
//! flagged, externally hosted images are blocked by default, and `data:`
//! URLs are ignored outright. [`sanitize`] rewrites user-authored HTML into
//! a form that survives them:
//!
//! - strips attributes outside a standard allowlist
//! - wraps every `<img>` in a single-cell table for layout stability
//! - replaces remote `http(s)` image sources with `cid:` references,
//!   reporting them so the sender can attach the fetched bytes
//! - decodes `data:image/...;base64` sources into attachment bytes with
//!   `cid:` references
//! - derives a plain-text alternative body
//!
//! The transformation is pure: no network, no clock beyond content-id
//! generation, no persistence.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::warn;

lazy_static! {
    static ref TAG: Regex = Regex::new(r"(?s)<([a-zA-Z][a-zA-Z0-9]*)\b([^>]*?)(/?)>").unwrap();
    static ref ATTR: Regex =
        Regex::new(r#"([a-zA-Z][a-zA-Z0-9:_-]*)\s*=\s*("[^"]*"|'[^']*'|[^\s"'>]+)"#).unwrap();
    static ref IMG_TAG: Regex = Regex::new(r"(?is)<img\b[^>]*>").unwrap();
    static ref SRC_ATTR: Regex =
        Regex::new(r#"(?is)\bsrc\s*=\s*("[^"]*"|'[^']*'|[^\s"'>]+)"#).unwrap();
    static ref DATA_URL: Regex =
        Regex::new(r"^data:image/([a-zA-Z0-9.+-]+);base64,([A-Za-z0-9+/=\s]+)$").unwrap();
    static ref DROP_BLOCKS: Regex = Regex::new(
        r"(?is)<style\b[^>]*>.*?</style>|<script\b[^>]*>.*?</script>|<head\b[^>]*>.*?</head>"
    )
    .unwrap();
    static ref LINE_BREAKS: Regex =
        Regex::new(r"(?i)<br\s*/?>|</(p|div|tr|li|h[1-6]|table)>").unwrap();
    static ref ANY_TAG: Regex = Regex::new(r"(?s)<[^>]+>").unwrap();
}

/// Attributes that render consistently across mail clients. Everything else
/// (framework `data-*` attributes, editor artifacts, event handlers) is
/// dropped.
const ALLOWED_ATTRS: &[&str] = &[
    "href", "src", "alt", "title", "style", "width", "height", "align", "valign", "border",
    "cellpadding", "cellspacing", "colspan", "rowspan", "target", "bgcolor", "color", "face",
    "size", "dir", "lang",
];

/// A remote image reference extracted from the HTML. The bytes are not
/// fetched here; the caller attaches them under `content_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteImageRef {
    pub url: String,
    pub content_id: String,
}

/// A decoded inline (base64) image, ready to attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineImage {
    pub content_id: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Counts and approximate payload size for one sanitize pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImageStats {
    pub base64_inlined: usize,
    pub remote_inlined: usize,
    pub payload_kb: usize,
}

/// Result of sanitizing one HTML body.
#[derive(Debug, Clone)]
pub struct SanitizedEmail {
    pub html: String,
    pub text: String,
    pub remote_images: Vec<RemoteImageRef>,
    pub inline_images: Vec<InlineImage>,
    pub stats: ImageStats,
}

/// Sanitize an HTML body for email delivery.
///
/// Infallible: malformed image sources are passed through unchanged (with a
/// warning) rather than failing the whole body.
pub fn sanitize(html: &str) -> SanitizedEmail {
    let cleaned = strip_custom_attributes(html);

    let mut inliner = Inliner::new();
    let rewritten = inliner.rewrite_images(&cleaned);

    let text = derive_plain_text(&cleaned);

    let attached: usize = inliner.inline_images.iter().map(|i| i.data.len()).sum();
    let stats = ImageStats {
        base64_inlined: inliner.inline_images.len(),
        remote_inlined: inliner.remote_images.len(),
        payload_kb: (rewritten.len() + attached) / 1024,
    };

    SanitizedEmail {
        html: rewritten,
        text,
        remote_images: inliner.remote_images,
        inline_images: inliner.inline_images,
        stats,
    }
}

/// Rebuild every opening tag keeping only allowlisted attributes. Closing
/// tags, comments, and doctype declarations are untouched.
fn strip_custom_attributes(html: &str) -> String {
    TAG.replace_all(html, |caps: &Captures| {
        let name = &caps[1];
        let attrs = &caps[2];
        let self_close = &caps[3];

        let mut kept = String::new();
        for attr in ATTR.captures_iter(attrs) {
            let attr_name = attr[1].to_ascii_lowercase();
            if ALLOWED_ATTRS.contains(&attr_name.as_str()) {
                kept.push(' ');
                kept.push_str(&attr[1]);
                kept.push('=');
                kept.push_str(&normalize_quoting(&attr[2]));
            }
        }

        if self_close.is_empty() {
            format!("<{}{}>", name, kept)
        } else {
            format!("<{}{} />", name, kept)
        }
    })
    .into_owned()
}

/// Unquoted attribute values get double quotes so the rebuilt tag is valid.
fn normalize_quoting(value: &str) -> String {
    if value.starts_with('"') || value.starts_with('\'') {
        value.to_string()
    } else {
        format!("\"{}\"", value)
    }
}

struct Inliner {
    remote_images: Vec<RemoteImageRef>,
    inline_images: Vec<InlineImage>,
    seq: usize,
    stamp: i64,
}

impl Inliner {
    fn new() -> Self {
        Self {
            remote_images: Vec::new(),
            inline_images: Vec::new(),
            seq: 0,
            stamp: Utc::now().timestamp_millis(),
        }
    }

    /// Unique within one sanitize pass: monotonic counter plus timestamp.
    fn next_content_id(&mut self) -> String {
        let cid = format!("img{}.{}@courier", self.seq, self.stamp);
        self.seq += 1;
        cid
    }

    fn rewrite_images(&mut self, html: &str) -> String {
        let mut out = String::with_capacity(html.len());
        let mut last = 0;
        for m in IMG_TAG.find_iter(html) {
            out.push_str(&html[last..m.start()]);
            out.push_str(&self.rewrite_one(m.as_str()));
            last = m.end();
        }
        out.push_str(&html[last..]);
        out
    }

    fn rewrite_one(&mut self, img: &str) -> String {
        let src = match SRC_ATTR.captures(img) {
            Some(caps) => unquote(&caps[1]).to_string(),
            // No src attribute: pass through untouched.
            None => return img.to_string(),
        };

        let rewritten = if src.starts_with("http://") || src.starts_with("https://") {
            let cid = self.next_content_id();
            self.remote_images.push(RemoteImageRef {
                url: src,
                content_id: cid.clone(),
            });
            replace_src(img, &cid)
        } else if src.starts_with("data:") {
            match self.decode_data_url(&src) {
                Some(image) => {
                    let cid = image.content_id.clone();
                    self.inline_images.push(image);
                    replace_src(img, &cid)
                }
                // Malformed data URL: keep the tag as-is.
                None => {
                    let prefix: String = src.chars().take(48).collect();
                    warn!(src_prefix = %prefix, "unparseable data url, leaving image unchanged");
                    return img.to_string();
                }
            }
        } else {
            // Relative or already-cid source, nothing to extract.
            img.to_string()
        };

        wrap_in_table(&rewritten)
    }

    fn decode_data_url(&mut self, src: &str) -> Option<InlineImage> {
        let caps = DATA_URL.captures(src)?;
        let format = caps[1].to_ascii_lowercase();
        let payload: String = caps[2].chars().filter(|c| !c.is_whitespace()).collect();
        let data = BASE64.decode(payload.as_bytes()).ok()?;
        Some(InlineImage {
            content_id: self.next_content_id(),
            content_type: format!("image/{}", format),
            data,
        })
    }
}

fn unquote(value: &str) -> &str {
    value.trim_matches(|c| c == '"' || c == '\'')
}

fn replace_src(img: &str, content_id: &str) -> String {
    SRC_ATTR
        .replace(img, format!("src=\"cid:{}\"", content_id))
        .into_owned()
}

/// Single-cell table wrapper. Outlook and older webmail clients float bare
/// images unpredictably; a table cell pins them.
fn wrap_in_table(img: &str) -> String {
    format!(
        "<table border=\"0\" cellpadding=\"0\" cellspacing=\"0\"><tr><td>{}</td></tr></table>",
        img
    )
}

/// Derive the plain-text alternative: drop style/script/head blocks, turn
/// structural tags into newlines, strip the rest, decode common entities,
/// collapse whitespace.
fn derive_plain_text(html: &str) -> String {
    let text = DROP_BLOCKS.replace_all(html, "");
    let text = LINE_BREAKS.replace_all(&text, "\n");
    let text = ANY_TAG.replace_all(&text, "");

    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = 0usize;
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(collapsed);
    }
    lines.join("\n").trim().to_string()
}
