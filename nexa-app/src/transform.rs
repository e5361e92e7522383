//! Text transforms applied around model calls.
//!
//! - `<<NANO_GENERATE_IMAGE: prompt>>` tokens in replies become inline images.
//! - Image attachments plus an edit keyword route to the image-edit model.
//! - Attachment payloads lose any `data:` URL prefix before going on the wire.

use std::ops::Range;

const NANO_OPEN: &str = "<<NANO_GENERATE_IMAGE:";
const NANO_CLOSE: &str = ">>";

pub const NANO_ERROR_INLINE: &str = "\n> ⚠️ **NANO ERROR**\n";

pub const EDIT_KEYWORDS: [&str; 10] = [
    "edit",
    "change",
    "filter",
    "style",
    "transform",
    "make it",
    "add",
    "remove",
    "replace",
    "create",
];

/// The first image-generation token found in a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NanoRequest {
    /// Byte range of the whole token, delimiters included.
    pub span: Range<usize>,
    pub prompt: String,
}

/// Find the first well-formed NANO token. The prompt is a single line and
/// leading whitespace after the colon is skipped.
pub fn find_nano_request(text: &str) -> Option<NanoRequest> {
    let mut search_from = 0;
    while let Some(found) = text[search_from..].find(NANO_OPEN) {
        let start = search_from + found;
        let after_open = start + NANO_OPEN.len();
        let rest = &text[after_open..];
        let body_start = after_open + (rest.len() - rest.trim_start().len());

        let body = &text[body_start..];
        let line_end = body.find('\n').unwrap_or(body.len());
        if let Some(close) = body[..line_end].find(NANO_CLOSE) {
            let end = body_start + close + NANO_CLOSE.len();
            return Some(NanoRequest {
                span: start..end,
                prompt: body[..close].to_string(),
            });
        }
        search_from = after_open;
    }
    None
}

/// Replace the token with an inline image, or with the inline error notice.
pub fn substitute_nano(text: &str, request: &NanoRequest, image_url: Option<&str>) -> String {
    let replacement = match image_url {
        Some(url) => format!("![{}]({url})", request.prompt),
        None => NANO_ERROR_INLINE.to_string(),
    };
    let mut out = String::with_capacity(text.len() + replacement.len());
    out.push_str(&text[..request.span.start]);
    out.push_str(&replacement);
    out.push_str(&text[request.span.end..]);
    out
}

pub fn is_edit_request(prompt: &str) -> bool {
    let lower = prompt.to_lowercase();
    EDIT_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Payload after the first `base64,` marker, or the input unchanged.
pub fn strip_data_url_prefix(data: &str) -> &str {
    match data.split_once("base64,") {
        Some((_, payload)) => payload,
        None => data,
    }
}

pub fn data_url(mime_type: &str, data: &str) -> String {
    format!("data:{mime_type};base64,{data}")
}
