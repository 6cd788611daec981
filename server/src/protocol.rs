//! The framed wire protocol: `<CLASS format="FMT">PAYLOAD</CLASS>`. Not a
//! general XML parser — just enough tag/attribute/escape handling for this
//! one frame shape.

use std::fmt;

/// Payload encoding declared by the frame's `format` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
    Base64,
}

impl Format {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Format::Text),
            "json" => Some(Format::Json),
            "base64" => Some(Format::Base64),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Format::Text => "text",
            Format::Json => "json",
            Format::Base64 => "base64",
        }
    }
}

/// One framing unit on the wire.
#[derive(Debug, Clone)]
pub struct TcpMessage {
    pub class: String,
    pub format: Format,
    pub payload: String,
}

/// Frame parse failure — always handled by logging and closing the
/// connection silently, never replied to.
#[derive(Debug)]
pub struct MalformedFrame(pub String);

impl fmt::Display for MalformedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed frame: {}", self.0)
    }
}

impl std::error::Error for MalformedFrame {}

/// Escapes XML special characters in an outgoing payload.
pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Unescapes XML special characters in an incoming payload.
pub fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Checks whether the accumulated buffer ends with *any* closing tag
/// (`</name>`), which is the frame-end condition the connection state
/// machine waits for. Returns the tag name regardless of whether it is a
/// known handler class — the caller decides whether an unrecognized class
/// should close the connection silently.
pub fn trailing_tag(buf: &str) -> Option<String> {
    let trimmed = buf.trim_end();
    if !trimmed.ends_with('>') {
        return None;
    }
    let close_start = trimmed.rfind("</")?;
    let name = &trimmed[close_start + 2..trimmed.len() - 1];
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return None;
    }
    // The matching opening tag must actually exist, or this is just a `>`
    // that happens to appear inside an unescaped payload (malformed frame).
    let open_prefix = format!("<{name}");
    trimmed.find(&open_prefix).map(|_| name.to_string())
}

/// Checks whether the accumulated buffer ends with a closing tag for one of
/// `known_classes` specifically. Returns the matched class name.
pub fn completed_class<'a>(buf: &str, known_classes: &'a [String]) -> Option<&'a str> {
    let tag = trailing_tag(buf)?;
    known_classes.iter().find(|c| **c == tag).map(|s| s.as_str())
}

/// Parses a complete accumulated frame (already known to end in the expected
/// closing tag) into a `TcpMessage`.
pub fn parse_frame(buf: &str, class: &str) -> Result<TcpMessage, MalformedFrame> {
    let open_prefix = format!("<{class}");
    let open_start = buf
        .find(&open_prefix)
        .ok_or_else(|| MalformedFrame(format!("no opening tag for <{class}>")))?;
    let open_end = buf[open_start..]
        .find('>')
        .map(|i| open_start + i)
        .ok_or_else(|| MalformedFrame("unterminated opening tag".to_string()))?;
    let open_tag = &buf[open_start..=open_end];

    let format = extract_format_attr(open_tag).unwrap_or(Format::Text);

    let close_tag = format!("</{class}>");
    let close_start = buf
        .rfind(&close_tag)
        .ok_or_else(|| MalformedFrame(format!("no closing tag for <{class}>")))?;
    if close_start < open_end + 1 {
        return Err(MalformedFrame("closing tag precedes opening tag".to_string()));
    }

    let raw_payload = &buf[open_end + 1..close_start];
    let payload = unescape_xml(raw_payload);

    Ok(TcpMessage { class: class.to_string(), format, payload })
}

fn extract_format_attr(open_tag: &str) -> Option<Format> {
    let marker = "format=\"";
    let start = open_tag.find(marker)? + marker.len();
    let end = open_tag[start..].find('"')? + start;
    Format::parse(&open_tag[start..end])
}

impl TcpMessage {
    /// The logical decoded payload per the frame's format: `json` and `text`
    /// are already plain text after XML-unescaping; `base64` needs one more
    /// decode step to recover the original UTF-8 bytes.
    pub fn decoded_payload(&self) -> Result<String, String> {
        match self.format {
            Format::Text | Format::Json => Ok(self.payload.clone()),
            Format::Base64 => {
                use base64::Engine;
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(self.payload.trim())
                    .map_err(|e| format!("invalid base64 payload: {e}"))?;
                String::from_utf8(bytes).map_err(|e| format!("base64 payload is not utf-8: {e}"))
            }
        }
    }

    /// Encodes a reply frame using the same class, always as `json` format:
    /// the reply body is a JSON document regardless of the request's format.
    pub fn encode_reply(class: &str, reply_json: &str) -> String {
        format!(r#"<{class} format="json">{}</{class}>"#, escape_xml(reply_json))
    }
}
