//! Decoding and encoding of chat payloads.
//!
//! Inbound stream chunks arrive in a handful of shapes depending on where in
//! the stack they were produced: plain byte buffers, buffer-list style
//! segment collections, already-decoded text, or envelopes that nest the
//! payload under a `value`/`data` field. [`decode`] normalizes all of them
//! through a fixed, ordered set of steps and yields the final message text,
//! or `None` when the chunk carries nothing renderable.

/// Upper bound on envelope nesting. Anything deeper is treated as malformed
/// input and dropped rather than unwrapped further.
pub const MAX_UNWRAP_DEPTH: usize = 8;

/// One inbound chunk, in whichever shape the stack handed it over.
#[derive(Debug, Clone)]
pub enum Chunk {
    /// A contiguous byte buffer.
    Bytes(Vec<u8>),
    /// A buffer-list shaped value: multiple segments that flatten to bytes.
    Segments(Vec<Vec<u8>>),
    /// Text that was already decoded upstream.
    Text(String),
    /// A generic wrapper nesting the payload under `value` and/or `data`.
    Wrapped(Envelope),
}

/// The inner fields of a [`Chunk::Wrapped`] value. `value` takes priority
/// over `data` when both are present.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub value: Option<Box<Chunk>>,
    pub data: Option<Box<Chunk>>,
}

/// A chunk reduced to one of the two terminal payload forms.
enum Payload {
    Bytes(Vec<u8>),
    Text(String),
}

/// Reduces a chunk to a terminal payload by applying the normalization steps
/// in order: flatten segment lists, then unwrap envelopes (bounded by
/// [`MAX_UNWRAP_DEPTH`]). An envelope with neither field, or nesting past
/// the bound, is malformed and yields `None`.
fn normalize(mut chunk: Chunk) -> Option<Payload> {
    let mut depth = 0;

    loop {
        match chunk {
            Chunk::Bytes(bytes) => return Some(Payload::Bytes(bytes)),
            Chunk::Text(text) => return Some(Payload::Text(text)),
            Chunk::Segments(segments) => {
                chunk = Chunk::Bytes(segments.concat());
            }
            Chunk::Wrapped(envelope) => {
                depth += 1;
                if depth > MAX_UNWRAP_DEPTH {
                    return None;
                }
                chunk = *envelope.value.or(envelope.data)?;
            }
        }
    }
}

/// If `trimmed` is syntactically a JSON object with a string field named
/// `text`, returns that field. Parse failures are swallowed by the caller.
fn json_text_field(trimmed: &str) -> Option<String> {
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return None;
    }

    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    value.get("text")?.as_str().map(str::to_owned)
}

/// Decodes one inbound chunk into message text.
///
/// The payload is converted to UTF-8 (lossily for byte buffers) and trimmed
/// of surrounding whitespace. A JSON object payload carrying a string `text`
/// field is replaced by that field; any other JSON, or unparseable
/// brace-wrapped text, passes through unchanged. Returns `None` for
/// malformed chunks and for messages that trim down to nothing.
pub fn decode(chunk: Chunk) -> Option<String> {
    let text = match normalize(chunk)? {
        Payload::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Payload::Text(text) => text,
    };

    let trimmed = text.trim();
    let message = json_text_field(trimmed).unwrap_or_else(|| trimmed.to_owned());

    if message.is_empty() {
        None
    } else {
        Some(message)
    }
}

/// Encodes message text for the wire: UTF-8 bytes, no framing or length
/// prefix. One write per message.
pub fn encode(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}
