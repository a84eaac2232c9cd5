//! Routing of inbound push frames.
//!
//! Payloads come from several backends and arrive in different envelopes
//! (`payload.data.subscribe.data`, bare objects, prefixed text, JSON encoded
//! inside JSON strings). Routing therefore searches the whole value instead of
//! reading a fixed path:
//!
//! 1. **Media list.** Depth-first, first match wins. A list is a non-empty
//!    array of strings, or a non-empty array of objects that all carry a
//!    string `link`. At each object, [`PREFERRED_MEDIA_KEYS`] are searched
//!    before the remaining keys in document order.
//! 2. **Collection id.** Otherwise, depth-first for a non-empty string
//!    `collectionId`.
//!
//! Strings that hold a JSON object or array are decoded and searched too.

use crate::{PushError, PushResult};
use serde_json::{Map, Value};

/// Object keys searched first for a media list, in order.
pub const PREFERRED_MEDIA_KEYS: [&str; 4] = ["imageCollection", "images", "imageLinks", "links"];

const COLLECTION_ID_KEY: &str = "collectionId";

/// Nesting bound for the search.
const MAX_DEPTH: usize = 64;

/// What a push frame asks the player to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushRoute {
    /// Play these media references in order.
    Media(Vec<String>),
    /// Fetch this collection and play its media.
    Collection(String),
}

/// Parse a text frame: the whole frame as JSON, else the first JSON value
/// embedded at the first `{` or `[`, else the raw text as a string.
pub fn parse_frame(text: &str) -> Value {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return value;
    }
    if let Some(start) = text.find(['{', '[']) {
        let mut values = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        if let Some(Ok(value)) = values.next() {
            return value;
        }
    }
    Value::String(text.to_string())
}

/// Route a parsed payload. `None` when it carries nothing playable.
pub fn route(value: &Value) -> Option<PushRoute> {
    if let Some(media) = find_media_list(value, 0) {
        return Some(PushRoute::Media(media));
    }
    find_collection_id(value, 0).map(PushRoute::Collection)
}

/// [`parse_frame`] then [`route`].
pub fn interpret(text: &str) -> PushResult<PushRoute> {
    route(&parse_frame(text)).ok_or_else(|| {
        PushError::MalformedPushPayload(format!(
            "no media list or collectionId in {}-byte frame",
            text.len()
        ))
    })
}

fn find_media_list(value: &Value, depth: usize) -> Option<Vec<String>> {
    if depth > MAX_DEPTH {
        return None;
    }
    match value {
        Value::Array(items) => media_list(items)
            .or_else(|| items.iter().find_map(|item| find_media_list(item, depth + 1))),
        Value::Object(map) => PREFERRED_MEDIA_KEYS
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(|child| find_media_list(child, depth + 1))
            .or_else(|| {
                map.values()
                    .find_map(|child| find_media_list(child, depth + 1))
            }),
        Value::String(text) => {
            embedded_json(text).and_then(|decoded| find_media_list(&decoded, depth + 1))
        }
        _ => None,
    }
}

fn media_list(items: &[Value]) -> Option<Vec<String>> {
    if items.is_empty() {
        return None;
    }

    let strings: Option<Vec<String>> = items
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect();
    if strings.is_some() {
        return strings;
    }

    items
        .iter()
        .map(|item| {
            item.as_object()
                .and_then(|object| object.get("link"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect()
}

fn find_collection_id(value: &Value, depth: usize) -> Option<String> {
    if depth > MAX_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => direct_collection_id(map).or_else(|| {
            map.values()
                .find_map(|child| find_collection_id(child, depth + 1))
        }),
        Value::Array(items) => items
            .iter()
            .find_map(|item| find_collection_id(item, depth + 1)),
        Value::String(text) => {
            embedded_json(text).and_then(|decoded| find_collection_id(&decoded, depth + 1))
        }
        _ => None,
    }
}

fn direct_collection_id(map: &Map<String, Value>) -> Option<String> {
    map.get(COLLECTION_ID_KEY)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Decode a string that holds a JSON object or array.
fn embedded_json(text: &str) -> Option<Value> {
    let trimmed = text.trim_start();
    if !trimmed.starts_with(['{', '[']) {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}
