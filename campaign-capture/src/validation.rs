use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::event::{EventType, ValidatedEvent};

pub const MAX_REFERRER_CHARS: usize = 2048;
pub const MAX_UTM_CHARS: usize = 255;
pub const MAX_VISITOR_ID_CHARS: usize = 255;
pub const MAX_PAGE_PATH_INPUT_CHARS: usize = 2048;
pub const MAX_ELEMENT_SELECTOR_CHARS: usize = 500;
pub const MAX_ELEMENT_TEXT_INPUT_CHARS: usize = 500;
pub const MAX_RECORDING_URL_CHARS: usize = 2048;

const ROOT_FIELD: &str = "(root)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCode {
    Required,
    InvalidType,
    InvalidEnumValue,
    TooLong,
    TooShort,
    InvalidUuid,
    InvalidFormat,
    InvalidJson,
    OutOfRange,
}

/// One failed field constraint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Violation {
    pub field: String,
    pub code: ViolationCode,
    pub message: String,
}

impl Violation {
    pub fn new(field: &str, code: ViolationCode, message: impl Into<String>) -> Self {
        Violation {
            field: field.to_owned(),
            code,
            message: message.into(),
        }
    }

    pub fn invalid_json(err: &serde_json::Error) -> Self {
        Violation::new(
            ROOT_FIELD,
            ViolationCode::InvalidJson,
            format!("body is not valid JSON: {err}"),
        )
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Reads typed fields out of a JSON object, collecting every violation instead
/// of stopping at the first one.
pub(crate) struct FieldReader<'a> {
    object: &'a Map<String, Value>,
    violations: Vec<Violation>,
}

impl<'a> FieldReader<'a> {
    /// Fails with a single `(root)` violation when the value is not an object.
    pub(crate) fn new(value: &'a Value) -> Result<Self, Vec<Violation>> {
        match value.as_object() {
            Some(object) => Ok(FieldReader {
                object,
                violations: Vec::new(),
            }),
            None => Err(vec![Violation::new(
                ROOT_FIELD,
                ViolationCode::InvalidType,
                "expected a JSON object",
            )]),
        }
    }

    pub(crate) fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    /// The string as sent, untrimmed. Absent is fine, null or any other JSON
    /// type is not.
    pub(crate) fn raw_str(&mut self, field: &str) -> Option<&'a str> {
        let value = self.object.get(field)?;

        match value.as_str() {
            Some(raw) => Some(raw),
            None => {
                self.push(Violation::new(
                    field,
                    ViolationCode::InvalidType,
                    format!("expected a string, got {}", json_type(value)),
                ));
                None
            }
        }
    }

    /// A trimmed string of at most `max_chars` characters.
    pub(crate) fn optional_string(&mut self, field: &str, max_chars: usize) -> Option<String> {
        let raw = self.raw_str(field)?;

        let trimmed = raw.trim();
        if trimmed.chars().count() > max_chars {
            self.push(Violation::new(
                field,
                ViolationCode::TooLong,
                format!("must be at most {max_chars} characters"),
            ));
            return None;
        }

        Some(trimmed.to_owned())
    }

    pub(crate) fn required_string(&mut self, field: &str, max_chars: usize) -> Option<String> {
        if !self.object.contains_key(field) {
            self.push(Violation::new(field, ViolationCode::Required, "is required"));
            return None;
        }
        let value = self.optional_string(field, max_chars)?;
        if value.is_empty() {
            self.push(Violation::new(
                field,
                ViolationCode::TooShort,
                "must not be empty",
            ));
            return None;
        }
        Some(value)
    }

    /// Accepts only the hyphenated 36-character form, with no padding.
    pub(crate) fn uuid(&mut self, field: &str) -> Option<Uuid> {
        let value = self.raw_str(field)?;
        match Uuid::parse_str(value) {
            Ok(uuid) if value.len() == 36 => Some(uuid),
            _ => {
                self.push(Violation::new(
                    field,
                    ViolationCode::InvalidUuid,
                    "must be a hyphenated UUID",
                ));
                None
            }
        }
    }

    pub(crate) fn required_uuid(&mut self, field: &str) -> Option<Uuid> {
        if !self.object.contains_key(field) {
            self.push(Violation::new(field, ViolationCode::Required, "is required"));
            return None;
        }
        self.uuid(field)
    }

    pub(crate) fn finish<T>(self, value: impl FnOnce() -> Option<T>) -> Result<T, Vec<Violation>> {
        if !self.violations.is_empty() {
            return Err(self.violations);
        }
        value().ok_or_else(|| {
            vec![Violation::new(
                ROOT_FIELD,
                ViolationCode::InvalidType,
                "payload could not be read",
            )]
        })
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn event_type(reader: &mut FieldReader) -> Option<EventType> {
    const FIELD: &str = "event_type";

    if !reader.object.contains_key(FIELD) {
        reader.push(Violation::new(FIELD, ViolationCode::Required, "is required"));
        return None;
    }
    // Matched exactly, so padded or empty values are not an event type.
    match reader.raw_str(FIELD)?.parse() {
        Ok(event_type) => Some(event_type),
        Err(_) => {
            reader.push(Violation::new(
                FIELD,
                ViolationCode::InvalidEnumValue,
                "must be one of click, pageview, conversion",
            ));
            None
        }
    }
}

/// Check a decoded tracking payload. Either every field is valid, or the error
/// lists every violation found.
pub fn validate_event(payload: &Value) -> Result<ValidatedEvent, Vec<Violation>> {
    let mut reader = FieldReader::new(payload)?;

    let event_type = event_type(&mut reader);
    let campaign_id = reader.uuid("campaign_id");
    let referrer = reader.optional_string("referrer", MAX_REFERRER_CHARS);
    let utm_source = reader.optional_string("utm_source", MAX_UTM_CHARS);
    let utm_medium = reader.optional_string("utm_medium", MAX_UTM_CHARS);
    let utm_campaign = reader.optional_string("utm_campaign", MAX_UTM_CHARS);
    let visitor_id = reader.optional_string("visitor_id", MAX_VISITOR_ID_CHARS);
    let page_path = reader.optional_string("page_path", MAX_PAGE_PATH_INPUT_CHARS);
    let element_selector = reader.optional_string("element_selector", MAX_ELEMENT_SELECTOR_CHARS);
    let element_text = reader.optional_string("element_text", MAX_ELEMENT_TEXT_INPUT_CHARS);
    let screen_recording_url =
        reader.optional_string("screen_recording_url", MAX_RECORDING_URL_CHARS);

    reader.finish(|| {
        Some(ValidatedEvent {
            campaign_id,
            event_type: event_type?,
            referrer,
            utm_source,
            utm_medium,
            utm_campaign,
            visitor_id,
            page_path,
            element_selector,
            element_text,
            screen_recording_url,
        })
    })
}
