//! Parsing of `rawman` responses.
//!
//! A rawman body is `text/plain`: CRLF-terminated `Key: Value` lines, with a
//! blank line separating result sets. A scalar action yields one result set
//! carrying a `Response` field; an enumeration yields a response set, zero or
//! more event sets, and a final completion event named `<Action>Complete`.

use crate::error::{Error, Result};

/// One `Key: Value` block of a rawman response.
///
/// Field order and duplicate keys are preserved: enumerations legitimately
/// repeat keys across sets, and `Message` may repeat within one.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    fields: Vec<(String, String)>,
}

impl ResultSet {
    fn parse(block: &str) -> Self {
        let mut fields = Vec::new();
        for line in block.lines() {
            if let Some((key, value)) = line.split_once(':') {
                fields.push((key.trim().to_string(), value.trim().to_string()));
            }
        }
        ResultSet { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Scalar accessor: the value of `key`, or an error if the key occurs
    /// more than once. Key comparison is case-insensitive.
    pub fn field(&self, key: &str) -> Result<Option<&str>> {
        let mut found = None;
        for (k, v) in &self.fields {
            if k.eq_ignore_ascii_case(key) {
                if found.is_some() {
                    return Err(Error::protocol(format!("duplicate field '{key}'")));
                }
                found = Some(v.as_str());
            }
        }
        Ok(found)
    }

    /// All values of `key`, newline-joined. `None` if the key is absent.
    pub fn joined(&self, key: &str) -> Option<String> {
        let values: Vec<&str> = self
            .fields
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join("\n"))
        }
    }

    /// The `Event` name of this set, if it is an event set.
    pub fn event_name(&self) -> Result<Option<&str>> {
        self.field("Event")
    }
}

/// Split a body into its non-empty result sets.
pub fn parse_result_sets(body: &str) -> Vec<ResultSet> {
    body.split("\r\n\r\n")
        .map(ResultSet::parse)
        .filter(|set| !set.is_empty())
        .collect()
}

/// The `Response` value each action is expected to produce.
fn expected_response(action: &str) -> &'static str {
    if action.eq_ignore_ascii_case("Ping") {
        "Pong"
    } else if action.eq_ignore_ascii_case("Logoff") {
        "Goodbye"
    } else {
        "Success"
    }
}

/// The completion event name terminating an enumeration of `action`.
fn completion_event(action: &str) -> String {
    format!("{action}Complete")
}

fn check_response_set(set: &ResultSet, action: &str) -> Result<()> {
    let value = set
        .field("Response")?
        .ok_or_else(|| Error::protocol(format!("{action}: response set missing Response field")))?;
    if value.eq_ignore_ascii_case(expected_response(action)) {
        return Ok(());
    }
    let message = set
        .joined("Message")
        .unwrap_or_else(|| "(no message)".into());
    Err(Error::protocol(format!(
        "{action} returned '{value}': {message}"
    )))
}

/// Parse a scalar (non-enumeration) response and validate its `Response`
/// value against the action's expected value.
pub fn parse_response(body: &str, action: &str) -> Result<ResultSet> {
    // LF-CR-LF-CR inside a body means more than one result set arrived
    // where a single one was expected. The byte order differs from the
    // CRLF-CRLF separator between enumeration sets; both checks stay.
    if body.contains("\n\r\n\r") {
        return Err(Error::protocol(format!(
            "{action}: multiple result sets in response"
        )));
    }
    let sets = parse_result_sets(body);
    if sets.len() > 1 {
        return Err(Error::protocol(format!(
            "{action}: multiple result sets in response"
        )));
    }
    let set = sets
        .into_iter()
        .next()
        .ok_or_else(|| Error::protocol(format!("{action}: empty response")))?;
    check_response_set(&set, action)?;
    Ok(set)
}

/// Parse an enumeration response: one `Success` response set, then event
/// sets, terminated by the `<Action>Complete` event. Returns the event sets
/// with the completion event stripped.
pub fn parse_enumeration(body: &str, action: &str) -> Result<Vec<ResultSet>> {
    let mut sets = parse_result_sets(body);
    if sets.is_empty() {
        return Err(Error::protocol(format!("{action}: missing response set")));
    }
    let response = sets.remove(0);
    if response.field("Response")?.is_none() {
        return Err(Error::protocol(format!("{action}: missing response set")));
    }
    check_response_set(&response, action)?;

    let completion = completion_event(action);
    let last = sets
        .pop()
        .ok_or_else(|| Error::protocol(format!("{action}: missing {completion} event")))?;
    match last.event_name()? {
        Some(name) if name.eq_ignore_ascii_case(&completion) => Ok(sets),
        Some(name) => Err(Error::protocol(format!(
            "{action}: expected {completion}, got {name}"
        ))),
        None => Err(Error::protocol(format!(
            "{action}: missing {completion} event"
        ))),
    }
}
