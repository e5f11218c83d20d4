//! # fray-report
//!
//! Nested result reports for fuzzing campaigns.
//!
//! A report is a named, ordered collection of entries, each explicitly either
//! a scalar payload or a child report — there is no type-sniffing `add`.
//! Failure propagates upward: a report is failed if it, or any descendant,
//! is marked failed. The dictionary form round-trips through
//! [`serde_json::Value`] with a reversible string transform (base64 by
//! default) applied to text and byte payloads, so binary content survives
//! transport over plain-text channels.
//!
//! ```
//! use fray_report::Report;
//!
//! let mut report = Report::new("controller");
//! report.set_value("generation time", 0i64);
//!
//! let mut target = Report::new("target");
//! target.failed("target does not respond");
//! report.attach_subreport("target", target);
//!
//! assert!(report.is_failed());
//! let restored = Report::from_dict(&report.to_dict()).unwrap();
//! assert!(restored.is_failed());
//! ```

use serde_json::{json, Map, Value as Json};
use thiserror::Error;

mod transform;

pub use transform::{Base64Transform, HexTransform, StringTransform};

#[derive(Error, Debug)]
pub enum ReportError {
    /// The dictionary form is missing required keys or holds the wrong
    /// shapes.
    #[error("malformed report dictionary: {0}")]
    Malformed(String),

    /// The string transform could not reverse a payload.
    #[error("string transform failed: {0}")]
    Transform(String),
}

/// A scalar report payload: the closed set of value shapes a report entry
/// can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportValue {
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<bool> for ReportValue {
    fn from(v: bool) -> Self {
        ReportValue::Bool(v)
    }
}

impl From<i64> for ReportValue {
    fn from(v: i64) -> Self {
        ReportValue::Int(v)
    }
}

impl From<i32> for ReportValue {
    fn from(v: i32) -> Self {
        ReportValue::Int(v as i64)
    }
}

impl From<u32> for ReportValue {
    fn from(v: u32) -> Self {
        ReportValue::Int(v as i64)
    }
}

impl From<&str> for ReportValue {
    fn from(v: &str) -> Self {
        ReportValue::Text(v.to_string())
    }
}

impl From<String> for ReportValue {
    fn from(v: String) -> Self {
        ReportValue::Text(v)
    }
}

impl From<Vec<u8>> for ReportValue {
    fn from(v: Vec<u8>) -> Self {
        ReportValue::Bytes(v)
    }
}

impl From<&[u8]> for ReportValue {
    fn from(v: &[u8]) -> Self {
        ReportValue::Bytes(v.to_vec())
    }
}

/// A report entry: explicitly a scalar payload or a named child report.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Value(ReportValue),
    Sub(Report),
}

/// A result report for a single test, possibly nesting reports from other
/// entities.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    name: String,
    failed: bool,
    default_failed: bool,
    failure_reason: Option<String>,
    entries: Vec<(String, Entry)>,
}

impl Report {
    /// A report that starts out passing.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_default(name, false)
    }

    /// A report whose default status is failed; `success()` must be called
    /// explicitly to clear it.
    pub fn failed_by_default(name: impl Into<String>) -> Self {
        Self::with_default(name, true)
    }

    fn with_default(name: impl Into<String>, default_failed: bool) -> Self {
        Self {
            name: name.into(),
            failed: default_failed,
            default_failed,
            failure_reason: None,
            entries: Vec::new(),
        }
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// Drops all entries and returns the status to its default.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.failed = self.default_failed;
        self.failure_reason = None;
    }

    /// Marks this report passing and clears any failure reason.
    pub fn success(&mut self) {
        self.failed = false;
        self.failure_reason = None;
    }

    /// Marks this report failed with a reason.
    pub fn failed(&mut self, reason: impl Into<String>) {
        self.failed = true;
        self.failure_reason = Some(reason.into());
    }

    /// True if this report or any descendant report is marked failed.
    pub fn is_failed(&self) -> bool {
        if self.failed {
            return true;
        }
        self.entries.iter().any(|(_, entry)| match entry {
            Entry::Sub(sub) => sub.is_failed(),
            Entry::Value(_) => false,
        })
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Sets a scalar entry, replacing any previous entry under the key.
    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<ReportValue>) {
        self.insert(key.into(), Entry::Value(value.into()));
    }

    /// Attaches a child report, replacing any previous entry under the key.
    pub fn attach_subreport(&mut self, key: impl Into<String>, sub: Report) {
        self.insert(key.into(), Entry::Sub(sub));
    }

    fn insert(&mut self, key: String, entry: Entry) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = entry,
            None => self.entries.push((key, entry)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, entry)| entry)
    }

    pub fn get_value(&self, key: &str) -> Option<&ReportValue> {
        match self.get(key) {
            Some(Entry::Value(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_subreport(&self, key: &str) -> Option<&Report> {
        match self.get(key) {
            Some(Entry::Sub(sub)) => Some(sub),
            _ => None,
        }
    }

    /// Dictionary form with the default (base64) transform.
    pub fn to_dict(&self) -> Json {
        self.to_dict_with(&Base64Transform)
    }

    /// Dictionary form: entry payloads live under `"entries"`, with the
    /// ordered bookkeeping lists `"sub_reports"` and `"byte_keys"` recording
    /// which keys hold child reports and which hold byte payloads. Text and
    /// byte payloads pass through the transform.
    pub fn to_dict_with(&self, transform: &dyn StringTransform) -> Json {
        let mut root = Map::new();
        root.insert(
            "name".to_string(),
            json!(transform.encode(self.name.as_bytes())),
        );
        root.insert("failed".to_string(), json!(self.failed));
        if let Some(reason) = &self.failure_reason {
            root.insert(
                "failure_reason".to_string(),
                json!(transform.encode(reason.as_bytes())),
            );
        }

        let mut sub_keys: Vec<&str> = Vec::new();
        let mut byte_keys: Vec<&str> = Vec::new();
        let mut entries = Map::new();
        for (key, entry) in &self.entries {
            let encoded = match entry {
                Entry::Value(ReportValue::Bool(b)) => json!(b),
                Entry::Value(ReportValue::Int(i)) => json!(i),
                Entry::Value(ReportValue::Text(s)) => json!(transform.encode(s.as_bytes())),
                Entry::Value(ReportValue::Bytes(b)) => {
                    byte_keys.push(key);
                    json!(transform.encode(b))
                }
                Entry::Sub(sub) => {
                    sub_keys.push(key);
                    sub.to_dict_with(transform)
                }
            };
            entries.insert(key.clone(), encoded);
        }
        root.insert("sub_reports".to_string(), json!(sub_keys));
        root.insert("byte_keys".to_string(), json!(byte_keys));
        root.insert("entries".to_string(), Json::Object(entries));
        Json::Object(root)
    }

    /// Rebuilds a report from its dictionary form with the default (base64)
    /// transform.
    pub fn from_dict(dict: &Json) -> Result<Self, ReportError> {
        Self::from_dict_with(dict, &Base64Transform)
    }

    pub fn from_dict_with(
        dict: &Json,
        transform: &dyn StringTransform,
    ) -> Result<Self, ReportError> {
        let obj = dict
            .as_object()
            .ok_or_else(|| ReportError::Malformed("report is not an object".to_string()))?;

        let name = decode_text(required_str(obj, "name")?, transform)?;
        let failed = obj
            .get("failed")
            .and_then(Json::as_bool)
            .ok_or_else(|| ReportError::Malformed("missing boolean 'failed'".to_string()))?;
        let failure_reason = match obj.get("failure_reason") {
            Some(value) => {
                let raw = value.as_str().ok_or_else(|| {
                    ReportError::Malformed("'failure_reason' is not a string".to_string())
                })?;
                Some(decode_text(raw, transform)?)
            }
            None => None,
        };

        let sub_keys = required_key_list(obj, "sub_reports")?;
        let byte_keys = required_key_list(obj, "byte_keys")?;
        let entries = obj
            .get("entries")
            .and_then(Json::as_object)
            .ok_or_else(|| ReportError::Malformed("missing 'entries' object".to_string()))?;

        let mut report = Report::new(name);
        report.failed = failed;
        report.failure_reason = failure_reason;

        // child reports first, in their recorded order
        for key in &sub_keys {
            let value = entries.get(key).ok_or_else(|| {
                ReportError::Malformed(format!("sub-report key {:?} has no entry", key))
            })?;
            report.attach_subreport(key.clone(), Self::from_dict_with(value, transform)?);
        }
        for (key, value) in entries {
            if sub_keys.contains(key) {
                continue;
            }
            let decoded = match value {
                Json::Bool(b) => ReportValue::Bool(*b),
                Json::Number(n) => ReportValue::Int(n.as_i64().ok_or_else(|| {
                    ReportError::Malformed(format!("entry {:?} is not an i64", key))
                })?),
                Json::String(s) => {
                    let raw = transform.decode(s)?;
                    if byte_keys.contains(key) {
                        ReportValue::Bytes(raw)
                    } else {
                        ReportValue::Text(String::from_utf8(raw).map_err(|_| {
                            ReportError::Malformed(format!("entry {:?} is not valid text", key))
                        })?)
                    }
                }
                other => {
                    return Err(ReportError::Malformed(format!(
                        "entry {:?} has unsupported shape: {}",
                        key, other
                    )))
                }
            };
            report.set_value(key.clone(), decoded);
        }
        Ok(report)
    }
}

fn required_str<'a>(obj: &'a Map<String, Json>, key: &str) -> Result<&'a str, ReportError> {
    obj.get(key)
        .and_then(Json::as_str)
        .ok_or_else(|| ReportError::Malformed(format!("missing string {:?}", key)))
}

fn required_key_list(obj: &Map<String, Json>, key: &str) -> Result<Vec<String>, ReportError> {
    let list = obj
        .get(key)
        .and_then(Json::as_array)
        .ok_or_else(|| ReportError::Malformed(format!("missing list {:?}", key)))?;
    list.iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| ReportError::Malformed(format!("{:?} holds a non-string key", key)))
        })
        .collect()
}

fn decode_text(raw: &str, transform: &dyn StringTransform) -> Result<String, ReportError> {
    let bytes = transform.decode(raw)?;
    String::from_utf8(bytes)
        .map_err(|_| ReportError::Malformed("decoded text is not valid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Report {
        let mut report = Report::new("controller");
        report.set_value("generation time", 0i64);
        report.set_value("verbose", true);
        report.set_value("stage", "send");
        report.set_value("payload", b"\x00\xff\x7f binary".as_ref());

        let mut monitor = Report::new("monitor");
        monitor.set_value("signal", 11i64);
        monitor.failed("target crashed");

        let mut inner = Report::new("debugger");
        inner.set_value("backtrace", "0xdeadbeef");
        monitor.attach_subreport("debugger", inner);

        report.attach_subreport("monitor", monitor);
        report
    }

    #[test]
    fn failure_propagates_from_descendants() {
        let report = sample();
        // the root itself is passing, a descendant is not
        assert!(report.is_failed());

        let mut clean = Report::new("clean");
        clean.attach_subreport("sub", Report::new("sub"));
        assert!(!clean.is_failed());
    }

    #[test]
    fn success_clears_reason() {
        let mut report = Report::new("r");
        report.failed("broken");
        assert_eq!(report.failure_reason(), Some("broken"));
        report.success();
        assert!(!report.is_failed());
        assert_eq!(report.failure_reason(), None);
    }

    #[test]
    fn default_failed_until_cleared() {
        let mut report = Report::failed_by_default("r");
        assert!(report.is_failed());
        report.success();
        assert!(!report.is_failed());
        report.clear();
        assert!(report.is_failed());
    }

    #[test]
    fn entries_are_tagged_not_sniffed() {
        let report = sample();
        assert!(report.get_value("stage").is_some());
        assert!(report.get_subreport("stage").is_none());
        assert!(report.get_subreport("monitor").is_some());
        assert!(report.get("missing").is_none());
    }

    #[test]
    fn set_value_replaces_existing_key() {
        let mut report = Report::new("r");
        report.set_value("k", 1i64);
        report.set_value("k", 2i64);
        assert_eq!(report.get_value("k"), Some(&ReportValue::Int(2)));
    }

    #[test]
    fn dict_round_trip_preserves_values_and_failure() {
        let report = sample();
        let restored = Report::from_dict(&report.to_dict()).unwrap();

        assert_eq!(restored.is_failed(), report.is_failed());
        assert_eq!(restored.get_name(), "controller");
        assert_eq!(
            restored.get_value("payload"),
            Some(&ReportValue::Bytes(b"\x00\xff\x7f binary".to_vec()))
        );
        assert_eq!(restored.get_value("stage"), Some(&ReportValue::Text("send".into())));
        assert_eq!(restored.get_value("verbose"), Some(&ReportValue::Bool(true)));

        let monitor = restored.get_subreport("monitor").unwrap();
        assert_eq!(monitor.failure_reason(), Some("target crashed"));
        assert!(monitor.get_subreport("debugger").is_some());
    }

    #[test]
    fn dict_round_trip_with_hex_transform() {
        let report = sample();
        let dict = report.to_dict_with(&HexTransform);
        let restored = Report::from_dict_with(&dict, &HexTransform).unwrap();
        assert_eq!(restored.is_failed(), report.is_failed());
        assert_eq!(
            restored.get_value("payload"),
            report.get_value("payload")
        );
        assert_eq!(
            restored.get_subreport("monitor").unwrap().failure_reason(),
            Some("target crashed")
        );
    }

    #[test]
    fn sub_report_keys_keep_their_order() {
        let mut report = Report::new("r");
        for key in ["z", "a", "m"] {
            report.attach_subreport(key, Report::new(key));
        }
        let dict = report.to_dict();
        let subs: Vec<&str> = dict["sub_reports"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(subs, ["z", "a", "m"]);
    }

    #[test]
    fn malformed_dicts_are_rejected() {
        assert!(Report::from_dict(&serde_json::json!([])).is_err());
        assert!(Report::from_dict(&serde_json::json!({ "failed": false })).is_err());
        // entry text that does not reverse through the transform
        let mut dict = sample().to_dict();
        dict["entries"]["stage"] = serde_json::json!("!!not-base64!!");
        assert!(Report::from_dict(&dict).is_err());
    }
}
