// Vendor response envelopes and request descriptions
//
// Most vendors wrap their payload in a small envelope carrying a status
// code (`{"status": 200, ...}`, `{"code": 0, "msg": ..., "data": ...}`).
// The envelope is parsed fresh for every response and never stored.

use serde_json::Value;

use crate::error::Error;

/// A literal a JSON field is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    Int(i64),
    Str(&'static str),
}

impl Expected {
    /// Numbers match numbers or numeric strings; strings match exactly.
    pub fn matches(self, value: &Value) -> bool {
        match (self, value) {
            (Self::Int(want), Value::Number(n)) => n.as_i64() == Some(want),
            (Self::Int(want), Value::String(s)) => s.trim().parse::<i64>().ok() == Some(want),
            (Self::Str(want), Value::String(s)) => s == want,
            _ => false,
        }
    }
}

/// `path == value` test on a JSON body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMatch {
    pub path: &'static str,
    pub value: Expected,
}

impl FieldMatch {
    pub const fn new(path: &'static str, value: Expected) -> Self {
        Self { path, value }
    }

    pub fn matches(&self, body: &Value) -> bool {
        lookup(body, self.path).is_some_and(|v| self.value.matches(v))
    }
}

/// Envelope status check: which values mean success, and which mean the
/// credentials were refused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCheck {
    pub path: &'static str,
    pub ok: Vec<Expected>,
    pub rejected: Vec<Expected>,
    /// Where the vendor puts a human-readable error message, if anywhere.
    pub message_path: Option<&'static str>,
}

/// Decoded `{statusCode/ok-flag, errorMessage?, payload}` view of a body.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub status: Option<String>,
    pub ok: bool,
    pub rejected: bool,
    pub error_message: Option<String>,
    pub payload: Value,
}

impl ResponseEnvelope {
    /// Classify `payload` with `check`. A body without the status field is
    /// taken as successful; some vendors only add it on errors.
    pub fn parse(payload: Value, check: Option<&StatusCheck>) -> Self {
        let Some(check) = check else {
            return Self {
                status: None,
                ok: true,
                rejected: false,
                error_message: None,
                payload,
            };
        };

        let field = lookup(&payload, check.path);
        let status = field.map(scalar_to_string);
        let ok = field.is_none_or(|v| check.ok.iter().any(|e| e.matches(v)));
        let rejected = field.is_some_and(|v| check.rejected.iter().any(|e| e.matches(v)));
        let error_message = check
            .message_path
            .and_then(|p| lookup(&payload, p))
            .map(scalar_to_string)
            .filter(|m| !m.is_empty());

        Self {
            status,
            ok,
            rejected,
            error_message,
            payload,
        }
    }

    /// Return the payload on success, or the matching error.
    pub fn into_result(self) -> Result<Value, Error> {
        if self.ok {
            return Ok(self.payload);
        }
        let message = self
            .error_message
            .unwrap_or_else(|| "vendor reported failure".into());
        if self.rejected {
            return Err(Error::Authentication { message });
        }
        Err(Error::Vendor {
            code: self.status.unwrap_or_default(),
            message,
        })
    }
}

/// Resolve a dotted path (`data.info.status`, `widget.0.id`) in a JSON value.
/// Numeric segments index arrays.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Render a scalar JSON value without quotes.
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ── Requests ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Form,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    None,
    Form(Vec<(String, String)>),
    Json(Value),
}

/// How a response body is handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Decoded JSON, envelope-checked and expiry-checked.
    Json,
    /// Raw text (HTML pages), returned as a JSON string.
    Text,
}

/// One authenticated request against the vendor API. Paths are relative to
/// the client's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    pub format: ResponseFormat,
}

impl Request {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::None,
            format: ResponseFormat::Json,
        }
    }

    pub fn post_form(path: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            body: RequestBody::Form(fields),
            ..Self::get(path)
        }
    }

    pub fn post_json(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            body: RequestBody::Json(body),
            ..Self::get(path)
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn as_text(mut self) -> Self {
        self.format = ResponseFormat::Text;
        self
    }
}
