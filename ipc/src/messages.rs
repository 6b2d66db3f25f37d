use crate::errors::{CallError, InvalidCallSpec, MalformedMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single method invocation as it travels over the channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    /// Correlation key pairing this call with its result
    pub id: String,
    /// Dot-separated path into the remote's method tree
    pub name: String,
    /// `Some(Value::Null)` when the sender wrote `"params": null`
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_millis: Option<u64>,
}

impl CallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            params: None,
            timeout_millis: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_timeout_millis(mut self, millis: u64) -> Self {
        self.timeout_millis = Some(millis);
        self
    }

    /// Params as a positional argument list. A non-array value, including an
    /// explicit `null`, becomes a one-element list; absent params become an
    /// empty list.
    pub fn positional_params(&self) -> Vec<Value> {
        match &self.params {
            None => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
        }
    }
}

// A field that is present is kept even when it is `null`; only an absent
// field (handled by `#[serde(default)]`) becomes `None`.
fn present_value<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(d).map(Some)
}

/// The outcome of a call. `error` is `None` on success; on the wire it is
/// `false` on success and a string otherwise.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallResult {
    pub request: CallRequest,
    /// `Value::Null` when the call produced nothing
    #[serde(default)]
    pub value: Value,
    #[serde(default, with = "error_flag")]
    pub error: Option<String>,
    #[serde(default)]
    pub timed_out: bool,
}

impl CallResult {
    pub fn success(request: CallRequest, value: Value) -> Self {
        Self {
            request,
            value,
            error: None,
            timed_out: false,
        }
    }

    pub fn failed(request: CallRequest, error: CallError) -> Self {
        let timed_out = matches!(error, CallError::Timeout(_));
        Self {
            request,
            value: Value::Null,
            error: Some(error.to_string()),
            timed_out,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

// `error: string | false` on the wire.
mod error_flag {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(error: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
        match error {
            Some(message) => s.serialize_str(message),
            None => s.serialize_bool(false),
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Flag(bool),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Option::<Repr>::deserialize(d)? {
            None | Some(Repr::Flag(false)) => None,
            Some(Repr::Flag(true)) => Some("unknown error".to_string()),
            Some(Repr::Text(text)) => Some(text),
        })
    }
}

/// The wire envelope. Field names and the two `kind` values are the
/// compatibility surface.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelMessage {
    Call {
        request: CallRequest,
    },
    Result {
        request: CallRequest,
        result: CallResult,
    },
}

impl ChannelMessage {
    pub fn call(request: CallRequest) -> Self {
        ChannelMessage::Call { request }
    }

    pub fn result(result: CallResult) -> Self {
        ChannelMessage::Result {
            request: result.request.clone(),
            result,
        }
    }

    pub fn request(&self) -> &CallRequest {
        match self {
            ChannelMessage::Call { request } | ChannelMessage::Result { request, .. } => request,
        }
    }

    /// Structural validation of an incoming value.
    pub fn from_value(value: Value) -> Result<Self, MalformedMessage> {
        let kind = match value.as_object() {
            Some(object) => object.get("kind").and_then(Value::as_str).map(str::to_owned),
            None => return Err(MalformedMessage::NotAnObject),
        };
        match kind.as_deref() {
            Some("call") | Some("result") => Ok(serde_json::from_value(value)?),
            Some(other) => Err(MalformedMessage::UnknownKind(other.to_string())),
            None => Err(MalformedMessage::UnknownKind("<missing>".to_string())),
        }
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// Caller-side description of a call; the id is generated when absent.
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CallConfig {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "present_value")]
    pub params: Option<Value>,
    #[serde(default)]
    pub timeout_millis: Option<u64>,
}

impl CallConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn timeout_millis(mut self, millis: u64) -> Self {
        self.timeout_millis = Some(millis);
        self
    }

    pub fn into_request(self, id: String) -> CallRequest {
        CallRequest {
            id,
            name: self.name,
            params: self.params,
            timeout_millis: self.timeout_millis,
        }
    }
}

/// What `RemoteHandle::call` accepts: a bare method name, a typed config, or
/// an arbitrary JSON value that should look like one of the two.
#[derive(Debug, Clone, PartialEq)]
pub enum CallSpec {
    Name(String),
    Config(CallConfig),
    Raw(Value),
}

impl CallSpec {
    pub fn into_config(self) -> Result<CallConfig, InvalidCallSpec> {
        let config = match self {
            CallSpec::Name(name) => CallConfig::new(name),
            CallSpec::Config(config) => config,
            CallSpec::Raw(Value::String(name)) => CallConfig::new(name),
            CallSpec::Raw(value) => {
                let echo = echo_request(&value);
                if !value.is_object() {
                    return Err(InvalidCallSpec {
                        reason: "expected a method name or a call object".to_string(),
                        request: echo,
                    });
                }
                serde_json::from_value::<CallConfig>(value).map_err(|e| InvalidCallSpec {
                    reason: e.to_string(),
                    request: echo,
                })?
            }
        };

        if config.name.trim().is_empty() {
            return Err(InvalidCallSpec {
                reason: "method name is empty".to_string(),
                request: CallRequest {
                    id: config.id.unwrap_or_default(),
                    name: config.name,
                    params: config.params,
                    timeout_millis: config.timeout_millis,
                },
            });
        }

        Ok(config)
    }
}

fn echo_request(value: &Value) -> CallRequest {
    let field = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    CallRequest {
        id: field("id"),
        name: field("name"),
        params: value.get("params").cloned(),
        timeout_millis: value.get("timeoutMillis").and_then(Value::as_u64),
    }
}

impl From<&str> for CallSpec {
    fn from(name: &str) -> Self {
        CallSpec::Name(name.to_string())
    }
}

impl From<String> for CallSpec {
    fn from(name: String) -> Self {
        CallSpec::Name(name)
    }
}

impl From<CallConfig> for CallSpec {
    fn from(config: CallConfig) -> Self {
        CallSpec::Config(config)
    }
}

impl From<Value> for CallSpec {
    fn from(value: Value) -> Self {
        CallSpec::Raw(value)
    }
}
