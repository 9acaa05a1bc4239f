use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

/// A request method a rule may bind to.
///
/// `Any` is only meaningful in rule authoring: the route index stores concrete
/// methods and expands `Any` to all nine on insertion and deletion.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Head,
    Options,
    Delete,
    Connect,
    Trace,
    #[serde(rename = "Any")]
    Any,
}

impl Method {
    /// The nine concrete request methods, i.e. everything `Any` stands for.
    pub const ALL: [Method; 9] = [
        Method::Get,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Head,
        Method::Options,
        Method::Delete,
        Method::Connect,
        Method::Trace,
    ];

    /// Maps a request method onto a routable method, ignoring case.
    ///
    /// Methods outside the nine concrete ones are not routable.
    pub fn from_http(method: &http::Method) -> Option<Self> {
        match method.as_str().to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "PATCH" => Some(Method::Patch),
            "HEAD" => Some(Method::Head),
            "OPTIONS" => Some(Method::Options),
            "DELETE" => Some(Method::Delete),
            "CONNECT" => Some(Method::Connect),
            "TRACE" => Some(Method::Trace),
            _ => None,
        }
    }
}

/// Which kind of workload supplies the upstream IP for a rule set.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyPattern {
    Pod,
    Service,
}

/// One reverse-proxy rule: requests with a matching method whose path starts
/// with `agent_url` are forwarded to `proxy_url` on the workload's `port`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Rule {
    pub method: Method,
    pub agent_url: String,
    pub proxy_url: String,
    pub port: u16,
}

/// The rule set carried by a workload's `proxy` annotation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(rename = "ProxyPattern")]
    pub pattern: ProxyPattern,
    #[serde(rename = "Items", default)]
    pub items: Vec<Rule>,
}

/// Why an annotation value failed to decode.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The outer base64 envelope could not be decoded.
    #[error("malformed encoding: {0}")]
    MalformedEncoding(#[from] base64::DecodeError),

    /// The decoded payload does not match the rule set schema.
    #[error("malformed schema: {0}")]
    MalformedSchema(#[from] serde_json::Error),
}

impl RuleSet {
    pub fn new(pattern: ProxyPattern, items: Vec<Rule>) -> Self {
        Self { pattern, items }
    }

    /// Serializes the rule set into its annotation form: a JSON object with
    /// explicit field names, wrapped in standard base64.
    ///
    /// The envelope is shared with other controllers that author these
    /// annotations, so the field spellings are load-bearing.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(BASE64.encode(serde_json::to_vec(self)?))
    }

    /// Reverses [`RuleSet::encode`].
    pub fn decode(value: &str) -> Result<Self, DecodeError> {
        let payload = BASE64.decode(value)?;
        Ok(serde_json::from_slice(&payload)?)
    }
}
