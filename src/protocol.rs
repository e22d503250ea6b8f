//! Wire message types for the cmake server protocol.
//!
//! Requests go out as `{"type": "<kind>", ...}` objects; the server answers
//! with `reply`/`error` frames carrying `inReplyTo: "<kind>"`. There is no
//! request id anywhere on the wire, which is why correlation is keyed by
//! [`RequestKind`] with at most one outstanding request per kind.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A protocol version advertised in the hello message and committed to in
/// the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u32,
    #[serde(default)]
    pub minor: u32,
}

/// The unsolicited greeting sent by the server right after connect.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub supported_protocol_versions: Vec<ProtocolVersion>,
}

/// The kinds of request this client issues.
///
/// Doubles as the correlation key for pending replies: the wire string is
/// what the server echoes back in `inReplyTo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Handshake,
    Configure,
    Compute,
    CodeModel,
    Cache,
}

impl RequestKind {
    #[must_use]
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::Configure => "configure",
            Self::Compute => "compute",
            Self::CodeModel => "codemodel",
            Self::Cache => "cache",
        }
    }

    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "handshake" => Some(Self::Handshake),
            "configure" => Some(Self::Configure),
            "compute" => Some(Self::Compute),
            "codemodel" => Some(Self::CodeModel),
            "cache" => Some(Self::Cache),
            _ => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Handshake request body. Commits to one protocol version and declares
/// the source/build directories and generator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub protocol_version: ProtocolVersion,
    pub source_directory: String,
    pub build_directory: String,
    pub generator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_generator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toolset: Option<String>,
}

pub(crate) fn handshake_request(handshake: &Handshake) -> serde_json::Value {
    let mut frame = serde_json::to_value(handshake).unwrap_or_default();
    frame["type"] = serde_json::Value::from(RequestKind::Handshake.as_wire());
    frame
}

pub(crate) fn configure_request(cache_arguments: &[String]) -> serde_json::Value {
    serde_json::json!({
        "type": RequestKind::Configure.as_wire(),
        "cacheArguments": cache_arguments,
    })
}

pub(crate) fn compute_request() -> serde_json::Value {
    serde_json::json!({ "type": RequestKind::Compute.as_wire() })
}

pub(crate) fn codemodel_request() -> serde_json::Value {
    serde_json::json!({ "type": RequestKind::CodeModel.as_wire() })
}

pub(crate) fn cache_request() -> serde_json::Value {
    serde_json::json!({ "type": RequestKind::Cache.as_wire() })
}

/// Target type string for targets that produce no artifact and are
/// excluded from buildable-target listings.
pub const INTERFACE_LIBRARY: &str = "INTERFACE_LIBRARY";

/// One target inside a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub name: String,
    #[serde(rename = "type", default)]
    pub target_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
}

impl Target {
    /// Whether this target can be handed to `cmake --build --target`.
    #[must_use]
    pub fn is_buildable(&self) -> bool {
        self.target_type != INTERFACE_LIBRARY
    }
}

/// One project inside a configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_directory: Option<String>,
    #[serde(default)]
    pub targets: Vec<Target>,
}

/// One configuration (build type) with its projects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,
    #[serde(default)]
    pub projects: Vec<Project>,
}

/// The full server-reported graph, replaced wholesale on every update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeModel {
    #[serde(default)]
    pub configurations: Vec<Configuration>,
}

/// One cache entry from the generated build system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(rename = "type", default)]
    pub entry_type: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CacheReply {
    #[serde(default)]
    cache: Vec<CacheEntry>,
}

/// Progress report streamed during long operations.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    #[serde(default)]
    pub progress_message: String,
    #[serde(default)]
    pub progress_minimum: i64,
    #[serde(default)]
    pub progress_maximum: i64,
    #[serde(default)]
    pub progress_current: i64,
    #[serde(default)]
    pub in_reply_to: Option<String>,
}

/// Human-readable text from the server, destined for a log sink.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayMessage {
    #[serde(default)]
    pub title: Option<String>,
    pub message: String,
}

/// Named unsolicited event, e.g. `dirty` when the build graph goes stale.
#[derive(Debug, Clone, Deserialize)]
pub struct Signal {
    pub name: String,
}

/// A decoded inbound frame, discriminated by its `type` field.
#[derive(Debug)]
pub(crate) enum IncomingFrame {
    Hello(Hello),
    Reply {
        in_reply_to: RequestKind,
        body: serde_json::Value,
    },
    Error {
        in_reply_to: Option<RequestKind>,
        message: String,
    },
    Progress(Progress),
    Message(DisplayMessage),
    Signal(Signal),
}

/// Classify an inbound frame. Returns `None` for frames this client does
/// not understand (unknown `type`, missing fields, replies to kinds we
/// never send).
pub(crate) fn parse_incoming(frame: &serde_json::Value) -> Option<IncomingFrame> {
    let kind = frame.get("type")?.as_str()?;
    match kind {
        "hello" => serde_json::from_value(frame.clone())
            .ok()
            .map(IncomingFrame::Hello),
        "reply" => {
            let in_reply_to = RequestKind::from_wire(frame.get("inReplyTo")?.as_str()?)?;
            Some(IncomingFrame::Reply {
                in_reply_to,
                body: frame.clone(),
            })
        }
        "error" => {
            let in_reply_to = frame
                .get("inReplyTo")
                .and_then(|v| v.as_str())
                .and_then(RequestKind::from_wire);
            let message = frame
                .get("errorMessage")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown server error")
                .to_string();
            Some(IncomingFrame::Error {
                in_reply_to,
                message,
            })
        }
        "progress" => serde_json::from_value(frame.clone())
            .ok()
            .map(IncomingFrame::Progress),
        "message" => serde_json::from_value(frame.clone())
            .ok()
            .map(IncomingFrame::Message),
        "signal" => serde_json::from_value(frame.clone())
            .ok()
            .map(IncomingFrame::Signal),
        _ => None,
    }
}

/// Extract the code model from a `codemodel` reply body.
pub(crate) fn parse_codemodel(body: serde_json::Value) -> Result<CodeModel, serde_json::Error> {
    serde_json::from_value(body)
}

/// Extract the cache entries from a `cache` reply body.
pub(crate) fn parse_cache(body: serde_json::Value) -> Result<Vec<CacheEntry>, serde_json::Error> {
    serde_json::from_value::<CacheReply>(body).map(|reply| reply.cache)
}
