//! Public configuration, event, and diagnostic types.
//!
//! [`ClientConfig`] is validated at the deserialization boundary: the raw
//! struct with optional fields stays private, `TryFrom` resolves it into
//! the invariant-holding form. Existence of a `ClientConfig` is the proof
//! that source directory and generator are usable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::protocol::{Progress, ProtocolVersion};

/// Default build subdirectory under the source tree.
const DEFAULT_BUILD_DIR: &str = "build";

/// Generators whose build systems carry all configurations at once; they
/// take the build type at build time (`--config`) instead of configure
/// time (`-DCMAKE_BUILD_TYPE`).
const MULTI_CONFIG_GENERATOR_PREFIX: &str = "Visual Studio";

/// The stock single-config build types offered besides model-reported ones.
pub(crate) const DEFAULT_BUILD_TYPES: [&str; 4] =
    ["Debug", "Release", "RelWithDebInfo", "MinSizeRel"];

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("source_directory must not be empty")]
    EmptySourceDirectory,
    #[error("generator must not be empty")]
    EmptyGenerator,
}

#[derive(Deserialize)]
struct RawClientConfig {
    source_directory: PathBuf,
    #[serde(default)]
    build_directory: Option<PathBuf>,
    #[serde(default)]
    cmake_command: Option<String>,
    #[serde(default)]
    generator: Option<String>,
    #[serde(default)]
    extra_generator: Option<String>,
    #[serde(default)]
    generator_platform: Option<String>,
    #[serde(default)]
    generator_toolset: Option<String>,
    #[serde(default)]
    cache_entries: BTreeMap<String, String>,
    #[serde(default)]
    configure_env: BTreeMap<String, String>,
    #[serde(default)]
    build_env: BTreeMap<String, String>,
    #[serde(default)]
    extra_build_types: Vec<String>,
    #[serde(default)]
    connect_timeout_secs: Option<u64>,
}

/// Validated client configuration for one source tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawClientConfig")]
pub struct ClientConfig {
    source_directory: PathBuf,
    build_directory: PathBuf,
    cmake_command: String,
    generator: String,
    extra_generator: Option<String>,
    generator_platform: Option<String>,
    generator_toolset: Option<String>,
    cache_entries: BTreeMap<String, String>,
    configure_env: BTreeMap<String, String>,
    build_env: BTreeMap<String, String>,
    extra_build_types: Vec<String>,
    connect_timeout: Duration,
}

impl TryFrom<RawClientConfig> for ClientConfig {
    type Error = ConfigError;

    fn try_from(raw: RawClientConfig) -> Result<Self, Self::Error> {
        if raw.source_directory.as_os_str().is_empty() {
            return Err(ConfigError::EmptySourceDirectory);
        }
        let generator = raw.generator.unwrap_or_else(|| "Ninja".to_string());
        if generator.trim().is_empty() {
            return Err(ConfigError::EmptyGenerator);
        }
        let build_directory = raw
            .build_directory
            .unwrap_or_else(|| raw.source_directory.join(DEFAULT_BUILD_DIR));
        Ok(Self {
            source_directory: raw.source_directory,
            build_directory,
            cmake_command: raw.cmake_command.unwrap_or_else(|| "cmake".to_string()),
            generator,
            extra_generator: raw.extra_generator,
            generator_platform: raw.generator_platform,
            generator_toolset: raw.generator_toolset,
            cache_entries: raw.cache_entries,
            configure_env: raw.configure_env,
            build_env: raw.build_env,
            extra_build_types: raw.extra_build_types,
            connect_timeout: raw
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(crate::transport::DEFAULT_CONNECT_TIMEOUT),
        })
    }
}

impl ClientConfig {
    /// Build a config programmatically with defaults for everything but
    /// the source directory.
    pub fn new(source_directory: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        Self::try_from(RawClientConfig {
            source_directory: source_directory.into(),
            build_directory: None,
            cmake_command: None,
            generator: None,
            extra_generator: None,
            generator_platform: None,
            generator_toolset: None,
            cache_entries: BTreeMap::new(),
            configure_env: BTreeMap::new(),
            build_env: BTreeMap::new(),
            extra_build_types: Vec::new(),
            connect_timeout_secs: None,
        })
    }

    #[must_use]
    pub fn source_directory(&self) -> &Path {
        &self.source_directory
    }

    #[must_use]
    pub fn build_directory(&self) -> &Path {
        &self.build_directory
    }

    #[must_use]
    pub fn cmake_command(&self) -> &str {
        &self.cmake_command
    }

    #[must_use]
    pub fn generator(&self) -> &str {
        &self.generator
    }

    #[must_use]
    pub fn extra_generator(&self) -> Option<&str> {
        self.extra_generator.as_deref()
    }

    #[must_use]
    pub fn generator_platform(&self) -> Option<&str> {
        self.generator_platform.as_deref()
    }

    #[must_use]
    pub fn generator_toolset(&self) -> Option<&str> {
        self.generator_toolset.as_deref()
    }

    /// Cache definitions passed to configure as `-DKEY=VALUE`.
    #[must_use]
    pub fn cache_entries(&self) -> &BTreeMap<String, String> {
        &self.cache_entries
    }

    /// Environment overrides for the server process.
    #[must_use]
    pub fn configure_env(&self) -> &BTreeMap<String, String> {
        &self.configure_env
    }

    /// Environment overrides for build invocations.
    #[must_use]
    pub fn build_env(&self) -> &BTreeMap<String, String> {
        &self.build_env
    }

    /// Additional build types offered besides the stock four.
    #[must_use]
    pub fn extra_build_types(&self) -> &[String] {
        &self.extra_build_types
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Whether the generator produces multi-configuration build systems.
    #[must_use]
    pub fn is_multi_config(&self) -> bool {
        self.generator.starts_with(MULTI_CONFIG_GENERATOR_PREFIX)
    }

    /// Instance name: the source directory's base name. Scopes the channel
    /// address and the persisted selection context.
    #[must_use]
    pub fn instance_name(&self) -> String {
        self.source_directory
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cmake".to_string())
    }
}

/// Severity of a build diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Information,
}

impl DiagnosticSeverity {
    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
        }
    }
}

/// One structured problem extracted from build output.
///
/// Fields are private; construction goes through [`BuildDiagnostic::new`],
/// reads through accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDiagnostic {
    file: PathBuf,
    /// 0-indexed line number.
    line: u32,
    /// 0-indexed column.
    col: u32,
    severity: DiagnosticSeverity,
    message: String,
}

impl BuildDiagnostic {
    #[must_use]
    pub fn new(
        file: PathBuf,
        line: u32,
        col: u32,
        severity: DiagnosticSeverity,
        message: String,
    ) -> Self {
        Self {
            file,
            line,
            col,
            severity,
            message,
        }
    }

    #[must_use]
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// 0-indexed line number.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// 0-indexed column.
    #[must_use]
    pub fn col(&self) -> u32 {
        self.col
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result of a [`crate::CMakeClient::build`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The build subprocess exited zero.
    Success,
    /// The build subprocess exited non-zero.
    Failed,
    /// A build was already in flight; nothing was started.
    Skipped,
}

/// An event emitted by the client toward its embedder.
///
/// The core never renders or logs these itself; status bars, output panels
/// and diagnostics surfaces live on the other side of this channel.
#[derive(Debug)]
pub enum ClientEvent {
    /// Protocol version set the server advertised at connect.
    Connected { versions: Vec<ProtocolVersion> },
    /// Progress report during a long-running server operation.
    Progress(Progress),
    /// Human-readable text from the server, for a log sink.
    ServerMessage {
        title: Option<String>,
        message: String,
    },
    /// Named unsolicited server event (e.g. "dirty").
    Signal { name: String },
    /// One line of build output (stdout or stderr).
    BuildOutput { line: String },
    /// A build subprocess finished; diagnostics collected from matchers.
    BuildFinished {
        success: bool,
        diagnostics: Vec<BuildDiagnostic>,
    },
    /// The project/target/cache model was replaced. Fired exactly once per
    /// successful model update, after all replacements.
    ModelChanged,
    /// The channel to the server closed; the client is stopped.
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: ClientConfig =
            serde_json::from_value(serde_json::json!({ "source_directory": "/src/app" })).unwrap();
        assert_eq!(config.source_directory(), Path::new("/src/app"));
        assert_eq!(config.build_directory(), Path::new("/src/app/build"));
        assert_eq!(config.cmake_command(), "cmake");
        assert_eq!(config.generator(), "Ninja");
        assert!(!config.is_multi_config());
        assert_eq!(config.instance_name(), "app");
    }

    #[test]
    fn test_config_rejects_empty_source() {
        let result: Result<ClientConfig, _> =
            serde_json::from_value(serde_json::json!({ "source_directory": "" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_rejects_blank_generator() {
        let result: Result<ClientConfig, _> = serde_json::from_value(serde_json::json!({
            "source_directory": "/src/app",
            "generator": "  "
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_multi_config_detection() {
        let config: ClientConfig = serde_json::from_value(serde_json::json!({
            "source_directory": "/src/app",
            "generator": "Visual Studio 15 2017"
        }))
        .unwrap();
        assert!(config.is_multi_config());
    }

    #[test]
    fn test_config_full_deserialization() {
        let config: ClientConfig = serde_json::from_value(serde_json::json!({
            "source_directory": "/src/app",
            "build_directory": "/tmp/out",
            "cmake_command": "/opt/cmake/bin/cmake",
            "cache_entries": { "BUILD_TESTING": "ON" },
            "configure_env": { "CC": "clang" },
            "extra_build_types": ["Profile"],
            "connect_timeout_secs": 3
        }))
        .unwrap();
        assert_eq!(config.build_directory(), Path::new("/tmp/out"));
        assert_eq!(config.cache_entries()["BUILD_TESTING"], "ON");
        assert_eq!(config.configure_env()["CC"], "clang");
        assert_eq!(config.extra_build_types(), ["Profile"]);
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_diagnostic_accessors() {
        let diag = BuildDiagnostic::new(
            PathBuf::from("src/main.cpp"),
            10,
            4,
            DiagnosticSeverity::Error,
            "expected ';'".to_string(),
        );
        assert_eq!(diag.file(), Path::new("src/main.cpp"));
        assert_eq!(diag.line(), 10);
        assert!(diag.severity().is_error());
        assert_eq!(diag.severity().label(), "error");
    }
}
