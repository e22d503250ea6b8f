//! Client facade: one cmake server, one operation state machine.
//!
//! All operations run through `&mut self`, so their synchronous sections
//! never overlap; the configure/generate gate additionally serializes
//! those two requests across await points. The embedder drives the client
//! and consumes [`ClientEvent`]s from the channel handed out at
//! construction.

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};

use crate::connection::Connection;
use crate::error::{ClientError, Result};
use crate::fsutil;
use crate::matchers::{GccMatcher, ProblemMatcher};
use crate::model::{ContextStore, ProjectModel};
use crate::process::ServerProcess;
use crate::protocol::{self, Handshake, ProtocolVersion, RequestKind};
use crate::state::{ClientState, StateCell};
use crate::transport;
use crate::types::{BuildOutcome, ClientConfig, ClientEvent, DEFAULT_BUILD_TYPES};

/// Capacity of the event channel toward the embedder.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Client for one cmake source tree, driving one server instance.
pub struct CMakeClient {
    config: ClientConfig,
    instance: String,
    state: StateCell,
    /// Serializes configure/generate request sections. Build and model
    /// fetches run outside this gate; the per-kind pending table turns
    /// any resulting collision into a typed error.
    op_gate: Arc<Mutex<()>>,
    connection: Option<Connection>,
    process: Option<ServerProcess>,
    model: ProjectModel,
    store: Arc<dyn ContextStore>,
    matchers: Vec<Box<dyn ProblemMatcher>>,
    event_tx: mpsc::Sender<ClientEvent>,
    supported_versions: Vec<ProtocolVersion>,
    protocol_version: Option<ProtocolVersion>,
}

impl CMakeClient {
    /// Create a client and the event stream it reports on.
    ///
    /// The selection context is loaded from `store` under the instance
    /// name (the source directory's base name) and rewritten on every
    /// selection change. A stock GCC-style problem matcher is installed;
    /// more can be added with [`CMakeClient::add_matcher`].
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn ContextStore>,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let instance = config.instance_name();
        let context = store.load(&instance).unwrap_or_default();
        let matchers: Vec<Box<dyn ProblemMatcher>> =
            vec![Box::new(GccMatcher::new(config.build_directory()))];

        let client = Self {
            config,
            instance,
            state: StateCell::new(),
            op_gate: Arc::new(Mutex::new(())),
            connection: None,
            process: None,
            model: ProjectModel::with_context(context),
            store,
            matchers,
            event_tx,
            supported_versions: Vec::new(),
            protocol_version: None,
        };
        (client, event_rx)
    }

    /// Install an additional problem matcher for build output.
    pub fn add_matcher(&mut self, matcher: Box<dyn ProblemMatcher>) {
        self.matchers.push(matcher);
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state.get()
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The reconciled project/target/cache model.
    #[must_use]
    pub fn model(&self) -> &ProjectModel {
        &self.model
    }

    /// Protocol versions the server advertised, empty before connect.
    #[must_use]
    pub fn supported_versions(&self) -> &[ProtocolVersion] {
        &self.supported_versions
    }

    /// The version committed to during the handshake.
    #[must_use]
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.protocol_version
    }

    /// Spawn the server, connect, and complete the handshake.
    ///
    /// Already running is fine (no-op). Spawn or connect failure tears
    /// everything down and rejects; nothing retries automatically.
    pub async fn start(&mut self) -> Result<()> {
        if self.state.get() >= ClientState::Running {
            return Ok(());
        }

        let address = transport::channel_address(&self.instance);
        self.process = Some(ServerProcess::spawn(&self.config, &address)?);

        let result = match transport::connect(&address, self.config.connect_timeout()).await {
            Ok(stream) => self.establish(stream).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            self.teardown().await;
            return Err(err);
        }
        Ok(())
    }

    /// Connect over an already-established channel, for servers launched
    /// by someone else. Performs the same hello/handshake sequence as
    /// [`CMakeClient::start`] but supervises no subprocess.
    pub async fn attach<S>(&mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.state.get() >= ClientState::Running {
            return Ok(());
        }
        let result = self.establish(stream).await;
        if let Err(err) = result {
            self.teardown().await;
            return Err(err);
        }
        Ok(())
    }

    async fn establish<S>(&mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut connection, hello_rx) =
            Connection::new(stream, self.state.clone(), self.event_tx.clone());
        self.state.set(ClientState::Connected);

        let hello = hello_rx.await.map_err(|_| ClientError::ChannelClosed)?;
        let version = *hello
            .supported_protocol_versions
            .first()
            .ok_or_else(|| ClientError::Protocol("server advertised no versions".to_string()))?;

        let handshake = Handshake {
            protocol_version: version,
            source_directory: self.config.source_directory().display().to_string(),
            build_directory: self.config.build_directory().display().to_string(),
            generator: self.config.generator().to_string(),
            extra_generator: self.config.extra_generator().map(str::to_string),
            platform: self.config.generator_platform().map(str::to_string),
            toolset: self.config.generator_toolset().map(str::to_string),
        };
        connection
            .request(
                RequestKind::Handshake,
                protocol::handshake_request(&handshake),
            )
            .await?;

        self.connection = Some(connection);
        self.supported_versions = hello.supported_protocol_versions;
        self.protocol_version = Some(version);
        self.state.set(ClientState::Running);
        tracing::info!(
            instance = %self.instance,
            major = version.major,
            minor = version.minor,
            "cmake server handshake complete"
        );
        Ok(())
    }

    /// Shut the session down: close the channel, kill the server, wait
    /// for it, clean up the channel resource. Idempotent.
    pub async fn stop(&mut self) {
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        self.connection = None;
        if let Some(process) = self.process.take() {
            process.stop().await;
        }
        self.state.set(ClientState::Stopped);
    }

    /// Fail fast when no operation may contact the server: a build is in
    /// progress, or the session is not up. No server request is issued.
    fn check_ready(&self) -> Result<()> {
        let state = self.state.get();
        if state == ClientState::Building {
            return Err(ClientError::BuildInProgress);
        }
        if state < ClientState::Running {
            return Err(ClientError::NotConnected);
        }
        Ok(())
    }

    fn session(&mut self) -> Result<&mut Connection> {
        self.connection.as_mut().ok_or(ClientError::NotConnected)
    }

    fn cache_arguments(&self) -> Vec<String> {
        let mut args: Vec<String> = self
            .config
            .cache_entries()
            .iter()
            .map(|(key, value)| format!("-D{key}={value}"))
            .collect();
        // Multi-config build systems take the build type at build time
        // instead.
        if !self.config.is_multi_config() && !self.model.build_type().is_empty() {
            args.push(format!("-DCMAKE_BUILD_TYPE={}", self.model.build_type()));
        }
        args
    }

    /// Run the configure step on the server.
    pub async fn configure(&mut self) -> Result<()> {
        self.check_ready()?;
        let gate = self.op_gate.clone();
        let _guard = gate.lock().await;

        let args = self.cache_arguments();
        self.state.set(ClientState::Running);
        let frame = protocol::configure_request(&args);
        self.session()?.request(RequestKind::Configure, frame).await?;
        self.state.set(ClientState::Configured);
        Ok(())
    }

    /// Generate the build system, configuring first when that has not
    /// happened yet.
    pub async fn generate(&mut self) -> Result<()> {
        self.check_ready()?;
        if self.state.get() == ClientState::Running {
            self.configure().await?;
        }
        let gate = self.op_gate.clone();
        let _guard = gate.lock().await;

        self.state.set(ClientState::Configured);
        self.session()?
            .request(RequestKind::Compute, protocol::compute_request())
            .await?;
        self.state.set(ClientState::Generated);
        Ok(())
    }

    /// Fetch the code model and cache from the server and reconcile them
    /// against the current selection.
    ///
    /// Fires exactly one [`ClientEvent::ModelChanged`] after projects,
    /// targets and cache have all been replaced; observers never see a
    /// partial view.
    pub async fn update_model(&mut self) -> Result<()> {
        self.check_ready()?;
        if self.state.get() < ClientState::Generated {
            return Err(ClientError::NotGenerated);
        }

        let body = self
            .session()?
            .request(RequestKind::CodeModel, protocol::codemodel_request())
            .await?;
        let code_model = protocol::parse_codemodel(body)?;

        let body = self
            .session()?
            .request(RequestKind::Cache, protocol::cache_request())
            .await?;
        let cache = protocol::parse_cache(body)?;

        self.model.apply(code_model, cache);
        self.persist_context();
        let _ = self.event_tx.send(ClientEvent::ModelChanged).await;
        Ok(())
    }

    /// Run `cmake --build`, streaming output lines as events and through
    /// the problem matchers.
    ///
    /// Requires a generated build system. While a build is already in
    /// flight this is a no-op returning [`BuildOutcome::Skipped`]; at most
    /// one build subprocess runs per client. Every exit path, including a
    /// failed build, lands back in `Generated`.
    pub async fn build(&mut self, target: Option<&str>) -> Result<BuildOutcome> {
        let state = self.state.get();
        if state < ClientState::Generated {
            return Err(ClientError::NotGenerated);
        }
        if state == ClientState::Building {
            tracing::debug!("build already in progress, skipping");
            return Ok(BuildOutcome::Skipped);
        }

        let resolved = which::which(self.config.cmake_command())?;
        let mut cmd = Command::new(resolved);
        cmd.arg("--build").arg(self.config.build_directory());
        if let Some(target) = target {
            cmd.args(["--target", target]);
        }
        if self.config.is_multi_config() {
            cmd.args(["--config", self.model.build_type()]);
        }
        cmd.envs(self.config.build_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for matcher in &mut self.matchers {
            matcher.clear();
        }

        let mut child = cmd.spawn().map_err(ClientError::Spawn)?;
        self.state.set(ClientState::Building);

        let result = self.pump_build_output(&mut child).await;
        self.state.set(ClientState::Generated);

        let diagnostics = self
            .matchers
            .iter()
            .flat_map(|matcher| matcher.diagnostics())
            .collect();
        let status = match result {
            Ok(status) => status,
            Err(err) => {
                let _ = self
                    .event_tx
                    .send(ClientEvent::BuildFinished {
                        success: false,
                        diagnostics,
                    })
                    .await;
                return Err(err);
            }
        };

        let success = status.success();
        let _ = self
            .event_tx
            .send(ClientEvent::BuildFinished {
                success,
                diagnostics,
            })
            .await;
        Ok(if success {
            BuildOutcome::Success
        } else {
            BuildOutcome::Failed
        })
    }

    /// Forward every stdout/stderr line to the matchers and the event
    /// channel, then reap the child.
    async fn pump_build_output(&mut self, child: &mut Child) -> Result<std::process::ExitStatus> {
        let (line_tx, mut line_rx) = mpsc::channel::<String>(64);

        if let Some(stdout) = child.stdout.take() {
            let tx = line_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = line_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(line_tx);

        while let Some(line) = line_rx.recv().await {
            for matcher in &mut self.matchers {
                matcher.match_line(&line);
            }
            let _ = self.event_tx.send(ClientEvent::BuildOutput { line }).await;
        }

        Ok(child.wait().await?)
    }

    /// Re-run configure, generate and the model update, e.g. after a
    /// `dirty` signal. Only acts when the state is exactly `Generated`;
    /// anything else (configuring, building, stopped) is a silent no-op
    /// so the chain cannot compound an in-flight operation.
    pub async fn refresh(&mut self) -> Result<()> {
        if self.state.get() != ClientState::Generated {
            return Ok(());
        }
        self.configure().await?;
        self.generate().await?;
        self.update_model().await
    }

    /// Delete the build directory. Drops the state back to `Running`
    /// first, since generated artifacts are gone afterwards.
    pub async fn remove_build_directory(&mut self) -> Result<()> {
        if self.state.get() > ClientState::Running {
            self.state.set(ClientState::Running);
        }
        fsutil::remove_dir_recursive(self.config.build_directory()).await
    }

    /// Build types to offer: the model's configuration names for
    /// multi-config generators, else the stock four plus configured
    /// extras. Empty before the first model update.
    #[must_use]
    pub fn build_types(&self) -> Vec<String> {
        if self.model.configurations().is_empty() {
            return Vec::new();
        }
        if self.config.is_multi_config() {
            return self
                .model
                .configurations()
                .iter()
                .map(|configuration| configuration.name.clone())
                .collect();
        }
        let mut types: Vec<String> = Vec::new();
        for build_type in DEFAULT_BUILD_TYPES
            .iter()
            .map(|s| (*s).to_string())
            .chain(self.config.extra_build_types().iter().cloned())
        {
            if !types.contains(&build_type) {
                types.push(build_type);
            }
        }
        types
    }

    /// Select a project by name; unknown names leave the selection alone.
    pub fn set_project(&mut self, name: &str) {
        if self.model.set_project(name) {
            self.persist_context();
        }
    }

    /// Select a target by name; its owning project comes along. Unknown
    /// names leave the selection alone.
    pub fn set_target(&mut self, name: &str) {
        if self.model.set_target(name) {
            self.persist_context();
        }
    }

    /// Set the build type used for the next configure/build.
    pub fn set_build_type(&mut self, build_type: &str) {
        self.model.set_build_type(build_type);
        self.persist_context();
    }

    fn persist_context(&self) {
        self.store.save(&self.instance, self.model.context());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryContextStore;
    use crate::model::SelectionContext;

    fn test_client() -> (CMakeClient, mpsc::Receiver<ClientEvent>) {
        let config = ClientConfig::new("/src/app").unwrap();
        CMakeClient::new(config, Arc::new(MemoryContextStore::new()))
    }

    #[tokio::test]
    async fn test_operations_fail_fast_when_stopped() {
        let (mut client, _events) = test_client();
        assert_eq!(client.state(), ClientState::Stopped);

        assert!(matches!(
            client.configure().await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            client.generate().await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            client.update_model().await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            client.build(None).await,
            Err(ClientError::NotGenerated)
        ));
    }

    #[tokio::test]
    async fn test_operations_fail_fast_while_building() {
        let (mut client, _events) = test_client();
        client.state.set(ClientState::Building);

        assert!(matches!(
            client.configure().await,
            Err(ClientError::BuildInProgress)
        ));
        assert!(matches!(
            client.generate().await,
            Err(ClientError::BuildInProgress)
        ));
        assert!(matches!(
            client.update_model().await,
            Err(ClientError::BuildInProgress)
        ));
    }

    #[tokio::test]
    async fn test_build_while_building_is_noop() {
        let (mut client, _events) = test_client();
        client.state.set(ClientState::Building);

        let outcome = client.build(Some("app")).await.unwrap();
        assert_eq!(outcome, BuildOutcome::Skipped);
        assert_eq!(client.state(), ClientState::Building);
    }

    #[tokio::test]
    async fn test_build_requires_generated() {
        let (mut client, _events) = test_client();
        client.state.set(ClientState::Configured);

        assert!(matches!(
            client.build(None).await,
            Err(ClientError::NotGenerated)
        ));
    }

    #[tokio::test]
    async fn test_build_spawn_failure_stays_generated() {
        let config: ClientConfig = serde_json::from_value(serde_json::json!({
            "source_directory": "/src/app",
            "cmake_command": "no-such-cmake-binary-anywhere"
        }))
        .unwrap();
        let (mut client, _events) = CMakeClient::new(config, Arc::new(MemoryContextStore::new()));
        client.state.set(ClientState::Generated);

        assert!(matches!(
            client.build(None).await,
            Err(ClientError::CmakeNotFound(_))
        ));
        assert_eq!(client.state(), ClientState::Generated);
    }

    #[tokio::test]
    async fn test_update_model_requires_generated() {
        let (mut client, _events) = test_client();
        client.state.set(ClientState::Configured);

        assert!(matches!(
            client.update_model().await,
            Err(ClientError::NotGenerated)
        ));
    }

    #[tokio::test]
    async fn test_refresh_outside_generated_is_noop() {
        let (mut client, _events) = test_client();
        client.state.set(ClientState::Configured);
        client.refresh().await.unwrap();
        assert_eq!(client.state(), ClientState::Configured);
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let (mut client, _events) = test_client();
        client.stop().await;
        assert_eq!(client.state(), ClientState::Stopped);
    }

    #[test]
    fn test_build_types_empty_before_model() {
        let (client, _events) = test_client();
        assert!(client.build_types().is_empty());
    }

    #[test]
    fn test_cache_arguments_include_build_type_for_single_config() {
        let config: ClientConfig = serde_json::from_value(serde_json::json!({
            "source_directory": "/src/app",
            "cache_entries": { "BUILD_TESTING": "ON" }
        }))
        .unwrap();
        let (client, _events) = CMakeClient::new(config, Arc::new(MemoryContextStore::new()));

        let args = client.cache_arguments();
        assert_eq!(
            args,
            ["-DBUILD_TESTING=ON", "-DCMAKE_BUILD_TYPE=Debug"]
        );
    }

    #[test]
    fn test_cache_arguments_skip_build_type_for_multi_config() {
        let config: ClientConfig = serde_json::from_value(serde_json::json!({
            "source_directory": "/src/app",
            "generator": "Visual Studio 15 2017"
        }))
        .unwrap();
        let (client, _events) = CMakeClient::new(config, Arc::new(MemoryContextStore::new()));

        assert!(client.cache_arguments().is_empty());
    }

    #[test]
    fn test_context_loaded_from_store_at_construction() {
        let store = Arc::new(MemoryContextStore::new());
        store.save(
            "app",
            &SelectionContext {
                current_build_type: "Release".to_string(),
                ..Default::default()
            },
        );

        let config = ClientConfig::new("/src/app").unwrap();
        let (client, _events) = CMakeClient::new(config, store);
        assert_eq!(client.model().build_type(), "Release");
    }

    #[test]
    fn test_selection_changes_persist() {
        let store = Arc::new(MemoryContextStore::new());
        let config = ClientConfig::new("/src/app").unwrap();
        let (mut client, _events) = CMakeClient::new(config, store.clone());

        client.set_build_type("MinSizeRel");
        assert_eq!(
            store.load("app").unwrap().current_build_type,
            "MinSizeRel"
        );
    }
}
