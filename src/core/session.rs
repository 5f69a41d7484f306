//! Dock session
//!
//! A session owns one transport and runs the dock lifecycle in its own task:
//! open the link, request the identity, enumerate modules once identified,
//! track the eight module slots and reconnect after faults. Everything the
//! session observes is reported in order on a single [`DockEvent`] channel.
//!
//! Callers talk to the task through a cloneable [`SessionHandle`]. State and
//! module slots are published as a snapshot so reads never wait on the task.

use crate::core::codec::{
    decode_line, CommandCode, CommandRecord, DockCommand, DockLineCodec, InfoRecord, Record,
    DEFAULT_MAX_LINE_LENGTH,
};
use crate::core::error::DockError;
use crate::core::identity::DockIdentity;
use crate::core::module::{
    first_of_type, Matrix, ModuleReading, ModuleSink, ModuleType, Motor, NumberDisplay, Rainbow, SLOT_COUNT,
};
use crate::core::state_machine::{DisconnectReason, DockState, DockStateMachine, LinkStatus};
use crate::core::transport::{LineTransport, TransportError, TransportEvent};
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error, info, warn};

/// Session timing and framing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long the dock has to report all identity fields
    pub identify_timeout: Duration,
    /// Delay before reopening a faulted link
    pub reconnect_delay: Duration,
    /// How long an unused session stays open
    pub release_grace: Duration,
    /// Longest accepted line
    pub max_line_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            identify_timeout: Duration::from_secs(4),
            reconnect_delay: Duration::from_secs(5),
            release_grace: Duration::from_secs(3),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

/// Session events
#[derive(Debug, Clone, PartialEq)]
pub enum DockEvent {
    /// The dock identified itself
    Opened(DockIdentity),
    /// A module reported a new reading
    Updated(ModuleReading),
    /// A module was attached
    Found(ModuleReading),
    /// A module was detached
    Lost(ModuleReading),
    /// Informational text from the dock
    Info(String),
    /// A failure the caller should know about
    Error(DockError),
    /// Coarse link status changed
    Status(LinkStatus),
    /// The session has ended; no further events follow
    Closed,
}

impl DockEvent {
    /// Channel the event concerns, for module events
    pub fn channel(&self) -> Option<u8> {
        match self {
            Self::Updated(reading) | Self::Found(reading) | Self::Lost(reading) => Some(reading.channel),
            _ => None,
        }
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Lifecycle state
    pub state: DockState,
    /// Identity gathered so far
    pub identity: DockIdentity,
    /// Module slots, index 0 is channel 1
    pub modules: [Option<ModuleReading>; SLOT_COUNT],
    /// Most recent failure
    pub last_error: Option<DockError>,
    /// The session task has ended
    pub closed: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: DockState::Disconnected,
            identity: DockIdentity::default(),
            modules: std::array::from_fn(|_| None),
            last_error: None,
            closed: false,
        }
    }
}

/// Internal commands for session control
#[derive(Debug)]
enum SessionCommand {
    Write(DockCommand),
    Retain,
    Release,
    Shutdown,
}

/// Handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    key: Arc<str>,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionHandle {
    /// Transport key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current state
    pub fn state(&self) -> DockState {
        self.snapshot.borrow().state
    }

    /// Whether the dock is identified
    pub fn is_ready(&self) -> bool {
        self.state() == DockState::Ready
    }

    /// Whether the session task has ended
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed() || self.snapshot.borrow().closed
    }

    /// Identity gathered so far
    pub fn identity(&self) -> DockIdentity {
        self.snapshot.borrow().identity.clone()
    }

    /// Most recent failure
    pub fn last_error(&self) -> Option<DockError> {
        self.snapshot.borrow().last_error.clone()
    }

    /// Copy of the full snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Copy of all module slots
    pub fn modules(&self) -> [Option<ModuleReading>; SLOT_COUNT] {
        self.snapshot.borrow().modules.clone()
    }

    /// Module on `channel` (1-indexed)
    pub fn module(&self, channel: u8) -> Option<ModuleReading> {
        let index = usize::from(channel).checked_sub(1)?;
        self.snapshot.borrow().modules.get(index).cloned().flatten()
    }

    /// First module of `module_type`, in channel order
    pub fn first_of_type(&self, module_type: &ModuleType) -> Option<ModuleReading> {
        first_of_type(&self.snapshot.borrow().modules, module_type).cloned()
    }

    /// Send free text to the dock
    pub fn send(&self, raw: &str) -> Result<(), DockError> {
        self.ensure_ready()?;
        self.command(SessionCommand::Write(DockCommand::Raw(raw.to_string())))
    }

    /// Push output values to a channel
    pub fn update_module(&self, channel: u8, values: &[i32]) -> Result<(), DockError> {
        if !(1..=SLOT_COUNT).contains(&usize::from(channel)) {
            return Err(DockError::InvalidChannel(u32::from(channel)));
        }
        self.ensure_ready()?;
        self.command(SessionCommand::Write(DockCommand::Update {
            channel,
            values: values.to_vec(),
        }))
    }

    /// Motor generator bound to `channel`
    pub fn motor(&self, channel: u8) -> Motor<SessionHandle> {
        Motor::new(self.clone(), channel)
    }

    /// Number display generator bound to `channel`
    pub fn number(&self, channel: u8) -> NumberDisplay<SessionHandle> {
        NumberDisplay::new(self.clone(), channel)
    }

    /// Matrix generator bound to `channel`
    pub fn matrix(&self, channel: u8) -> Matrix<SessionHandle> {
        Matrix::new(self.clone(), channel)
    }

    /// Rainbow generator bound to `channel`
    pub fn rainbow(&self, channel: u8) -> Rainbow<SessionHandle> {
        Rainbow::new(self.clone(), channel)
    }

    /// Whether both handles drive the same session task
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        self.cmd_tx.same_channel(&other.cmd_tx)
    }

    /// Cancel a pending release
    pub fn retain(&self) {
        let _ = self.command(SessionCommand::Retain);
    }

    /// Close the session once the grace period passes without a `retain`
    pub fn release(&self) {
        let _ = self.command(SessionCommand::Release);
    }

    /// Close the session now, cancelling any pending reconnect
    pub fn shutdown(&self) {
        let _ = self.command(SessionCommand::Shutdown);
    }

    /// Wait until the dock is identified.
    ///
    /// Fails with the error that ended the session if it closes first.
    pub async fn wait_ready(&self) -> Result<(), DockError> {
        let mut rx = self.snapshot.clone();
        let outcome = match rx.wait_for(|s| s.state == DockState::Ready || s.closed).await {
            Ok(snapshot) if snapshot.state == DockState::Ready => Ok(()),
            Ok(snapshot) => Err(snapshot.last_error.clone().unwrap_or(DockError::SessionClosed)),
            Err(_) => Err(DockError::SessionClosed),
        };
        outcome
    }

    /// Wait until the session task has ended
    pub async fn closed(&self) {
        let mut rx = self.snapshot.clone();
        let _ = rx.wait_for(|s| s.closed).await;
    }

    fn ensure_ready(&self) -> Result<(), DockError> {
        let snapshot = self.snapshot.borrow();
        if snapshot.closed {
            Err(DockError::SessionClosed)
        } else if snapshot.state == DockState::Ready {
            Ok(())
        } else {
            Err(DockError::NotIdentified)
        }
    }

    fn command(&self, command: SessionCommand) -> Result<(), DockError> {
        self.cmd_tx.send(command).map_err(|_| DockError::SessionClosed)
    }
}

impl ModuleSink for SessionHandle {
    fn update_module(&self, channel: u8, values: &[i32]) -> Result<(), DockError> {
        SessionHandle::update_module(self, channel, values)
    }
}

/// Dock session spawner
pub struct Session;

impl Session {
    /// Start a session task driving `transport`.
    ///
    /// The link is opened right away. Events arrive on the returned receiver
    /// in the order the session observed them, ending with [`DockEvent::Closed`].
    pub fn spawn(
        key: &str,
        transport: Box<dyn LineTransport>,
        config: SessionConfig,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<DockEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let task = SessionTask {
            key: key.to_string(),
            codec: DockLineCodec::with_max_length(config.max_line_length),
            transport,
            config,
            machine: DockStateMachine::new(),
            buffer: BytesMut::new(),
            identity: DockIdentity::default(),
            slots: std::array::from_fn(|_| None),
            last_error: None,
            last_status: None,
            events: event_tx,
            snapshot: snapshot_tx,
            cmd_rx,
            identify_deadline: None,
            reconnect_at: None,
            release_at: None,
            finished: false,
        };
        tokio::spawn(task.run());

        let handle = SessionHandle {
            key: Arc::from(key),
            cmd_tx,
            snapshot: snapshot_rx,
        };
        (handle, event_rx)
    }
}

struct SessionTask {
    key: String,
    transport: Box<dyn LineTransport>,
    config: SessionConfig,
    machine: DockStateMachine,
    codec: DockLineCodec,
    buffer: BytesMut,
    identity: DockIdentity,
    slots: [Option<ModuleReading>; SLOT_COUNT],
    last_error: Option<DockError>,
    last_status: Option<LinkStatus>,
    events: mpsc::UnboundedSender<DockEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    identify_deadline: Option<Instant>,
    reconnect_at: Option<Instant>,
    release_at: Option<Instant>,
    finished: bool,
}

impl SessionTask {
    async fn run(mut self) {
        info!(key = %self.key, transport = %self.transport.connection_info(), "session started");
        self.connect().await;

        while !self.finished {
            // Disabled branches still build their futures, so give them a deadline
            let identify = sleep_until(self.identify_deadline.unwrap_or_else(Instant::now));
            let reconnect = sleep_until(self.reconnect_at.unwrap_or_else(Instant::now));
            let release = sleep_until(self.release_at.unwrap_or_else(Instant::now));
            let link_open = self.machine.state().is_link_open();

            tokio::select! {
                command = self.cmd_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => self.teardown(DisconnectReason::Shutdown).await,
                },
                event = self.transport.next_event(), if link_open => {
                    self.handle_transport_event(event).await;
                }
                () = identify, if self.identify_deadline.is_some() => {
                    self.on_identify_timeout().await;
                }
                () = reconnect, if self.reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    self.connect().await;
                }
                () = release, if self.release_at.is_some() => {
                    self.release_at = None;
                    info!(key = %self.key, "no subscribers left, closing session");
                    self.teardown(DisconnectReason::Released).await;
                }
            }
        }

        self.emit(DockEvent::Closed);
        info!(key = %self.key, "session closed");
    }

    async fn connect(&mut self) {
        self.set_state(DockState::Connecting, Some("opening transport"));

        match self.transport.open().await {
            Ok(()) => {
                self.buffer.clear();
                self.codec = DockLineCodec::with_max_length(self.config.max_line_length);
                self.set_state(DockState::AwaitingIdentity, Some("transport open"));
                self.identify_deadline = Some(Instant::now() + self.config.identify_timeout);
                if let Err(e) = self.write(DockCommand::RequestVersion).await {
                    self.on_fault(e.to_string(), false).await;
                }
            }
            Err(e) => {
                let reason = e.to_string();
                self.set_state(DockState::Disconnected, Some(&reason));
                self.emit_status();
                self.machine.set_disconnect_reason(DisconnectReason::OpenFailed(reason));
                self.fail_or_retry(DockError::unavailable(&self.key, &e), false);
            }
        }
    }

    /// Schedule another attempt if the dock was ever ready, otherwise end the session.
    fn fail_or_retry(&mut self, error: DockError, report_on_retry: bool) {
        if self.machine.was_ready() {
            warn!(key = %self.key, attempt = self.machine.reconnect_attempt() + 1, "{}, retrying", error);
            if report_on_retry {
                self.emit(DockEvent::Error(error.clone()));
            }
            self.last_error = Some(error);
            self.schedule_reconnect();
        } else {
            error!(key = %self.key, "{}", error);
            self.last_error = Some(error.clone());
            self.emit(DockEvent::Error(error));
            self.finish();
        }
    }

    fn schedule_reconnect(&mut self) {
        self.set_state(DockState::Reconnecting, Some("backing off"));
        self.emit_status();
        self.reconnect_at = Some(Instant::now() + self.config.reconnect_delay);
    }

    async fn on_identify_timeout(&mut self) {
        self.identify_deadline = None;
        let error = DockError::IdentityTimeout {
            key: self.key.clone(),
            timeout_ms: u64::try_from(self.config.identify_timeout.as_millis()).unwrap_or(u64::MAX),
        };

        if let Err(e) = self.transport.close().await {
            debug!(key = %self.key, "close after identity timeout failed: {}", e);
        }
        self.clear_link_state();
        self.machine.set_disconnect_reason(DisconnectReason::IdentityTimeout);
        self.set_state(DockState::Disconnected, Some("identity timeout"));
        self.emit_status();
        self.fail_or_retry(error, true);
    }

    async fn on_fault(&mut self, message: String, request_stop: bool) {
        warn!(key = %self.key, "transport fault: {}", message);
        self.identify_deadline = None;

        if request_stop && self.transport.supports_stop() {
            let _ = self.write(DockCommand::Stop).await;
        }
        if let Err(e) = self.transport.close().await {
            debug!(key = %self.key, "close after fault failed: {}", e);
        }

        self.clear_link_state();
        self.machine
            .set_disconnect_reason(DisconnectReason::TransportFault(message.clone()));
        self.set_state(DockState::Disconnected, Some(&message));
        self.emit_status();
        self.fail_or_retry(DockError::TransportFault(message), false);
    }

    async fn teardown(&mut self, reason: DisconnectReason) {
        self.identify_deadline = None;
        self.reconnect_at = None;
        self.release_at = None;

        if self.machine.state().is_link_open() {
            self.set_state(DockState::Disconnecting, Some("closing"));
            if self.transport.supports_stop() {
                if let Err(e) = self.write(DockCommand::Stop).await {
                    debug!(key = %self.key, "stop command failed: {}", e);
                }
            }
            if let Err(e) = self.transport.close().await {
                warn!(key = %self.key, "failed to close transport: {}", e);
            }
        }

        self.clear_link_state();
        self.machine.set_disconnect_reason(reason);
        self.set_state(DockState::Disconnected, Some("closed"));
        self.emit_status();
        self.finish();
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Write(command) => {
                if !self.machine.state().can_send() {
                    warn!(key = %self.key, ?command, "dock not identified, dropping command");
                    return;
                }
                if let Err(e) = self.write(command).await {
                    self.on_fault(e.to_string(), false).await;
                }
            }
            SessionCommand::Retain => {
                if self.release_at.take().is_some() {
                    debug!(key = %self.key, "release cancelled");
                }
            }
            SessionCommand::Release => {
                if self.release_at.is_none() {
                    debug!(key = %self.key, grace = ?self.config.release_grace, "release armed");
                    self.release_at = Some(Instant::now() + self.config.release_grace);
                }
            }
            SessionCommand::Shutdown => self.teardown(DisconnectReason::Shutdown).await,
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Data(data) => {
                self.buffer.extend_from_slice(&data);
                self.drain_lines(false).await;
            }
            TransportEvent::Error(message) => self.on_fault(message, true).await,
            TransportEvent::Closed => {
                self.drain_lines(true).await;
                if self.machine.state().is_link_open() {
                    self.on_fault("link closed".to_string(), false).await;
                }
            }
        }
    }

    /// Dispatch every complete line in the buffer, in arrival order.
    async fn drain_lines(&mut self, eof: bool) {
        while self.machine.state().is_link_open() {
            let decoded = if eof {
                self.codec.decode_eof(&mut self.buffer)
            } else {
                self.codec.decode(&mut self.buffer)
            };
            match decoded {
                Ok(Some(line)) => self.handle_line(&line).await,
                Ok(None) => break,
                Err(e) => warn!(key = %self.key, "discarding input: {}", e),
            }
        }
    }

    async fn handle_line(&mut self, line: &str) {
        debug!(key = %self.key, line, "rx");
        match decode_line(line) {
            None => {}
            Some(Record::Info(info)) => self.handle_info(info).await,
            Some(Record::Command(record)) => {
                if self.machine.state() == DockState::Ready {
                    self.handle_record(record);
                } else {
                    debug!(key = %self.key, line, "dropping module record before identification");
                }
            }
        }
    }

    async fn handle_info(&mut self, info: InfoRecord) {
        match info {
            InfoRecord::Message(text) => self.emit(DockEvent::Info(text)),
            field if self.machine.state() == DockState::AwaitingIdentity => {
                self.identity.apply(&field);
                self.publish();
                if self.identity.is_identified() {
                    self.on_identified().await;
                }
            }
            field => {
                debug!(key = %self.key, ?field, "identity already known, forwarding as info");
                self.emit(DockEvent::Info(describe_field(&field)));
            }
        }
    }

    async fn on_identified(&mut self) {
        self.identify_deadline = None;
        self.set_state(DockState::Ready, Some("identified"));
        info!(key = %self.key, dock = %self.identity, "dock identified");

        if let Err(e) = self.write(DockCommand::Enumerate).await {
            self.on_fault(e.to_string(), false).await;
            return;
        }
        self.emit(DockEvent::Opened(self.identity.clone()));
        self.emit_status();
    }

    fn handle_record(&mut self, record: CommandRecord) {
        let Some(index) = record.slot_index() else {
            warn!(key = %self.key, channel = ?record.channel, module = %record.module, "dropping record with invalid channel");
            return;
        };

        match record.code {
            CommandCode::Update => {
                let Some(reading) = ModuleReading::from_record(&record) else {
                    warn!(key = %self.key, module = %record.module, args = ?record.args, "dropping short update");
                    return;
                };
                self.slots[index] = Some(reading.clone());
                self.publish();
                self.emit(DockEvent::Updated(reading));
            }
            // Attach and detach keep the module name even when its fields are
            // short, unlike updates which carry nothing useful without them
            CommandCode::Connected => {
                let Some(reading) =
                    ModuleReading::from_record(&record).or_else(|| ModuleReading::raw_from_record(&record))
                else {
                    return;
                };
                info!(key = %self.key, channel = reading.channel, module = %reading.module_type, "module found");
                self.slots[index] = Some(reading.clone());
                self.publish();
                self.emit(DockEvent::Found(reading));
            }
            CommandCode::Disconnected => {
                let Some(reading) =
                    ModuleReading::from_record(&record).or_else(|| ModuleReading::raw_from_record(&record))
                else {
                    return;
                };
                info!(key = %self.key, channel = reading.channel, module = %reading.module_type, "module lost");
                self.slots[index] = None;
                self.publish();
                self.emit(DockEvent::Lost(reading));
            }
            CommandCode::Unknown(code) => {
                debug!(key = %self.key, %code, "ignoring unknown command code");
            }
        }
    }

    async fn write(&mut self, command: DockCommand) -> Result<(), TransportError> {
        let mut frame = BytesMut::new();
        self.codec
            .encode(command, &mut frame)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        debug!(key = %self.key, command = %String::from_utf8_lossy(&frame).trim_end(), "tx");
        self.transport.write(&frame).await
    }

    fn clear_link_state(&mut self) {
        self.identify_deadline = None;
        self.identity.reset();
        self.slots = std::array::from_fn(|_| None);
        self.buffer.clear();
    }

    fn set_state(&mut self, state: DockState, reason: Option<&str>) {
        let from = self.machine.state();
        if let Err(e) = self.machine.transition(state, reason) {
            warn!(key = %self.key, "{}", e);
            return;
        }
        if from != state {
            debug!(key = %self.key, %from, to = %state, reason = reason.unwrap_or(""), "state changed");
        }
        self.publish();
    }

    fn emit_status(&mut self) {
        let Some(status) = self.machine.state().link_status() else {
            return;
        };
        if self.last_status != Some(status) {
            self.last_status = Some(status);
            info!(key = %self.key, %status, "link status");
            self.emit(DockEvent::Status(status));
        }
    }

    fn emit(&self, event: DockEvent) {
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        self.snapshot.send_replace(SessionSnapshot {
            state: self.machine.state(),
            identity: self.identity.clone(),
            modules: self.slots.clone(),
            last_error: self.last_error.clone(),
            closed: self.finished,
        });
    }

    fn finish(&mut self) {
        self.finished = true;
        self.identify_deadline = None;
        self.reconnect_at = None;
        self.release_at = None;
        self.publish();
    }
}

fn describe_field(field: &InfoRecord) -> String {
    match field {
        InfoRecord::Version(v) => format!("Version: {v}"),
        InfoRecord::Serial(v) => format!("Serial: {v}"),
        InfoRecord::User(v) => format!("User: {v}"),
        InfoRecord::Dock(v) => format!("Dock: {v}"),
        InfoRecord::Message(text) => text.clone(),
    }
}
