//! Companion-radio session: handshake, dispatch table and outbound send path.
//!
//! A [`ProtocolSession`] owns the transport, the channel table and the router. The listener
//! task and user handlers reach the same state through cheap [`SessionHandle`] clones, so
//! nothing here is process-global and several sessions can coexist (tests rely on that).
//!
//! Start-up ordering matters: the queue-drain command is only written after the listener
//! task has reported that it is consuming the transport. Sending it earlier loses the
//! radio's answer, leaving the first queued message stuck until something else triggers a
//! drain.
use log::{debug, error, info, trace, warn};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::channels::ChannelTable;
use super::errors::{MeshCoreError, Result};
use super::framer::{self, MAX_FRAME_SIZE};
use super::listener::Listener;
use super::message::{InboundMessage, MessageKind, SimulatedMessage};
use super::protocol::{self, DeviceInfo, Layout, Origin, ResponseCode, KEY_PREFIX_LEN};
use super::router::{Handler, MessageRouter, RouteDecision};
use super::transport::{SharedTransport, Transport};
use crate::logutil::{escape_log, hex_snippet, truncate_for_log};
use crate::metrics::{MetricsSnapshot, SessionMetrics};
use crate::validation::{validate_channel_name, validate_node_name};

/// How long `stop()` waits for the listener before closing the transport anyway.
pub const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Tuning for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Session identifier sent with the init command.
    pub node_name: String,
    /// Time the radio needs after the init command before it answers reliably.
    pub settle_delay: Duration,
    /// Listener polling period.
    pub poll_interval: Duration,
    pub channel_filter: Option<HashSet<String>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            node_name: "MCWB".to_string(),
            settle_delay: Duration::from_millis(300),
            poll_interval: Duration::from_millis(20),
            channel_filter: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Handshaking,
    /// Listener running, queue-drain being issued.
    Draining,
    Active,
    Closed,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Disconnected => "disconnected",
            SessionPhase::Handshaking => "handshaking",
            SessionPhase::Draining => "draining",
            SessionPhase::Active => "active",
            SessionPhase::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub running: bool,
    pub channel_filter: Option<HashSet<String>>,
    pub phase: SessionPhase,
}

pub(crate) struct Shared {
    transport: SharedTransport,
    simulated: bool,
    channels: Mutex<ChannelTable>,
    state: Mutex<SessionState>,
    router: RwLock<MessageRouter>,
    device_info: Mutex<Option<DeviceInfo>>,
    node_name: Mutex<Option<String>>,
    metrics: SessionMetrics,
    listener_started: OnceLock<Instant>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn new(transport: Option<Box<dyn Transport>>, filter: Option<HashSet<String>>) -> Self {
        Self {
            simulated: transport.is_none(),
            transport: Mutex::new(transport),
            channels: Mutex::new(ChannelTable::new()),
            state: Mutex::new(SessionState {
                running: false,
                channel_filter: filter,
                phase: SessionPhase::Disconnected,
            }),
            router: RwLock::new(MessageRouter::new()),
            device_info: Mutex::new(None),
            node_name: Mutex::new(None),
            metrics: SessionMetrics::default(),
            listener_started: OnceLock::new(),
        }
    }

    fn phase(&self) -> SessionPhase {
        lock(&self.state).phase
    }

    /// Move to `next` unless the session was closed underneath us.
    fn transition(&self, next: SessionPhase) -> Result<()> {
        let mut state = lock(&self.state);
        if state.phase == SessionPhase::Closed && next != SessionPhase::Closed {
            return Err(MeshCoreError::SessionClosed);
        }
        debug!("Session {} -> {}", state.phase, next);
        state.phase = next;
        Ok(())
    }

    fn set_running(&self, running: bool) {
        lock(&self.state).running = running;
    }

    fn close_transport(&self) {
        if lock(&self.transport).take().is_some() {
            debug!("Transport closed");
        }
    }

    /// Transport fault: the session is over.
    pub(crate) fn mark_lost(&self) {
        {
            let mut state = lock(&self.state);
            state.running = false;
            state.phase = SessionPhase::Closed;
        }
        self.close_transport();
        error!("Session closed: transport lost");
    }

    pub(crate) fn mark_listener_started(&self, at: Instant) {
        let _ = self.listener_started.set(at);
    }

    /// Read whatever the transport has buffered, up to `max` bytes.
    pub(crate) fn read_available(&self, max: usize) -> Result<Option<Vec<u8>>> {
        let mut guard = lock(&self.transport);
        let transport = guard.as_mut().ok_or(MeshCoreError::SessionClosed)?;
        let available = transport.bytes_available()?;
        if available == 0 {
            return Ok(None);
        }
        let mut buf = vec![0u8; available.min(max)];
        let n = match transport.read(&mut buf) {
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
                ) =>
            {
                0
            }
            Err(e) => return Err(e.into()),
        };
        buf.truncate(n);
        Ok((n > 0).then_some(buf))
    }

    /// Frame and write payloads back to back under one lock so no other writer can
    /// interleave bytes between them.
    fn write_payloads(&self, payloads: &[&[u8]]) -> Result<()> {
        let frames = payloads
            .iter()
            .map(|p| framer::encode(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut guard = lock(&self.transport);
        let Some(transport) = guard.as_mut() else {
            if self.simulated {
                trace!("[SIMULATION] dropped {} frame(s)", frames.len());
                return Ok(());
            }
            return Err(MeshCoreError::SessionClosed);
        };
        let result = frames.iter().try_for_each(|frame| {
            trace!("TX {} bytes: {}", frame.len(), hex_snippet(frame, 48));
            transport.write_all(frame)?;
            transport.flush()
        });
        drop(guard);
        if let Err(e) = result {
            warn!("Write error: {}", e);
            self.mark_lost();
            return Err(e.into());
        }
        Ok(())
    }
}

/// Cloneable access to a running session, handed to message handlers.
#[derive(Clone)]
pub struct SessionHandle {
    pub(crate) shared: Arc<Shared>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("phase", &self.phase())
            .field("simulated", &self.shared.simulated)
            .finish()
    }
}

impl SessionHandle {
    /// A handle not attached to any radio. Sends succeed and are only logged.
    pub fn detached() -> Self {
        let shared = Shared::new(None, None);
        lock(&shared.state).phase = SessionPhase::Active;
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.phase()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.state).running
    }

    pub fn is_simulated(&self) -> bool {
        self.shared.simulated
    }

    pub fn state(&self) -> SessionState {
        lock(&self.shared.state).clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub(crate) fn shared_metrics(&self) -> &SessionMetrics {
        &self.shared.metrics
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        lock(&self.shared.device_info).clone()
    }

    /// Node name the radio reported in its answer to the session-init command.
    pub fn node_name(&self) -> Option<String> {
        lock(&self.shared.node_name).clone()
    }

    /// Instant the listener began consuming the transport.
    pub fn listener_started_at(&self) -> Option<Instant> {
        self.shared.listener_started.get().copied()
    }

    pub fn register<F>(&self, kind: MessageKind, handler: F)
    where
        F: Fn(&InboundMessage, &SessionHandle) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        self.shared
            .router
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(kind, handler);
    }

    /// Restrict delivery to the given channel names; `None` accepts every channel.
    pub fn set_channel_filter(&self, filter: Option<HashSet<String>>) -> Result<()> {
        if let Some(names) = &filter {
            for name in names {
                validate_channel_name(name)
                    .map_err(|e| MeshCoreError::InvalidChannelName(format!("{name}: {e}")))?;
            }
        }
        info!("Channel filter set to: {:?}", filter);
        lock(&self.shared.state).channel_filter = filter;
        Ok(())
    }

    pub fn channel_filter(&self) -> Option<HashSet<String>> {
        lock(&self.shared.state).channel_filter.clone()
    }

    pub fn channel_index(&self, name: &str) -> Option<u8> {
        lock(&self.shared.channels).get_index(name)
    }

    pub fn channel_name(&self, index: u8) -> Option<String> {
        lock(&self.shared.channels).get_name(index).map(str::to_string)
    }

    /// Resolve (allocating if needed) the index for `name`.
    pub fn assign_channel(&self, name: Option<&str>) -> Result<u8> {
        if let Some(name) = name {
            validate_channel_name(name)
                .map_err(|e| MeshCoreError::InvalidChannelName(format!("{name}: {e}")))?;
        }
        lock(&self.shared.channels).get_or_assign(name)
    }

    fn ensure_sendable(&self) -> Result<()> {
        match self.phase() {
            SessionPhase::Draining | SessionPhase::Active => Ok(()),
            SessionPhase::Closed => Err(MeshCoreError::SessionClosed),
            other => Err(MeshCoreError::InvalidPhase(other.as_str())),
        }
    }

    /// Send channel text.
    ///
    /// An explicit `channel_index` is used verbatim, which is how a reply lands on the
    /// exact slot its request came from. Otherwise the index is resolved from
    /// `channel_name` (allocating one if needed) before any IO. A queue-drain always
    /// follows the text, since the radio only posts further traffic when asked.
    pub fn send(
        &self,
        content: &str,
        kind: MessageKind,
        channel_name: Option<&str>,
        channel_index: Option<u8>,
    ) -> Result<()> {
        if kind == MessageKind::Direct {
            return Err(MeshCoreError::UnsupportedKind(kind.to_string()));
        }
        self.ensure_sendable()?;
        let index = match channel_index {
            Some(index) => index,
            None => self.assign_channel(channel_name)?,
        };
        if self.shared.simulated {
            info!("[SIMULATION] {} ch{}: {}", kind, index, truncate_for_log(content, 80));
            return Ok(());
        }
        let payload = protocol::channel_text(index, protocol::unix_now(), content);
        if payload.len() > MAX_FRAME_SIZE {
            warn!(
                "Outbound payload of {} bytes exceeds the radio frame limit of {}",
                payload.len(),
                MAX_FRAME_SIZE
            );
        }
        self.shared
            .write_payloads(&[payload.as_slice(), protocol::sync_next_message().as_slice()])?;
        self.shared.metrics.inc_drains_sent();
        info!("Sent on channel_idx={}: {}", index, truncate_for_log(content, 60));
        Ok(())
    }

    /// Send text to a contact identified by its public-key prefix.
    pub fn send_direct(&self, key: &[u8; KEY_PREFIX_LEN], content: &str) -> Result<()> {
        self.ensure_sendable()?;
        if self.shared.simulated {
            info!(
                "[SIMULATION] direct to {}: {}",
                protocol::key_prefix_hex(key),
                truncate_for_log(content, 80)
            );
            return Ok(());
        }
        let payload = protocol::direct_text(key, protocol::unix_now(), content);
        self.shared
            .write_payloads(&[payload.as_slice(), protocol::sync_next_message().as_slice()])?;
        self.shared.metrics.inc_drains_sent();
        info!(
            "Sent direct to {}: {}",
            protocol::key_prefix_hex(key),
            truncate_for_log(content, 60)
        );
        Ok(())
    }

    /// Answer `msg` on the channel (or contact) it arrived from.
    pub fn reply(&self, msg: &InboundMessage, content: &str) -> Result<()> {
        match (&msg.kind, msg.sender_key) {
            (MessageKind::Direct, Some(key)) => self.send_direct(&key, content),
            (MessageKind::Direct, None) => Err(MeshCoreError::UnsupportedKind(msg.kind.to_string())),
            _ => self.send(
                content,
                MessageKind::Text,
                msg.channel_name.as_deref(),
                msg.channel_index,
            ),
        }
    }

    /// Set the radio clock to the host's wall-clock time.
    pub fn sync_time(&self) -> Result<()> {
        self.ensure_sendable()?;
        let now = protocol::unix_now();
        self.shared.write_payloads(&[protocol::set_device_time(now).as_slice()])?;
        info!("Radio clock synced to {}", now);
        Ok(())
    }

    /// Ask the radio for its next queued message.
    pub fn request_next_message(&self) -> Result<()> {
        self.shared
            .write_payloads(&[protocol::sync_next_message().as_slice()])?;
        self.shared.metrics.inc_drains_sent();
        trace!("Queue drain requested");
        Ok(())
    }

    /// Run one radio payload through the dispatch table.
    ///
    /// Only transport failures are returned; protocol faults are logged and swallowed.
    pub(crate) fn handle_payload(&self, payload: &[u8]) -> Result<()> {
        let (Some(&code), Some(response)) = (payload.first(), ResponseCode::of(payload)) else {
            return Ok(());
        };
        self.shared.metrics.inc_frames_received();
        trace!(
            "RX code=0x{:02x} len={} {}",
            code,
            payload.len(),
            hex_snippet(payload, 32)
        );
        match response {
            ResponseCode::Keepalive => {}
            ResponseCode::SessionInitEcho => info!("Session init acknowledged by radio"),
            ResponseCode::DeviceTimeRequest => {
                self.shared
                    .write_payloads(&[protocol::device_time_reply(protocol::unix_now()).as_slice()])?;
                debug!("Answered device time request");
            }
            ResponseCode::SelfInfo => {
                let name = protocol::parse_self_info(payload).unwrap_or_default();
                info!("Connected to node '{}'", escape_log(&name));
                *lock(&self.shared.node_name) = Some(name);
            }
            ResponseCode::Sent => debug!("Radio accepted outbound message"),
            ResponseCode::CurrentTime => debug!("Radio reported its clock"),
            ResponseCode::QueueEmpty => debug!("Queue empty"),
            ResponseCode::DeviceInfo => match protocol::parse_device_info(payload) {
                Some(info) => {
                    info!(
                        "Device info: fw_ver={} max_contacts={} fw={}",
                        info.fw_ver_code,
                        info.max_contacts,
                        info.fw_version.as_deref().unwrap_or("?")
                    );
                    *lock(&self.shared.device_info) = Some(info);
                }
                None => warn!("Undersized device info ({} bytes)", payload.len()),
            },
            ResponseCode::MessageAck => {
                debug!("Send confirmed by mesh");
                self.request_next_message()?;
            }
            ResponseCode::MessageWaiting => {
                debug!("Radio reports a queued message");
                self.request_next_message()?;
            }
            ResponseCode::ChannelMessage(layout) => self.on_text(payload, code, layout, false)?,
            ResponseCode::ChannelMessagePush => self.on_text(payload, code, Layout::Legacy, false)?,
            ResponseCode::DirectMessage(layout) => self.on_text(payload, code, layout, true)?,
            ResponseCode::Unknown(other) => {
                debug!("Unhandled frame code 0x{:02x} ({} bytes)", other, payload.len())
            }
        }
        Ok(())
    }

    fn on_text(&self, payload: &[u8], code: u8, layout: Layout, direct: bool) -> Result<()> {
        let parsed = if direct {
            protocol::parse_direct_message(payload, layout)
        } else {
            protocol::parse_channel_message(payload, layout)
        };
        let Some(rx) = parsed else {
            warn!(
                "Undersized text message (code 0x{:02x}, {} bytes)",
                code,
                payload.len()
            );
            return Ok(());
        };
        let timestamp = match rx.sender_timestamp {
            0 => protocol::unix_now() as u64,
            ts => ts as u64,
        };
        let msg = match rx.origin {
            Origin::Channel(index) => {
                let (sender, content) = protocol::split_sender(&rx.text);
                InboundMessage {
                    sender,
                    content,
                    kind: MessageKind::Text,
                    timestamp,
                    channel_name: self.channel_name(index),
                    channel_index: Some(index),
                    sender_key: None,
                }
            }
            Origin::Contact(key) => InboundMessage {
                sender: protocol::key_prefix_hex(&key),
                content: rx.text,
                kind: MessageKind::Direct,
                timestamp,
                channel_name: None,
                channel_index: None,
                sender_key: Some(key),
            },
        };
        info!(
            "RX {} ch={:?} snr={:?} {}: {}",
            msg.kind,
            msg.channel_index,
            rx.snr,
            msg.sender,
            truncate_for_log(&msg.content, 120)
        );
        self.deliver(msg);
        self.request_next_message()
    }

    pub(crate) fn inbound_from_simulated(&self, sim: SimulatedMessage) -> InboundMessage {
        let channel_index = sim
            .channel_index
            .or_else(|| sim.channel.as_deref().and_then(|n| self.channel_index(n)));
        let channel_name = sim
            .channel
            .or_else(|| sim.channel_index.and_then(|i| self.channel_name(i)));
        let timestamp = sim
            .timestamp
            .filter(|t| t.is_finite() && *t >= 0.0)
            .map(|t| t as u64)
            .unwrap_or_else(|| protocol::unix_now() as u64);
        InboundMessage {
            sender: sim.sender,
            content: sim.content,
            kind: sim.kind,
            timestamp,
            channel_name,
            channel_index,
            sender_key: None,
        }
    }

    /// Route a message and run its handler.
    pub(crate) fn deliver(&self, msg: InboundMessage) {
        let filter = self.channel_filter();
        // Snapshot so handlers may register or reply without holding the lock
        let router = self
            .shared
            .router
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match router.dispatch(&msg, filter.as_ref(), self) {
            RouteDecision::Filtered => self.shared.metrics.inc_messages_filtered(),
            RouteDecision::Deliver => self.shared.metrics.inc_messages_dispatched(),
            RouteDecision::NoHandler => {}
        }
    }
}

/// Owner of one companion-radio session.
pub struct ProtocolSession {
    handle: SessionHandle,
    config: SessionConfig,
    listener: Option<JoinHandle<()>>,
}

impl ProtocolSession {
    /// Session over an already opened transport.
    pub fn new(transport: Box<dyn Transport>, config: SessionConfig) -> Result<Self> {
        Self::build(Some(transport), config)
    }

    /// Session without a radio: sends are logged, nothing is read.
    pub fn simulated(config: SessionConfig) -> Result<Self> {
        Self::build(None, config)
    }

    /// Open `port_name` and build a session over it.
    #[cfg(feature = "serial")]
    pub async fn open_serial(port_name: &str, baud_rate: u32, config: SessionConfig) -> Result<Self> {
        Self::validate(&config)?;
        let port = super::transport::open_serial(port_name, baud_rate).await?;
        info!("Serial opened: {} @ {} baud", port_name, baud_rate);
        Self::new(Box::new(port), config)
    }

    fn validate(config: &SessionConfig) -> Result<()> {
        validate_node_name(&config.node_name)
            .map_err(|e| MeshCoreError::InvalidNodeName(format!("{}: {e}", config.node_name)))?;
        if let Some(names) = &config.channel_filter {
            for name in names {
                validate_channel_name(name)
                    .map_err(|e| MeshCoreError::InvalidChannelName(format!("{name}: {e}")))?;
            }
        }
        Ok(())
    }

    fn build(transport: Option<Box<dyn Transport>>, config: SessionConfig) -> Result<Self> {
        Self::validate(&config)?;
        let shared = Shared::new(transport, config.channel_filter.clone());
        Ok(Self {
            handle: SessionHandle {
                shared: Arc::new(shared),
            },
            config,
            listener: None,
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Perform the handshake and start the listener.
    pub async fn start(&mut self) -> Result<()> {
        let shared = self.handle.shared.clone();
        let phase = shared.phase();
        if phase != SessionPhase::Disconnected {
            return Err(MeshCoreError::InvalidPhase(phase.as_str()));
        }
        if shared.simulated {
            info!("No serial port - running in simulation mode");
            shared.set_running(true);
            return shared.transition(SessionPhase::Active);
        }

        shared.transition(SessionPhase::Handshaking)?;
        let init = protocol::app_start(&self.config.node_name);
        if let Err(e) = shared.write_payloads(&[protocol::device_query().as_slice(), init.as_slice()]) {
            let _ = shared.transition(SessionPhase::Closed);
            return Err(e);
        }
        info!(
            "Session init sent as '{}', settling for {:?}",
            self.config.node_name, self.config.settle_delay
        );
        tokio::time::sleep(self.config.settle_delay).await;

        shared.set_running(true);
        let (ready_tx, ready_rx) = oneshot::channel();
        let listener = Listener::new(self.handle.clone(), self.config.poll_interval);
        self.listener = Some(tokio::spawn(listener.run(ready_tx)));
        let started = match ready_rx.await {
            Ok(at) => at,
            Err(_) => {
                shared.set_running(false);
                let _ = shared.transition(SessionPhase::Closed);
                return Err(MeshCoreError::SessionClosed);
            }
        };
        debug!("Listener consuming transport ({:?} ago)", started.elapsed());

        shared.transition(SessionPhase::Draining)?;
        self.handle.request_next_message()?;
        shared.transition(SessionPhase::Active)?;
        info!("Session active");
        Ok(())
    }

    /// Stop the listener and close the transport.
    pub async fn stop(&mut self) {
        self.handle.shared.set_running(false);
        if let Some(task) = self.listener.take() {
            match tokio::time::timeout(STOP_JOIN_TIMEOUT, task).await {
                Ok(Ok(())) => debug!("Listener joined"),
                Ok(Err(e)) => warn!("Listener task failed: {}", e),
                Err(_) => warn!(
                    "Listener did not stop within {:?}; closing transport anyway",
                    STOP_JOIN_TIMEOUT
                ),
            }
        }
        self.handle.shared.close_transport();
        let _ = self.handle.shared.transition(SessionPhase::Closed);
        info!("Stopped");
    }

    pub fn phase(&self) -> SessionPhase {
        self.handle.phase()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn register<F>(&self, kind: MessageKind, handler: F)
    where
        F: Fn(&InboundMessage, &SessionHandle) + Send + Sync + 'static,
    {
        self.handle.register(kind, handler);
    }

    pub fn set_channel_filter(&self, filter: Option<HashSet<String>>) -> Result<()> {
        self.handle.set_channel_filter(filter)
    }

    pub fn send(
        &self,
        content: &str,
        kind: MessageKind,
        channel_name: Option<&str>,
        channel_index: Option<u8>,
    ) -> Result<()> {
        self.handle.send(content, kind, channel_name, channel_index)
    }

    /// True once the listener has given up on a failed transport.
    pub fn is_lost(&self) -> bool {
        self.listener.is_some() && self.phase() == SessionPhase::Closed
    }
}

impl Drop for ProtocolSession {
    fn drop(&mut self) {
        // The listener exits on its next poll once the flag is cleared.
        self.handle.shared.set_running(false);
    }
}
