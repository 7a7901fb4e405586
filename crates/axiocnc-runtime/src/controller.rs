//! Composition root: one Controller per open port. Owns the serial link,
//! line codec, Grbl parser, flow controller, feeder, sender and modal
//! state, and exposes the client-facing command surface the Session Hub
//! forwards commands onto.
//!
//! Grounded on the teacher's `GrblController` (connect/command/jog/override/
//! streaming surface) and `dosa::CncController` (realtime-command helpers,
//! response routing), generalized from one fixed firmware/device to any
//! port behind a pluggable [`FlowController`].

use crate::feeder::{Feeder, FeederLine};
use crate::sender::Sender;
use axiocnc_core::data::{CNCPoint, CommunicatorState, MachineStatusSnapshot, ReadyState};
use axiocnc_core::error::{ControllerAlarm, ControllerError, Error, FeederError};
use axiocnc_core::event::{ControllerEvent, EventDispatcher, EventKind};
use axiocnc_core::ids::{ControllerFamily, ControllerId};
use axiocnc_core::message::MessageDispatcher;
use axiocnc_core::modal::ModalState;
use axiocnc_core::workflow::{HoldReason, WorkflowState};
use axiocnc_protocol::codec::{prepare_for_send, strip_comment, LineCodec};
use axiocnc_protocol::connection_watch::{ConnectionWatchConfig, ConnectionWatcher};
use axiocnc_protocol::flow::{CharacterCountingFlow, FlowController, LineId, LockstepFlow, QueueReportFlow};
use axiocnc_protocol::grbl::{GrblParser, OverrideManager};
use axiocnc_protocol::marlin::MarlinParser;
use axiocnc_protocol::parser::{FirmwareParser, ParserEvent};
use axiocnc_protocol::tinyg::TinyGParser;
use axiocnc_protocol::transport::{RealtimeByte, Transport};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Default cadence for the periodic `?` status query, per the Controller's
/// status-query timer.
pub const STATUS_QUERY_INTERVAL: Duration = Duration::from_millis(250);

const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_CEILING: Duration = Duration::from_secs(30);

/// Commands the Session Hub forwards onto a Controller's inbox.
#[derive(Debug, Clone)]
pub enum Command {
    Open,
    Close,
    Gcode { text: String, context: Value },
    GcodeLoad { name: String, text: String, context: Value },
    GcodeUnload,
    GcodeStart,
    GcodePause,
    GcodeResume,
    GcodeStop { force: bool },
    FeedHold,
    CycleStart,
    Homing,
    Unlock,
    Reset,
    Write(Vec<u8>),
    Writeln(String),
    SetFeedOverride(u16),
    SetRapidOverride(u8),
    SetSpindleOverride(u16),
}

/// A byte sequence ready for the transport layer: either a realtime byte
/// (never queued) or a flow-controlled line paired with the id the Flow
/// Controller will later ack/nack.
#[derive(Debug, Clone)]
pub enum Outbound {
    Realtime(u8),
    Line { id: u64, bytes: Vec<u8> },
}

/// Handle given to the Session Hub: send commands, nothing else. Cloning is
/// cheap (an mpsc sender); the Controller task is the sole owner of state.
#[derive(Clone)]
pub struct ControllerHandle {
    pub id: ControllerId,
    inbox: mpsc::Sender<Command>,
}

impl ControllerHandle {
    pub async fn send(&self, command: Command) -> Result<(), Error> {
        self.inbox
            .send(command)
            .await
            .map_err(|_| Error::other(format!("controller {} is no longer running", self.id)))
    }
}

/// Composition root. Everything here runs on a single task; no field is
/// ever mutated from two call sites concurrently.
pub struct Controller {
    pub id: ControllerId,
    family: ControllerFamily,
    transport: Option<Transport>,
    codec: LineCodec,
    parser: Box<dyn FirmwareParser + Send>,
    flow: Box<dyn FlowController + Send>,
    feeder: Feeder,
    sender: Sender,
    modal: ModalState,
    overrides: OverrideManager,
    watcher: ConnectionWatcher,
    events: EventDispatcher,
    messages: MessageDispatcher,
    homed: bool,
    homing_in_progress: bool,
    next_line_id: u64,
    reconnect_attempts: u32,
    next_reconnect_at: Option<Instant>,
}

/// Parser and Flow Controller pair for one firmware family. Smoothieware's
/// "grbl mode" reports Grbl's own bracketed status line, so it reuses
/// `GrblParser` rather than getting a dedicated one.
fn parser_and_flow_for(family: ControllerFamily) -> (Box<dyn FirmwareParser + Send>, Box<dyn FlowController + Send>) {
    match family {
        ControllerFamily::Grbl | ControllerFamily::Smoothieware => (
            Box::new(GrblParser::new()),
            Box::new(CharacterCountingFlow::default()),
        ),
        ControllerFamily::Marlin => (
            Box::new(MarlinParser::new()),
            Box::new(LockstepFlow::new()),
        ),
        ControllerFamily::TinyG | ControllerFamily::G2core => (
            Box::new(TinyGParser::new()),
            Box::new(QueueReportFlow::default()),
        ),
    }
}

/// Gcode that unlocks an alarm state, per firmware family.
fn unlock_command_for(family: ControllerFamily) -> &'static str {
    match family {
        ControllerFamily::Grbl | ControllerFamily::Smoothieware => "$X",
        ControllerFamily::Marlin => "M999",
        ControllerFamily::TinyG | ControllerFamily::G2core => "$clear",
    }
}

/// Gcode that runs the homing cycle, per firmware family.
fn homing_command_for(family: ControllerFamily) -> &'static str {
    match family {
        ControllerFamily::Grbl | ControllerFamily::Smoothieware => "$H",
        ControllerFamily::Marlin => "G28",
        ControllerFamily::TinyG | ControllerFamily::G2core => "G28.2",
    }
}

impl Controller {
    pub fn new(
        id: ControllerId,
        family: ControllerFamily,
        events: EventDispatcher,
        messages: MessageDispatcher,
    ) -> Self {
        let (parser, flow) = parser_and_flow_for(family);
        Self {
            id,
            family,
            transport: None,
            codec: LineCodec::new(),
            parser,
            flow,
            feeder: Feeder::new(),
            sender: Sender::new(),
            modal: ModalState::default(),
            overrides: OverrideManager::new(),
            watcher: ConnectionWatcher::new(ConnectionWatchConfig::default()),
            events,
            messages,
            homed: false,
            homing_in_progress: false,
            next_line_id: 0,
            reconnect_attempts: 0,
            next_reconnect_at: None,
        }
    }

    /// Spawn the Controller's inbox-driven task, returning a handle the
    /// Session Hub forwards commands onto. The task exits when the handle
    /// is dropped and the inbox drains.
    pub fn spawn(
        id: ControllerId,
        family: ControllerFamily,
        events: EventDispatcher,
        messages: MessageDispatcher,
    ) -> (ControllerHandle, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(64);
        let controller = Self::new(id.clone(), family, events, messages);
        let join = tokio::spawn(controller.run(rx));
        (ControllerHandle { id, inbox: tx }, join)
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn modal(&self) -> &ModalState {
        &self.modal
    }

    pub fn overrides(&self) -> &OverrideManager {
        &self.overrides
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn feeder(&self) -> &Feeder {
        &self.feeder
    }

    fn emit(&self, kind: EventKind) {
        if let Err(err) = self.events.publish(ControllerEvent::scoped(self.id.clone(), kind)) {
            tracing::trace!(controller = %self.id, "no subscribers for event: {err}");
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_line_id;
        self.next_line_id += 1;
        id
    }

    /// Apply one client command, returning the realtime byte (if any) the
    /// caller must write immediately. Queued-line effects are drained
    /// separately by [`Controller::pump`].
    pub fn apply_command(&mut self, command: Command) -> Result<Option<u8>, Error> {
        match command {
            Command::Open => unreachable!("Command::Open is opened asynchronously in run()"),
            Command::Close => {
                self.transport = None;
                self.watcher.stop();
                self.homed = false;
                self.emit(EventKind::SerialPortClose);
                Ok(None)
            }
            Command::Gcode { text, context } => {
                let lines = text
                    .lines()
                    .filter_map(|l| strip_comment(l))
                    .map(|text| {
                        let mut line = FeederLine::new(text);
                        line.context = context.clone();
                        line
                    });
                self.feeder.feed(lines);
                self.emit_queue_status();
                Ok(None)
            }
            Command::GcodeLoad { name, text, context } => {
                self.sender.load(&name, &text, &context)?;
                self.emit(EventKind::GcodeLoad {
                    name,
                    total: self.sender.total() as u64,
                });
                self.emit_queue_status();
                Ok(None)
            }
            Command::GcodeUnload => {
                self.sender.unload();
                self.emit(EventKind::GcodeUnload);
                self.emit_queue_status();
                Ok(None)
            }
            Command::GcodeStart => {
                self.sender.start().map_err(|e| Error::other(e.to_string()))?;
                self.emit_workflow_state();
                self.emit_queue_status();
                Ok(None)
            }
            Command::GcodePause => {
                self.sender.pause(HoldReason::user_requested()).map_err(|e| Error::other(e.to_string()))?;
                self.emit_workflow_state();
                self.emit_queue_status();
                Ok(Some(RealtimeByte::FeedHold.as_byte()))
            }
            Command::GcodeResume => {
                self.sender.resume().map_err(|e| Error::other(e.to_string()))?;
                self.feeder.unhold();
                self.emit_workflow_state();
                self.emit_queue_status();
                Ok(Some(RealtimeByte::CycleStart.as_byte()))
            }
            Command::GcodeStop { force } => {
                self.sender.stop().map_err(|e| Error::other(e.to_string()))?;
                self.feeder.reset();
                self.emit_workflow_state();
                self.emit_queue_status();
                Ok(if force { Some(RealtimeByte::SoftReset.as_byte()) } else { None })
            }
            Command::FeedHold => Ok(Some(RealtimeByte::FeedHold.as_byte())),
            Command::CycleStart => Ok(Some(RealtimeByte::CycleStart.as_byte())),
            Command::Homing => {
                self.homing_in_progress = true;
                self.feeder.feed([FeederLine::priority(homing_command_for(self.family))]);
                self.emit(EventKind::TaskStart {
                    task: "homing".to_string(),
                });
                Ok(None)
            }
            Command::Unlock => {
                self.feeder.feed([FeederLine::priority(unlock_command_for(self.family))]);
                Ok(None)
            }
            Command::Reset => {
                self.sender.stop().map_err(|e| Error::other(e.to_string()))?;
                self.feeder.reset();
                self.flow.reset();
                self.modal = ModalState::default();
                self.homed = false;
                self.emit_workflow_state();
                self.emit_queue_status();
                Ok(Some(RealtimeByte::SoftReset.as_byte()))
            }
            Command::Write(bytes) => {
                self.feeder.feed([FeederLine::new(
                    String::from_utf8_lossy(&bytes).into_owned(),
                )]);
                Ok(None)
            }
            Command::Writeln(text) => {
                self.feeder.feed([FeederLine::new(text)]);
                Ok(None)
            }
            Command::SetFeedOverride(pct) => {
                self.overrides
                    .set_feed_override(pct)
                    .map_err(Error::Validation)?;
                Ok(self
                    .overrides
                    .get_feed_override_command()
                    .map(|cmd| cmd.as_byte()))
            }
            Command::SetRapidOverride(pct) => {
                self.overrides
                    .set_rapid_override(pct)
                    .map_err(Error::Validation)?;
                Ok(Some(self.overrides.get_rapid_override_command().as_byte()))
            }
            Command::SetSpindleOverride(pct) => {
                self.overrides
                    .set_spindle_override(pct)
                    .map_err(Error::Validation)?;
                Ok(self
                    .overrides
                    .get_spindle_override_command()
                    .map(|cmd| cmd.as_byte()))
            }
        }
    }

    fn emit_workflow_state(&self) {
        self.emit(EventKind::WorkflowState {
            state: self.sender.workflow().clone(),
        });
    }

    /// Emit the current Feeder/Sender counters, so the Machine Status
    /// Manager (and through it, a session's `open` reply) stays current
    /// without querying the Controller task directly.
    fn emit_queue_status(&self) {
        self.emit(EventKind::FeederStatus {
            queued: self.feeder.len(),
            held: self.feeder.is_held(),
        });
        self.emit(EventKind::SenderStatus {
            sent: self.sender.sent() as u64,
            received: self.sender.received() as u64,
            total: self.sender.total() as u64,
        });
    }

    /// Drain as much of the Feeder and Sender as the Flow Controller
    /// currently has room for. Feeder (ad-hoc/jog/MDI) takes priority over
    /// Sender (program streaming).
    pub fn pump(&mut self) -> Vec<Outbound> {
        let mut outbound = Vec::new();

        while let Some(len) = self.feeder.peek_len() {
            if !self.flow.can_send(len) {
                break;
            }
            let (line, errors) = self.feeder.next();
            for err in errors {
                self.report_feeder_error(err);
            }
            let Some(text) = line else { break };
            outbound.push(self.write_line(&text));
        }

        while let Some(len) = self.sender.peek_len() {
            if !self.flow.can_send(len) {
                break;
            }
            let Some((_line_index, text)) = self.sender.next_to_send() else {
                break;
            };
            outbound.push(self.write_line(&text));
        }

        if !outbound.is_empty() {
            self.emit_queue_status();
        }
        outbound
    }

    fn write_line(&mut self, text: &str) -> Outbound {
        let bytes = prepare_for_send(text);
        let id = self.next_id();
        self.flow.on_sent(LineId(id), bytes.len());
        self.emit(EventKind::SerialPortWrite { raw: text.to_string() });
        Outbound::Line { id, bytes }
    }

    fn report_feeder_error(&self, err: FeederError) {
        self.messages
            .warning(self.id.to_string(), err.to_string())
            .ok();
        self.emit(EventKind::TaskError {
            task: "feeder".to_string(),
            reason: err.to_string(),
        });
    }

    /// Feed one received line through the Grbl parser and apply its effect
    /// on modal state, the flow-control ledger, and the workflow.
    pub fn handle_line(&mut self, raw: &str) {
        self.watcher.heartbeat();
        self.emit(EventKind::SerialPortRead { raw: raw.to_string() });
        let event = self.parser.parse_line(raw);
        match event {
            ParserEvent::Ok => {
                if let Some(LineId(id)) = self.flow.on_ack() {
                    if let Some(reason) = self.sender.record_ok(id as usize) {
                        self.emit(EventKind::WorkflowState {
                            state: WorkflowState::Paused { hold_reason: reason },
                        });
                    }
                    self.emit_queue_status();
                }
            }
            ParserEvent::Error { code, description } => {
                if let Some(LineId(id)) = self.flow.on_nack() {
                    let error = ControllerError {
                        code,
                        description: description.clone(),
                        line_id: id,
                    };
                    if !self.sender.ignore_errors() {
                        let _ = self.sender.pause(HoldReason::controller_error(error.to_string()));
                        self.emit_workflow_state();
                    }
                    self.emit(EventKind::TaskError {
                        task: "sender".to_string(),
                        reason: error.to_string(),
                    });
                }
            }
            ParserEvent::Alarm { code, description } => {
                let alarm = ControllerAlarm { code, description };
                self.messages.error(self.id.to_string(), alarm.to_string()).ok();
                self.emit(EventKind::TaskError {
                    task: "controller".to_string(),
                    reason: alarm.to_string(),
                });
                self.homing_in_progress = false;
                self.homed = false;
            }
            ParserEvent::Status { state, .. } => {
                if self.homing_in_progress && state != "Home" {
                    self.homing_in_progress = false;
                    self.homed = true;
                    self.emit(EventKind::TaskFinish {
                        task: "homing".to_string(),
                    });
                }
                self.emit(EventKind::MachineStatus {
                    status: self.snapshot(&state),
                });
            }
            ParserEvent::Setting { key, value } => {
                self.emit(EventKind::ControllerSettings { key, value });
            }
            ParserEvent::QueueDepth { qr } => {
                self.flow.on_queue_report(qr);
            }
            ParserEvent::ParserState { .. } => {
                self.emit(EventKind::ControllerState { modal: self.modal.clone() });
            }
            ParserEvent::Welcome { .. } => {
                self.homed = false;
                self.reconnect_attempts = 0;
                self.flow.reset();
            }
            ParserEvent::Startup { .. }
            | ParserEvent::Message { .. }
            | ParserEvent::Feedback { .. }
            | ParserEvent::Other { .. } => {}
        }
    }

    fn snapshot(&self, grbl_state: &str) -> MachineStatusSnapshot {
        let last = self.parser.last_status();
        let (mpos, wpos, feedrate, spindle_speed) = match last {
            Some(ParserEvent::Status {
                mpos,
                wpos,
                feedrate,
                spindle_speed,
                ..
            }) => (
                mpos.map(|p| p.merge_onto(&CNCPoint::default())).unwrap_or_default(),
                wpos.map(|p| p.merge_onto(&CNCPoint::default())).unwrap_or_default(),
                feedrate.unwrap_or(0.0),
                spindle_speed.unwrap_or(0.0),
            ),
            _ => (CNCPoint::default(), CNCPoint::default(), 0.0, 0.0),
        };
        MachineStatusSnapshot {
            connected: self.is_connected(),
            controller_type: self.family.as_str().to_string(),
            mpos,
            wpos,
            feedrate,
            spindle_speed,
            ready_state: ready_state_for(grbl_state, self.homing_in_progress),
            is_homed: self.homed,
            is_job_running: matches!(self.sender.workflow(), WorkflowState::Running),
            homing_in_progress: self.homing_in_progress,
        }
    }

    pub fn communicator_state(&self) -> CommunicatorState {
        if self.transport.is_some() {
            CommunicatorState::Open
        } else if self.reconnect_attempts == 0 {
            CommunicatorState::Closed
        } else if self.reconnect_attempts >= MAX_RECONNECT_ATTEMPTS {
            CommunicatorState::Failed
        } else {
            CommunicatorState::Reconnecting {
                attempt: self.reconnect_attempts,
            }
        }
    }

    /// Exponential backoff delay for the next reconnect attempt, capped at
    /// [`RECONNECT_CEILING`]; `None` once attempts are exhausted.
    pub fn next_reconnect_delay(&self) -> Option<Duration> {
        if self.reconnect_attempts >= MAX_RECONNECT_ATTEMPTS {
            return None;
        }
        let secs = 2u64.saturating_pow(self.reconnect_attempts).min(RECONNECT_CEILING.as_secs());
        Some(Duration::from_secs(secs))
    }

    /// The inbox-driven select loop: serial reads, client commands, and the
    /// periodic status-query timer all funnel through here, serialized by
    /// construction so no two branches ever mutate state concurrently.
    async fn run(mut self, mut inbox: mpsc::Receiver<Command>) {
        let mut status_timer = tokio::time::interval(STATUS_QUERY_INTERVAL);
        let mut read_buf = [0u8; 512];

        loop {
            tokio::select! {
                command = inbox.recv() => {
                    match command {
                        Some(Command::Open) => {
                            self.handle_open().await;
                        }
                        Some(command) => {
                            match self.apply_command(command) {
                                Ok(Some(byte)) => self.write_realtime(byte).await,
                                Ok(None) => {}
                                Err(err) => tracing::warn!(controller = %self.id, "command rejected: {err}"),
                            }
                            for outbound in self.pump() {
                                self.write_outbound(outbound).await;
                            }
                        }
                        None => break,
                    }
                }
                _ = status_timer.tick() => {
                    if self.transport.is_some() {
                        self.write_realtime(RealtimeByte::StatusQuery.as_byte()).await;
                        if self.watcher.is_lost() {
                            self.messages.warning(self.id.to_string(), "connection lost, scheduling reconnect").ok();
                            self.transport = None;
                            self.watcher.stop();
                            self.emit(EventKind::SerialPortClose);
                            self.reconnect_attempts += 1;
                            self.next_reconnect_at = self.next_reconnect_delay().map(|d| Instant::now() + d);
                        }
                    } else if self.next_reconnect_at.is_some_and(|at| Instant::now() >= at) {
                        self.handle_open().await;
                        self.next_reconnect_at = if self.transport.is_some() {
                            None
                        } else {
                            self.next_reconnect_delay().map(|d| Instant::now() + d)
                        };
                    }
                }
                read = Self::read_transport(&mut self.transport, &mut read_buf) => {
                    match read {
                        Some(Ok(n)) if n > 0 => {
                            let lines = self.codec.feed(&read_buf[..n]);
                            for decoded in lines {
                                if decoded.over_length {
                                    self.messages.warning(self.id.to_string(), "over-length line, desynced").ok();
                                    continue;
                                }
                                self.handle_line(&decoded.raw);
                            }
                            for outbound in self.pump() {
                                self.write_outbound(outbound).await;
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            self.emit(EventKind::SerialPortError { reason: err.to_string() });
                            self.transport = None;
                        }
                        None => {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                    }
                }
            }
        }
    }

    async fn read_transport(
        transport: &mut Option<Transport>,
        buf: &mut [u8],
    ) -> Option<std::io::Result<usize>> {
        match transport {
            Some(t) => Some(
                t.read_some(buf)
                    .await
                    .map_err(|e| std::io::Error::other(e.to_string())),
            ),
            None => None,
        }
    }

    async fn write_outbound(&mut self, outbound: Outbound) {
        match outbound {
            Outbound::Realtime(byte) => self.write_realtime(byte).await,
            Outbound::Line { bytes, .. } => {
                if let Some(transport) = &mut self.transport {
                    if let Err(err) = transport.write_all(&bytes).await {
                        self.emit(EventKind::SerialPortError { reason: err.to_string() });
                    }
                }
            }
        }
    }

    async fn write_realtime(&mut self, byte: u8) {
        if let Some(transport) = &mut self.transport {
            if let Err(err) = transport.write_all(&[byte]).await {
                self.emit(EventKind::SerialPortError { reason: err.to_string() });
            }
        }
    }

    /// Open the transport for this Controller's port/baud rate. Idempotent:
    /// called again while already connected, it's a no-op. Handled outside
    /// `apply_command` because opening a serial port is an async syscall,
    /// while `apply_command` stays synchronous for everything else.
    async fn handle_open(&mut self) {
        if self.transport.is_some() {
            return;
        }
        match Transport::open_serial(&self.id.port, self.id.baud_rate).await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.reconnect_attempts = 0;
                self.watcher.heartbeat();
                self.emit(EventKind::SerialPortOpen);
            }
            Err(err) => {
                self.reconnect_attempts += 1;
                self.messages.error(self.id.to_string(), err.to_string()).ok();
                self.emit(EventKind::SerialPortError { reason: err.to_string() });
            }
        }
    }
}

fn ready_state_for(grbl_state: &str, homing_in_progress: bool) -> ReadyState {
    if homing_in_progress {
        return ReadyState::ConnectedPreHome;
    }
    match grbl_state {
        "Alarm" => ReadyState::Alarm,
        "Run" | "Jog" => ReadyState::Running,
        "Hold" | "Door" => ReadyState::Hold,
        _ => ReadyState::ConnectedPostHome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axiocnc_core::event::EventDispatcher;
    use axiocnc_core::message::MessageDispatcher;
    use serde_json::json;

    fn new_controller() -> Controller {
        new_controller_for(ControllerFamily::Grbl)
    }

    fn new_controller_for(family: ControllerFamily) -> Controller {
        Controller::new(
            ControllerId::new("/dev/ttyUSB0", 115200),
            family,
            EventDispatcher::default_with_buffer(),
            MessageDispatcher::default_with_buffer(),
        )
    }

    #[test]
    fn gcode_command_queues_feeder_lines() {
        let mut controller = new_controller();
        controller
            .apply_command(Command::Gcode {
                text: "G0 X0\nG0 Y0".to_string(),
                context: json!({}),
            })
            .unwrap();
        assert_eq!(controller.feeder().len(), 2);
    }

    #[test]
    fn gcode_start_requires_a_loaded_program() {
        let mut controller = new_controller();
        assert!(controller.apply_command(Command::GcodeStart).is_err());
    }

    #[test]
    fn pump_respects_flow_controller_capacity() {
        let mut controller = new_controller();
        controller.flow = Box::new(axiocnc_protocol::flow::CharacterCountingFlow::new(6));
        controller
            .apply_command(Command::Gcode {
                text: "G0 X0\nG0 Y0".to_string(),
                context: json!({}),
            })
            .unwrap();
        let outbound = controller.pump();
        assert_eq!(outbound.len(), 1); // "G0 X0\n" is 6 bytes, fills the ledger
    }

    #[test]
    fn parser_ok_pops_flow_ledger_and_advances_sender() {
        let mut controller = new_controller();
        controller
            .apply_command(Command::GcodeLoad {
                name: "job.nc".to_string(),
                text: "G0 X0\nG0 Y0".to_string(),
                context: json!({}),
            })
            .unwrap();
        controller.apply_command(Command::GcodeStart).unwrap();
        let outbound = controller.pump();
        assert_eq!(outbound.len(), 2);
        controller.handle_line("ok");
        assert_eq!(controller.sender().received(), 1);
    }

    #[test]
    fn reset_clears_modal_state_and_returns_soft_reset_byte() {
        let mut controller = new_controller();
        let byte = controller.apply_command(Command::Reset).unwrap();
        assert_eq!(byte, Some(RealtimeByte::SoftReset.as_byte()));
    }

    #[test]
    fn reconnect_delay_grows_exponentially_then_stops() {
        let mut controller = new_controller();
        controller.reconnect_attempts = 3;
        assert_eq!(controller.next_reconnect_delay(), Some(Duration::from_secs(8)));
        controller.reconnect_attempts = MAX_RECONNECT_ATTEMPTS;
        assert_eq!(controller.next_reconnect_delay(), None);
    }

    #[tokio::test]
    async fn opening_a_nonexistent_port_leaves_it_disconnected_and_counts_the_attempt() {
        let mut controller = new_controller();
        controller.handle_open().await;
        assert!(!controller.is_connected());
        assert_eq!(controller.reconnect_attempts, 1);
    }

    #[test]
    fn homing_sets_homed_once_status_leaves_the_home_state() {
        let mut controller = new_controller();
        controller.apply_command(Command::Homing).unwrap();
        assert!(!controller.homed);
        controller.handle_line("<Home|MPos:0.000,0.000,0.000>");
        assert!(!controller.homed);
        assert!(controller.homing_in_progress);
        controller.handle_line("<Idle|MPos:0.000,0.000,0.000>");
        assert!(controller.homed);
        assert!(!controller.homing_in_progress);
    }

    #[test]
    fn reset_clears_the_homed_flag() {
        let mut controller = new_controller();
        controller.homed = true;
        controller.apply_command(Command::Reset).unwrap();
        assert!(!controller.homed);
    }

    #[test]
    fn soft_reset_clears_the_flow_controller_ledger() {
        let mut controller = new_controller();
        controller
            .apply_command(Command::Gcode {
                text: "G0 X0".to_string(),
                context: json!({}),
            })
            .unwrap();
        controller.pump();
        assert_eq!(controller.flow.in_flight(), 1);
        controller.apply_command(Command::Reset).unwrap();
        assert_eq!(controller.flow.in_flight(), 0);
    }

    #[test]
    fn welcome_clears_the_flow_controller_ledger() {
        let mut controller = new_controller();
        controller
            .apply_command(Command::Gcode {
                text: "G0 X0".to_string(),
                context: json!({}),
            })
            .unwrap();
        controller.pump();
        assert_eq!(controller.flow.in_flight(), 1);
        controller.handle_line("Grbl 1.1h ['$' for help]");
        assert_eq!(controller.flow.in_flight(), 0);
    }

    #[test]
    fn unlock_and_homing_preempt_already_queued_program_lines() {
        let mut controller = new_controller();
        controller
            .apply_command(Command::Gcode {
                text: "G0 X0".to_string(),
                context: json!({}),
            })
            .unwrap();
        controller.apply_command(Command::Unlock).unwrap();
        assert_eq!(controller.feeder.next().0, Some("$X".to_string()));
    }

    #[test]
    fn marlin_controller_unlocks_and_homes_with_marlin_gcode() {
        let mut controller = new_controller_for(ControllerFamily::Marlin);
        controller.apply_command(Command::Unlock).unwrap();
        assert_eq!(controller.feeder.next().0, Some("M999".to_string()));
        controller.apply_command(Command::Homing).unwrap();
        assert_eq!(controller.feeder.next().0, Some("G28".to_string()));
    }

    #[test]
    fn tinyg_controller_unlocks_and_homes_with_tinyg_gcode() {
        let mut controller = new_controller_for(ControllerFamily::TinyG);
        controller.apply_command(Command::Unlock).unwrap();
        assert_eq!(controller.feeder.next().0, Some("$clear".to_string()));
        controller.apply_command(Command::Homing).unwrap();
        assert_eq!(controller.feeder.next().0, Some("G28.2".to_string()));
    }

    #[test]
    fn marlin_controller_reports_its_own_family_in_status_snapshot() {
        let mut controller = new_controller_for(ControllerFamily::Marlin);
        controller.handle_line("X:0.00 Y:0.00 Z:0.00 E:0.00 Count X:0 Y:0 Z:0");
        let snapshot = controller.snapshot("Idle");
        assert_eq!(snapshot.controller_type, "marlin");
    }

    #[test]
    fn tinyg_queue_depth_reports_pace_the_queue_report_flow() {
        let mut controller = new_controller_for(ControllerFamily::TinyG);
        controller.handle_line(r#"{"qr":0}"#);
        assert!(!controller.flow.can_send(1));
        controller.handle_line(r#"{"qr":10}"#);
        assert!(controller.flow.can_send(1));
    }
}
