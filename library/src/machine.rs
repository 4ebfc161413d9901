use core::fmt::{self, Write};

use str_buf::StrBuf;

use crate::{
    board::elapsed, parse, Ack, Board, Channel, CanReceiveMut, CanSendMut, CircularBuffer, Command, CommandError,
    CommandLine, DeltaGrid, Fed, HandlerTable, LineReader, LineValidator, MachineConfig, Matrix3x3, MeshLevel, Parsed,
    ProtocolError, SourceKind, Units, XYZEData, BUFSIZE, DEFAULT_FILAMENT_DIA, INJECTED_CAPACITY, MAX_EXTRUDERS,
};

pub const MSG_ERR_STOPPED: &str =
    "Printer stopped due to errors. Fix the error and use M999 to restart. (Temperature is reset. Set it after restarting)";

pub const DEBUG_ECHO: u8 = 1;
pub const DEBUG_INFO: u8 = 2;
pub const DEBUG_ERRORS: u8 = 4;
pub const DEBUG_DRYRUN: u8 = 8;
pub const DEBUG_COMMUNICATION: u8 = 16;
pub const DEBUG_LEVELING: u8 = 32;

const REPLY_CAPACITY: usize = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusyState {
    NotBusy,
    InHandler,
    InProcess,
    PausedForUser,
    PausedForInput,
}

#[derive(Clone, Debug, Default)]
pub struct QueuedCommand {
    pub line: CommandLine,
    /// Serial lines are acknowledged; file and injected lines are not.
    pub send_ok: bool,
}

/// The whole command session: intake, queue, dispatcher and the machine
/// state every handler works on.
pub struct Machine<B: Board> {
    pub board: B,
    pub config: MachineConfig,
    queue: CircularBuffer<QueuedCommand, BUFSIZE>,
    injected: Channel<CommandLine, INJECTED_CAPACITY>,
    serial_reader: LineReader,
    file_reader: LineReader,
    stop_buffering: bool,
    pub validator: LineValidator,
    handlers: HandlerTable<B>,
    current_send_ok: bool,

    pub current_position: XYZEData<f32>,
    pub destination: XYZEData<f32>,
    pub home_offset: XYZEData<f32>,
    pub axis_homed: XYZEData<bool>,
    pub relative_mode: bool,
    pub relative_e: bool,
    /// mm/s
    pub feedrate: f32,
    pub feedrate_percentage: i32,
    pub units: Units,
    pub active_extruder: u8,
    pub steps_per_unit: XYZEData<f32>,
    pub zprobe_zoffset: f32,
    /// mm/min between probe points, `G29 S` overrides it.
    pub xy_probe_speed: f32,
    pub filament_size: [f32; MAX_EXTRUDERS],

    pub mesh: MeshLevel,
    pub(crate) mesh_probe_point: i32,
    pub bed_level_matrix: Matrix3x3,
    pub delta_bed_level: DeltaGrid,
    pub(crate) probe_deployed: bool,

    pub stopped: bool,
    stopped_last_n: i32,
    abort_wait: bool,
    pub(crate) wait_for_heatup: bool,
    pub busy_state: BusyState,
    next_busy_signal_ms: u32,
    pub keepalive_interval: u8,
    pub debug_flags: u8,
}

impl<B: Board> Machine<B> {
    pub fn new(board: B, config: MachineConfig) -> Self {
        let handlers = HandlerTable::new(&config);
        let mut machine = Self {
            board,
            queue: Default::default(),
            injected: Default::default(),
            serial_reader: LineReader::new(SourceKind::Serial),
            file_reader: LineReader::new(SourceKind::File),
            stop_buffering: false,
            validator: LineValidator::default(),
            handlers,
            current_send_ok: false,
            current_position: Default::default(),
            destination: Default::default(),
            home_offset: Default::default(),
            axis_homed: Default::default(),
            relative_mode: false,
            relative_e: false,
            feedrate: config.default_feedrate,
            feedrate_percentage: 100,
            units: Units::default(),
            active_extruder: 0,
            steps_per_unit: config.steps_per_unit,
            zprobe_zoffset: config.probe.z_offset,
            xy_probe_speed: config.probe.xy_speed,
            filament_size: [DEFAULT_FILAMENT_DIA; MAX_EXTRUDERS],
            mesh: MeshLevel::new(&config.mesh),
            mesh_probe_point: -1,
            bed_level_matrix: Matrix3x3::identity(),
            delta_bed_level: DeltaGrid::default(),
            probe_deployed: false,
            stopped: false,
            stopped_last_n: 0,
            abort_wait: false,
            wait_for_heatup: false,
            busy_state: BusyState::NotBusy,
            next_busy_signal_ms: 0,
            keepalive_interval: config.keepalive_interval,
            debug_flags: DEBUG_INFO | DEBUG_ERRORS,
            config,
        };
        machine.board.set_steps_per_unit(machine.steps_per_unit);
        machine.sync_plan_position();
        machine
    }

    /// One main loop pass: take input, run at most one command, then idle.
    pub fn poll(&mut self) {
        self.get_available_commands();
        self.process_next_command();
        self.idle();
    }

    pub fn has_pending_commands(&self) -> bool {
        !self.queue.is_empty() || !self.injected.is_empty()
    }

    pub fn queued_commands(&self) -> usize {
        self.queue.length()
    }

    /// Feeds commands back into the firmware ahead of any external input.
    /// Several commands are separated by newlines.
    pub fn enqueue_and_echo_commands(&mut self, commands: &str) {
        for part in commands.split('\n').filter(|p| !p.is_empty()) {
            match CommandLine::from(part) {
                Ok(line) => {
                    if self.injected.send_mut(line).is_err() {
                        log::warn!("injected command dropped, channel full: {}", part);
                    }
                }
                Err(_) => log::warn!("injected command too long: {}", part),
            }
        }
        self.drain_injected();
    }

    fn get_available_commands(&mut self) {
        if self.drain_injected() {
            return;
        }
        self.get_serial_commands();
        self.get_file_commands();
    }

    /// Moves one injected command into the queue. True while more remain.
    fn drain_injected(&mut self) -> bool {
        if self.injected.is_empty() {
            return false;
        }
        if !self.queue.is_full() {
            if let Some(line) = self.injected.receive_mut() {
                self.echo(format_args!("enqueueing \"{}\"", line));
                self.push_command(line, false);
            }
        }
        !self.injected.is_empty()
    }

    fn push_command(&mut self, line: CommandLine, send_ok: bool) {
        if let Err(rejected) = self.queue.push(QueuedCommand { line, send_ok }) {
            log::warn!("command queue full, dropped {}", rejected.line);
        }
    }

    fn get_serial_commands(&mut self) {
        while !self.queue.is_full() {
            let Some(byte) = self.board.read_byte() else { break };
            let Fed::Line(line) = self.serial_reader.feed(byte) else { continue };
            if let Err(e) = self.validator.check(&line) {
                self.protocol_error(e);
                return;
            }
            if self.emergency_command(&line) {
                self.send(format_args!("ok"));
                continue;
            }
            log::trace!("serial < {}", line);
            self.push_command(line, true);
        }
    }

    /// Exact `M108`, `M112` and `M410` lines act as soon as they arrive.
    fn emergency_command(&mut self, line: &str) -> bool {
        match line {
            "M108" => self.wait_for_heatup = false,
            "M112" => self.kill(),
            "M410" => self.quickstop_stepper(),
            _ => return false,
        }
        true
    }

    fn get_file_commands(&mut self) {
        if !self.board.is_printing() {
            return;
        }
        if self.queue.is_empty() {
            self.stop_buffering = false;
        }
        while !self.queue.is_full() && !self.stop_buffering {
            match self.board.next_byte() {
                Ok(Some(byte)) => match self.file_reader.feed(byte) {
                    Fed::Pending => {}
                    Fed::Line(line) => self.push_command(line, false),
                    Fed::Halt(line) => {
                        if let Some(line) = line {
                            self.push_command(line, false);
                        }
                        self.stop_buffering = true;
                    }
                },
                Ok(None) => {
                    if let Some(line) = self.file_reader.finish() {
                        self.push_command(line, false);
                    }
                    self.send(format_args!("Done printing file"));
                    self.board.print_finished();
                    self.board.check_autostart();
                    return;
                }
                Err(_) => {
                    self.error(format_args!("SD read error"));
                    return;
                }
            }
        }
    }

    fn protocol_error(&mut self, e: ProtocolError) {
        log::warn!("rejected line: {}", e);
        self.error(format_args!("{}", e));
        if e.requests_resend() {
            self.flush_serial_request_resend();
        }
    }

    /// Drops any partial input and asks the host to resend from the next line.
    pub(crate) fn flush_serial_request_resend(&mut self) {
        let _ = self.serial_reader.finish();
        self.send(format_args!("Resend: {}", self.validator.last_line().wrapping_add(1)));
        self.send(format_args!("ok"));
    }

    fn process_next_command(&mut self) {
        if let Some(next) = self.queue.pop() {
            self.process_command(&next.line, next.send_ok);
        }
    }

    pub fn process_command(&mut self, line: &str, send_ok: bool) {
        if self.debug_flags & DEBUG_ECHO != 0 {
            self.echo(format_args!("{}", line));
        }
        self.current_send_ok = send_ok;
        let ack = match parse(line) {
            Parsed::Unrecognized(text) => {
                self.unknown_command(text);
                Ack::Send
            }
            Parsed::Command(mut command) => self.dispatch(&mut command),
        };
        self.busy_state = BusyState::NotBusy;
        if ack == Ack::Send {
            self.ok_to_send();
        }
    }

    fn dispatch(&mut self, command: &mut Command<'_>) -> Ack {
        if self.stopped && command.id.is_motion() {
            self.error(format_args!("{}", MSG_ERR_STOPPED));
            return Ack::Send;
        }
        let Some(handler) = self.handlers.resolve(command.id) else {
            self.unknown_command(command.text);
            return Ack::Send;
        };
        log::debug!("dispatch {}", command.text);
        self.busy_state = BusyState::InHandler;
        match handler(self, command) {
            Ok(ack) => ack,
            Err(CommandError::Cancelled) => {
                log::debug!("{} cancelled", command.id);
                Ack::Send
            }
            Err(e) => {
                self.report_error(&e);
                Ack::Send
            }
        }
    }

    fn unknown_command(&mut self, text: &str) {
        self.echo(format_args!("Unknown command: \"{}\"", text));
    }

    pub(crate) fn report_error(&mut self, e: &CommandError) {
        self.send(format_args!("{}{}", e.prefix(), e));
    }

    pub(crate) fn ok_to_send(&mut self) {
        if self.current_send_ok {
            self.send(format_args!("ok"));
        }
    }

    pub(crate) fn send(&mut self, args: fmt::Arguments<'_>) {
        let mut line = StrBuf::<REPLY_CAPACITY>::new();
        if line.write_fmt(args).is_err() {
            log::warn!("reply truncated");
        }
        self.board.send_line(line.as_str());
    }

    pub(crate) fn echo(&mut self, args: fmt::Arguments<'_>) {
        self.send(format_args!("echo:{}", args));
    }

    pub(crate) fn error(&mut self, args: fmt::Arguments<'_>) {
        self.send(format_args!("Error:{}", args));
    }

    /// Housekeeping run on every pass of the main loop and of every wait.
    pub fn idle(&mut self) {
        self.host_keepalive();
        if let Some(fault) = self.board.take_fault() {
            log::error!("thermal fault: {}", fault);
            self.error(format_args!("{}, system stopped!", fault));
            self.stop();
        }
        self.board.idle();
    }

    fn host_keepalive(&mut self) {
        let now = self.board.millis();
        if self.keepalive_interval != 0 && self.busy_state != BusyState::NotBusy {
            if !elapsed(now, self.next_busy_signal_ms) {
                return;
            }
            match self.busy_state {
                BusyState::InHandler | BusyState::InProcess => self.echo(format_args!("busy: processing")),
                BusyState::PausedForUser => self.echo(format_args!("busy: paused for user")),
                BusyState::PausedForInput => self.echo(format_args!("busy: paused for input")),
                BusyState::NotBusy => {}
            }
        }
        self.next_busy_signal_ms = now.wrapping_add(self.keepalive_interval as u32 * 1000);
    }

    /// Cooperative wait: idles until `done` holds, or fails when a stop
    /// arrives meanwhile. Serial input keeps flowing so the emergency lines
    /// still reach the machine.
    pub(crate) fn wait_until(&mut self, state: BusyState, mut done: impl FnMut(&mut Self) -> bool) -> Result<(), CommandError> {
        let previous = core::mem::replace(&mut self.busy_state, state);
        self.abort_wait = false;
        let result = loop {
            if done(self) {
                break Ok(());
            }
            self.get_serial_commands();
            self.idle();
            if self.abort_wait {
                break Err(CommandError::Cancelled);
            }
        };
        self.busy_state = previous;
        result
    }

    /// Waits for every planned move to finish.
    pub fn synchronize(&mut self) -> Result<(), CommandError> {
        let state = self.busy_state;
        self.wait_until(state, |m| !m.board.has_blocks_queued())
    }

    /// Enters the stopped state: heaters off, motion refused until M999.
    pub fn stop(&mut self) {
        self.board.disable_all_heaters();
        self.abort_wait = true;
        if !self.stopped {
            self.stopped = true;
            self.stopped_last_n = self.validator.last_line();
            self.error(format_args!("{}", MSG_ERR_STOPPED));
            self.board.set_status("Stopped.");
        }
    }

    /// Emergency stop. Pending commands are flushed and every axis loses
    /// its home reference.
    pub fn kill(&mut self) {
        log::error!("kill requested");
        self.board.quick_stop();
        self.board.disable_all_heaters();
        self.queue.clear();
        self.injected.clear();
        self.axis_homed = XYZEData::from_clone(false);
        self.error(format_args!("Printer halted. kill() called!"));
        self.board.set_status("KILLED.");
        self.stop();
    }

    pub(crate) fn restart(&mut self) {
        self.stopped = false;
        self.validator.set_last_line(self.stopped_last_n);
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::{format, string::String};

    use super::*;
    use crate::{mock::*, protocol::checksum, Host};

    fn numbered(n: i32, body: &str) -> String {
        let text = format!("N{} {}", n, body);
        format!("{}*{}\n", text, checksum(&text))
    }

    #[test]
    fn unknown_command_still_acks() {
        let mut m = machine();
        run(&mut m, "M9999\n");
        assert_eq!(m.board.take_output(), ["echo:Unknown command: \"M9999\"", "ok"]);
    }

    #[test]
    fn garbage_line_is_unknown() {
        let mut m = machine();
        run(&mut m, "hello\n");
        assert_eq!(m.board.take_output(), ["echo:Unknown command: \"hello\"", "ok"]);
    }

    #[test]
    fn numbered_line_accepted() {
        let mut m = machine();
        run(&mut m, &numbered(1, "M400"));
        assert_eq!(m.validator.last_line(), 1);
        assert_eq!(m.board.take_output(), ["ok"]);
    }

    #[test]
    fn line_gap_requests_resend() {
        let mut m = machine();
        run(&mut m, &numbered(1, "M400"));
        m.board.take_output();
        run(&mut m, &numbered(3, "M400"));
        assert_eq!(m.validator.last_line(), 1);
        assert_eq!(m.board.take_output(), [
            "Error:Line Number is not Last Line Number+1, Last Line: 1",
            "Resend: 2",
            "ok",
        ]);
    }

    #[test]
    fn corrupted_checksum_requests_resend() {
        let mut m = machine();
        run(&mut m, "N1 M400*0\n");
        let out = m.board.take_output();
        assert_eq!(out[0], "Error:checksum mismatch, Last Line: 0");
        assert_eq!(out[1], "Resend: 1");
        assert_eq!(m.queued_commands(), 0, "Rejected line must not be queued.");
    }

    #[test]
    fn checksum_without_number_is_not_resent() {
        let mut m = machine();
        run(&mut m, "M400*5\n");
        assert_eq!(m.board.take_output(), ["Error:No Line Number with checksum, Last Line: 0"]);
    }

    #[test]
    fn queue_backpressure_stops_reading() {
        let mut m = machine();
        m.board.feed("M400\nM400\nM400\nM400\nM400\nM400\n");
        m.get_available_commands();
        assert_eq!(m.queued_commands(), BUFSIZE);
        assert!(!m.board.input.is_empty(), "Input beyond the queue stays unread.");
        run_until_drained(&mut m);
        assert_eq!(m.board.take_output().len(), 6);
    }

    #[test]
    fn injected_commands_run_before_serial() {
        let mut m = machine();
        m.board.feed("M117 from host\n");
        m.enqueue_and_echo_commands("M117 first\nM117 second");
        run_until_drained(&mut m);
        assert_eq!(m.board.status, "from host");
        let out = m.board.take_output();
        assert_eq!(out[0], "echo:enqueueing \"M117 first\"");
        assert_eq!(out[1], "echo:enqueueing \"M117 second\"");
        assert_eq!(out.last().map(String::as_str), Some("ok"), "Only the host line is acknowledged.");
        assert_eq!(out.iter().filter(|l| *l == "ok").count(), 1);
    }

    #[test]
    fn stopped_rejects_motion() {
        let mut m = machine();
        m.stop();
        m.board.take_output();
        run(&mut m, "G1 X10\n");
        assert_eq!(m.board.take_output(), [format!("Error:{}", MSG_ERR_STOPPED), String::from("ok")]);
        assert!(m.board.moves.is_empty());
    }

    #[test]
    fn restart_clears_stop_and_requests_resend() {
        let mut m = machine();
        run(&mut m, &numbered(1, "M400"));
        m.stop();
        m.board.take_output();
        run(&mut m, &numbered(2, "M999"));
        assert!(!m.stopped);
        assert_eq!(m.board.take_output(), ["Resend: 2", "ok"]);
        assert_eq!(m.validator.last_line(), 1);
    }

    #[test]
    fn emergency_kill_acts_at_intake() {
        let mut m = machine();
        m.axis_homed = XYZEData::from_clone(true);
        run(&mut m, "M112\n");
        assert!(m.stopped);
        assert!(!m.axis_homed.x, "Kill forgets the home reference.");
        assert_eq!(m.board.quick_stops, 1);
        let out = m.board.take_output();
        assert_eq!(out[0], "Error:Printer halted. kill() called!");
        assert_eq!(out.last().map(String::as_str), Some("ok"));
    }

    #[test]
    fn thermal_fault_stops_machine() {
        let mut m = machine();
        m.board.fault = Some(crate::ThermalFault::ThermalRunaway);
        m.idle();
        assert!(m.stopped);
        assert_eq!(m.board.take_output()[0], "Error:Thermal Runaway, system stopped!");
    }

    #[test]
    fn keepalive_while_busy() {
        let mut m = machine();
        m.board.tick_ms = 500;
        m.board.blocks_queued.set(12);
        m.busy_state = BusyState::InHandler;
        assert_eq!(m.synchronize(), Ok(()));
        let out = m.board.take_output();
        assert!(out.iter().any(|l| l == "echo:busy: processing"), "{:?}", out);
    }

    #[test]
    fn file_source_lines_are_not_acked() {
        let mut m = machine();
        m.board.start_file("M117 one\nM117 two#M117 three");
        run_until_drained(&mut m);
        assert_eq!(m.board.status, "three");
        assert_eq!(m.board.take_output(), ["Done printing file"]);
        assert!(m.board.print_finished);
        assert_eq!(m.board.autostart_checks, 1);
    }

    #[test]
    fn echo_debug_flag() {
        let mut m = machine();
        m.debug_flags |= DEBUG_ECHO;
        m.process_command("M400", true);
        assert_eq!(m.board.take_output(), ["echo:M400", "ok"]);
    }

    #[test]
    fn host_trait_receives_lines() {
        let mut board = MockBoard::default();
        board.send_line("hi");
        assert_eq!(board.take_output(), ["hi"]);
    }
}
