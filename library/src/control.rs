use arrayvec::ArrayString;
use itertools::Itertools;

use crate::{
    board::elapsed, Ack, Board, BusyState, Command, CommandError, Machine, DEBUG_COMMUNICATION,
    DEBUG_DRYRUN, DEBUG_ECHO, DEBUG_ERRORS, DEBUG_INFO, DEBUG_LEVELING, XYZ_ID_LIST,
};

const LED_PIN: i32 = 13;
const PROTOCOL_VERSION: &str = "1.0";
const MAX_KEEPALIVE_INTERVAL: u8 = 60;

const DEBUG_NAMES: [(u8, &str); 6] = [
    (DEBUG_ECHO, "ECHO"),
    (DEBUG_INFO, "INFO"),
    (DEBUG_ERRORS, "ERRORS"),
    (DEBUG_DRYRUN, "DRYRUN"),
    (DEBUG_COMMUNICATION, "COMMUNICATION"),
    (DEBUG_LEVELING, "LEVELING"),
];

impl<B: Board> Machine<B> {
    fn is_sensitive_pin(&self, pin: i32) -> bool {
        self.config.sensitive_pins.iter().any(|p| *p as i32 == pin)
    }

    fn set_ready_status(&mut self) {
        let mut status = ArrayString::<32>::new();
        if core::fmt::write(&mut status, format_args!("{} ready.", self.config.machine_name)).is_err() {
            status = ArrayString::from("Printer ready.").unwrap_or_default();
        }
        self.board.set_status(&status);
    }

    /// Runs once at power on, before the first `poll`.
    pub fn start(&mut self) {
        self.send(format_args!("start"));
        if let Some(settings) = self.board.load() {
            log::info!("stored settings found");
            self.apply_settings(&settings);
        }
        self.set_ready_status();
    }

    /// `T<n>`: select the active extruder.
    pub(crate) fn gcode_t(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        let tool = command.id.code;
        if tool >= self.config.extruders as u16 {
            return Err(CommandError::InvalidTool(tool as i32));
        }
        if self.config.extruders > 1 {
            if command.seen('F') {
                let feedrate = command.value_linear_units(&self.units);
                if feedrate > 0.0 {
                    self.feedrate = feedrate / 60.0;
                }
            }
            if tool as u8 != self.active_extruder {
                self.synchronize()?;
                self.active_extruder = tool as u8;
                self.sync_plan_position();
            }
            let active_extruder = self.active_extruder;
            self.echo(format_args!("Active Extruder: {}", active_extruder));
        }
        Ok(Ack::Send)
    }

    /// `M0`/`M1`: wait for a click, or at most P milliseconds / S seconds.
    pub(crate) fn gcode_m0_m1(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        let mut wait_ms = 0;
        let mut has_time = false;
        if command.seen('P') {
            wait_ms = command.value_millis();
            has_time = wait_ms > 0;
        }
        if command.seen('S') {
            wait_ms = command.value_millis_from_seconds();
            has_time |= wait_ms > 0;
        }
        if !has_time && command.has_args() {
            self.board.set_status(command.args);
        }
        else {
            self.board.set_status("Click to resume...");
        }

        self.synchronize()?;
        if wait_ms > 0 {
            let until = self.board.millis().wrapping_add(wait_ms);
            self.wait_until(BusyState::PausedForUser, |m| elapsed(m.board.millis(), until) || m.board.clicked())?;
        }
        else {
            if !self.board.detected() {
                return Ok(Ack::Send);
            }
            self.wait_until(BusyState::PausedForUser, |m| m.board.clicked())?;
        }

        if self.board.is_printing() {
            self.board.set_status("Resuming print");
        }
        else {
            self.set_ready_status();
        }
        Ok(Ack::Send)
    }

    /// `M42 P<pin> S<value>`: drive an output pin.
    pub(crate) fn gcode_m42(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        if !command.seen('S') {
            return Ok(Ack::Send);
        }
        let value = command.value_int();
        if !(0..=255).contains(&value) {
            return Ok(Ack::Send);
        }
        let pin = if command.seen('P') { command.value_int() } else { LED_PIN };
        if !(0..=255).contains(&pin) || self.is_sensitive_pin(pin) {
            log::warn!("M42 refused pin {}", pin);
            return Ok(Ack::Send);
        }
        self.board.write(pin as u8, value as u8);
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m110(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        if command.seen('N') {
            self.validator.set_last_line(command.value_long());
        }
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m111(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.debug_flags = if command.seen('S') { command.value_byte() } else { 0 };
        let flags = self.debug_flags;
        if flags == 0 {
            self.echo(format_args!("DEBUG:off"));
        }
        else {
            let names = DEBUG_NAMES.iter().filter(|(bit, _)| flags & bit != 0).map(|(_, name)| name).format(",");
            self.echo(format_args!("DEBUG:{}", names));
        }
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m112(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.kill();
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m113(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        if command.seen('S') {
            self.keepalive_interval = command.value_byte().min(MAX_KEEPALIVE_INTERVAL);
        }
        else {
            let keepalive_interval = self.keepalive_interval;
            self.echo(format_args!("M113 S{}", keepalive_interval));
        }
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m115(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        let machine_name = self.config.machine_name;
        let extruders = self.config.extruders;
        self.send(format_args!(
            "FIRMWARE_NAME:{} {} PROTOCOL_VERSION:{} MACHINE_TYPE:{} EXTRUDER_COUNT:{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            PROTOCOL_VERSION,
            machine_name,
            extruders,
        ));
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m117(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.board.set_status(command.args);
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m119(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.send(format_args!("Reporting endstop status"));
        for axis in XYZ_ID_LIST {
            let side = if *self.config.home_dir.match_id(axis) > 0 { "max" } else { "min" };
            let state = if self.board.triggered(axis) { "TRIGGERED" } else { "open" };
            let letter = axis.letter().to_ascii_lowercase();
            self.send(format_args!("{}_{}: {}", letter, side, state));
        }
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m120(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.board.enable_globally(true);
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m121(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.board.enable_globally(false);
        Ok(Ack::Send)
    }

    /// `M226 P<pin> S<state>`: wait for an input pin. S-1 waits for a change.
    pub(crate) fn gcode_m226(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        if !command.seen('P') {
            return Ok(Ack::Send);
        }
        let pin = command.value_int();
        let state = if command.seen('S') { command.value_int() } else { -1 };
        if !(-1..=1).contains(&state) || !(0..=255).contains(&pin) || self.is_sensitive_pin(pin) {
            return Ok(Ack::Send);
        }
        let pin = pin as u8;
        self.synchronize()?;
        self.board.set_input(pin);
        let target = match state {
            1 => true,
            0 => false,
            _ => !self.board.read(pin),
        };
        self.wait_until(BusyState::PausedForUser, |m| m.board.read(pin) == target)?;
        Ok(Ack::Send)
    }

    /// `M999`: leave the stopped state. `S1` skips the resend request.
    pub(crate) fn gcode_m999(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        if command.seen('S') && command.value_bool() {
            self.stopped = false;
            return Ok(Ack::Send);
        }
        self.restart();
        self.flush_serial_request_resend();
        Ok(Ack::Suppress)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::string::String;

    use crate::{mock::*, MachineConfig, DEBUG_DRYRUN, DEBUG_ECHO};

    #[test]
    fn start_loads_stored_settings() {
        let mut m = machine();
        m.board.stored = Some(crate::Settings { steps_per_unit: crate::XYZEData::new(100.0, 100.0, 400.0, 90.0), ..m.settings() });
        m.start();
        assert_eq!(m.board.take_output(), ["start"]);
        assert_eq!(m.steps_per_unit.z, 400.0);
        assert_eq!(m.board.steps_per_unit.e, 90.0);
        assert_eq!(m.board.status, "3D Printer ready.");
    }

    #[test]
    fn single_extruder_rejects_other_tools() {
        let mut m = machine();
        run(&mut m, "T0\nT1\n");
        assert_eq!(m.board.take_output(), ["ok", "echo:T1 Invalid extruder", "ok"]);
        assert_eq!(m.active_extruder, 0);
    }

    #[test]
    fn tool_change_reports_active_extruder() {
        let mut m = machine_with(MachineConfig { extruders: 2, ..Default::default() });
        run(&mut m, "T1\nG1 E5\n");
        assert_eq!(m.active_extruder, 1);
        assert_eq!(m.board.take_output()[0], "echo:Active Extruder: 1");
        assert_eq!(m.board.moves.last().map(|mv| mv.extruder), Some(1));
    }

    #[test]
    fn timed_user_wait() {
        let mut m = machine();
        m.board.tick_ms = 100;
        let start = m.board.now;
        run(&mut m, "M0 S1\n");
        assert!(m.board.now - start >= 1000);
        assert_eq!(m.board.status, "3D Printer ready.");
    }

    #[test]
    fn user_wait_needs_a_display() {
        let mut m = machine();
        run(&mut m, "M1 Load filament\n");
        assert_eq!(m.board.status, "Load filament");
        assert_eq!(m.board.take_output(), ["ok"]);
    }

    #[test]
    fn user_wait_ends_on_click() {
        let mut m = machine();
        m.board.display = true;
        m.board.tick_ms = 10;
        m.board.click_at = Some(200);
        run(&mut m, "M0\n");
        assert!(m.board.now >= 200);
        assert_eq!(m.board.status, "3D Printer ready.");
    }

    #[test]
    fn pin_writes_skip_sensitive_pins() {
        let mut m = machine_with(MachineConfig { sensitive_pins: &[4], ..Default::default() });
        run(&mut m, "M42 P7 S128\nM42 P4 S1\nM42 S1\nM42 P7 S300\n");
        assert_eq!(m.board.pin_writes, [(7, 128), (13, 1)]);
    }

    #[test]
    fn set_line_number() {
        let mut m = machine();
        run(&mut m, "M110 N41\n");
        assert_eq!(m.validator.last_line(), 41);
    }

    #[test]
    fn debug_flags_are_named() {
        let mut m = machine();
        run(&mut m, "M111 S9\n");
        assert_eq!(m.debug_flags, DEBUG_ECHO | DEBUG_DRYRUN);
        assert_eq!(m.board.take_output()[0], "echo:DEBUG:ECHO,DRYRUN");
        run(&mut m, "M111\n");
        let out = m.board.take_output();
        assert_eq!(out[0], "echo:M111", "Echo still on while this line ran.");
        assert_eq!(out[1], "echo:DEBUG:off");
    }

    #[test]
    fn queued_kill_is_recoverable() {
        let mut m = machine();
        m.process_command("M112", true);
        assert!(m.stopped);
        m.board.take_output();
        m.process_command("M999 S1", true);
        assert!(!m.stopped);
        assert_eq!(m.board.take_output(), ["ok"]);
    }

    #[test]
    fn keepalive_interval() {
        let mut m = machine();
        run(&mut m, "M113 S90\nM113\n");
        assert_eq!(m.keepalive_interval, 60);
        assert_eq!(m.board.take_output(), ["ok", "echo:M113 S60", "ok"]);
    }

    #[test]
    fn firmware_info() {
        let mut m = machine();
        run(&mut m, "M115\n");
        let out = m.board.take_output();
        assert!(out[0].starts_with("FIRMWARE_NAME:gcode_core "), "{:?}", out);
        assert!(out[0].ends_with("MACHINE_TYPE:3D Printer EXTRUDER_COUNT:1"));
    }

    #[test]
    fn endstop_report() {
        let mut m = machine();
        m.board.endstop_hit.z = true;
        run(&mut m, "M119\n");
        assert_eq!(m.board.take_output(), [
            "Reporting endstop status",
            "x_min: open",
            "y_min: open",
            "z_min: TRIGGERED",
            "ok",
        ]);
    }

    #[test]
    fn endstops_globally() {
        let mut m = machine();
        run(&mut m, "M120\n");
        assert!(m.board.endstops_global);
        run(&mut m, "M121\n");
        assert!(!m.board.endstops_global);
    }

    #[test]
    fn wait_for_pin_change() {
        let mut m = machine();
        m.board.tick_ms = 10;
        m.board.toggle_pin_at = Some((3, 100));
        run(&mut m, "M226 P3 S-1\n");
        assert!(m.board.pins[3]);
        assert!(m.board.now >= 100);
        assert_eq!(m.board.take_output().last().map(String::as_str), Some("ok"));
    }

    #[test]
    fn sensitive_pin_is_not_awaited() {
        let mut m = machine_with(MachineConfig { sensitive_pins: &[3], ..Default::default() });
        run(&mut m, "M226 P3 S1\n");
        assert_eq!(m.board.take_output(), ["ok"]);
    }
}
