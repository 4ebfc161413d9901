use core::fmt::Write;

use str_buf::StrBuf;

use crate::{board::elapsed, Ack, Board, BusyState, Command, CommandError, Machine, TempUnit, DEBUG_DRYRUN};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Heater {
    Hotend(u8),
    Bed,
}

impl<B: Board> Machine<B> {
    /// The extruder named by `T`, or the active one.
    pub(crate) fn target_extruder(&mut self, command: &mut Command<'_>, code: u16) -> Result<u8, CommandError> {
        if !command.seen('T') {
            return Ok(self.active_extruder);
        }
        let index = command.value_byte();
        if index >= self.config.extruders {
            return Err(CommandError::InvalidExtruder { code, index: index as i32 });
        }
        Ok(index)
    }

    fn dry_run(&self) -> bool {
        self.debug_flags & DEBUG_DRYRUN != 0
    }

    fn heater_target(&self, heater: Heater) -> f32 {
        match heater {
            Heater::Hotend(e) => self.board.deg_target_hotend(e),
            Heater::Bed => self.board.deg_target_bed(),
        }
    }

    fn heater_temp(&self, heater: Heater) -> f32 {
        match heater {
            Heater::Hotend(e) => self.board.deg_hotend(e),
            Heater::Bed => self.board.deg_bed(),
        }
    }

    fn heater_states(&mut self, prefix: &str, extruder: u8) {
        let board = &self.board;
        let mut line = StrBuf::<128>::new();
        let mut written = write!(
            line,
            "{}T:{:.1} /{:.1} B:{:.1} /{:.1}",
            prefix,
            board.deg_hotend(extruder),
            board.deg_target_hotend(extruder),
            board.deg_bed(),
            board.deg_target_bed(),
        );
        if self.config.extruders > 1 {
            for e in 0..self.config.extruders {
                written = written.and_then(|_| write!(line, " T{}:{:.1} /{:.1}", e, board.deg_hotend(e), board.deg_target_hotend(e)));
            }
        }
        if written.is_err() {
            log::warn!("heater report truncated");
        }
        self.board.send_line(line.as_str());
    }

    /// Waits for a heater to reach its target. Reports every second and gives
    /// up on cooling when the temperature stops falling.
    fn wait_for_heater(&mut self, heater: Heater, no_wait_for_cooling: bool, extruder: u8) -> Result<(), CommandError> {
        let slope_deg = self.config.min_cooling_slope_deg;
        let slope_ms = self.config.min_cooling_slope_time_ms;
        let mut target = -1.0;
        let mut wants_to_cool = false;
        let mut old_temp = 9999.0;
        let mut next_temp_ms = self.board.millis();
        let mut next_cool_check_ms: Option<u32> = None;

        self.wait_for_heatup = true;
        let result = self.wait_until(BusyState::NotBusy, |m| {
            let current_target = m.heater_target(heater);
            if current_target != target {
                target = current_target;
                wants_to_cool = m.heater_temp(heater) > target;
                if no_wait_for_cooling && wants_to_cool {
                    return true;
                }
            }
            if !m.wait_for_heatup {
                return true;
            }

            let now = m.board.millis();
            if elapsed(now, next_temp_ms) {
                next_temp_ms = now.wrapping_add(1000);
                m.heater_states("", extruder);
            }

            let temp = m.heater_temp(heater);
            if wants_to_cool {
                if next_cool_check_ms.map_or(true, |at| elapsed(now, at)) {
                    if old_temp - temp < slope_deg {
                        log::info!("cooling stalled at {:.1}", temp);
                        return true;
                    }
                    next_cool_check_ms = Some(now.wrapping_add(slope_ms));
                    old_temp = temp;
                }
                temp <= target
            }
            else {
                temp >= target
            }
        });
        self.wait_for_heatup = false;
        result
    }

    pub(crate) fn gcode_m104(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        let extruder = self.target_extruder(command, 104)?;
        if self.dry_run() {
            return Ok(Ack::Send);
        }
        if command.seen('S') {
            let celsius = command.value_temp_abs(&self.units);
            self.board.set_target_hotend(celsius, extruder);
            if celsius > self.board.deg_hotend(extruder) {
                self.board.set_status("Heating...");
            }
        }
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m105(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        let extruder = self.target_extruder(command, 105)?;
        self.heater_states("ok ", extruder);
        Ok(Ack::Suppress)
    }

    pub(crate) fn gcode_m108(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.wait_for_heatup = false;
        Ok(Ack::Send)
    }

    /// `M109 S<temp>` waits while heating only, `R<temp>` also while cooling.
    pub(crate) fn gcode_m109(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        let extruder = self.target_extruder(command, 109)?;
        if self.dry_run() {
            return Ok(Ack::Send);
        }
        let no_wait_for_cooling = command.seen('S');
        if no_wait_for_cooling || command.seen('R') {
            let celsius = command.value_temp_abs(&self.units);
            self.board.set_target_hotend(celsius, extruder);
        }
        let status = if self.board.is_heating_hotend(extruder) { "Heating..." } else { "Cooling..." };
        self.board.set_status(status);

        self.wait_for_heater(Heater::Hotend(extruder), no_wait_for_cooling, extruder)?;
        self.board.set_status("Heating done.");
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m140(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        if self.dry_run() {
            return Ok(Ack::Send);
        }
        if command.seen('S') {
            let celsius = command.value_temp_abs(&self.units);
            self.board.set_target_bed(celsius);
        }
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m149(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        if command.seen('C') {
            self.units.temp_unit = TempUnit::Celsius;
        }
        else if command.seen('K') {
            self.units.temp_unit = TempUnit::Kelvin;
        }
        else if command.seen('F') {
            self.units.temp_unit = TempUnit::Fahrenheit;
        }
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m190(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        if self.dry_run() {
            return Ok(Ack::Send);
        }
        self.board.set_status("Bed Heating.");
        let no_wait_for_cooling = command.seen('S');
        if no_wait_for_cooling || command.seen('R') {
            let celsius = command.value_temp_abs(&self.units);
            self.board.set_target_bed(celsius);
        }
        let extruder = self.active_extruder;
        self.wait_for_heater(Heater::Bed, no_wait_for_cooling, extruder)?;
        self.board.set_status("Bed done.");
        Ok(Ack::Send)
    }
}
