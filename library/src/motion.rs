use crate::{Ack, AxisId, Board, Command, CommandError, Machine, Vector3, XYZEData, AXIS_ID_LIST, XYZ_ID_LIST};

impl<B: Board> Machine<B> {
    /// Logical position with the active bed correction applied.
    pub(crate) fn leveled(&self, logical: XYZEData<f32>) -> XYZEData<f32> {
        let mut target = logical;
        if self.mesh.active() {
            target.z += self.mesh.get_z(logical.x - self.home_offset.x, logical.y - self.home_offset.y);
        }
        else if !self.bed_level_matrix.is_identity() {
            let rotated = Vector3::new(logical.x, logical.y, logical.z).apply_rotation(&self.bed_level_matrix);
            target.x = rotated.x;
            target.y = rotated.y;
            target.z = rotated.z;
        }
        else if self.delta_bed_level.is_probed() {
            target.z += self.delta_bed_level.z_at(logical.x, logical.y);
        }
        target
    }

    /// Inverse of [`Machine::leveled`].
    pub(crate) fn unleveled(&self, leveled: XYZEData<f32>) -> XYZEData<f32> {
        let mut logical = leveled;
        if self.mesh.active() {
            logical.z -= self.mesh.get_z(leveled.x - self.home_offset.x, leveled.y - self.home_offset.y);
        }
        else if !self.bed_level_matrix.is_identity() {
            let inverse = self.bed_level_matrix.transpose();
            let rotated = Vector3::new(leveled.x, leveled.y, leveled.z).apply_rotation(&inverse);
            logical.x = rotated.x;
            logical.y = rotated.y;
            logical.z = rotated.z;
        }
        else if self.delta_bed_level.is_probed() {
            logical.z -= self.delta_bed_level.z_at(leveled.x, leveled.y);
        }
        logical
    }

    /// Tells the planner that the machine stands at `current_position`.
    pub fn sync_plan_position(&mut self) {
        let actuator = self.board.to_actuator(self.leveled(self.current_position));
        self.board.set_position(actuator);
    }

    pub(crate) fn sync_plan_position_e(&mut self) {
        self.board.set_e_position(self.current_position.e);
    }

    /// Where the steppers are, as a logical position.
    pub(crate) fn position_from_steppers(&self) -> XYZEData<f32> {
        let logical = self.board.to_logical(self.board.stepper_position());
        self.unleveled(logical)
    }

    fn plan_move(&mut self, target: XYZEData<f32>, feedrate: f32) {
        let actuator = self.board.to_actuator(self.leveled(target));
        log::trace!("move to {:?} at {} mm/s", target, feedrate);
        self.board.buffer_line(actuator, feedrate, self.active_extruder);
    }

    /// Feedrate in mm/s.
    pub(crate) fn line_to_current_position(&mut self, feedrate: f32) {
        self.plan_move(self.current_position, feedrate);
    }

    /// Raises before travelling and lowers after, then waits for the move.
    /// Feedrates are mm/s; `None` picks the Z homing or probe travel speed.
    pub(crate) fn do_blocking_move_to(&mut self, x: f32, y: f32, z: f32, feedrate: Option<f32>) -> Result<(), CommandError> {
        let z_feedrate = feedrate.unwrap_or(self.config.homing_feedrate.z / 60.0);
        if self.current_position.z < z {
            self.current_position.z = z;
            self.line_to_current_position(z_feedrate);
        }
        self.current_position.x = x;
        self.current_position.y = y;
        self.line_to_current_position(feedrate.unwrap_or(self.xy_probe_speed / 60.0));
        if self.current_position.z > z {
            self.current_position.z = z;
            self.line_to_current_position(z_feedrate);
        }
        self.synchronize()
    }

    pub(crate) fn do_blocking_move_to_xy(&mut self, x: f32, y: f32, feedrate: Option<f32>) -> Result<(), CommandError> {
        self.do_blocking_move_to(x, y, self.current_position.z, feedrate)
    }

    pub(crate) fn do_blocking_move_to_z(&mut self, z: f32, feedrate: Option<f32>) -> Result<(), CommandError> {
        self.do_blocking_move_to(self.current_position.x, self.current_position.y, z, feedrate)
    }

    pub(crate) fn set_axis_is_at_home(&mut self, axis: AxisId) {
        let mut home = self.config.base_home_pos(axis) + self.home_offset.match_id(axis);
        if axis == AxisId::Z && self.has_probe() && *self.config.home_dir.match_id(AxisId::Z) < 0 {
            home -= self.zprobe_zoffset;
        }
        *self.current_position.match_id_mut(axis) = home;
        *self.axis_homed.match_id_mut(axis) = true;
        log::debug!("{} at home {}", axis.letter(), home);
    }

    pub(crate) fn set_home_offset(&mut self, axis: AxisId, offset: f32) {
        let current = self.current_position.match_id_mut(axis);
        *current += offset - *self.home_offset.match_id(axis);
        *self.home_offset.match_id_mut(axis) = offset;
    }

    pub fn report_current_position(&mut self) {
        let p = self.current_position;
        let s = self.board.stepper_position();
        self.send(format_args!(
            "X:{:.2} Y:{:.2} Z:{:.2} E:{:.2} Count X:{:.2} Y:{:.2} Z:{:.2}",
            p.x, p.y, p.z, p.e, s.x, s.y, s.z
        ));
    }

    /// Fills `destination` from the axis words; F sets the feedrate.
    fn get_destination(&mut self, command: &mut Command<'_>) {
        for axis in AXIS_ID_LIST {
            let relative = self.relative_mode || (axis == AxisId::E && self.relative_e);
            let current = *self.current_position.match_id(axis);
            let target = if command.seen(axis.letter()) {
                command.value_axis_units(axis, &self.units) + if relative { current } else { 0.0 }
            }
            else {
                current
            };
            *self.destination.match_id_mut(axis) = target;
        }
        if command.seen('F') {
            let feedrate = command.value_linear_units(&self.units);
            if feedrate > 0.0 {
                self.feedrate = feedrate / 60.0;
            }
        }
    }

    fn clamp_to_software_endstops(&self, target: &mut XYZEData<f32>) {
        for axis in XYZ_ID_LIST {
            let offset = *self.home_offset.match_id(axis);
            let min = self.config.min_pos.match_id(axis) + offset;
            let max = self.config.max_pos.match_id(axis) + offset;
            let value = target.match_id_mut(axis);
            *value = value.clamp(min, max);
        }
    }

    fn prepare_move_to_destination(&mut self) {
        let mut destination = self.destination;
        self.clamp_to_software_endstops(&mut destination);
        self.destination = destination;
        let feedrate = self.feedrate * self.feedrate_percentage as f32 / 100.0;
        self.plan_move(destination, feedrate);
        self.current_position = destination;
    }

    pub(crate) fn quickstop_stepper(&mut self) {
        self.board.quick_stop();
        let position = self.position_from_steppers();
        self.current_position.x = position.x;
        self.current_position.y = position.y;
        self.current_position.z = position.z;
        self.sync_plan_position();
    }

    pub(crate) fn gcode_g0_g1(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.get_destination(command);
        self.prepare_move_to_destination();
        Ok(Ack::Send)
    }

    /// Dwell for P milliseconds or S seconds.
    pub(crate) fn gcode_g4(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        let mut dwell_ms = 0;
        if command.seen('P') {
            dwell_ms = command.value_millis();
        }
        if command.seen('S') {
            dwell_ms = command.value_millis_from_seconds();
        }
        self.synchronize()?;
        let until = self.board.millis().wrapping_add(dwell_ms);
        let state = self.busy_state;
        self.wait_until(state, |m| crate::board::elapsed(m.board.millis(), until))?;
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_g20(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.units.set_inches(true);
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_g21(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.units.set_inches(false);
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_g90(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.relative_mode = false;
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_g91(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.relative_mode = true;
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_g92(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        let did_e = command.seen('E');
        if !did_e {
            self.synchronize()?;
        }
        let mut did_xyz = false;
        for axis in AXIS_ID_LIST {
            if command.seen(axis.letter()) {
                *self.current_position.match_id_mut(axis) = command.value_axis_units(axis, &self.units);
                did_xyz |= axis != AxisId::E;
            }
        }
        if did_xyz {
            self.sync_plan_position();
        }
        else if did_e {
            self.sync_plan_position_e();
        }
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m82(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.relative_e = false;
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m83(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.relative_e = true;
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m92(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        for axis in AXIS_ID_LIST {
            if command.seen(axis.letter()) {
                *self.steps_per_unit.match_id_mut(axis) = command.value_per_axis_unit(axis, &self.units);
            }
        }
        self.board.set_steps_per_unit(self.steps_per_unit);
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m114(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.report_current_position();
        Ok(Ack::Send)
    }

    /// D sets the filament diameter; D0 turns volumetric extrusion off.
    pub(crate) fn gcode_m200(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        let extruder = self.target_extruder(command, 200)?;
        if command.seen('D') {
            let diameter = command.value_linear_units(&self.units);
            self.units.volumetric_enabled = diameter != 0.0;
            if self.units.volumetric_enabled {
                self.filament_size[extruder as usize] = diameter;
            }
        }
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m206(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        for axis in XYZ_ID_LIST {
            if command.seen(axis.letter()) {
                let offset = command.value_axis_units(axis, &self.units);
                self.set_home_offset(axis, offset);
            }
        }
        self.sync_plan_position();
        self.report_current_position();
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m220(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        if command.seen('S') {
            self.feedrate_percentage = command.value_int();
        }
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m400(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.synchronize()?;
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m410(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.quickstop_stepper();
        Ok(Ack::Send)
    }
}
