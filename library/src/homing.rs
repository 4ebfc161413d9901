use arrayvec::ArrayString;
#[allow(unused_imports)]
use micromath::F32Ext;

use crate::{Ack, AxisId, Board, Command, CommandError, KinematicsKind, Machine, XYZ_ID_LIST};

impl<B: Board> Machine<B> {
    /// Fails with the letters of every requested axis that has no home
    /// reference.
    pub(crate) fn axis_unhomed_error(&mut self, x: bool, y: bool, z: bool) -> Result<(), CommandError> {
        let mut missing = ArrayString::<3>::new();
        for (axis, wanted) in XYZ_ID_LIST.into_iter().zip([x, y, z]) {
            if wanted && !*self.axis_homed.match_id(axis) {
                missing.push(axis.letter());
            }
        }
        if missing.is_empty() {
            return Ok(());
        }
        let error = CommandError::Unhomed(missing);
        let mut status = ArrayString::<16>::new();
        if core::fmt::write(&mut status, format_args!("{}", error)).is_ok() {
            self.board.set_status(&status);
        }
        Err(error)
    }

    fn homing_bump_feedrate(&mut self, axis: AxisId) -> f32 {
        let mut divisor = *self.config.homing_bump_divisor.match_id(axis);
        if divisor < 1.0 {
            divisor = 10.0;
            self.echo(format_args!("Warning: Homing Bump Divisor < 1"));
        }
        self.config.homing_feedrate.match_id(axis) / divisor / 60.0
    }

    fn line_to_axis_pos(&mut self, axis: AxisId, target: f32, feedrate: f32) -> Result<(), CommandError> {
        *self.current_position.match_id_mut(axis) = target;
        self.line_to_current_position(feedrate);
        self.synchronize()
    }

    /// Fast approach, back off, slow approach, then take the home position.
    fn homeaxis(&mut self, axis: AxisId) -> Result<(), CommandError> {
        let dir = *self.config.home_dir.match_id(axis) as f32;
        if dir == 0.0 {
            return Ok(());
        }
        log::debug!("homing {}", axis.letter());
        let uses_probe = axis == AxisId::Z && self.has_probe() && dir < 0.0;
        if uses_probe {
            self.deploy_probe()?;
        }

        *self.current_position.match_id_mut(axis) = 0.0;
        self.sync_plan_position();
        let feedrate = self.config.homing_feedrate.match_id(axis) / 60.0;
        self.line_to_axis_pos(axis, 1.5 * self.config.max_length(axis) * dir, feedrate)?;

        *self.current_position.match_id_mut(axis) = 0.0;
        self.sync_plan_position();
        let bump = *self.config.home_bump_mm.match_id(axis);
        self.line_to_axis_pos(axis, -bump * dir, feedrate)?;
        let bump_feedrate = self.homing_bump_feedrate(axis);
        self.line_to_axis_pos(axis, 2.0 * bump * dir, bump_feedrate)?;

        self.set_axis_is_at_home(axis);
        self.sync_plan_position();
        *self.destination.match_id_mut(axis) = *self.current_position.match_id(axis);
        self.board.hit_on_purpose();

        if uses_probe {
            self.stow_probe()?;
        }
        Ok(())
    }

    /// Diagonal move toward both XY endstops at once.
    fn quick_home_xy(&mut self) -> Result<(), CommandError> {
        self.current_position.x = 0.0;
        self.current_position.y = 0.0;
        self.sync_plan_position();

        let mlx = self.config.max_length(AxisId::X);
        let mly = self.config.max_length(AxisId::Y);
        let mlratio = if mlx > mly { mly / mlx } else { mlx / mly };
        let feedrate = self.config.homing_feedrate.x.min(self.config.homing_feedrate.y) * (mlratio * mlratio + 1.0).sqrt();
        let x = 1.5 * mlx * self.config.home_dir.x as f32;
        let y = 1.5 * mly * self.config.home_dir.y as f32;
        self.do_blocking_move_to_xy(x, y, Some(feedrate / 60.0))?;
        self.board.hit_on_purpose();
        self.current_position.x = 0.0;
        self.current_position.y = 0.0;
        Ok(())
    }

    /// Z homes at a fixed XY so the probe lands on the bed.
    fn home_z_safely(&mut self, home_all: bool, point: (f32, f32)) -> Result<(), CommandError> {
        let (offset_x, offset_y) = (self.config.probe.offset_x, self.config.probe.offset_y);
        if home_all {
            self.sync_plan_position();
            let x = (point.0 - offset_x).round();
            let y = (point.1 - offset_y).round();
            self.do_blocking_move_to_xy(x, y, None)?;
        }

        if let Err(e) = self.axis_unhomed_error(true, true, false) {
            self.report_error(&e);
            return Ok(());
        }

        let raw_x = self.current_position.x - self.home_offset.x;
        let raw_y = self.current_position.y - self.home_offset.y;
        let (min, max) = (self.config.min_pos, self.config.max_pos);
        let on_bed = raw_x >= min.x - offset_x
            && raw_x <= max.x - offset_x
            && raw_y >= min.y - offset_y
            && raw_y <= max.y - offset_y;
        if on_bed {
            self.homeaxis(AxisId::Z)
        }
        else {
            log::warn!("safe homing point {},{} leaves the probe off the bed", raw_x, raw_y);
            self.board.set_status("Z Probe Past Bed");
            self.echo(format_args!("Z Probe Past Bed"));
            Ok(())
        }
    }

    fn home_cartesian(&mut self, home_all: bool, home_x: bool, home_y: bool, home_z: bool) -> Result<(), CommandError> {
        if self.config.home_dir.z > 0 {
            if home_all || home_z {
                self.homeaxis(AxisId::Z)?;
            }
        }
        else if home_all || home_x || home_y {
            let z = self.config.min_z_height_for_homing + self.home_offset.z;
            if z > self.current_position.z {
                self.do_blocking_move_to_z(z, None)?;
            }
        }

        if self.config.quick_home && (home_all || (home_x && home_y)) {
            self.quick_home_xy()?;
        }

        if self.config.home_y_before_x && (home_all || home_y) {
            self.homeaxis(AxisId::Y)?;
        }
        if home_all || home_x {
            self.homeaxis(AxisId::X)?;
        }
        if !self.config.home_y_before_x && (home_all || home_y) {
            self.homeaxis(AxisId::Y)?;
        }

        if self.config.home_dir.z < 0 && (home_all || home_z) {
            match self.config.z_safe_homing {
                Some(point) => self.home_z_safely(home_all, point)?,
                None => self.homeaxis(AxisId::Z)?,
            }
        }
        self.sync_plan_position();
        Ok(())
    }

    /// All towers rise together until the first endstop, then each homes.
    fn home_delta(&mut self) -> Result<(), CommandError> {
        self.current_position.x = 0.0;
        self.current_position.y = 0.0;
        self.current_position.z = 0.0;
        self.sync_plan_position();

        let rise = 3.0 * self.config.max_length(AxisId::Z);
        self.current_position.x = rise;
        self.current_position.y = rise;
        self.current_position.z = rise;
        self.line_to_current_position(1.732 * self.config.homing_feedrate.x / 60.0);
        self.synchronize()?;
        self.board.hit_on_purpose();
        self.current_position.x = 0.0;
        self.current_position.y = 0.0;
        self.current_position.z = 0.0;

        for axis in XYZ_ID_LIST {
            self.homeaxis(axis)?;
        }
        self.sync_plan_position();
        Ok(())
    }

    /// Turns a stored mesh back on once Z has a fresh reference.
    fn restore_mesh_after_homing(&mut self, home_all: bool, home_x: bool, home_y: bool, home_z: bool, pre_home_z: f32) {
        if !self.mesh.has_mesh() {
            return;
        }
        let homed = self.axis_homed;
        let z_max = if self.config.home_dir.z > 0 { self.config.max_pos.z } else { 0.0 };
        let rest_z = if home_all || (homed.x && homed.y && home_z) {
            self.config.mesh.home_search_z + z_max
        }
        else if homed.all_xyz(|h| *h) && (home_x || home_y) {
            pre_home_z
        }
        else {
            return;
        };
        self.current_position.z = rest_z;
        self.sync_plan_position();
        self.mesh.set_active(true);
        let raw_x = self.current_position.x - self.home_offset.x;
        let raw_y = self.current_position.y - self.home_offset.y;
        self.current_position.z = rest_z - self.mesh.get_z(raw_x, raw_y);
        log::debug!("mesh restored, z {}", self.current_position.z);
    }

    /// `G28 [X] [Y] [Z]`: home the named axes, or all of them.
    pub(crate) fn gcode_g28(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.synchronize()?;

        self.bed_level_matrix.set_to_identity();
        if let KinematicsKind::Delta { .. } = self.config.kinematics {
            self.delta_bed_level.reset();
        }

        let mut pre_home_z = self.config.mesh.home_search_z;
        if self.mesh.active() {
            if self.axis_homed.all_xyz(|h| *h) {
                let raw_x = self.current_position.x - self.home_offset.x;
                let raw_y = self.current_position.y - self.home_offset.y;
                pre_home_z = self.current_position.z + self.mesh.get_z(raw_x, raw_y);
            }
            self.mesh.set_active(false);
            self.current_position.z = pre_home_z;
        }

        self.board.enable(true);

        let home_x = command.seen('X');
        let home_y = command.seen('Y');
        let home_z = command.seen('Z');
        let home_all = (!home_x && !home_y && !home_z) || (home_x && home_y && home_z);

        let homed = match self.config.kinematics {
            KinematicsKind::Delta { .. } => self.home_delta(),
            KinematicsKind::Cartesian => self.home_cartesian(home_all, home_x, home_y, home_z),
        };
        self.board.not_homing();
        self.board.hit_on_purpose();
        homed?;

        self.restore_mesh_after_homing(home_all, home_x, home_y, home_z, pre_home_z);
        self.report_current_position();
        Ok(Ack::Send)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::{format, string::String, vec::Vec};

    use approx::assert_relative_eq;

    use crate::{mock::*, protocol::checksum, LevelingMode, MachineConfig, XYZEData};

    #[test]
    fn numbered_home_all() {
        let mut m = machine();
        let body = "N1 G28";
        run(&mut m, &format!("{}*{}\n", body, checksum(body)));
        assert!(m.axis_homed.all_xyz(|h| *h));
        assert_eq!(m.current_position, XYZEData::new(0.0, 0.0, 0.0, 0.0));
        assert_eq!(m.board.take_output(), ["X:0.00 Y:0.00 Z:0.00 E:0.00 Count X:0.00 Y:0.00 Z:0.00", "ok"]);
        assert!(!m.board.homing, "Endstops leave homing mode.");
        assert!(m.board.moves.iter().any(|mv| mv.target.x == -300.0), "Fast approach covers 1.5x travel.");
    }

    #[test]
    fn homes_only_named_axes() {
        let mut m = machine();
        run(&mut m, "G28 X\n");
        assert!(m.axis_homed.x);
        assert!(!m.axis_homed.y);
        assert!(!m.axis_homed.z);
    }

    #[test]
    fn homing_axes_separately_matches_together() {
        let mut apart = machine();
        run(&mut apart, "G92 Z7\nG28 X\nG28 Y\n");
        let mut together = machine();
        run(&mut together, "G92 Z7\nG28 X Y\n");
        assert_eq!(apart.axis_homed, together.axis_homed);
        assert!(apart.axis_homed.x && apart.axis_homed.y);
        assert!(!apart.axis_homed.z);
        for m in [&apart, &together] {
            assert_relative_eq!(m.current_position.z, 7.0);
        }
        assert_relative_eq!(apart.current_position.x, together.current_position.x);
        assert_relative_eq!(apart.current_position.y, together.current_position.y);
    }

    #[test]
    fn x_then_y_then_z() {
        let mut m = machine();
        run(&mut m, "G28\n");
        let firsts: Vec<char> = m.board.moves.iter().filter_map(|mv| {
            if mv.target.x < -200.0 { Some('X') }
            else if mv.target.y < -200.0 { Some('Y') }
            else if mv.target.z < -200.0 { Some('Z') }
            else { None }
        }).collect();
        assert_eq!(firsts, ['X', 'Y', 'Z']);
    }

    #[test]
    fn y_before_x_when_configured() {
        let config = MachineConfig { home_y_before_x: true, ..Default::default() };
        let mut m = machine_with(config);
        run(&mut m, "G28 X Y\n");
        let first_long = m.board.moves.iter().find(|mv| mv.target.x < -200.0 || mv.target.y < -200.0).unwrap();
        assert!(first_long.target.y < -200.0);
        assert!(!m.axis_homed.z);
    }

    #[test]
    fn bump_moves_slow_down() {
        let mut m = machine();
        run(&mut m, "G28 X\n");
        let slow = m.board.moves.iter().find(|mv| mv.target.x == -10.0).unwrap();
        assert_relative_eq!(slow.feedrate, 3000.0 / 2.0 / 60.0);
        let back_off = m.board.moves.iter().find(|mv| mv.target.x == 5.0).unwrap();
        assert_relative_eq!(back_off.feedrate, 50.0);
    }

    #[test]
    fn raises_before_xy_homing() {
        let config = MachineConfig { min_z_height_for_homing: 5.0, ..Default::default() };
        let mut m = machine_with(config);
        run(&mut m, "G28 X\n");
        assert_relative_eq!(m.board.moves[0].target.z, 5.0);
        assert_relative_eq!(m.current_position.z, 5.0);
    }

    #[test]
    fn quick_home_runs_diagonal() {
        let config = MachineConfig { quick_home: true, ..Default::default() };
        let mut m = machine_with(config);
        run(&mut m, "G28\n");
        assert!(m.board.moves.iter().any(|mv| mv.target.x == -300.0 && mv.target.y == -300.0));
    }

    #[test]
    fn safe_homing_moves_to_point() {
        let mut config = MachineConfig { z_safe_homing: Some((100.0, 100.0)), leveling: LevelingMode::AutoGrid, ..Default::default() };
        config.probe.offset_x = 10.0;
        let mut m = machine_with(config);
        run(&mut m, "G28\n");
        assert!(m.axis_homed.z);
        assert_relative_eq!(m.current_position.x, 90.0);
        assert_relative_eq!(m.current_position.y, 100.0);
        assert!(m.board.deploys >= 1 && !m.board.deployed, "Probe is deployed for Z and stowed after.");
    }

    #[test]
    fn safe_homing_needs_xy() {
        let config = MachineConfig { z_safe_homing: Some((100.0, 100.0)), ..Default::default() };
        let mut m = machine_with(config);
        run(&mut m, "G28 Z\n");
        assert!(!m.axis_homed.z);
        let out = m.board.take_output();
        assert_eq!(out[0], "echo:Home XY first");
        assert_eq!(out.last().map(String::as_str), Some("ok"));
    }

    #[test]
    fn safe_point_off_bed() {
        let config = MachineConfig { z_safe_homing: Some((250.0, 100.0)), ..Default::default() };
        let mut m = machine_with(config);
        run(&mut m, "G28\n");
        assert!(!m.axis_homed.z);
        assert_eq!(m.board.take_output()[0], "echo:Z Probe Past Bed");
        assert_eq!(m.board.status, "Z Probe Past Bed");
    }

    #[test]
    fn mesh_is_restored_after_home_all() {
        let mut m = machine();
        m.mesh.set_has_mesh(true);
        m.mesh.z_values[0][0] = 0.3;
        run(&mut m, "G28\n");
        assert!(m.mesh.active());
        let expected = 4.0 - m.mesh.get_z(0.0, 0.0);
        assert_relative_eq!(m.current_position.z, expected);
    }

    #[test]
    fn homing_xy_keeps_mesh_height() {
        let mut m = machine();
        m.mesh.set_has_mesh(true);
        m.mesh.set_active(true);
        m.axis_homed = XYZEData::from_clone(true);
        m.current_position = XYZEData::new(100.0, 100.0, 2.0, 0.0);
        run(&mut m, "G28 X\n");
        assert!(m.mesh.active());
        assert_relative_eq!(m.current_position.z, 2.0, epsilon = 1e-5);
    }

    #[test]
    fn homing_clears_tilt() {
        let mut m = machine();
        m.bed_level_matrix = crate::Matrix3x3::create_look_at(crate::Vector3::new(0.1, 0.0, 1.0));
        run(&mut m, "G28\n");
        assert!(m.bed_level_matrix.is_identity());
    }

    #[test]
    fn fault_cancels_homing() {
        let mut m = machine();
        m.board.blocks_queued.set(1);
        m.board.fault = Some(crate::ThermalFault::MaxTemp);
        run(&mut m, "G28\n");
        assert!(m.stopped);
        assert!(!m.axis_homed.x);
        assert!(!m.board.homing);
        let out = m.board.take_output();
        assert_eq!(out.last().map(String::as_str), Some("ok"));
    }

    #[test]
    fn delta_homes_all_towers() {
        let config = MachineConfig {
            kinematics: crate::KinematicsKind::Delta { probeable_radius: 80.0 },
            home_dir: XYZEData::new(1, 1, 1, 0),
            ..Default::default()
        };
        let mut m = machine_with(config);
        run(&mut m, "G28 X\n");
        assert!(m.axis_homed.all_xyz(|h| *h), "A delta always homes every tower.");
        assert_relative_eq!(m.current_position.z, 200.0);
        assert!(m.board.moves.iter().any(|mv| mv.target.z == 600.0));
    }
}
