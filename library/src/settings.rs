//! The persisted settings blob and `M500`..`M503`.

use crate::{Ack, Board, Command, CommandError, Machine, MeshLevel, XYZEData, MESH_MAX_POINTS, XYZ_ID_LIST};

/// Everything `M500` persists. The store decides how it is laid out.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Settings {
    pub steps_per_unit: XYZEData<f32>,
    pub home_offset: XYZEData<f32>,
    pub zprobe_zoffset: f32,
    pub mesh_num_x: usize,
    pub mesh_num_y: usize,
    pub mesh_has_mesh: bool,
    pub mesh_active: bool,
    pub mesh_z_offset: f32,
    pub mesh_z_values: [[f32; MESH_MAX_POINTS]; MESH_MAX_POINTS],
}

impl<B: Board> Machine<B> {
    pub fn settings(&self) -> Settings {
        Settings {
            steps_per_unit: self.steps_per_unit,
            home_offset: self.home_offset,
            zprobe_zoffset: self.zprobe_zoffset,
            mesh_num_x: self.mesh.num_x(),
            mesh_num_y: self.mesh.num_y(),
            mesh_has_mesh: self.mesh.has_mesh(),
            mesh_active: self.mesh.active(),
            mesh_z_offset: self.mesh.z_offset,
            mesh_z_values: self.mesh.z_values,
        }
    }

    pub fn apply_settings(&mut self, settings: &Settings) {
        self.steps_per_unit = settings.steps_per_unit;
        self.board.set_steps_per_unit(self.steps_per_unit);
        for axis in XYZ_ID_LIST {
            self.set_home_offset(axis, *settings.home_offset.match_id(axis));
        }
        self.zprobe_zoffset = settings.zprobe_zoffset;

        if settings.mesh_num_x == self.mesh.num_x() && settings.mesh_num_y == self.mesh.num_y() {
            self.mesh.z_values = settings.mesh_z_values;
            self.mesh.z_offset = settings.mesh_z_offset;
            self.mesh.set_has_mesh(settings.mesh_has_mesh);
            self.mesh.set_active(settings.mesh_has_mesh && settings.mesh_active);
        }
        else {
            log::warn!("stored mesh is {}x{}, ignored", settings.mesh_num_x, settings.mesh_num_y);
        }
        self.sync_plan_position();
    }

    fn reset_settings(&mut self) {
        self.steps_per_unit = self.config.steps_per_unit;
        self.board.set_steps_per_unit(self.steps_per_unit);
        for axis in XYZ_ID_LIST {
            self.set_home_offset(axis, 0.0);
        }
        self.zprobe_zoffset = self.config.probe.z_offset;
        self.mesh = MeshLevel::new(&self.config.mesh);
        self.sync_plan_position();
    }

    pub(crate) fn gcode_m500(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        let settings = self.settings();
        if self.board.save(&settings) {
            self.echo(format_args!("Settings Stored"));
        }
        else {
            self.error(format_args!("EEPROM write failed"));
        }
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m501(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        match self.board.load() {
            Some(settings) => {
                self.apply_settings(&settings);
                self.echo(format_args!("Stored settings retrieved"));
            }
            None => self.error(format_args!("EEPROM read failed")),
        }
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m502(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.reset_settings();
        self.echo(format_args!("Hardcoded Default Settings Loaded"));
        Ok(Ack::Send)
    }

    /// `M503`: print the settings as commands. `S0` leaves out the headings.
    pub(crate) fn gcode_m503(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        let headings = !(command.seen('S') && !command.value_bool());
        let s = self.settings();

        if headings {
            self.echo(format_args!("Steps per unit:"));
        }
        let steps = s.steps_per_unit;
        self.echo(format_args!("  M92 X{:.2} Y{:.2} Z{:.2} E{:.2}", steps.x, steps.y, steps.z, steps.e));

        if headings {
            self.echo(format_args!("Home offset (mm):"));
        }
        let offset = s.home_offset;
        self.echo(format_args!("  M206 X{:.2} Y{:.2} Z{:.2}", offset.x, offset.y, offset.z));

        if self.has_probe() {
            if headings {
                self.echo(format_args!("Z-Probe Offset (mm):"));
            }
            self.echo(format_args!("  M851 Z{:.2}", s.zprobe_zoffset));
        }
        else {
            if headings {
                self.echo(format_args!("Mesh bed leveling:"));
            }
            self.echo(format_args!("  M420 S{} X{} Y{}", s.mesh_has_mesh as u8, s.mesh_num_x, s.mesh_num_y));
            for py in 0..s.mesh_num_y {
                for px in 0..s.mesh_num_x {
                    self.echo(format_args!("  G29 S3 X{} Y{} Z{:.5}", px + 1, py + 1, s.mesh_z_values[py][px]));
                }
            }
        }
        Ok(Ack::Send)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::vec::Vec;

    use approx::assert_relative_eq;

    use crate::{mock::*, LevelingMode, MachineConfig};

    #[test]
    fn store_and_retrieve() {
        let mut m = machine();
        run(&mut m, "M92 X100\nM206 Z-2\nG29 S3 X2 Y2 Z0.3\nM500\n");
        assert!(m.board.stored.is_some());
        run(&mut m, "M502\n");
        assert_relative_eq!(m.steps_per_unit.x, 80.0);
        assert_relative_eq!(m.home_offset.z, 0.0);
        assert_relative_eq!(m.mesh.z_values[1][1], 0.0);
        m.board.take_output();

        run(&mut m, "M501\n");
        assert_relative_eq!(m.steps_per_unit.x, 100.0);
        assert_relative_eq!(m.board.steps_per_unit.x, 100.0);
        assert_relative_eq!(m.home_offset.z, -2.0);
        assert_relative_eq!(m.mesh.z_values[1][1], 0.3);
        assert_eq!(m.board.take_output(), ["echo:Stored settings retrieved", "ok"]);
    }

    #[test]
    fn retrieve_without_store() {
        let mut m = machine();
        run(&mut m, "M501\n");
        assert_eq!(m.board.take_output(), ["Error:EEPROM read failed", "ok"]);
    }

    #[test]
    fn defaults_message() {
        let mut m = machine();
        run(&mut m, "M502\nM500\n");
        assert_eq!(m.board.take_output(), [
            "echo:Hardcoded Default Settings Loaded",
            "ok",
            "echo:Settings Stored",
            "ok",
        ]);
    }

    #[test]
    fn report_is_replayable() {
        let mut m = machine();
        run(&mut m, "M503 S0\n");
        let out = m.board.take_output();
        assert_eq!(out[0], "echo:  M92 X80.00 Y80.00 Z4000.00 E500.00");
        assert_eq!(out[1], "echo:  M206 X0.00 Y0.00 Z0.00");
        assert_eq!(out[2], "echo:  M420 S0 X3 Y3");
        let mesh_lines: Vec<_> = out.iter().filter(|l| l.starts_with("echo:  G29 S3")).collect();
        assert_eq!(mesh_lines.len(), 9);
        assert_eq!(mesh_lines[0], "echo:  G29 S3 X1 Y1 Z0.00000");
    }

    #[test]
    fn report_with_headings_and_probe() {
        let mut m = machine_with(MachineConfig { leveling: LevelingMode::AutoGrid, ..Default::default() });
        run(&mut m, "M851 Z-0.7\n");
        m.board.take_output();
        run(&mut m, "M503\n");
        assert_eq!(m.board.take_output(), [
            "echo:Steps per unit:",
            "echo:  M92 X80.00 Y80.00 Z4000.00 E500.00",
            "echo:Home offset (mm):",
            "echo:  M206 X0.00 Y0.00 Z0.00",
            "echo:Z-Probe Offset (mm):",
            "echo:  M851 Z-0.70",
            "ok",
        ]);
    }
}
