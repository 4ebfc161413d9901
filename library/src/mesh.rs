//! Manual mesh bed leveling: the correction grid, `G29 S0..S5`, `M420` and
//! `M421`.

use itertools::Itertools;

use crate::{Ack, AxisId, Board, Command, CommandError, Machine, MeshConfig, MESH_MAX_POINTS};

/// Z corrections measured on a regular grid, stored row major
/// (`z_values[y][x]`).
#[derive(Clone, Debug, PartialEq)]
pub struct MeshLevel {
    num_x: usize,
    num_y: usize,
    min_x: f32,
    min_y: f32,
    dist_x: f32,
    dist_y: f32,
    pub z_values: [[f32; MESH_MAX_POINTS]; MESH_MAX_POINTS],
    pub z_offset: f32,
    has_mesh: bool,
    active: bool,
}

impl Default for MeshLevel {
    fn default() -> Self {
        Self::new(&MeshConfig::default())
    }
}

/// Value at `a0` on the line through `(a1, z1)` and `(a2, z2)`.
fn calc_z0(a0: f32, a1: f32, z1: f32, a2: f32, z2: f32) -> f32 {
    z1 + (a0 - a1) * (z2 - z1) / (a2 - a1)
}

fn probe_index(v: f32, min: f32, dist: f32, count: usize) -> i32 {
    let index = floor_i32((v - min + 0.5 * dist) / dist);
    if index >= 0 && (index as usize) < count { index } else { -1 }
}

fn cell_index(v: f32, min: f32, dist: f32, count: usize) -> usize {
    floor_i32((v - min) / dist).clamp(0, count as i32 - 2) as usize
}

fn floor_i32(v: f32) -> i32 {
    let truncated = v as i32;
    if (truncated as f32) > v { truncated - 1 } else { truncated }
}

impl MeshLevel {
    /// Grid sizes above `MESH_MAX_POINTS` are capped.
    pub fn new(config: &MeshConfig) -> Self {
        let num_x = config.num_x.clamp(2, MESH_MAX_POINTS);
        let num_y = config.num_y.clamp(2, MESH_MAX_POINTS);
        Self {
            num_x,
            num_y,
            min_x: config.min_x,
            min_y: config.min_y,
            dist_x: (config.max_x - config.min_x) / (num_x - 1) as f32,
            dist_y: (config.max_y - config.min_y) / (num_y - 1) as f32,
            z_values: [[0.0; MESH_MAX_POINTS]; MESH_MAX_POINTS],
            z_offset: 0.0,
            has_mesh: false,
            active: false,
        }
    }

    pub fn num_x(&self) -> usize {
        self.num_x
    }

    pub fn num_y(&self) -> usize {
        self.num_y
    }

    pub fn points(&self) -> usize {
        self.num_x * self.num_y
    }

    pub fn reset(&mut self) {
        self.has_mesh = false;
        self.active = false;
        self.z_offset = 0.0;
        self.z_values = [[0.0; MESH_MAX_POINTS]; MESH_MAX_POINTS];
    }

    pub fn has_mesh(&self) -> bool {
        self.has_mesh
    }

    pub fn set_has_mesh(&mut self, has_mesh: bool) {
        self.has_mesh = has_mesh;
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn get_probe_x(&self, i: usize) -> f32 {
        self.min_x + self.dist_x * i as f32
    }

    pub fn get_probe_y(&self, i: usize) -> f32 {
        self.min_y + self.dist_y * i as f32
    }

    /// Nearest grid column, or -1 when `x` is off the grid.
    pub fn probe_index_x(&self, x: f32) -> i32 {
        probe_index(x, self.min_x, self.dist_x, self.num_x)
    }

    pub fn probe_index_y(&self, y: f32) -> i32 {
        probe_index(y, self.min_y, self.dist_y, self.num_y)
    }

    pub fn set_z(&mut self, px: usize, py: usize, z: f32) {
        if px < self.num_x && py < self.num_y {
            self.z_values[py][px] = z;
        }
    }

    /// Probe order: odd rows run right to left.
    pub fn zigzag(&self, index: usize) -> (usize, usize) {
        let py = index / self.num_x;
        let mut px = index % self.num_x;
        if py % 2 == 1 {
            px = self.num_x - 1 - px;
        }
        (px, py)
    }

    pub fn set_zigzag_z(&mut self, index: usize, z: f32) {
        let (px, py) = self.zigzag(index);
        self.set_z(px, py, z);
    }

    /// Bilinear correction at a raw position. Outside the grid the edge cells
    /// are extended.
    pub fn get_z(&self, x: f32, y: f32) -> f32 {
        let cx = cell_index(x, self.min_x, self.dist_x, self.num_x);
        let cy = cell_index(y, self.min_y, self.dist_y, self.num_y);
        let (x1, x2) = (self.get_probe_x(cx), self.get_probe_x(cx + 1));
        let z1 = calc_z0(x, x1, self.z_values[cy][cx], x2, self.z_values[cy][cx + 1]);
        let z2 = calc_z0(x, x1, self.z_values[cy + 1][cx], x2, self.z_values[cy + 1][cx + 1]);
        calc_z0(y, self.get_probe_y(cy), z1, self.get_probe_y(cy + 1), z2) + self.z_offset
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MeshLevelingState {
    Report,
    Start,
    Next,
    Set,
    SetZOffset,
    Reset,
}

impl MeshLevelingState {
    fn from_byte(state: u8) -> Option<Self> {
        match state {
            0 => Some(Self::Report),
            1 => Some(Self::Start),
            2 => Some(Self::Next),
            3 => Some(Self::Set),
            4 => Some(Self::SetZOffset),
            5 => Some(Self::Reset),
            _ => None,
        }
    }
}

impl<B: Board> Machine<B> {
    fn mesh_raise_height(&self) -> f32 {
        self.config.probe.raise_between.max(self.config.min_z_height_for_homing).max(0.0)
    }

    /// Travel to a mesh point with a lift over the search height.
    fn mbl_goto_xy(&mut self, x: f32, y: f32) -> Result<(), CommandError> {
        let feedrate = self.config.homing_feedrate.x / 60.0;
        let raise = self.mesh_raise_height();
        self.current_position.z = self.config.mesh.home_search_z + raise;
        self.line_to_current_position(feedrate);
        self.current_position.x = x + self.home_offset.x;
        self.current_position.y = y + self.home_offset.y;
        self.line_to_current_position(feedrate);
        if raise > 0.0 {
            self.current_position.z = self.config.mesh.home_search_z;
            self.line_to_current_position(feedrate);
        }
        self.synchronize()
    }

    fn report_mesh(&mut self) {
        if !self.mesh.has_mesh() {
            self.send(format_args!("Mesh bed leveling not active."));
            return;
        }
        let state = if self.mesh.active() { "On" } else { "Off" };
        self.send(format_args!("State: {}", state));
        self.send(format_args!("Num X,Y: {},{}", self.mesh.num_x(), self.mesh.num_y()));
        let home_search_z = self.config.mesh.home_search_z;
        self.send(format_args!("Z search height: {:.2}", home_search_z));
        let z_offset = self.mesh.z_offset;
        self.send(format_args!("Z offset: {:.5}", z_offset));
        self.send(format_args!("Measured points:"));
        for py in 0..self.mesh.num_y() {
            let row = self.mesh.z_values[py];
            let cells = &row[..self.mesh.num_x()];
            self.send(format_args!("{}", cells.iter().format_with("", |z, f| f(&format_args!("  {:.5}", z)))));
        }
    }

    fn mesh_next(&mut self) -> Result<(), CommandError> {
        if self.mesh_probe_point < 0 {
            return Err(CommandError::MeshNotStarted);
        }
        let point = self.mesh_probe_point as usize;
        if point == 0 {
            self.current_position.z = self.config.mesh.home_search_z;
            if self.config.home_dir.z > 0 {
                self.current_position.z += self.config.max_pos.z;
            }
            self.sync_plan_position();
        }
        else {
            self.mesh.set_zigzag_z(point - 1, self.current_position.z);
        }

        if point < self.mesh.points() {
            let (px, py) = self.mesh.zigzag(point);
            log::debug!("mesh point {} at cell {},{}", point, px, py);
            let (x, y) = (self.mesh.get_probe_x(px), self.mesh.get_probe_y(py));
            self.mbl_goto_xy(x, y)?;
            self.mesh_probe_point += 1;
        }
        else {
            self.current_position.z = self.config.mesh.home_search_z + self.mesh_raise_height();
            self.line_to_current_position(self.config.homing_feedrate.x / 60.0);
            self.synchronize()?;
            self.send(format_args!("Mesh probing done."));
            self.mesh_probe_point = -1;
            self.mesh.set_has_mesh(true);
            self.enqueue_and_echo_commands("G28");
        }
        Ok(())
    }

    fn mesh_set(&mut self, command: &mut Command<'_>) -> Result<(), CommandError> {
        let px = self.mesh_index(command, 'X', self.mesh.num_x())?;
        let py = self.mesh_index(command, 'Y', self.mesh.num_y())?;
        if !command.seen('Z') {
            return Err(CommandError::NotEntered('Z'));
        }
        let z = command.value_axis_units(AxisId::Z, &self.units);
        self.mesh.set_z(px, py, z);
        Ok(())
    }

    /// One-based grid index from the host, checked against `count`.
    fn mesh_index(&self, command: &mut Command<'_>, letter: char, count: usize) -> Result<usize, CommandError> {
        if !command.seen(letter) {
            return Err(CommandError::NotEntered(letter));
        }
        let index = command.value_int() - 1;
        if index < 0 || index as usize >= count {
            return Err(CommandError::MeshIndex(letter, count));
        }
        Ok(index as usize)
    }

    /// `G29 S<state>`: step through manual mesh probing.
    ///
    /// S0 reports, S1 starts (homing first), S2 stores the current Z and moves
    /// to the next point, S3 sets one value, S4 sets the offset and S5 clears
    /// the mesh.
    pub(crate) fn gcode_g29_mesh(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        let state = if command.seen('S') { command.value_int() } else { 0 };
        let state = u8::try_from(state).ok().and_then(MeshLevelingState::from_byte).ok_or(CommandError::MeshState)?;

        match state {
            MeshLevelingState::Report => self.report_mesh(),
            MeshLevelingState::Start => {
                self.mesh.reset();
                self.mesh_probe_point = 0;
                self.enqueue_and_echo_commands("G28\nG29 S2");
            }
            MeshLevelingState::Next => self.mesh_next()?,
            MeshLevelingState::Set => self.mesh_set(command)?,
            MeshLevelingState::SetZOffset => {
                if !command.seen('Z') {
                    return Err(CommandError::NotEntered('Z'));
                }
                self.mesh.z_offset = command.value_axis_units(AxisId::Z, &self.units);
            }
            MeshLevelingState::Reset => {
                if self.mesh.active() {
                    let raw_x = self.current_position.x - self.home_offset.x;
                    let raw_y = self.current_position.y - self.home_offset.y;
                    self.current_position.z += self.mesh.get_z(raw_x, raw_y) - self.config.mesh.home_search_z;
                    self.mesh.reset();
                    self.sync_plan_position();
                }
                else {
                    self.mesh.reset();
                }
            }
        }
        self.report_current_position();
        Ok(Ack::Send)
    }

    /// `M420 S<bool>`: turn an existing mesh on or off.
    pub(crate) fn gcode_m420(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        if command.seen('S') && self.mesh.has_mesh() {
            self.mesh.set_active(command.value_bool());
        }
        Ok(Ack::Send)
    }

    /// `M421 X<mm> Y<mm> Z<mm>` or `M421 I<col> J<row> Z<mm>`: set one mesh value.
    pub(crate) fn gcode_m421(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        let mut px = 0;
        let mut py = 0;
        let has_x = command.seen('X');
        if has_x {
            px = self.mesh.probe_index_x(command.value_axis_units(AxisId::X, &self.units));
        }
        let has_y = command.seen('Y');
        if has_y {
            py = self.mesh.probe_index_y(command.value_axis_units(AxisId::Y, &self.units));
        }
        let has_i = command.seen('I');
        if has_i {
            px = command.value_axis_units(AxisId::X, &self.units) as i32;
        }
        let has_j = command.seen('J');
        if has_j {
            py = command.value_axis_units(AxisId::Y, &self.units) as i32;
        }
        let z = command.float('Z').map(|z| z * self.units.axis_unit_factor(AxisId::Z));

        let in_grid = px >= 0 && py >= 0 && (px as usize) < self.mesh.num_x() && (py as usize) < self.mesh.num_y();
        match z {
            Some(z) if (has_x && has_y) || (has_i && has_j) => {
                if !in_grid {
                    return Err(CommandError::MeshXy);
                }
                self.mesh.set_z(px as usize, py as usize, z);
                Ok(Ack::Send)
            }
            _ => Err(CommandError::M421Parameters),
        }
    }
}
