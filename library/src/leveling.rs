use itertools::Itertools;
#[allow(unused_imports)]
use micromath::F32Ext;

use crate::{
    Ack, AxisId, Board, Command, CommandError, KinematicsKind, LevelingMode, Machine, Matrix3x3, PlaneFit, ProbeFault,
    Vector3, MAX_GRID_POINTS, MIN_PROBE_EDGE,
};

const Z_PROBE_OFFSET_RANGE: (i32, i32) = (-20, 20);

/// Probed heights of a delta bed, indexed `[x][y]` around the bed center.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DeltaGrid {
    pub values: [[f32; MAX_GRID_POINTS]; MAX_GRID_POINTS],
    points: usize,
    spacing_x: f32,
    spacing_y: f32,
}

impl DeltaGrid {
    pub fn new(points: usize, spacing_x: f32, spacing_y: f32) -> Self {
        Self { values: Default::default(), points: points.min(MAX_GRID_POINTS), spacing_x, spacing_y }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn points(&self) -> usize {
        self.points
    }

    /// Only odd grids have a center cell to interpolate around.
    pub fn is_probed(&self) -> bool {
        self.points >= 3 && self.points % 2 == 1 && self.spacing_x != 0.0 && self.spacing_y != 0.0
    }

    /// Bilinear height correction at a position relative to the bed center.
    pub fn z_at(&self, x: f32, y: f32) -> f32 {
        if !self.is_probed() {
            return 0.0;
        }
        let half = ((self.points - 1) / 2) as f32;
        let grid_x = (x / self.spacing_x).clamp(0.001 - half, half - 0.001);
        let grid_y = (y / self.spacing_y).clamp(0.001 - half, half - 0.001);
        let floor_x = grid_x.floor();
        let floor_y = grid_y.floor();
        let ratio_x = grid_x - floor_x;
        let ratio_y = grid_y - floor_y;
        let ix = (floor_x + half) as usize;
        let iy = (floor_y + half) as usize;
        let z1 = self.values[ix][iy];
        let z2 = self.values[ix][iy + 1];
        let z3 = self.values[ix + 1][iy];
        let z4 = self.values[ix + 1][iy + 1];
        let left = (1.0 - ratio_y) * z1 + ratio_y * z2;
        let right = (1.0 - ratio_y) * z3 + ratio_y * z4;
        (1.0 - ratio_x) * left + ratio_x * right
    }

    /// Fills unprobed corners outward from the center, taking the median of
    /// the three linear guesses from the neighbours.
    pub fn extrapolate_unprobed(&mut self) {
        if self.points < 3 {
            return;
        }
        let half = (self.points - 1) / 2;
        for y in 0..=half {
            for x in 0..=half {
                if x + y < 3 {
                    continue;
                }
                let xdir = if x > 1 { 1 } else { 0 };
                let ydir = if y > 1 { 1 } else { 0 };
                self.extrapolate_one(half - x, half - y, xdir, ydir);
                self.extrapolate_one(half + x, half - y, -xdir, ydir);
                self.extrapolate_one(half - x, half + y, xdir, -ydir);
                self.extrapolate_one(half + x, half + y, -xdir, -ydir);
            }
        }
    }

    fn extrapolate_one(&mut self, x: usize, y: usize, xdir: isize, ydir: isize) {
        if self.values[x][y] != 0.0 {
            return;
        }
        let step = |i: usize, d: isize| (i as isize + d) as usize;
        let v = &self.values;
        let a = 2.0 * v[step(x, xdir)][y] - v[step(x, xdir * 2)][y];
        let b = 2.0 * v[x][step(y, ydir)] - v[x][step(y, ydir * 2)];
        let c = 2.0 * v[step(x, xdir)][step(y, ydir)] - v[step(x, xdir * 2)][step(y, ydir * 2)];
        self.values[x][y] = median(a, b, c);
    }

    /// One row per Y, front first.
    pub fn rows(&self) -> impl Iterator<Item = impl core::fmt::Display + '_> + '_ {
        (0..self.points).map(move |y| {
            (0..self.points).format_with("", move |x, f| f(&format_args!("{:.2} ", self.values[x][y])))
        })
    }
}

fn median(a: f32, b: f32, c: f32) -> f32 {
    if a < b {
        if b < c { b } else if c < a { a } else { c }
    }
    else if c < b { b } else if a < c { a } else { c }
}

/// Corners of the probed rectangle, ordered left, right, front, back.
#[derive(Clone, Copy, Debug)]
struct ProbeArea {
    left: f32,
    right: f32,
    front: f32,
    back: f32,
    points: usize,
}

impl ProbeArea {
    fn x(&self, i: usize) -> f32 {
        self.left + (self.right - self.left) * i as f32 / (self.points - 1) as f32
    }

    fn y(&self, j: usize) -> f32 {
        self.front + (self.back - self.front) * j as f32 / (self.points - 1) as f32
    }

    /// Rows front to back, alternating direction so the last point is always
    /// back right. An even count starts the first row right to left.
    fn serpentine(&self) -> impl Iterator<Item = (usize, usize)> {
        let points = self.points;
        (0..points).flat_map(move |j| {
            let reverse = (points + j) % 2 == 0;
            (0..points).map(move |i| (if reverse { points - 1 - i } else { i }, j))
        })
    }
}

const TOPOGRAPHY_HEADER: [&str; 11] = [
    "Bed Height Topography:",
    "   +--- BACK --+",
    "   |           |",
    " L |    (+)    | R",
    " E |           | I",
    " F | (-) N (+) | G",
    " T |           | H",
    "   |    (-)    | T",
    "   |           |",
    "   O-- FRONT --+",
    " (0,0)",
];

fn signed_cell(value: f32, f: &mut dyn FnMut(&dyn core::fmt::Display) -> core::fmt::Result) -> core::fmt::Result {
    if value >= 0.0 {
        f(&format_args!(" +{:.5}", value))
    }
    else {
        f(&format_args!(" {:.5}", value))
    }
}

impl<B: Board> Machine<B> {
    pub fn has_probe(&self) -> bool {
        !matches!(self.config.leveling, LevelingMode::Mesh)
    }

    fn is_delta(&self) -> bool {
        matches!(self.config.kinematics, KinematicsKind::Delta { .. })
    }

    /// Reports a probe failure. Only the running command is abandoned.
    fn probe_failed(&mut self, fault: ProbeFault) -> CommandError {
        log::error!("probe fault: {}", fault);
        self.report_error(&CommandError::Probe(fault));
        self.board.set_status("Err: ZPROBE");
        CommandError::Cancelled
    }

    /// Makes sure the nozzle is at least `raise` above the bed.
    fn do_probe_raise(&mut self, raise: f32) -> Result<(), CommandError> {
        let mut z = raise + self.home_offset.z;
        if self.zprobe_zoffset < 0.0 {
            z -= self.zprobe_zoffset;
        }
        if z > self.current_position.z {
            self.do_blocking_move_to_z(z, None)?;
        }
        Ok(())
    }

    fn set_probe_deployed(&mut self, deploy: bool) -> Result<(), CommandError> {
        if self.probe_deployed == deploy {
            return Ok(());
        }
        self.do_probe_raise(self.config.probe.raise_deploy_stow)?;
        let result = if deploy { self.board.deploy() } else { self.board.stow() };
        if let Err(fault) = result {
            return Err(self.probe_failed(fault));
        }
        self.probe_deployed = deploy;
        Ok(())
    }

    pub(crate) fn deploy_probe(&mut self) -> Result<(), CommandError> {
        self.set_probe_deployed(true)
    }

    pub(crate) fn stow_probe(&mut self) -> Result<(), CommandError> {
        self.set_probe_deployed(false)
    }

    fn run_z_probe(&mut self) -> Result<f32, CommandError> {
        let z = match self.board.probe_z() {
            Ok(z) => z,
            Err(fault) => return Err(self.probe_failed(fault)),
        };
        self.current_position.z = z;
        self.sync_plan_position();
        Ok(z)
    }

    /// Probes the bed at `(x, y)`, given as the probe's position, and returns
    /// the measured height.
    pub(crate) fn probe_pt(&mut self, x: f32, y: f32, stow: bool, verbose: i32) -> Result<f32, CommandError> {
        self.do_probe_raise(self.config.probe.raise_between)?;
        let (offset_x, offset_y) = (self.config.probe.offset_x, self.config.probe.offset_y);
        self.do_blocking_move_to_xy(x - offset_x, y - offset_y, None)?;
        self.deploy_probe()?;
        let z = self.run_z_probe()?;
        if stow {
            self.stow_probe()?;
        }
        if verbose > 2 {
            self.send(format_args!("Bed X: {:.3} Y: {:.3} Z: {:.3}", x, y, z));
        }
        log::debug!("probed {:.3},{:.3} -> {:.3}", x, y, z);
        Ok(z)
    }

    /// Reads an edge word, or the configured edge, and reports it when it
    /// falls outside the reachable area or too close to the opposite edge.
    fn probe_area(&mut self, command: &mut Command<'_>, points: usize) -> ProbeArea {
        let probe = self.config.probe;
        let offset = self.home_offset;
        let units = self.units;
        let mut edge = |letter: char, axis: AxisId, default: f32| {
            if command.seen(letter) { command.value_axis_units(axis, &units) } else { default }
        };
        let mut left = edge('L', AxisId::X, probe.left + offset.x);
        let mut right = edge('R', AxisId::X, probe.right + offset.x);
        let mut front = edge('F', AxisId::Y, probe.front + offset.y);
        let mut back = edge('B', AxisId::Y, probe.back + offset.y);

        let min_x = self.config.min_probe_x() + offset.x;
        let max_x = self.config.max_probe_x() + offset.x;
        let min_y = self.config.min_probe_y() + offset.y;
        let max_y = self.config.max_probe_y() + offset.y;

        let left_low = left < min_x;
        let right_high = right > max_x;
        let front_low = front < min_y;
        let back_high = back > max_y;
        let left_out = left_low || left > right - MIN_PROBE_EDGE;
        let right_out = right_high || right < left + MIN_PROBE_EDGE;
        let front_out = front_low || front > back - MIN_PROBE_EDGE;
        let back_out = back_high || back < front + MIN_PROBE_EDGE;

        if left_out {
            self.out_of_range_error("(L)eft");
            left = if left_low { min_x } else { right - MIN_PROBE_EDGE };
        }
        if right_out {
            self.out_of_range_error("(R)ight");
            right = if right_high { max_x } else { left + MIN_PROBE_EDGE };
        }
        if front_out {
            self.out_of_range_error("(F)ront");
            front = if front_low { min_y } else { back - MIN_PROBE_EDGE };
        }
        if back_out {
            self.out_of_range_error("(B)ack");
            back = if back_high { max_y } else { front + MIN_PROBE_EDGE };
        }
        ProbeArea { left, right, front, back, points }
    }

    fn out_of_range_error(&mut self, edge: &str) {
        log::warn!("probe edge {} clamped", edge);
        self.send(format_args!("?Probe {} position out of range.", edge));
    }

    /// Tilts the bed correction so that `normal` becomes straight up, keeping
    /// the nozzle where it physically is.
    fn apply_bed_normal(&mut self, normal: Vector3) {
        self.bed_level_matrix = Matrix3x3::create_look_at(normal);
        let stepper = self.board.to_logical(self.board.stepper_position());
        let adjusted = Vector3::new(stepper.x, stepper.y, stepper.z).apply_rotation(&self.bed_level_matrix.transpose());
        self.current_position.x = adjusted.x;
        self.current_position.y = adjusted.y;
        self.current_position.z = adjusted.z;
        self.sync_plan_position();
    }

    fn report_matrix(&mut self) {
        self.send(format_args!("Bed Level Correction Matrix:"));
        for row in self.bed_level_matrix.m {
            self.send(format_args!(
                "{}",
                row.iter().format_with("", |v, f| {
                    if *v >= 0.0 {
                        f(&format_args!("+{:.6} ", v))
                    }
                    else {
                        f(&format_args!("{:.6} ", v))
                    }
                })
            ));
        }
    }

    fn report_topography(&mut self, area: &ProbeArea, samples: &[[f32; MAX_GRID_POINTS]; MAX_GRID_POINTS], mean: f32, verbose: i32) {
        self.send(format_args!(""));
        for line in TOPOGRAPHY_HEADER {
            self.send(format_args!("{}", line));
        }
        let points = area.points;
        for j in (0..points).rev() {
            let row = (0..points).format_with("", |i, f| signed_cell(samples[i][j] - mean, f));
            self.send(format_args!("{}", row));
        }
        self.send(format_args!(""));
        if verbose <= 3 {
            return;
        }

        let matrix = self.bed_level_matrix;
        let residual = |i: usize, j: usize| {
            let tilt = Vector3::new(area.x(i), area.y(j), 0.0).apply_rotation(&matrix);
            samples[i][j] - tilt.z
        };
        let min_diff = (0..points)
            .cartesian_product(0..points)
            .map(|(i, j)| residual(i, j))
            .fold(f32::INFINITY, f32::min);
        self.send(format_args!("Corrected Bed Height vs. Bed Topology:"));
        for j in (0..points).rev() {
            let row = (0..points).format_with("", |i, f| signed_cell(residual(i, j) - min_diff, f));
            self.send(format_args!("{}", row));
        }
        self.send(format_args!(""));
    }

    /// Keeps the nozzle height continuous after a new tilt replaced the old one.
    fn correct_z_after_leveling(&mut self) {
        let (offset_x, offset_y) = (self.config.probe.offset_x, self.config.probe.offset_y);
        let probe = Vector3::new(self.current_position.x + offset_x, self.current_position.y + offset_y, self.current_position.z)
            .apply_rotation(&self.bed_level_matrix);
        let stepper_z = self.board.to_logical(self.board.stepper_position()).z;
        self.current_position.z += probe.z - stepper_z;
        self.sync_plan_position();
    }

    /// `G29`: probe the bed and apply the correction.
    ///
    /// `V` verbosity 0..4, `D` dry run, `E` stow between probes, `T` map.
    /// The grid takes `P` points per side, `S` travel speed and `L R F B`
    /// edges; a delta also takes a `Z` offset.
    pub(crate) fn gcode_g29_auto(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.axis_unhomed_error(true, true, true)?;

        let verbose = if command.seen('V') { command.value_int() } else { 1 };
        if !(0..=4).contains(&verbose) {
            return Err(CommandError::VerboseLevel);
        }
        let dry_run = command.seen('D');
        let stow_each = command.seen('E');
        let delta = self.is_delta();
        let grid = self.config.leveling == LevelingMode::AutoGrid;

        let mut topography = false;
        let mut area = None;
        if grid {
            topography = verbose > 2 || command.seen('T');
            if verbose > 0 {
                self.send(format_args!("G29 Auto Bed Leveling"));
                if dry_run {
                    self.send(format_args!("Running in DRY-RUN mode"));
                }
            }

            let mut points = self.config.probe.grid_points;
            if !delta && command.seen('P') {
                let requested = command.value_int();
                if requested < 2 {
                    return Err(CommandError::TooFewProbePoints);
                }
                if requested as usize > MAX_GRID_POINTS {
                    return Err(CommandError::TooManyProbePoints(MAX_GRID_POINTS));
                }
                points = requested as usize;
            }
            let mut points = points.clamp(2, MAX_GRID_POINTS);
            if delta && points % 2 == 0 {
                log::warn!("delta grid of {} points rounded up", points);
                points += 1;
            }

            self.xy_probe_speed = if command.seen('S') { command.value_linear_units(&self.units) } else { self.config.probe.xy_speed };
            area = Some(self.probe_area(command, points));
        }

        if !dry_run {
            self.bed_level_matrix.set_to_identity();
            if delta {
                self.delta_bed_level.reset();
            }
            else {
                let stepper = self.board.to_logical(self.board.stepper_position());
                self.current_position.x = stepper.x;
                self.current_position.y = stepper.y;
                self.current_position.z = stepper.z;
                self.sync_plan_position();
            }
        }

        self.synchronize()?;
        self.deploy_probe()?;

        match area {
            Some(area) if delta => self.probe_delta_grid(command, &area, dry_run, stow_each, verbose)?,
            Some(area) => self.probe_plane_grid(&area, dry_run, stow_each, verbose, topography)?,
            None => self.probe_three_points(dry_run, stow_each, verbose)?,
        }

        self.stow_probe()?;

        if !delta && !dry_run {
            self.correct_z_after_leveling();
        }
        self.report_current_position();
        Ok(Ack::Send)
    }

    fn probe_plane_grid(&mut self, area: &ProbeArea, dry_run: bool, stow_each: bool, verbose: i32, topography: bool) -> Result<(), CommandError> {
        let mut fit = PlaneFit::default();
        let mut samples = [[0.0f32; MAX_GRID_POINTS]; MAX_GRID_POINTS];
        let mut sum = 0.0;
        for (i, j) in area.serpentine() {
            let (x, y) = (area.x(i), area.y(j));
            let z = self.probe_pt(x, y, stow_each, verbose)?;
            fit.add(x, y, z);
            samples[i][j] = z;
            sum += z;
            self.idle();
        }
        let mean = sum / fit.count() as f32;

        let [a, b, d] = fit.solve().unwrap_or_else(|| {
            log::warn!("probe samples are collinear, assuming a flat bed");
            [0.0, 0.0, mean]
        });
        if verbose > 0 {
            self.send(format_args!("Eqn coefficients: a: {:.8} b: {:.8} d: {:.8}", a, b, d));
            if verbose > 2 {
                self.send(format_args!("Mean of sampled points: {:.8}", mean));
            }
        }

        if !dry_run {
            self.apply_bed_normal(Vector3::new(-a, -b, 1.0));
        }
        if topography {
            self.report_topography(area, &samples, mean, verbose);
        }
        if verbose > 0 {
            self.report_matrix();
        }
        Ok(())
    }

    fn probe_three_points(&mut self, dry_run: bool, stow_each: bool, verbose: i32) -> Result<(), CommandError> {
        let mut probed = [Vector3::default(); 3];
        for (slot, (x, y)) in probed.iter_mut().zip(self.config.probe.three_points) {
            let (x, y) = (x + self.home_offset.x, y + self.home_offset.y);
            let z = self.probe_pt(x, y, stow_each, verbose)?;
            *slot = Vector3::new(x, y, z);
        }

        if !dry_run {
            let mut normal = Vector3::cross(probed[0] - probed[1], probed[2] - probed[1]).normalized();
            if normal.z < 0.0 {
                normal = Vector3::new(-normal.x, -normal.y, -normal.z);
            }
            self.apply_bed_normal(normal);
        }
        if verbose > 0 {
            self.report_matrix();
        }
        Ok(())
    }

    fn probe_delta_grid(&mut self, command: &mut Command<'_>, area: &ProbeArea, dry_run: bool, stow_each: bool, verbose: i32) -> Result<(), CommandError> {
        let radius = match self.config.kinematics {
            KinematicsKind::Delta { probeable_radius } => probeable_radius,
            KinematicsKind::Cartesian => f32::INFINITY,
        };
        let z_offset = self.zprobe_zoffset + if command.seen('Z') { command.value_axis_units(AxisId::Z, &self.units) } else { 0.0 };
        let spacing_x = (area.right - area.left) / (area.points - 1) as f32;
        let spacing_y = (area.back - area.front) / (area.points - 1) as f32;
        let mut grid = DeltaGrid::new(area.points, spacing_x, spacing_y);

        for (i, j) in area.serpentine() {
            let (x, y) = (area.x(i), area.y(j));
            if x.hypot(y) > radius {
                continue;
            }
            let z = self.probe_pt(x, y, stow_each, verbose)?;
            grid.values[i][j] = z + z_offset;
            self.idle();
        }

        if !dry_run {
            grid.extrapolate_unprobed();
        }
        for row in grid.rows() {
            self.send(format_args!("{}", row));
        }
        if !dry_run {
            self.delta_bed_level = grid;
        }
        Ok(())
    }

    /// `G30 [X] [Y]`: probe a single point and report its height.
    pub(crate) fn gcode_g30(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        let (offset_x, offset_y) = (self.config.probe.offset_x, self.config.probe.offset_y);
        let mut x = self.current_position.x;
        let mut y = self.current_position.y;
        if command.seen('X') {
            let value = command.value_axis_units(AxisId::X, &self.units) + offset_x;
            x = value.clamp(self.config.min_pos.x + self.home_offset.x, self.config.max_pos.x + self.home_offset.x);
        }
        if command.seen('Y') {
            let value = command.value_axis_units(AxisId::Y, &self.units) + offset_y;
            y = value.clamp(self.config.min_pos.y + self.home_offset.y, self.config.max_pos.y + self.home_offset.y);
        }
        self.do_blocking_move_to_xy(x, y, None)?;

        let bed_x = self.current_position.x + offset_x;
        let bed_y = self.current_position.y + offset_y;
        let z = self.probe_pt(bed_x, bed_y, true, 1)?;
        self.send(format_args!("Bed X: {:.2} Y: {:.2} Z: {:.2}", bed_x + 0.0001, bed_y + 0.0001, z + 0.0001));
        self.report_current_position();
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m401(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.deploy_probe()?;
        Ok(Ack::Send)
    }

    pub(crate) fn gcode_m402(&mut self, _: &mut Command<'_>) -> Result<Ack, CommandError> {
        self.stow_probe()?;
        Ok(Ack::Send)
    }

    /// `M851 Z<offset>`: nozzle to probe trigger distance.
    pub(crate) fn gcode_m851(&mut self, command: &mut Command<'_>) -> Result<Ack, CommandError> {
        if !command.seen('Z') {
            let zprobe_zoffset = self.zprobe_zoffset;
            self.echo(format_args!("Z Offset: {:.2}", zprobe_zoffset));
            return Ok(Ack::Send);
        }
        let value = command.value_axis_units(AxisId::Z, &self.units);
        let (min, max) = Z_PROBE_OFFSET_RANGE;
        if !(min as f32..=max as f32).contains(&value) {
            return Err(CommandError::ZOffsetRange(min, max));
        }
        self.zprobe_zoffset = value;
        self.echo(format_args!("Z Offset {:.2}", value));
        Ok(Ack::Send)
    }
}
