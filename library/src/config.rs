use crate::XYZEData;

/// Slots in the command queue.
pub const BUFSIZE: usize = 4;
/// Longest command line including the terminator slot.
pub const MAX_CMD_SIZE: usize = 96;
/// Pending self-issued commands.
pub const INJECTED_CAPACITY: usize = 4;
pub const MESH_MAX_POINTS: usize = 7;
pub const MAX_GRID_POINTS: usize = 7;
pub const MAX_EXTRUDERS: usize = 4;
pub const MIN_PROBE_EDGE: f32 = 10.0;
pub const DEFAULT_FILAMENT_DIA: f32 = 1.75;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KinematicsKind {
    Cartesian,
    Delta { probeable_radius: f32 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LevelingMode {
    /// Manual mesh stepping with `G29 S0..S5` and `M421`.
    Mesh,
    /// Probe a P×P lattice and fit a plane (or store samples on a delta).
    AutoGrid,
    /// Probe three fixed points and solve the plane exactly.
    AutoThreePoint,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshConfig {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
    pub num_x: usize,
    pub num_y: usize,
    pub home_search_z: f32,
}

impl MeshConfig {
    pub fn dist_x(&self) -> f32 {
        (self.max_x - self.min_x) / (self.num_x - 1) as f32
    }

    pub fn dist_y(&self) -> f32 {
        (self.max_y - self.min_y) / (self.num_y - 1) as f32
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            min_x: 10.0,
            max_x: 190.0,
            min_y: 10.0,
            max_y: 190.0,
            num_x: 3,
            num_y: 3,
            home_search_z: 4.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProbeConfig {
    pub offset_x: f32,
    pub offset_y: f32,
    pub z_offset: f32,
    pub raise_deploy_stow: f32,
    pub raise_between: f32,
    /// mm/min between probe points.
    pub xy_speed: f32,
    pub left: f32,
    pub right: f32,
    pub front: f32,
    pub back: f32,
    pub grid_points: usize,
    pub three_points: [(f32, f32); 3],
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            z_offset: 0.0,
            raise_deploy_stow: 15.0,
            raise_between: 5.0,
            xy_speed: 8000.0,
            left: 15.0,
            right: 170.0,
            front: 20.0,
            back: 170.0,
            grid_points: 2,
            three_points: [(15.0, 180.0), (15.0, 20.0), (170.0, 20.0)],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MachineConfig {
    pub min_pos: XYZEData<f32>,
    pub max_pos: XYZEData<f32>,
    /// -1 homes toward min, 1 toward max.
    pub home_dir: XYZEData<i8>,
    /// mm/min.
    pub homing_feedrate: XYZEData<f32>,
    pub home_bump_mm: XYZEData<f32>,
    pub homing_bump_divisor: XYZEData<f32>,
    pub min_z_height_for_homing: f32,
    pub quick_home: bool,
    pub home_y_before_x: bool,
    pub z_safe_homing: Option<(f32, f32)>,
    pub probe: ProbeConfig,
    pub mesh: MeshConfig,
    pub leveling: LevelingMode,
    pub kinematics: KinematicsKind,
    pub extruders: u8,
    pub steps_per_unit: XYZEData<f32>,
    /// mm/s used until a move carries F.
    pub default_feedrate: f32,
    /// Seconds between busy messages, 0 disables.
    pub keepalive_interval: u8,
    pub min_cooling_slope_deg: f32,
    pub min_cooling_slope_time_ms: u32,
    pub sensitive_pins: &'static [u8],
    pub machine_name: &'static str,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            min_pos: XYZEData::new(0.0, 0.0, 0.0, 0.0),
            max_pos: XYZEData::new(200.0, 200.0, 200.0, 0.0),
            home_dir: XYZEData::new(-1, -1, -1, 0),
            homing_feedrate: XYZEData::new(3000.0, 3000.0, 240.0, 0.0),
            home_bump_mm: XYZEData::new(5.0, 5.0, 2.0, 0.0),
            homing_bump_divisor: XYZEData::new(2.0, 2.0, 4.0, 1.0),
            min_z_height_for_homing: 0.0,
            quick_home: false,
            home_y_before_x: false,
            z_safe_homing: None,
            probe: ProbeConfig::default(),
            mesh: MeshConfig::default(),
            leveling: LevelingMode::Mesh,
            kinematics: KinematicsKind::Cartesian,
            extruders: 1,
            steps_per_unit: XYZEData::new(80.0, 80.0, 4000.0, 500.0),
            default_feedrate: 25.0,
            keepalive_interval: 2,
            min_cooling_slope_deg: 1.5,
            min_cooling_slope_time_ms: 60_000,
            sensitive_pins: &[],
            machine_name: "3D Printer",
        }
    }
}

impl MachineConfig {
    pub fn max_length(&self, axis: crate::AxisId) -> f32 {
        self.max_pos.match_id(axis) - self.min_pos.match_id(axis)
    }

    /// Position an axis takes once its endstop has triggered.
    pub fn base_home_pos(&self, axis: crate::AxisId) -> f32 {
        if *self.home_dir.match_id(axis) < 0 {
            *self.min_pos.match_id(axis)
        }
        else {
            *self.max_pos.match_id(axis)
        }
    }

    pub fn min_probe_x(&self) -> f32 {
        self.min_pos.x.max(self.min_pos.x + self.probe.offset_x)
    }
    pub fn max_probe_x(&self) -> f32 {
        self.max_pos.x.min(self.max_pos.x + self.probe.offset_x)
    }
    pub fn min_probe_y(&self) -> f32 {
        self.min_pos.y.max(self.min_pos.y + self.probe.offset_y)
    }
    pub fn max_probe_y(&self) -> f32 {
        self.max_pos.y.min(self.max_pos.y + self.probe.offset_y)
    }
}
