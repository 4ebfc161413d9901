//! Everything outside the command core: the host link, the motion planner,
//! heaters, endstops, the probe, pins, the display, the SD card and the
//! settings store. A board implements each trait and then [`Board`].

use crate::{AxisId, ProbeFault, Settings, ThermalFault, XYZEData};

pub trait Host {
    fn read_byte(&mut self) -> Option<u8>;
    fn send_line(&mut self, line: &str);
}

pub trait Planner {
    /// Queue a straight move to `target`, already in actuator space.
    fn buffer_line(&mut self, target: XYZEData<f32>, feedrate_mm_s: f32, extruder: u8);
    fn set_position(&mut self, position: XYZEData<f32>);
    fn set_e_position(&mut self, e: f32);
    fn has_blocks_queued(&self) -> bool;
    /// Where the steppers physically are, in mm.
    fn stepper_position(&self) -> XYZEData<f32>;
    fn quick_stop(&mut self);
    fn set_steps_per_unit(&mut self, steps: XYZEData<f32>);
}

/// Logical to actuator mapping. Cartesian machines keep the default.
pub trait Kinematics {
    fn to_actuator(&self, logical: XYZEData<f32>) -> XYZEData<f32> {
        logical
    }
    fn to_logical(&self, actuator: XYZEData<f32>) -> XYZEData<f32> {
        actuator
    }
}

pub trait Endstops {
    fn enable(&mut self, on: bool);
    fn enable_globally(&mut self, on: bool);
    fn not_homing(&mut self);
    fn hit_on_purpose(&mut self);
    fn triggered(&mut self, axis: AxisId) -> bool;
}

pub trait Probe {
    fn deploy(&mut self) -> Result<(), ProbeFault>;
    fn stow(&mut self) -> Result<(), ProbeFault>;
    /// Descends until the probe triggers and returns that Z.
    fn probe_z(&mut self) -> Result<f32, ProbeFault>;
}

pub trait Thermal {
    fn set_target_hotend(&mut self, celsius: f32, extruder: u8);
    fn set_target_bed(&mut self, celsius: f32);
    fn deg_hotend(&self, extruder: u8) -> f32;
    fn deg_target_hotend(&self, extruder: u8) -> f32;
    fn deg_bed(&self) -> f32;
    fn deg_target_bed(&self) -> f32;
    fn disable_all_heaters(&mut self);
    /// A safety cutoff that tripped since the last call.
    fn take_fault(&mut self) -> Option<ThermalFault>;

    fn is_heating_hotend(&self, extruder: u8) -> bool {
        self.deg_target_hotend(extruder) > self.deg_hotend(extruder)
    }
    fn is_cooling_hotend(&self, extruder: u8) -> bool {
        self.deg_target_hotend(extruder) < self.deg_hotend(extruder)
    }
    fn is_heating_bed(&self) -> bool {
        self.deg_target_bed() > self.deg_bed()
    }
    fn is_cooling_bed(&self) -> bool {
        self.deg_target_bed() < self.deg_bed()
    }
}

pub trait Pins {
    fn read(&mut self, pin: u8) -> bool;
    fn write(&mut self, pin: u8, value: u8);
    fn set_input(&mut self, pin: u8);
}

pub trait Status {
    fn set_status(&mut self, message: &str);
    fn clicked(&mut self) -> bool {
        false
    }
    fn detected(&self) -> bool {
        false
    }
}

pub trait Clock {
    fn millis(&self) -> u32;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SdReadError;

/// An SD card print. Boards without a card keep the defaults.
pub trait FileSource {
    fn is_printing(&self) -> bool {
        false
    }
    /// `Ok(None)` at end of file.
    fn next_byte(&mut self) -> Result<Option<u8>, SdReadError> {
        Ok(None)
    }
    fn print_finished(&mut self) {}
    fn check_autostart(&mut self) {}
}

pub trait SettingsStore {
    fn save(&mut self, settings: &Settings) -> bool;
    fn load(&mut self) -> Option<Settings>;
}

pub trait Board: Host + Planner + Kinematics + Endstops + Probe + Thermal + Pins + Status + Clock + FileSource + SettingsStore {
    /// Runs on every pass of the cooperative wait loop.
    fn idle(&mut self) {}
}

/// Elapsed test that survives the millisecond counter wrapping.
pub fn elapsed(now: u32, deadline: u32) -> bool {
    (now.wrapping_sub(deadline) as i32) >= 0
}
