use std::sync::atomic::{AtomicBool, Ordering};

use gcode_core::{ActuatorId, StepDir};

/*
* Arduino mega ramps 1.4 pinout, as digital pin numbers.
* X Pins
*   step    A0(54)
*   dir     A1(55)
*   enable  D38
* Y Pins
*   step    A6(60)
*   dir     A7(61)
*   enable  A2(56)
* Z Pins
*   step    D46
*   dir     D48
*   enable  A8(62)
* E0 Pins
*   step    D26
*   dir     D28
*   enable  D24
* E1 Pins
*   step    D36
*   dir     D34
*   enable  D30
*/
pub const LED: u8 = 13;
pub const X_STEP: u8 = 54;
pub const X_DIR: u8 = 55;
pub const X_ENABLE: u8 = 38;
pub const Y_STEP: u8 = 60;
pub const Y_DIR: u8 = 61;
pub const Y_ENABLE: u8 = 56;
pub const Z_STEP: u8 = 46;
pub const Z_DIR: u8 = 48;
pub const Z_ENABLE: u8 = 62;
pub const E0_STEP: u8 = 26;
pub const E0_DIR: u8 = 28;
pub const E0_ENABLE: u8 = 24;
pub const E1_STEP: u8 = 36;
pub const E1_DIR: u8 = 34;
pub const E1_ENABLE: u8 = 30;

/// Pins `M42` and `M226` must leave alone.
pub static SENSITIVE_PINS: [u8; 15] = [
    X_STEP, X_DIR, X_ENABLE,
    Y_STEP, Y_DIR, Y_ENABLE,
    Z_STEP, Z_DIR, Z_ENABLE,
    E0_STEP, E0_DIR, E0_ENABLE,
    E1_STEP, E1_DIR, E1_ENABLE,
];

static LEVELS: [AtomicBool; 256] = [const { AtomicBool::new(false) }; 256];

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum PinAction {
    Low,
    High,
    Toggle,
}

impl From<bool> for PinAction {
    fn from(value: bool) -> Self {
        match value {
            true => PinAction::High,
            false => PinAction::Low,
        }
    }
}

pub fn pin_write(pin: u8, action: PinAction) {
    let level = &LEVELS[pin as usize];
    match action {
        PinAction::Low => level.store(false, Ordering::Relaxed),
        PinAction::High => level.store(true, Ordering::Relaxed),
        PinAction::Toggle => {
            level.fetch_xor(true, Ordering::Relaxed);
        }
    }
}

pub fn pin_read(pin: u8) -> bool {
    LEVELS[pin as usize].load(Ordering::Relaxed)
}

fn step_dir_pins(actuator: ActuatorId) -> Option<(u8, u8)> {
    match actuator {
        ActuatorId::X => Some((X_STEP, X_DIR)),
        ActuatorId::Y => Some((Y_STEP, Y_DIR)),
        ActuatorId::Z => Some((Z_STEP, Z_DIR)),
        ActuatorId::E(0) => Some((E0_STEP, E0_DIR)),
        ActuatorId::E(1) => Some((E1_STEP, E1_DIR)),
        ActuatorId::E(_) => None,
    }
}

#[derive(Clone, Copy, Default)]
pub struct SimStepDir;

impl StepDir for SimStepDir {
    fn step(&mut self, actuator: ActuatorId) {
        if let Some((step, _)) = step_dir_pins(actuator) {
            pin_write(step, PinAction::Toggle);
        }
    }

    fn dir(&mut self, actuator: ActuatorId, negative: bool) {
        if let Some((_, dir)) = step_dir_pins(actuator) {
            pin_write(dir, negative.into());
        }
    }
}
