//! A scripted board for handler tests. Time only moves in `idle`.

extern crate std;
use core::cell::Cell;
use std::{collections::VecDeque, string::{String, ToString}, vec::Vec};

use crate::{
    board::{Clock, Endstops, FileSource, Host, Kinematics, Pins, Planner, Probe, SdReadError, SettingsStore, Status, Thermal},
    AxisId, Board, Machine, MachineConfig, ProbeFault, Settings, ThermalFault, XYZEData, MAX_EXTRUDERS,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlannedMove {
    pub target: XYZEData<f32>,
    pub feedrate: f32,
    pub extruder: u8,
}

pub struct MockBoard {
    pub input: VecDeque<u8>,
    pub output: Vec<String>,
    scheduled: Vec<(u32, String)>,

    pub moves: Vec<PlannedMove>,
    pub position: XYZEData<f32>,
    pub steps_per_unit: XYZEData<f32>,
    pub quick_stops: u32,
    /// Number of `has_blocks_queued` polls that still report busy.
    pub blocks_queued: Cell<u32>,

    pub now: u32,
    pub tick_ms: u32,

    pub homing: bool,
    pub endstops_global: bool,
    pub endstop_hit: XYZEData<bool>,

    pub deploys: u32,
    pub deployed: bool,
    pub probe_fault: Option<ProbeFault>,
    pub bed_height: fn(f32, f32) -> f32,
    pub probes: Vec<(f32, f32)>,

    pub status: String,
    pub display: bool,
    pub click_at: Option<u32>,

    pub file: VecDeque<u8>,
    pub printing: bool,
    pub print_finished: bool,
    pub autostart_checks: u32,

    pub fault: Option<ThermalFault>,
    pub hotend: [f32; MAX_EXTRUDERS],
    pub hotend_target: [f32; MAX_EXTRUDERS],
    pub bed_temp: f32,
    pub bed_target: f32,
    /// Degrees a heater moves toward its target per idle pass.
    pub heat_step: f32,

    pub pins: [bool; 256],
    pub pin_writes: Vec<(u8, u8)>,
    pub toggle_pin_at: Option<(u8, u32)>,

    pub stored: Option<Settings>,
}

impl Default for MockBoard {
    fn default() -> Self {
        Self {
            input: VecDeque::new(),
            output: Vec::new(),
            scheduled: Vec::new(),
            moves: Vec::new(),
            position: XYZEData::default(),
            steps_per_unit: XYZEData::default(),
            quick_stops: 0,
            blocks_queued: Cell::new(0),
            now: 0,
            tick_ms: 1,
            homing: false,
            endstops_global: false,
            endstop_hit: XYZEData::default(),
            deploys: 0,
            deployed: false,
            probe_fault: None,
            bed_height: |_, _| 0.0,
            probes: Vec::new(),
            status: String::new(),
            display: false,
            click_at: None,
            file: VecDeque::new(),
            printing: false,
            print_finished: false,
            autostart_checks: 0,
            fault: None,
            hotend: [0.0; MAX_EXTRUDERS],
            hotend_target: [0.0; MAX_EXTRUDERS],
            bed_temp: 0.0,
            bed_target: 0.0,
            heat_step: 0.0,
            pins: [false; 256],
            pin_writes: Vec::new(),
            toggle_pin_at: None,
            stored: None,
        }
    }
}

impl MockBoard {
    pub fn feed(&mut self, text: &str) {
        self.input.extend(text.bytes());
    }

    /// Feeds `text` once the clock reaches `at_ms`.
    pub fn schedule(&mut self, at_ms: u32, text: &str) {
        self.scheduled.push((at_ms, text.to_string()));
    }

    pub fn start_file(&mut self, text: &str) {
        self.file.extend(text.bytes());
        self.printing = true;
    }

    pub fn take_output(&mut self) -> Vec<String> {
        core::mem::take(&mut self.output)
    }
}

fn approach(value: &mut f32, target: f32, step: f32) {
    if *value < target {
        *value = (*value + step).min(target);
    }
    else {
        *value = (*value - step).max(target);
    }
}

impl Host for MockBoard {
    fn read_byte(&mut self) -> Option<u8> {
        self.input.pop_front()
    }

    fn send_line(&mut self, line: &str) {
        self.output.push(line.to_string());
    }
}

impl Planner for MockBoard {
    fn buffer_line(&mut self, target: XYZEData<f32>, feedrate_mm_s: f32, extruder: u8) {
        self.moves.push(PlannedMove { target, feedrate: feedrate_mm_s, extruder });
        self.position = target;
    }

    fn set_position(&mut self, position: XYZEData<f32>) {
        self.position = position;
    }

    fn set_e_position(&mut self, e: f32) {
        self.position.e = e;
    }

    fn has_blocks_queued(&self) -> bool {
        let left = self.blocks_queued.get();
        if left > 0 {
            self.blocks_queued.set(left - 1);
        }
        left > 0
    }

    fn stepper_position(&self) -> XYZEData<f32> {
        self.position
    }

    fn quick_stop(&mut self) {
        self.quick_stops += 1;
        self.blocks_queued.set(0);
    }

    fn set_steps_per_unit(&mut self, steps: XYZEData<f32>) {
        self.steps_per_unit = steps;
    }
}

impl Kinematics for MockBoard {}

impl Endstops for MockBoard {
    fn enable(&mut self, on: bool) {
        self.homing = on;
    }

    fn enable_globally(&mut self, on: bool) {
        self.endstops_global = on;
    }

    fn not_homing(&mut self) {
        self.homing = false;
    }

    fn hit_on_purpose(&mut self) {}

    fn triggered(&mut self, axis: AxisId) -> bool {
        *self.endstop_hit.match_id(axis)
    }
}

impl Probe for MockBoard {
    fn deploy(&mut self) -> Result<(), ProbeFault> {
        if self.probe_fault == Some(ProbeFault::Deploy) {
            return Err(ProbeFault::Deploy);
        }
        self.deploys += 1;
        self.deployed = true;
        Ok(())
    }

    fn stow(&mut self) -> Result<(), ProbeFault> {
        if self.probe_fault == Some(ProbeFault::Stow) {
            return Err(ProbeFault::Stow);
        }
        self.deployed = false;
        Ok(())
    }

    fn probe_z(&mut self) -> Result<f32, ProbeFault> {
        if self.probe_fault == Some(ProbeFault::NotTriggered) {
            return Err(ProbeFault::NotTriggered);
        }
        let (x, y) = (self.position.x, self.position.y);
        self.probes.push((x, y));
        let z = (self.bed_height)(x, y);
        self.position.z = z;
        Ok(z)
    }
}

impl Thermal for MockBoard {
    fn set_target_hotend(&mut self, celsius: f32, extruder: u8) {
        self.hotend_target[extruder as usize] = celsius;
    }

    fn set_target_bed(&mut self, celsius: f32) {
        self.bed_target = celsius;
    }

    fn deg_hotend(&self, extruder: u8) -> f32 {
        self.hotend[extruder as usize]
    }

    fn deg_target_hotend(&self, extruder: u8) -> f32 {
        self.hotend_target[extruder as usize]
    }

    fn deg_bed(&self) -> f32 {
        self.bed_temp
    }

    fn deg_target_bed(&self) -> f32 {
        self.bed_target
    }

    fn disable_all_heaters(&mut self) {
        self.hotend_target = [0.0; MAX_EXTRUDERS];
        self.bed_target = 0.0;
    }

    fn take_fault(&mut self) -> Option<ThermalFault> {
        self.fault.take()
    }
}

impl Pins for MockBoard {
    fn read(&mut self, pin: u8) -> bool {
        self.pins[pin as usize]
    }

    fn write(&mut self, pin: u8, value: u8) {
        self.pin_writes.push((pin, value));
    }

    fn set_input(&mut self, _: u8) {}
}

impl Status for MockBoard {
    fn set_status(&mut self, message: &str) {
        self.status = message.to_string();
    }

    fn clicked(&mut self) -> bool {
        match self.click_at {
            Some(at) if self.now >= at => {
                self.click_at = None;
                true
            }
            _ => false,
        }
    }

    fn detected(&self) -> bool {
        self.display
    }
}

impl Clock for MockBoard {
    fn millis(&self) -> u32 {
        self.now
    }
}

impl FileSource for MockBoard {
    fn is_printing(&self) -> bool {
        self.printing
    }

    fn next_byte(&mut self) -> Result<Option<u8>, SdReadError> {
        Ok(self.file.pop_front())
    }

    fn print_finished(&mut self) {
        self.printing = false;
        self.print_finished = true;
    }

    fn check_autostart(&mut self) {
        self.autostart_checks += 1;
    }
}

impl SettingsStore for MockBoard {
    fn save(&mut self, settings: &Settings) -> bool {
        self.stored = Some(settings.clone());
        true
    }

    fn load(&mut self) -> Option<Settings> {
        self.stored.clone()
    }
}

impl Board for MockBoard {
    fn idle(&mut self) {
        self.now = self.now.wrapping_add(self.tick_ms);

        let now = self.now;
        let (due, later): (Vec<_>, Vec<_>) = self.scheduled.drain(..).partition(|(at, _)| now >= *at);
        self.scheduled = later;
        for (_, text) in due {
            self.feed(&text);
        }

        if let Some((pin, at)) = self.toggle_pin_at {
            if now >= at {
                self.pins[pin as usize] = !self.pins[pin as usize];
                self.toggle_pin_at = None;
            }
        }

        let step = self.heat_step;
        for (temp, target) in self.hotend.iter_mut().zip(self.hotend_target) {
            approach(temp, target, step);
        }
        approach(&mut self.bed_temp, self.bed_target, step);
    }
}

pub fn machine() -> Machine<MockBoard> {
    machine_with(MachineConfig::default())
}

pub fn machine_with(config: MachineConfig) -> Machine<MockBoard> {
    Machine::new(MockBoard::default(), config)
}

/// Feeds `text` as host input and runs until everything is handled.
pub fn run(m: &mut Machine<MockBoard>, text: &str) {
    m.board.feed(text);
    run_until_drained(m);
}

pub fn run_until_drained(m: &mut Machine<MockBoard>) {
    for _ in 0..10_000 {
        if m.board.input.is_empty() && !m.has_pending_commands() && !m.board.printing {
            return;
        }
        m.poll();
    }
    panic!("machine never drained");
}
