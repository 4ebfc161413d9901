//! A host-side board: steppers driven through the actuator bank, endstops at
//! the travel limits, a tilted bed for the probe and slewing heaters.

use std::collections::VecDeque;

use arrayvec::{ArrayString, ArrayVec};
use crossbeam_channel::{Receiver, TryRecvError};
use gcode_core::{
    board::SdReadError, ActuatorBank, AxisId, Board, Clock, Endstops, FileSource, Host, Kinematics, MachineConfig, Pins,
    Planner, Probe, ProbeFault, Settings, SettingsStore, Status, Thermal, ThermalFault, XYZEData, MAX_EXTRUDERS,
    XYZ_ID_LIST,
};

use crate::{my_clock, pins::{pin_read, pin_write, PinAction, SimStepDir}};

const LCD_WIDTH: usize = 20;
const AMBIENT: f32 = 25.0;
/// Where the carriage sits at power on, relative to the endstops.
const POWER_ON_CARRIAGE: XYZEData<f32> = XYZEData::new(60.0, 80.0, 20.0, 0.0);
/// Bed surface is `z = c + x * dx + y * dy` in carriage space.
const BED_PLANE: (f32, f32, f32) = (0.15, 0.0008, -0.0005);

#[derive(Clone, Copy, Debug)]
struct Block {
    target: XYZEData<f32>,
    feedrate: f32,
    extruder: u8,
}

#[derive(Clone, Copy, Debug)]
struct Heater {
    temp: f32,
    target: f32,
    /// degrees per second
    rate: f32,
    max: f32,
}

impl Heater {
    fn new(rate: f32, max: f32) -> Self {
        Self { temp: AMBIENT, target: 0.0, rate, max }
    }

    fn update(&mut self, dt_s: f32) -> Option<ThermalFault> {
        let goal = if self.target > 0.0 { self.target } else { AMBIENT };
        let step = self.rate * dt_s;
        self.temp = if self.temp < goal { (self.temp + step).min(goal) } else { (self.temp - step).max(goal) };
        (self.temp > self.max).then_some(ThermalFault::MaxTemp)
    }
}

pub struct SimBoard {
    host: Receiver<u8>,
    host_open: bool,

    bank: ActuatorBank<SimStepDir>,
    blocks: VecDeque<Block>,
    active: Option<Block>,
    /// Carriage position minus planner position.
    shift: XYZEData<f32>,

    min_pos: XYZEData<f32>,
    max_pos: XYZEData<f32>,
    home_dir: XYZEData<i8>,
    endstops_enabled: bool,
    endstops_global: bool,
    endstop_hit: XYZEData<bool>,
    probe_deployed: bool,

    hotends: ArrayVec<Heater, MAX_EXTRUDERS>,
    bed: Heater,
    fault: Option<ThermalFault>,
    last_tick_us: u64,

    status: ArrayString<LCD_WIDTH>,
    file: VecDeque<u8>,
    printing: bool,
    stored: Option<Settings>,
}

impl SimBoard {
    pub fn new(host: Receiver<u8>, config: &MachineConfig) -> Self {
        let mut bank = ActuatorBank::new(SimStepDir, config.extruders, config.steps_per_unit);
        bank.set_position(XYZEData::default());
        Self {
            host,
            host_open: true,
            bank,
            blocks: VecDeque::new(),
            active: None,
            shift: POWER_ON_CARRIAGE,
            min_pos: config.min_pos,
            max_pos: config.max_pos,
            home_dir: config.home_dir,
            endstops_enabled: false,
            endstops_global: false,
            endstop_hit: XYZEData::default(),
            probe_deployed: false,
            hotends: (0..config.extruders).map(|_| Heater::new(10.0, 275.0)).collect(),
            bed: Heater::new(2.0, 150.0),
            fault: None,
            last_tick_us: 0,
            status: ArrayString::new(),
            file: VecDeque::new(),
            printing: false,
            stored: None,
        }
    }

    /// Starts an SD print from `contents`.
    pub fn load_file(&mut self, contents: Vec<u8>) {
        self.file = contents.into();
        self.printing = true;
    }

    pub fn host_open(&self) -> bool {
        self.host_open
    }

    fn carriage(&self) -> XYZEData<f32> {
        self.bank.position() + self.shift
    }

    fn bed_height(x: f32, y: f32) -> f32 {
        let (c, dx, dy) = BED_PLANE;
        c + x * dx + y * dy
    }

    fn switch_closed(&self, axis: AxisId) -> bool {
        let at = *self.carriage().match_id(axis);
        match *self.home_dir.match_id(axis) {
            d if d < 0 => at <= *self.min_pos.match_id(axis),
            d if d > 0 => at >= *self.max_pos.match_id(axis),
            _ => false,
        }
    }

    fn check_endstops(&mut self) {
        if !(self.endstops_enabled || self.endstops_global) {
            return;
        }
        let Some(block) = self.active else { return };
        let position = self.bank.position();
        for axis in XYZ_ID_LIST {
            let travel = block.target.match_id(axis) - position.match_id(axis);
            let toward = travel * *self.home_dir.match_id(axis) as f32 > 0.0;
            if toward && self.switch_closed(axis) {
                log::debug!("{} endstop hit", axis.letter());
                *self.endstop_hit.match_id_mut(axis) = true;
                self.bank.stop();
                self.active = None;
                return;
            }
        }
    }

    /// Advances steppers, endstops and heaters to `now_us`.
    pub fn tick(&mut self, now_us: u64) {
        let dt_s = now_us.saturating_sub(self.last_tick_us) as f32 / 1_000_000.0;
        self.last_tick_us = now_us;

        self.bank.poll_task(now_us);
        self.check_endstops();
        if self.active.is_some() && self.bank.is_idle() {
            self.active = None;
        }
        if self.active.is_none() {
            if let Some(block) = self.blocks.pop_front() {
                if self.bank.move_to(block.target, block.feedrate, block.extruder) {
                    self.active = Some(block);
                }
            }
        }

        for heater in self.hotends.iter_mut().chain(core::iter::once(&mut self.bed)) {
            if let Some(fault) = heater.update(dt_s) {
                self.fault.get_or_insert(fault);
            }
        }
    }

    fn hotend(&self, extruder: u8) -> Option<&Heater> {
        self.hotends.get(extruder as usize)
    }
}

impl Host for SimBoard {
    fn read_byte(&mut self) -> Option<u8> {
        match self.host.try_recv() {
            Ok(byte) => Some(byte),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                if self.host_open {
                    log::info!("host closed the connection");
                }
                self.host_open = false;
                None
            }
        }
    }

    fn send_line(&mut self, line: &str) {
        println!("{}", line);
    }
}

impl Planner for SimBoard {
    fn buffer_line(&mut self, target: XYZEData<f32>, feedrate_mm_s: f32, extruder: u8) {
        self.blocks.push_back(Block { target, feedrate: feedrate_mm_s, extruder });
    }

    fn set_position(&mut self, position: XYZEData<f32>) {
        let carriage = self.carriage();
        self.bank.set_position(position);
        self.shift = carriage - position;
    }

    fn set_e_position(&mut self, e: f32) {
        self.bank.set_e_position(e);
    }

    fn has_blocks_queued(&self) -> bool {
        self.active.is_some() || !self.blocks.is_empty()
    }

    fn stepper_position(&self) -> XYZEData<f32> {
        self.bank.position()
    }

    fn quick_stop(&mut self) {
        self.blocks.clear();
        self.active = None;
        self.bank.stop();
    }

    fn set_steps_per_unit(&mut self, steps: XYZEData<f32>) {
        let position = self.bank.position();
        self.bank.set_steps_per_unit(steps);
        self.bank.set_position(position);
    }
}

impl Kinematics for SimBoard {}

impl Endstops for SimBoard {
    fn enable(&mut self, on: bool) {
        self.endstops_enabled = on;
    }

    fn enable_globally(&mut self, on: bool) {
        self.endstops_global = on;
        self.endstops_enabled = on;
    }

    fn not_homing(&mut self) {
        self.endstops_enabled = self.endstops_global;
    }

    fn hit_on_purpose(&mut self) {
        self.endstop_hit = XYZEData::default();
    }

    fn triggered(&mut self, axis: AxisId) -> bool {
        self.switch_closed(axis)
    }
}

impl Probe for SimBoard {
    fn deploy(&mut self) -> Result<(), ProbeFault> {
        self.probe_deployed = true;
        Ok(())
    }

    fn stow(&mut self) -> Result<(), ProbeFault> {
        self.probe_deployed = false;
        Ok(())
    }

    fn probe_z(&mut self) -> Result<f32, ProbeFault> {
        if !self.probe_deployed {
            return Err(ProbeFault::NotTriggered);
        }
        let carriage = self.carriage();
        let mut position = self.bank.position();
        position.z = Self::bed_height(carriage.x, carriage.y) - self.shift.z;
        self.bank.set_position(position);
        Ok(position.z)
    }
}

impl Thermal for SimBoard {
    fn set_target_hotend(&mut self, celsius: f32, extruder: u8) {
        if let Some(heater) = self.hotends.get_mut(extruder as usize) {
            heater.target = celsius;
        }
    }

    fn set_target_bed(&mut self, celsius: f32) {
        self.bed.target = celsius;
    }

    fn deg_hotend(&self, extruder: u8) -> f32 {
        self.hotend(extruder).map_or(AMBIENT, |h| h.temp)
    }

    fn deg_target_hotend(&self, extruder: u8) -> f32 {
        self.hotend(extruder).map_or(0.0, |h| h.target)
    }

    fn deg_bed(&self) -> f32 {
        self.bed.temp
    }

    fn deg_target_bed(&self) -> f32 {
        self.bed.target
    }

    fn disable_all_heaters(&mut self) {
        for heater in self.hotends.iter_mut() {
            heater.target = 0.0;
        }
        self.bed.target = 0.0;
    }

    fn take_fault(&mut self) -> Option<ThermalFault> {
        self.fault.take()
    }
}

impl Pins for SimBoard {
    fn read(&mut self, pin: u8) -> bool {
        pin_read(pin)
    }

    fn write(&mut self, pin: u8, value: u8) {
        log::info!("pin {} set to {}", pin, value);
        pin_write(pin, PinAction::from(value != 0));
    }

    fn set_input(&mut self, pin: u8) {
        log::debug!("pin {} is an input", pin);
    }
}

impl Status for SimBoard {
    fn set_status(&mut self, message: &str) {
        self.status.clear();
        for c in message.chars() {
            if self.status.try_push(c).is_err() {
                break;
            }
        }
        log::info!("status: {}", self.status);
    }
}

impl Clock for SimBoard {
    fn millis(&self) -> u32 {
        my_clock::millis()
    }
}

impl FileSource for SimBoard {
    fn is_printing(&self) -> bool {
        self.printing
    }

    fn next_byte(&mut self) -> Result<Option<u8>, SdReadError> {
        Ok(self.file.pop_front())
    }

    fn print_finished(&mut self) {
        self.printing = false;
        log::info!("file print finished");
    }

    fn check_autostart(&mut self) {
        log::debug!("no autostart file on the card");
    }
}

impl SettingsStore for SimBoard {
    fn save(&mut self, settings: &Settings) -> bool {
        self.stored = Some(settings.clone());
        true
    }

    fn load(&mut self) -> Option<Settings> {
        self.stored.clone()
    }
}

impl Board for SimBoard {
    fn idle(&mut self) {
        self.tick(my_clock::micros());
    }
}
