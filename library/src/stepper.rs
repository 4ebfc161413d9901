//! Step/dir actuators. A bank drives X, Y, Z and one actuator per extruder;
//! the extruder of a move picks its E actuator at run time.

use arrayvec::ArrayVec;
#[allow(unused_imports)]
use micromath::F32Ext;

use crate::{AxisId, XYZEData, MAX_EXTRUDERS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActuatorId {
    X,
    Y,
    Z,
    E(u8),
}

impl ActuatorId {
    pub fn axis(self) -> AxisId {
        match self {
            ActuatorId::X => AxisId::X,
            ActuatorId::Y => AxisId::Y,
            ActuatorId::Z => AxisId::Z,
            ActuatorId::E(_) => AxisId::E,
        }
    }
}

#[derive(Clone, Default)]
pub struct StepperTiming {
    pub next_update_time: u64,
}

/// Minimum pulse width in microseconds.
const SIGNAL_LENGTH: u32 = 30;

impl StepperTiming {
    pub fn update_needed(&self, now: u64) -> bool {
        self.next_update_time != 0 && now >= self.next_update_time
    }

    pub fn is_uninitialized(&self) -> bool {
        self.next_update_time == 0
    }

    pub fn uninit(&mut self) {
        self.next_update_time = 0;
    }

    pub fn update(&mut self, delay: u32) {
        self.next_update_time += delay as u64;
    }
}

/// Pin level side of an actuator. `step` toggles the step line.
pub trait StepDir: Clone {
    fn step(&mut self, actuator: ActuatorId);
    fn dir(&mut self, actuator: ActuatorId, negative: bool);
}

pub struct Stepper<SD: StepDir> {
    id: ActuatorId,
    step_dir_fn: SD,
    cycle_high: bool,
    pub timing: StepperTiming,
    position: i32,
    target: i32,
    delay_us: u32,
}

impl<SD: StepDir> Stepper<SD> {
    pub fn new(id: ActuatorId, step_dir_fn: SD) -> Self {
        Self { id, step_dir_fn, cycle_high: false, timing: Default::default(), position: 0, target: 0, delay_us: 0 }
    }

    pub fn id(&self) -> ActuatorId {
        self.id
    }

    pub fn on_target(&self) -> bool {
        self.target == self.position && self.timing.is_uninitialized()
    }

    pub fn get_target(&self) -> i32 {
        self.target
    }

    pub fn get_position(&self) -> i32 {
        self.position
    }

    /// Redefines where the actuator is without moving it.
    pub fn set_position(&mut self, steps: i32) {
        self.position = steps;
        self.target = steps;
        self.timing.uninit();
        self.cycle_high = false;
    }

    /// `speed` in steps per second.
    pub fn set_target(&mut self, target_step: i32, speed: u32) {
        self.target = target_step;
        self.delay_us = 1_000_000 / speed.max(1);
        self.step_dir_fn.dir(self.id, target_step < self.position);
    }

    /// Drops the rest of the move where it stands.
    pub fn stop(&mut self) {
        self.target = self.position;
        self.timing.uninit();
        self.cycle_high = false;
    }

    fn step(&mut self) {
        self.step_dir_fn.step(self.id);
        if !self.cycle_high {
            self.cycle_high = true;
            self.position += (self.target - self.position).signum();
            self.timing.update(SIGNAL_LENGTH);
        }
        else if self.position != self.target {
            self.timing.update(self.delay_us.saturating_sub(SIGNAL_LENGTH).max(SIGNAL_LENGTH));
            self.cycle_high = false;
        }
        else {
            self.timing.uninit();
            self.cycle_high = false;
        }
    }

    pub fn poll_task(&mut self, now: u64) {
        if self.timing.update_needed(now) {
            self.step();
        }
        else if self.timing.is_uninitialized() && !self.on_target() {
            self.timing.next_update_time = now;
            self.timing.update(self.delay_us.max(1));
            self.cycle_high = false;
        }
    }
}

/// Every actuator of a machine, addressed in mm.
pub struct ActuatorBank<SD: StepDir> {
    axes: [Stepper<SD>; 3],
    extruders: ArrayVec<Stepper<SD>, MAX_EXTRUDERS>,
    steps_per_unit: XYZEData<f32>,
    active_extruder: u8,
}

impl<SD: StepDir> ActuatorBank<SD> {
    pub fn new(step_dir_fn: SD, extruders: u8, steps_per_unit: XYZEData<f32>) -> Self {
        let axes = [
            Stepper::new(ActuatorId::X, step_dir_fn.clone()),
            Stepper::new(ActuatorId::Y, step_dir_fn.clone()),
            Stepper::new(ActuatorId::Z, step_dir_fn.clone()),
        ];
        let extruders = (0..extruders.min(MAX_EXTRUDERS as u8))
            .map(|e| Stepper::new(ActuatorId::E(e), step_dir_fn.clone()))
            .collect();
        Self { axes, extruders, steps_per_unit, active_extruder: 0 }
    }

    pub fn set_steps_per_unit(&mut self, steps_per_unit: XYZEData<f32>) {
        self.steps_per_unit = steps_per_unit;
    }

    fn to_steps(&self, axis: AxisId, mm: f32) -> i32 {
        (mm * self.steps_per_unit.match_id(axis)).round() as i32
    }

    fn to_mm(&self, axis: AxisId, steps: i32) -> f32 {
        steps as f32 / self.steps_per_unit.match_id(axis)
    }

    fn extruder(&mut self, extruder: u8) -> Option<&mut Stepper<SD>> {
        self.extruders.get_mut(extruder as usize)
    }

    pub fn set_position(&mut self, position: XYZEData<f32>) {
        for stepper in self.axes.iter_mut() {
            let axis = stepper.id().axis();
            let steps = (position.match_id(axis) * self.steps_per_unit.match_id(axis)).round() as i32;
            stepper.set_position(steps);
        }
        self.set_e_position(position.e);
    }

    pub fn set_e_position(&mut self, e: f32) {
        let steps = self.to_steps(AxisId::E, e);
        let active = self.active_extruder;
        if let Some(stepper) = self.extruder(active) {
            stepper.set_position(steps);
        }
    }

    /// Position in mm, E taken from the last used extruder.
    pub fn position(&self) -> XYZEData<f32> {
        let [x, y, z] = &self.axes;
        let e = self.extruders.get(self.active_extruder as usize).map_or(0, |s| s.get_position());
        XYZEData::new(
            self.to_mm(AxisId::X, x.get_position()),
            self.to_mm(AxisId::Y, y.get_position()),
            self.to_mm(AxisId::Z, z.get_position()),
            self.to_mm(AxisId::E, e),
        )
    }

    /// Starts a straight move to `target` at `feedrate` mm/s along the path.
    /// Returns false when the extruder has no actuator.
    pub fn move_to(&mut self, target: XYZEData<f32>, feedrate: f32, extruder: u8) -> bool {
        if extruder as usize >= self.extruders.len() {
            log::warn!("no actuator for extruder {}", extruder);
            return false;
        }
        if extruder != self.active_extruder {
            let e = self.position().e;
            self.active_extruder = extruder;
            self.set_e_position(e);
        }
        let from = self.position();
        let delta = target - from;
        let xyz = (delta.x * delta.x + delta.y * delta.y + delta.z * delta.z).sqrt();
        let length = if xyz > 0.0 { xyz } else { delta.e.abs() };
        if length == 0.0 || feedrate <= 0.0 {
            return true;
        }
        let seconds = length / feedrate;

        let targets = [AxisId::X, AxisId::Y, AxisId::Z].map(|axis| self.to_steps(axis, *target.match_id(axis)));
        for (stepper, target_step) in self.axes.iter_mut().zip(targets) {
            let distance = (target_step - stepper.get_position()).unsigned_abs();
            stepper.set_target(target_step, (distance as f32 / seconds) as u32);
        }
        let e_step = self.to_steps(AxisId::E, target.e);
        if let Some(stepper) = self.extruder(extruder) {
            let distance = (e_step - stepper.get_position()).unsigned_abs();
            stepper.set_target(e_step, (distance as f32 / seconds) as u32);
        }
        true
    }

    pub fn poll_task(&mut self, now_us: u64) {
        for stepper in self.axes.iter_mut().chain(self.extruders.iter_mut()) {
            stepper.poll_task(now_us);
        }
    }

    pub fn is_idle(&self) -> bool {
        self.axes.iter().chain(self.extruders.iter()).all(Stepper::on_target)
    }

    pub fn stop(&mut self) {
        for stepper in self.axes.iter_mut().chain(self.extruders.iter_mut()) {
            stepper.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn timing_init_then_uninit() {
        let mut timing = StepperTiming::default();
        assert_eq!(timing.is_uninitialized(), true);
        timing.update(10);
        assert_eq!(timing.is_uninitialized(), false);
        timing.uninit();
        assert_eq!(timing.is_uninitialized(), true);
    }

    #[test]
    fn timing_updates() {
        let mut timing = StepperTiming::default();
        assert_eq!(timing.update_needed(0), false);
        timing.update(110);
        assert_eq!(timing.update_needed(109), false);
        assert_eq!(timing.update_needed(110), true);
        assert_eq!(timing.update_needed(111), true);
    }

    #[derive(Default, Clone, Copy, Debug)]
    struct CounterStepper {
        pub current_step: u32,
        pub current_dir: bool,
        pub last: Option<ActuatorId>,
    }
    impl StepDir for CounterStepper {
        fn step(&mut self, actuator: ActuatorId) {
            self.current_step += 1;
            self.last = Some(actuator);
        }
        fn dir(&mut self, _: ActuatorId, negative: bool) { self.current_dir = negative; }
    }

    fn run_until_idle(bank: &mut ActuatorBank<CounterStepper>) -> u64 {
        let mut now = 100;
        for _ in 0..100_000 {
            bank.poll_task(now);
            if bank.is_idle() {
                break;
            }
            now += 10;
        }
        now
    }

    #[test]
    fn stepper_one_step() {
        let mut stepper = Stepper::new(ActuatorId::X, CounterStepper::default());
        assert_eq!(stepper.on_target(), true);
        stepper.set_target(1, 10_000); // 1 step every 100.
        assert_eq!(stepper.on_target(), false);
        stepper.poll_task(100);
        assert_eq!(stepper.step_dir_fn.current_step, 0);
        assert_eq!(stepper.timing.next_update_time, 200);
        stepper.poll_task(110);
        assert_eq!(stepper.step_dir_fn.current_step, 0, "Too early to step.");
        stepper.poll_task(200);
        assert_eq!(stepper.step_dir_fn.current_step, 1);
        assert_eq!(stepper.cycle_high, true);
        assert_eq!(stepper.timing.next_update_time as u32, 200 + SIGNAL_LENGTH);
        assert_eq!(stepper.on_target(), false, "Still inside the pulse.");
        stepper.poll_task(200 + SIGNAL_LENGTH as u64);
        assert_eq!(stepper.step_dir_fn.current_step, 2);
        assert_eq!(stepper.cycle_high, false);
        assert_eq!(stepper.on_target(), true);
        assert_eq!(stepper.get_position(), 1);
    }

    #[test]
    fn stepper_reverses() {
        let mut stepper = Stepper::new(ActuatorId::Z, CounterStepper::default());
        stepper.set_position(5);
        stepper.set_target(3, 100_000);
        assert_eq!(stepper.step_dir_fn.current_dir, true);
        let mut now = 100;
        while !stepper.on_target() {
            stepper.poll_task(now);
            now += 10;
        }
        assert_eq!(stepper.get_position(), 3);
        assert_eq!(stepper.step_dir_fn.current_step, 4);
    }

    #[test]
    fn stop_drops_remaining_steps() {
        let mut stepper = Stepper::new(ActuatorId::Y, CounterStepper::default());
        stepper.set_target(100, 1000);
        stepper.poll_task(100);
        stepper.poll_task(1100);
        stepper.stop();
        assert_eq!(stepper.on_target(), true);
        assert_eq!(stepper.get_target(), 1);
    }

    #[test]
    fn bank_moves_in_mm() {
        let steps = XYZEData::new(80.0, 80.0, 400.0, 100.0);
        let mut bank = ActuatorBank::new(CounterStepper::default(), 1, steps);
        assert!(bank.move_to(XYZEData::new(1.0, 0.5, 0.1, 0.2), 50.0, 0));
        assert_eq!(bank.is_idle(), false);
        run_until_idle(&mut bank);
        let position = bank.position();
        assert_relative_eq!(position.x, 1.0);
        assert_relative_eq!(position.y, 0.5);
        assert_relative_eq!(position.z, 0.1);
        assert_relative_eq!(position.e, 0.2);
    }

    #[test]
    fn extruder_index_selects_actuator() {
        let steps = XYZEData::new(80.0, 80.0, 400.0, 100.0);
        let mut bank = ActuatorBank::new(CounterStepper::default(), 2, steps);
        assert!(bank.move_to(XYZEData::new(0.0, 0.0, 0.0, 0.05), 10.0, 1));
        run_until_idle(&mut bank);
        assert_eq!(bank.extruders[1].get_position(), 5);
        assert_eq!(bank.extruders[0].get_position(), 0);
        assert_eq!(bank.extruders[1].step_dir_fn.last, Some(ActuatorId::E(1)));
        assert!(!bank.move_to(XYZEData::new(0.0, 0.0, 0.0, 1.0), 10.0, 2), "Only two extruders.");
    }

    #[test]
    fn set_position_does_not_step() {
        let steps = XYZEData::new(80.0, 80.0, 400.0, 100.0);
        let mut bank = ActuatorBank::new(CounterStepper::default(), 1, steps);
        bank.set_position(XYZEData::new(10.0, 0.0, 0.0, 0.0));
        assert!(bank.is_idle());
        assert_relative_eq!(bank.position().x, 10.0);
        assert_eq!(bank.axes[0].step_dir_fn.current_step, 0);
    }
}
