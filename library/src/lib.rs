#![no_std]

//! Command and motion core of a printer firmware: serial and SD intake, the
//! command queue, G-code dispatch, homing, bed leveling and the supporting
//! machine commands. Hardware lives behind the [`Board`] traits.

mod ast;
pub mod board;
mod channel;
mod config;
mod containers;
mod control;
mod dispatch;
mod error;
mod homing;
mod leveling;
mod line;
mod machine;
mod matrix;
mod mesh;
mod motion;
mod parser;
pub mod protocol;
mod settings;
pub mod stepper;
mod temperature;
mod util;
mod xyz;

#[cfg(test)]
mod mock;

pub use ast::{CommandFamily, CommandId};
pub use board::{
    Board, Clock, Endstops, FileSource, Host, Kinematics, Pins, Planner, Probe, SdReadError, SettingsStore, Status,
    Thermal,
};
pub use channel::{CanReceiveMut, CanSendMut, Channel};
pub use config::*;
pub use containers::CircularBuffer;
pub use dispatch::{Ack, Handler, HandlerTable};
pub use error::{CommandError, ProbeFault, ThermalFault};
pub use leveling::DeltaGrid;
pub use line::{CommandLine, Fed, LineReader, SourceKind};
pub use machine::*;
pub use matrix::{Matrix3x3, PlaneFit, Vector3};
pub use mesh::MeshLevel;
pub use parser::{parse, Command, Parsed, TempUnit, Units};
pub use protocol::{LineValidator, ProtocolError};
pub use settings::Settings;
pub use stepper::{ActuatorBank, ActuatorId, StepDir};
pub use xyz::{AxisId, XYZEData, AXIS_ID_LIST, XYZ_ID_LIST};
