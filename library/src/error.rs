use arrayvec::ArrayString;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ProbeFault {
    #[error("Z-Probe failed to deploy")]
    Deploy,
    #[error("Z-Probe failed to stow")]
    Stow,
    #[error("Probing failed")]
    NotTriggered,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ThermalFault {
    #[error("Heating failed")]
    HeatingFailed,
    #[error("Thermal Runaway")]
    ThermalRunaway,
    #[error("MAXTEMP triggered")]
    MaxTemp,
    #[error("MINTEMP triggered")]
    MinTemp,
}

/// Why a handler gave up. Reported to the host, never fatal to the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Mesh XY or IJ cannot be resolved")]
    MeshXy,
    #[error("M421 requires XYZ or IJZ parameters")]
    M421Parameters,
    #[error("M{code} Invalid extruder {index}")]
    InvalidExtruder { code: u16, index: i32 },
    #[error("T{0} Invalid extruder")]
    InvalidTool(i32),
    #[error("?(V)erbose Level is implausible (0-4).")]
    VerboseLevel,
    #[error("?Number of probed (P)oints is implausible (2 minimum).")]
    TooFewProbePoints,
    #[error("?Number of probed (P)oints is implausible ({0} maximum).")]
    TooManyProbePoints(usize),
    #[error("Home {0} first")]
    Unhomed(ArrayString<3>),
    #[error("S out of range (0-5).")]
    MeshState,
    #[error("Start mesh probing with \"G29 S1\" first.")]
    MeshNotStarted,
    #[error("{0} out of range (1-{1}).")]
    MeshIndex(char, usize),
    #[error("{0} not entered.")]
    NotEntered(char),
    #[error("?Z out of range ({0} to {1})")]
    ZOffsetRange(i32, i32),
    #[error(transparent)]
    Probe(#[from] ProbeFault),
    #[error("Wait cancelled")]
    Cancelled,
}

impl CommandError {
    /// Prefix the host sees in front of the message.
    pub fn prefix(&self) -> &'static str {
        match self {
            CommandError::Unhomed(_) | CommandError::InvalidExtruder { .. } | CommandError::InvalidTool(_) => "echo:",
            CommandError::VerboseLevel
            | CommandError::TooFewProbePoints
            | CommandError::TooManyProbePoints(_)
            | CommandError::MeshState
            | CommandError::MeshNotStarted
            | CommandError::MeshIndex(..)
            | CommandError::NotEntered(_)
            | CommandError::ZOffsetRange(..) => "",
            CommandError::MeshXy
            | CommandError::M421Parameters
            | CommandError::Probe(_)
            | CommandError::Cancelled => "Error:",
        }
    }
}
