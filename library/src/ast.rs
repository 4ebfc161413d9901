use core::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CommandFamily {
    G,
    M,
    T,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseCommandFamilyError;
impl FromStr for CommandFamily {
    type Err = ParseCommandFamilyError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.chars().next() {
            Some('G') => Ok(CommandFamily::G),
            Some('M') => Ok(CommandFamily::M),
            Some('T') => Ok(CommandFamily::T),
            _ => Err(ParseCommandFamilyError{}),
        }
    }
}

impl CommandFamily {
    pub fn letter(self) -> char {
        match self {
            CommandFamily::G => 'G',
            CommandFamily::M => 'M',
            CommandFamily::T => 'T',
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CommandId {
    pub family: CommandFamily,
    pub code: u16,
}

impl CommandId {
    pub const fn g(code: u16) -> Self {
        Self { family: CommandFamily::G, code }
    }
    pub const fn m(code: u16) -> Self {
        Self { family: CommandFamily::M, code }
    }

    /// G0 to G3, refused while the machine is stopped.
    pub fn is_motion(&self) -> bool {
        self.family == CommandFamily::G && self.code <= 3
    }
}

impl core::fmt::Display for CommandId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}{}", self.family.letter(), self.code)
    }
}
