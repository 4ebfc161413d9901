use crate::{util::{parse_float, parse_long}, AxisId, CommandFamily, CommandId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TempUnit {
    Celsius,
    Fahrenheit,
    Kelvin,
}

/// Input unit state shared by every getter that scales its value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Units {
    pub linear_unit_factor: f32,
    pub volumetric_unit_factor: f32,
    pub volumetric_enabled: bool,
    pub temp_unit: TempUnit,
}

impl Default for Units {
    fn default() -> Self {
        Self {
            linear_unit_factor: 1.0,
            volumetric_unit_factor: 1.0,
            volumetric_enabled: false,
            temp_unit: TempUnit::Celsius,
        }
    }
}

impl Units {
    pub fn set_inches(&mut self, inches: bool) {
        self.linear_unit_factor = if inches { 25.4 } else { 1.0 };
        self.volumetric_unit_factor = self.linear_unit_factor * self.linear_unit_factor * self.linear_unit_factor;
    }

    pub fn axis_unit_factor(&self, axis: AxisId) -> f32 {
        if axis == AxisId::E && self.volumetric_enabled {
            self.volumetric_unit_factor
        }
        else {
            self.linear_unit_factor
        }
    }

    pub fn to_celsius(&self, value: f32) -> f32 {
        match self.temp_unit {
            TempUnit::Celsius => value,
            TempUnit::Fahrenheit => (value - 32.0) * 0.5555555556,
            TempUnit::Kelvin => value - 272.15,
        }
    }

    pub fn to_celsius_diff(&self, value: f32) -> f32 {
        match self.temp_unit {
            TempUnit::Fahrenheit => value * 0.5555555556,
            TempUnit::Celsius | TempUnit::Kelvin => value,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Parsed<'a> {
    Command(Command<'a>),
    /// No G/M/T code could be read. Carries the sanitized text for the echo.
    Unrecognized(&'a str),
}

/// One dequeued command and a cursor into its arguments.
///
/// Getters read the value after the last letter found by [`Command::seen`];
/// call them only after `seen` returned true.
#[derive(Debug, PartialEq)]
pub struct Command<'a> {
    pub id: CommandId,
    pub text: &'a str,
    pub args: &'a str,
    seen_at: Option<usize>,
}

/// Drops leading spaces, an `N<number>` prefix and the `*checksum` tail.
fn sanitize(line: &str) -> &str {
    let mut command = line.trim_start_matches(' ');
    let bytes = command.as_bytes();
    if bytes.first() == Some(&b'N') && bytes.get(1).is_some_and(|b| b.is_ascii_digit() || *b == b'-') {
        let rest = &command[2..];
        let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
        command = rest.trim_start_matches(' ');
    }
    if let Some(star) = command.find('*') {
        command = command[..star].trim_end_matches(' ');
    }
    command
}

pub fn parse(line: &str) -> Parsed<'_> {
    let text = sanitize(line);
    let Some(family) = text.get(..1).and_then(|letter| letter.parse::<CommandFamily>().ok()) else {
        return Parsed::Unrecognized(text);
    };
    let after = text[1..].trim_start_matches(' ');
    let digits = after.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return Parsed::Unrecognized(text);
    }
    let code = after[..digits].bytes().fold(0u16, |n, b| n.wrapping_mul(10).wrapping_add((b - b'0') as u16));
    let args = after[digits..].trim_start_matches(' ');
    Parsed::Command(Command { id: CommandId { family, code }, text, args, seen_at: None })
}

impl<'a> Command<'a> {
    pub fn seen(&mut self, letter: char) -> bool {
        self.seen_at = self.args.find(letter);
        self.seen_at.is_some()
    }

    /// Text following the letter last found by `seen`.
    fn value_text(&self) -> &'a str {
        match self.seen_at {
            Some(at) => &self.args[at + 1..],
            None => "",
        }
    }

    pub fn has_args(&self) -> bool {
        !self.args.is_empty()
    }

    /// An uppercase `E` ends the number: it names the extruder axis, never an exponent.
    pub fn value_float(&self) -> f32 {
        let text = self.value_text();
        let text = match text.find('E') {
            Some(e) => &text[..e],
            None => text,
        };
        parse_float(text)
    }

    pub fn value_long(&self) -> i32 {
        parse_long(self.value_text())
    }

    pub fn value_int(&self) -> i32 {
        self.value_long()
    }

    pub fn value_ulong(&self) -> u32 {
        self.value_long() as u32
    }

    pub fn value_byte(&self) -> u8 {
        self.value_long().clamp(0, 255) as u8
    }

    pub fn value_bool(&self) -> bool {
        self.value_byte() > 0
    }

    pub fn value_millis(&self) -> u32 {
        self.value_ulong()
    }

    pub fn value_millis_from_seconds(&self) -> u32 {
        (self.value_float() * 1000.0) as u32
    }

    pub fn value_linear_units(&self, units: &Units) -> f32 {
        self.value_float() * units.linear_unit_factor
    }

    pub fn value_axis_units(&self, axis: AxisId, units: &Units) -> f32 {
        self.value_float() * units.axis_unit_factor(axis)
    }

    pub fn value_per_axis_unit(&self, axis: AxisId, units: &Units) -> f32 {
        self.value_float() / units.axis_unit_factor(axis)
    }

    pub fn value_temp_abs(&self, units: &Units) -> f32 {
        units.to_celsius(self.value_float())
    }

    pub fn value_temp_diff(&self, units: &Units) -> f32 {
        units.to_celsius_diff(self.value_float())
    }

    /// `Some(value)` when `letter` is present.
    pub fn float(&mut self, letter: char) -> Option<f32> {
        if self.seen(letter) { Some(self.value_float()) } else { None }
    }

    pub fn int(&mut self, letter: char) -> Option<i32> {
        if self.seen(letter) { Some(self.value_int()) } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn command(line: &str) -> Command<'_> {
        match parse(line) {
            Parsed::Command(c) => c,
            Parsed::Unrecognized(t) => panic!("unrecognized {}", t),
        }
    }

    #[test]
    fn skips_line_number_and_checksum() {
        let c = command("N12 G1 X10 Y-2.5 *71");
        assert_eq!(c.id, CommandId::g(1));
        assert_eq!(c.args, "X10 Y-2.5");
        assert_eq!(c.text, "G1 X10 Y-2.5");
    }

    #[test]
    fn space_between_letter_and_code() {
        let c = command("  M 105");
        assert_eq!(c.id, CommandId::m(105));
        assert_eq!(c.args, "");
    }

    #[test]
    fn tool_family() {
        let c = command("T1 F300");
        assert_eq!(c.id, CommandId { family: CommandFamily::T, code: 1 });
    }

    #[test]
    fn unknown_family_or_missing_code() {
        assert_eq!(parse("X10"), Parsed::Unrecognized("X10"));
        assert_eq!(parse("N3 G *5"), Parsed::Unrecognized("G"));
        assert_eq!(parse(""), Parsed::Unrecognized(""));
    }

    #[test]
    fn seen_distinguishes_absent_from_zero() {
        let mut c = command("G1 X0");
        assert!(c.seen('X'));
        assert_eq!(c.value_int(), 0);
        assert!(!c.seen('Y'), "Absent is not the same as zero.");
    }

    #[test]
    fn float_stops_at_extruder_letter() {
        let mut c = command("G1 X1E5");
        assert!(c.seen('X'));
        assert_relative_eq!(c.value_float(), 1.0);
        assert!(c.seen('E'));
        assert_relative_eq!(c.value_float(), 5.0);
    }

    #[test]
    fn lowercase_exponent_still_parses() {
        let mut c = command("G1 X1e2");
        assert_eq!(c.float('X'), Some(100.0));
    }

    #[test]
    fn byte_is_clamped() {
        let mut c = command("M42 S300 P-3");
        assert!(c.seen('S'));
        assert_eq!(c.value_byte(), 255);
        assert!(c.seen('P'));
        assert_eq!(c.value_byte(), 0);
        assert!(!c.value_bool());
    }

    #[test]
    fn millis_from_seconds() {
        let mut c = command("G4 S1.5");
        assert!(c.seen('S'));
        assert_eq!(c.value_millis_from_seconds(), 1500);
    }

    #[test]
    fn inch_units_scale_linear_and_volumetric() {
        let mut units = Units::default();
        units.set_inches(true);
        let mut c = command("G1 X2 E1");
        assert!(c.seen('X'));
        assert_relative_eq!(c.value_linear_units(&units), 50.8);
        assert!(c.seen('E'));
        assert_relative_eq!(c.value_axis_units(AxisId::E, &units), 25.4, epsilon = 0.0001);
        units.volumetric_enabled = true;
        assert_relative_eq!(c.value_axis_units(AxisId::E, &units), 16387.064, epsilon = 0.01);
        assert!(c.seen('X'));
        assert_relative_eq!(c.value_per_axis_unit(AxisId::X, &units), 2.0 / 25.4);
    }

    #[test]
    fn temperature_conversions() {
        let mut units = Units::default();
        let mut c = command("M104 S212");
        assert!(c.seen('S'));
        assert_relative_eq!(c.value_temp_abs(&units), 212.0);
        units.temp_unit = TempUnit::Fahrenheit;
        assert_relative_eq!(c.value_temp_abs(&units), 100.0, epsilon = 0.001);
        assert_relative_eq!(c.value_temp_diff(&units), 117.777_78, epsilon = 0.001);
        units.temp_unit = TempUnit::Kelvin;
        assert_relative_eq!(c.value_temp_abs(&units), -60.15, epsilon = 0.001);
        assert_relative_eq!(c.value_temp_diff(&units), 212.0);
    }
}
