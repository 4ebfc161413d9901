use thiserror::Error;

use crate::util::parse_long;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Line Number is not Last Line Number+1, Last Line: {last}")]
    LineNumber { last: i32 },
    #[error("checksum mismatch, Last Line: {last}")]
    ChecksumMismatch { last: i32 },
    #[error("No Checksum with line number, Last Line: {last}")]
    NoChecksum { last: i32 },
    #[error("No Line Number with checksum, Last Line: {last}")]
    NoLineNumberWithChecksum { last: i32 },
}

impl ProtocolError {
    pub fn requests_resend(&self) -> bool {
        !matches!(self, ProtocolError::NoLineNumberWithChecksum { .. })
    }

    pub fn last_line(&self) -> i32 {
        match *self {
            ProtocolError::LineNumber { last }
            | ProtocolError::ChecksumMismatch { last }
            | ProtocolError::NoChecksum { last }
            | ProtocolError::NoLineNumberWithChecksum { last } => last,
        }
    }
}

/// XOR of every byte in `body`.
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |sum, b| sum ^ b)
}

/// Splits `body*digits` at the first `*`.
fn split_checksum(command: &str) -> Option<(&str, &str)> {
    let matcher = safe_regex::regex!(br"([^*]*)[*](.*)");
    let (body, sum) = matcher.match_slices(command.as_bytes())?;
    Some((core::str::from_utf8(body).ok()?, core::str::from_utf8(sum).ok()?))
}

/// Tracks the host's line numbering on the serial link.
#[derive(Default, Debug)]
pub struct LineValidator {
    last_n: i32,
}

impl LineValidator {
    pub fn last_line(&self) -> i32 {
        self.last_n
    }

    pub fn set_last_line(&mut self, n: i32) {
        self.last_n = n;
    }

    pub fn check(&mut self, line: &str) -> Result<(), ProtocolError> {
        let command = line.trim_start_matches(' ');
        let split = split_checksum(command);
        let last = self.last_n;
        if let Some(numbered) = command.strip_prefix('N') {
            let is_reset = command.contains("M110");
            let digits = match command.get(4..).and_then(|rest| rest.find('N').map(|i| &rest[i + 1..])) {
                Some(second) if is_reset => second,
                _ => numbered,
            };
            let number = parse_long(digits);
            if number != last.wrapping_add(1) && !is_reset {
                return Err(ProtocolError::LineNumber { last });
            }
            match split {
                Some((body, sum)) => {
                    if parse_long(sum) != checksum(body) as i32 {
                        return Err(ProtocolError::ChecksumMismatch { last });
                    }
                }
                None => return Err(ProtocolError::NoChecksum { last }),
            }
            self.last_n = number;
        }
        else if split.is_some() {
            return Err(ProtocolError::NoLineNumberWithChecksum { last });
        }
        Ok(())
    }
}
