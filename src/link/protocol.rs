//! Laser control-protocol vocabulary and line parsing.
//!
//! The laser speaks a line-oriented protocol: commands terminated by CRLF,
//! responses terminated by CRLF. A successful acknowledgement line begins
//! with `OK`; anything else is a rejection. The status query answers with a
//! line containing `Resonator: <integer>` among other text, and
//! set-parameter acks echo the applied value in engineering notation
//! (e.g. `591.230000E+0`).

use once_cell::sync::Lazy;
use regex::Regex;

/// Handshake issued immediately after the control socket opens.
pub const CMD_CONNECT: &str = "RemoteConnect";
/// Graceful teardown command.
pub const CMD_DISCONNECT: &str = "RemoteDisconnect";
/// Status query; the reply carries the current resonator position.
pub const CMD_STATUS: &str = "GetActualPosition";

static RESONATOR_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"Resonator:\s*(-?\d+)").expect("resonator pattern is valid")
});

static ENGINEERING_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"(-?\d+(?:\.\d+)?)[Ee]([+-]?\d+)").expect("engineering pattern is valid")
});

/// Build the set-command for a named scalar parameter.
///
/// Only `wavelength` exists in the current laser vocabulary; unknown names
/// return `None` so the session can reject them before touching the wire.
pub fn set_parameter_command(name: &str, value: f64) -> Option<String> {
    match name {
        "wavelength" => Some(format!("SetWavelength {}", value)),
        _ => None,
    }
}

/// True when an acknowledgement line signals success.
pub fn is_ack_ok(line: &str) -> bool {
    line.trim_start().starts_with("OK")
}

/// Extract the resonator position from a status line, if present.
pub fn extract_resonator(line: &str) -> Option<i64> {
    RESONATOR_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Format a value the way the instrument echoes it: engineering notation
/// with a mantissa in [1, 1000) and six fractional digits. Non-finite
/// values cannot be normalised and are rendered as-is.
pub fn format_engineering(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value == 0.0 {
        return "0.000000E+0".to_string();
    }
    let sign = if value < 0.0 { "-" } else { "" };
    let mut mantissa = value.abs();
    let mut exponent: i32 = 0;
    while mantissa >= 1000.0 {
        mantissa /= 1000.0;
        exponent += 3;
    }
    while mantissa < 1.0 {
        mantissa *= 1000.0;
        exponent -= 3;
    }
    let exp = if exponent >= 0 {
        format!("+{}", exponent)
    } else {
        exponent.to_string()
    };
    format!("{}{:.6}E{}", sign, mantissa, exp)
}

/// Tolerant parse of an engineering/scientific-notation token embedded in an
/// acknowledgement line. No fixed precision or exponent form is assumed;
/// tokens whose exponent overflows f64 are treated as unparsable.
pub fn parse_engineering(line: &str) -> Option<f64> {
    let caps = ENGINEERING_RE.captures(line)?;
    let mantissa: f64 = caps.get(1)?.as_str().parse().ok()?;
    let exponent: i32 = caps.get(2)?.as_str().parse().ok()?;
    let value = mantissa * 10f64.powi(exponent);
    value.is_finite().then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_detection() {
        assert!(is_ack_ok("OK: Remote mode enabled"));
        assert!(is_ack_ok("  OK"));
        assert!(!is_ack_ok("ERR: busy"));
        assert!(!is_ack_ok("Resonator: 1234"));
    }

    #[test]
    fn resonator_extraction() {
        assert_eq!(
            extract_resonator("Motor: 17 Resonator: 18231 Etalon: 3"),
            Some(18231)
        );
        assert_eq!(extract_resonator("Resonator: -2"), Some(-2));
        assert_eq!(extract_resonator("no position here"), None);
    }

    #[test]
    fn engineering_round_trip() {
        let echo = format_engineering(591.23);
        assert_eq!(echo, "591.230000E+0");
        let parsed = parse_engineering(&format!("OK: Wavelength set to {}", echo)).unwrap();
        assert!((parsed - 591.23).abs() < 1e-9);
    }

    #[test]
    fn engineering_exponent_scaling() {
        assert_eq!(format_engineering(0.00152), "1.520000E-3");
        assert_eq!(format_engineering(1_250_000.0), "1.250000E+6");
        assert_eq!(format_engineering(0.0), "0.000000E+0");
        assert_eq!(format_engineering(-591.23), "-591.230000E+0");
    }

    #[test]
    fn non_finite_values_do_not_normalise() {
        assert_eq!(parse_engineering("OK: set 1E9999"), None);
        assert_eq!(parse_engineering("OK: set -2.5E9999"), None);
        assert_eq!(format_engineering(f64::INFINITY), "inf");
        assert_eq!(format_engineering(f64::NEG_INFINITY), "-inf");
        assert_eq!(format_engineering(f64::NAN), "NaN");
    }

    #[test]
    fn tolerant_parse_accepts_varied_precision() {
        assert_eq!(parse_engineering("OK: set 5.9123E+2"), Some(591.23));
        assert_eq!(parse_engineering("OK: set 591.23e0"), Some(591.23));
        assert_eq!(parse_engineering("OK: nothing numeric"), None);
    }

    #[test]
    fn unknown_parameter_has_no_command() {
        assert!(set_parameter_command("wavelength", 800.0).is_some());
        assert!(set_parameter_command("frobnication", 1.0).is_none());
    }
}
