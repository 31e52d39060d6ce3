//! Computable Arduino built-ins (spec §4.7.3): pure functions with no host
//! dependency. These compute locally and return a primitive value; the
//! caller in [`crate::interpreter`] is responsible for emitting whatever
//! command accompanies the call.

use crate::value::{Numeric, Value};

/// `map(value, fromLow, fromHigh, toLow, toHigh)`, integer-arithmetic
/// remapping exactly as the reference Arduino core implements it (no
/// clamping to the output range).
#[must_use]
pub fn map(value: i64, from_low: i64, from_high: i64, to_low: i64, to_high: i64) -> i64 {
    (value - from_low) * (to_high - to_low) / (from_high - from_low) + to_low
}

#[must_use]
pub fn constrain(value: Numeric, low: Numeric, high: Numeric) -> Numeric {
    match (value, low, high) {
        (Numeric::Int(v), Numeric::Int(lo), Numeric::Int(hi)) => Numeric::Int(v.clamp(lo, hi)),
        _ => Numeric::Float(value.as_f64().clamp(low.as_f64(), high.as_f64())),
    }
}

impl Numeric {
    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(n) => n as f64,
            Self::Float(f) => f,
        }
    }
}

#[must_use]
pub fn abs(value: Numeric) -> Numeric {
    match value {
        Numeric::Int(n) => Numeric::Int(n.abs()),
        Numeric::Float(f) => Numeric::Float(f.abs()),
    }
}

#[must_use]
pub fn min(a: Numeric, b: Numeric) -> Numeric {
    if a.as_f64() <= b.as_f64() {
        a
    } else {
        b
    }
}

#[must_use]
pub fn max(a: Numeric, b: Numeric) -> Numeric {
    if a.as_f64() >= b.as_f64() {
        a
    } else {
        b
    }
}

#[must_use]
pub fn pow(base: f64, exponent: f64) -> f64 {
    base.powf(exponent)
}

#[must_use]
pub fn sqrt(x: f64) -> f64 {
    x.sqrt()
}

#[must_use]
pub fn sin(x: f64) -> f64 {
    x.sin()
}

#[must_use]
pub fn cos(x: f64) -> f64 {
    x.cos()
}

#[must_use]
pub fn tan(x: f64) -> f64 {
    x.tan()
}

/// NeoPixel-style 24-bit color packing: `(r<<16)|(g<<8)|b`.
#[must_use]
pub fn pack_rgb(r: u8, g: u8, b: u8) -> u32 {
    (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

/// HSV (hue 0..=65535, saturation/value 0..=255) to packed RGB, the
/// fixed-point algorithm the Adafruit NeoPixel library uses so color wheel
/// sketches produce the same wire output a real strip would show.
#[must_use]
pub fn hsv_to_rgb(hue: u32, sat: u8, val: u8) -> u32 {
    let hue = u64::from(hue % 65536);
    let r;
    let g;
    let b;
    if sat == 0 {
        r = val;
        g = val;
        b = val;
    } else {
        let sector = hue / 10923; // 65536 / 6
        let remainder = (hue - sector * 10923) * 6;
        let p = (u64::from(val) * u64::from(255 - sat) / 255) as u8;
        let q = (u64::from(val) * u64::from(255 - (u64::from(sat) * remainder / 65535) as u8) / 255) as u8;
        let t = (u64::from(val) * u64::from(255 - (u64::from(sat) * (65535 - remainder) / 65535) as u8) / 255) as u8;
        (r, g, b) = match sector % 6 {
            0 => (val, t, p),
            1 => (q, val, p),
            2 => (p, val, t),
            3 => (p, q, val),
            4 => (t, p, val),
            _ => (val, p, q),
        };
    }
    pack_rgb(r, g, b)
}

/// The standard gamma-correction table Adafruit's NeoPixel examples use
/// (`gamma8`) for perceptually linear brightness.
#[must_use]
pub fn gamma8(value: u8) -> u8 {
    let normalized = f64::from(value) / 255.0;
    (normalized.powf(2.8) * 255.0 + 0.5) as u8
}

/// Resolves an evaluated builtin call by name, returning `None` if `name`
/// is not a recognized computable built-in (the caller then treats it as a
/// user function or an unknown identifier).
#[must_use]
pub fn call_computable(name: &str, args: &[Value]) -> Option<Value> {
    let n = |i: usize| args.get(i).map(Numeric::of).unwrap_or(Numeric::Int(0));
    Some(match name {
        "map" => Value::Int32(map(n(0).as_i64(), n(1).as_i64(), n(2).as_i64(), n(3).as_i64(), n(4).as_i64()) as i32),
        "constrain" => constrain(n(0), n(1), n(2)).to_value(),
        "abs" => abs(n(0)).to_value(),
        "min" => min(n(0), n(1)).to_value(),
        "max" => max(n(0), n(1)).to_value(),
        "pow" => Value::Float64(pow(n(0).as_f64(), n(1).as_f64())),
        "sqrt" => Value::Float64(sqrt(n(0).as_f64())),
        "sin" => Value::Float64(sin(n(0).as_f64())),
        "cos" => Value::Float64(cos(n(0).as_f64())),
        "tan" => Value::Float64(tan(n(0).as_f64())),
        _ => return None,
    })
}

impl Numeric {
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Int(n) => n,
            Self::Float(f) => f as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_matches_reference_formula() {
        assert_eq!(map(512, 0, 1023, 0, 255), 127);
    }

    #[test]
    fn constrain_clamps_integers() {
        assert_eq!(constrain(Numeric::Int(300), Numeric::Int(0), Numeric::Int(255)).as_i64(), 255);
        assert_eq!(constrain(Numeric::Int(-5), Numeric::Int(0), Numeric::Int(255)).as_i64(), 0);
    }

    #[test]
    fn pack_rgb_matches_bit_layout() {
        assert_eq!(pack_rgb(0xFF, 0x00, 0x80), 0xFF0080);
    }

    #[test]
    fn hsv_red_at_zero_hue_full_sat_val() {
        assert_eq!(hsv_to_rgb(0, 255, 255), pack_rgb(255, 0, 0));
    }
}
