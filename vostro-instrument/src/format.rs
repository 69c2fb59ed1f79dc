//! Decimal-place rounding used when writing rates and amounts.
//!
//! Order rates are always ceiled and amounts floored before submission so
//! rounding can never work against the engine.

fn scale(decimal_place: u32) -> f64 {
    10f64.powi(decimal_place as i32)
}

pub fn floor_to(value: f64, decimal_place: u32) -> f64 {
    let factor = scale(decimal_place);
    (value * factor).floor() / factor
}

pub fn ceil_to(value: f64, decimal_place: u32) -> f64 {
    let factor = scale(decimal_place);
    (value * factor).ceil() / factor
}

pub fn round_to(value: f64, decimal_place: u32) -> f64 {
    let factor = scale(decimal_place);
    (value * factor).round() / factor
}

/// Render `value` floored at `decimal_place`, trimming trailing zeros.
pub fn display_floor(value: f64, decimal_place: u32) -> String {
    let mut rendered = format!("{:.*}", decimal_place as usize, floor_to(value, decimal_place));
    if rendered.contains('.') {
        while rendered.ends_with('0') {
            rendered.pop();
        }
        if rendered.ends_with('.') {
            rendered.pop();
        }
    }
    rendered
}

/// Render `value` rounded at `decimal_place`, trimming trailing zeros.
pub fn display_round(value: f64, decimal_place: u32) -> String {
    let mut rendered = format!("{:.*}", decimal_place as usize, round_to(value, decimal_place));
    if rendered.contains('.') {
        while rendered.ends_with('0') {
            rendered.pop();
        }
        if rendered.ends_with('.') {
            rendered.pop();
        }
    }
    rendered
}
