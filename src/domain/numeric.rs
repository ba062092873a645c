/// Rounds to `places` decimals, refusing non-finite inputs so reports never
/// carry NaN or infinity.
pub fn round_to(value: f64, places: i32) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    let factor = 10_f64.powi(places);
    let rounded = (value * factor).round() / factor;
    rounded.is_finite().then_some(rounded)
}

pub fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    finite(values.iter().sum::<f64>() / values.len() as f64)
}
