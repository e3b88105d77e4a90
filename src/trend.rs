/// Percentage change from `previous` to `current`, rounded to two decimals.
///
/// A zero baseline reports a full positive swing when there is now something
/// to show and no change otherwise.
pub fn trend(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        return if current > 0.0 { 100.0 } else { 0.0 };
    }
    let change = round2((current - previous) / previous * 100.0);
    if change.is_finite() {
        change
    } else {
        0.0
    }
}

pub fn trend_or_flat(current: f64, previous: Option<f64>) -> f64 {
    previous.map_or(0.0, |previous| trend(current, previous))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
