//! Crossover / crossunder of two series.
//!
//! crossover[i]  = a[i-1] <= b[i-1] && a[i] > b[i]
//! crossunder[i] = a[i-1] >= b[i-1] && a[i] < b[i]
//! Undefined when any of the four inputs is undefined, so always at bar 0.

fn cross<F>(a: &[Option<f64>], b: &[Option<f64>], crossed: F) -> Vec<Option<bool>>
where
    F: Fn(f64, f64, f64, f64) -> bool,
{
    let len = a.len().min(b.len());
    let mut values = Vec::with_capacity(len);
    for i in 0..len {
        if i == 0 {
            values.push(None);
            continue;
        }
        let value = match (a[i - 1], b[i - 1], a[i], b[i]) {
            (Some(pa), Some(pb), Some(ca), Some(cb)) => Some(crossed(pa, pb, ca, cb)),
            _ => None,
        };
        values.push(value);
    }
    values
}

pub fn calculate_crossover(a: &[Option<f64>], b: &[Option<f64>]) -> Vec<Option<bool>> {
    cross(a, b, |pa, pb, ca, cb| pa <= pb && ca > cb)
}

pub fn calculate_crossunder(a: &[Option<f64>], b: &[Option<f64>]) -> Vec<Option<bool>> {
    cross(a, b, |pa, pb, ca, cb| pa >= pb && ca < cb)
}
