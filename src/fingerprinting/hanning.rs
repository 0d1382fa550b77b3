//! Hann analysis window.

/// Symmetric Hann window of `len + 2` points with both zero endpoints
/// trimmed, so every coefficient is strictly positive.
pub fn hanning(len: usize) -> Vec<f32> {
    let denom = (len + 1) as f64;
    (1..=len)
        .map(|i| (0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / denom).cos()) as f32)
        .collect()
}
