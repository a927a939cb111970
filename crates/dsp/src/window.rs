// Copyright 2025-2026 CEMAXECUTER LLC

use std::f64::consts::PI;

/// Modified Bessel function of the first kind, order 0 (for Kaiser window)
fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    let x_sq_over_4 = x * x / 4.0;
    for k in 1..=30 {
        term *= x_sq_over_4 / (k * k) as f64;
        sum += term;
        if term < sum * 1e-12 {
            break;
        }
    }
    sum
}

/// Kaiser window of length `n`; larger `beta` trades mainlobe width for
/// sidelobe level.
pub fn kaiser(n: usize, beta: f64) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    let mut w = Vec::with_capacity(n);
    let n_f = n as f64;
    let denom = bessel_i0(beta);

    for i in 0..n {
        let x = 2.0 * i as f64 / (n_f - 1.0) - 1.0;
        let arg = beta * (1.0 - x * x).max(0.0).sqrt();
        w.push(bessel_i0(arg) / denom);
    }
    w
}

/// Kaiser beta for a given stopband attenuation in dB.
pub fn kaiser_beta(as_db: f64) -> f64 {
    if as_db > 50.0 {
        0.1102 * (as_db - 8.7)
    } else if as_db > 21.0 {
        0.5842 * (as_db - 21.0).powf(0.4) + 0.07886 * (as_db - 21.0)
    } else {
        0.0
    }
}

/// Kaiser-windowed sinc lowpass.
///
/// - `len`: number of taps
/// - `cutoff`: normalized cutoff in cycles/sample (0 < cutoff < 0.5)
/// - `as_db`: stopband attenuation used to pick the Kaiser beta
///
/// Coefficients are scaled so they sum to `gain`.
pub fn lowpass_prototype(len: usize, cutoff: f64, as_db: f64, gain: f64) -> Vec<f32> {
    let win = kaiser(len, kaiser_beta(as_db));
    let half = (len as f64 - 1.0) / 2.0;
    let mut h = Vec::with_capacity(len);

    for n in 0..len {
        let t = n as f64 - half;
        let sinc_val = if t.abs() < 1e-12 {
            1.0
        } else {
            let x = 2.0 * cutoff * t;
            (PI * x).sin() / (PI * x)
        };
        h.push(sinc_val * win[n]);
    }

    let sum: f64 = h.iter().sum();
    let scale = if sum.abs() > 1e-12 { gain / sum } else { 1.0 };
    h.into_iter().map(|v| (v * scale) as f32).collect()
}

/// 4-term Blackman-Harris window, used ahead of the spectrum FFT
/// (about -92 dB sidelobes).
pub fn blackman_harris(n: usize) -> Vec<f32> {
    const A0: f64 = 0.35875;
    const A1: f64 = 0.48829;
    const A2: f64 = 0.14128;
    const A3: f64 = 0.01168;

    if n <= 1 {
        return vec![1.0; n];
    }
    let m = (n - 1) as f64;
    (0..n)
        .map(|i| {
            let x = 2.0 * PI * i as f64 / m;
            (A0 - A1 * x.cos() + A2 * (2.0 * x).cos() - A3 * (3.0 * x).cos()) as f32
        })
        .collect()
}
