// SPDX-License-Identifier: GPL-3.0-only

//! Exposure and focus series for bracketed shots
//!
//! Even-length exposure brackets have no exact centre frame. The series is
//! laid out on whole stop steps with a 0 EV base frame, and the extra frame
//! goes to the over-exposed side: 4 frames at 1 stop are `-1, 0, +1, +2`.

use std::time::Duration;

/// Exposure offsets in EV for an `n`-frame bracket spaced by `stops`
pub fn exposure_offsets(n: u32, stops: f32) -> Vec<f32> {
    if n == 0 {
        return Vec::new();
    }
    let lowest = -(((n - 1) / 2) as i32);
    (0..n as i32).map(|i| (lowest + i) as f32 * stops).collect()
}

/// Scale a manual exposure time by an EV offset
///
/// Returns `None` when the result does not fit in a `Duration`.
pub fn scale_exposure_time(base: Duration, ev: f32) -> Option<Duration> {
    Duration::try_from_secs_f64(base.as_secs_f64() * 2f64.powf(ev as f64)).ok()
}

/// Focus distances in diopters from `source` to `target`, inclusive
///
/// Interpolation is linear in diopters. A single frame sits on the target.
pub fn focus_distances(source: f32, target: f32, n: u32) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![target],
        _ => {
            let step = (target - source) / (n - 1) as f32;
            (0..n)
                .map(|i| {
                    if i == n - 1 {
                        target
                    } else {
                        source + step * i as f32
                    }
                })
                .collect()
        }
    }
}
