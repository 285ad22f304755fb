//! Source waveform library, shared by voltage sources, rails and
//! current sources.

use std::f64::consts::TAU;

/// Time-varying source shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// Constant value.
    Dc,
    /// `bias + amplitude * sin(2*pi*f*t + phase)`
    Sine { frequency: f64, phase: f64 },
    /// Square wave between `bias + amplitude` and `bias - amplitude`.
    Square { frequency: f64, duty: f64 },
    /// Periodic pulse from `bias` to `bias + amplitude` for
    /// `duty` of each period.
    Pulse { frequency: f64, duty: f64 },
}

impl Waveform {
    /// True if the value changes with time (needs a dynamic RHS row).
    pub fn time_varying(&self) -> bool {
        !matches!(self, Waveform::Dc)
    }

    /// Integer tag used in dump lines.
    pub fn code(&self) -> u32 {
        match self {
            Waveform::Dc => 0,
            Waveform::Sine { .. } => 1,
            Waveform::Square { .. } => 2,
            Waveform::Pulse { .. } => 3,
        }
    }

    /// Source value at time `t` for the given amplitude and bias.
    pub fn value_at(&self, t: f64, amplitude: f64, bias: f64) -> f64 {
        match *self {
            Waveform::Dc => amplitude + bias,
            Waveform::Sine { frequency, phase } => {
                bias + amplitude * (TAU * frequency * t + phase).sin()
            }
            Waveform::Square { frequency, duty } => {
                let cycle = (t * frequency).fract();
                if cycle < duty.clamp(0.0, 1.0) {
                    bias + amplitude
                } else {
                    bias - amplitude
                }
            }
            Waveform::Pulse { frequency, duty } => {
                let cycle = (t * frequency).fract();
                if cycle < duty.clamp(0.0, 1.0) {
                    bias + amplitude
                } else {
                    bias
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dc_ignores_time() {
        let w = Waveform::Dc;
        assert_eq!(w.value_at(0.0, 5.0, 0.0), 5.0);
        assert_eq!(w.value_at(100.0, 5.0, 0.0), 5.0);
        assert!(!w.time_varying());
    }

    #[test]
    fn test_sine_peak_and_zero() {
        let w = Waveform::Sine {
            frequency: 60.0,
            phase: 0.0,
        };
        // Quarter period: sin = 1
        let quarter = 1.0 / 240.0;
        assert!((w.value_at(quarter, 10.0, 0.0) - 10.0).abs() < 1e-9);
        assert!(w.value_at(0.0, 10.0, 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_square_levels() {
        let w = Waveform::Square {
            frequency: 1.0,
            duty: 0.5,
        };
        assert_eq!(w.value_at(0.1, 2.0, 1.0), 3.0);
        assert_eq!(w.value_at(0.6, 2.0, 1.0), -1.0);
    }

    #[test]
    fn test_pulse_returns_to_bias() {
        let w = Waveform::Pulse {
            frequency: 1.0,
            duty: 0.25,
        };
        assert_eq!(w.value_at(0.1, 5.0, 0.0), 5.0);
        assert_eq!(w.value_at(0.5, 5.0, 0.0), 0.0);
    }
}
