//! Deterministic signal patterns for simulated instruments.

use std::f64::consts::PI;

/// Waveform shape produced by a simulated channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalPattern {
    /// Constant level
    Constant(f64),
    /// Sine wave
    Sine {
        frequency: f64,
        amplitude: f64,
        offset: f64,
    },
    /// Square wave alternating between `+amplitude` and `-amplitude`
    Square { period: f64, amplitude: f64 },
    /// Linear ramp from 0 to `amplitude` that resets every period
    Sawtooth { period: f64, amplitude: f64 },
    /// Triangle wave between `-amplitude` and `+amplitude`
    Triangle { period: f64, amplitude: f64 },
    /// Idle-high UART line repeatedly sending `byte` (8N1)
    Uart { baud: f64, byte: u8, high: f64 },
}

impl Default for SignalPattern {
    fn default() -> Self {
        SignalPattern::Sine {
            frequency: 1_000.0,
            amplitude: 1.0,
            offset: 0.0,
        }
    }
}

impl SignalPattern {
    /// Parse the `pattern=` option of a simulated device path.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sine" => SignalPattern::default(),
            "square" => SignalPattern::Square {
                period: 1e-3,
                amplitude: 1.0,
            },
            "sawtooth" => SignalPattern::Sawtooth {
                period: 1e-3,
                amplitude: 1.0,
            },
            "triangle" => SignalPattern::Triangle {
                period: 1e-3,
                amplitude: 1.0,
            },
            "uart" => SignalPattern::Uart {
                baud: 115_200.0,
                byte: b'U',
                high: 3.3,
            },
            "dc" => SignalPattern::Constant(1.0),
            _ => return None,
        })
    }

    /// Value of the pattern at time `t` seconds.
    pub fn value_at(&self, t: f64) -> f64 {
        match *self {
            SignalPattern::Constant(v) => v,
            SignalPattern::Sine {
                frequency,
                amplitude,
                offset,
            } => offset + amplitude * (2.0 * PI * frequency * t).sin(),
            SignalPattern::Square { period, amplitude } => {
                if t.rem_euclid(period) < period / 2.0 {
                    amplitude
                } else {
                    -amplitude
                }
            }
            SignalPattern::Sawtooth { period, amplitude } => {
                amplitude * (t.rem_euclid(period) / period)
            }
            SignalPattern::Triangle { period, amplitude } => {
                let tt = t.rem_euclid(period);
                let half = period / 2.0;
                if tt < half {
                    amplitude * (2.0 * tt / half - 1.0)
                } else {
                    amplitude * (1.0 - 2.0 * (tt - half) / half)
                }
            }
            SignalPattern::Uart { baud, byte, high } => {
                // 1 start + 8 data + 1 stop + 2 idle bits per frame
                let bit = (t * baud).floor() as i64;
                let pos = bit.rem_euclid(12);
                let level = match pos {
                    0 => false,
                    1..=8 => (byte >> (pos - 1)) & 1 == 1,
                    _ => true,
                };
                if level {
                    high
                } else {
                    0.0
                }
            }
        }
    }

    /// Sample `count` points spaced `dt` seconds apart, starting at `t0`.
    pub fn sample(&self, t0: f64, dt: f64, count: usize) -> Vec<f64> {
        (0..count).map(|i| self.value_at(t0 + dt * i as f64)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_zero_crossing() {
        let p = SignalPattern::Sine {
            frequency: 1.0,
            amplitude: 2.0,
            offset: 0.5,
        };
        assert!((p.value_at(0.0) - 0.5).abs() < 1e-12);
        assert!((p.value_at(0.25) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_square_halves() {
        let p = SignalPattern::Square {
            period: 1.0,
            amplitude: 1.0,
        };
        assert_eq!(p.value_at(0.1), 1.0);
        assert_eq!(p.value_at(0.6), -1.0);
    }

    #[test]
    fn test_uart_frame_bits() {
        let p = SignalPattern::Uart {
            baud: 1.0,
            byte: 0b0000_0001,
            high: 1.0,
        };
        // start bit low, LSB first
        assert_eq!(p.value_at(0.5), 0.0);
        assert_eq!(p.value_at(1.5), 1.0);
        assert_eq!(p.value_at(2.5), 0.0);
        // stop + idle high
        assert_eq!(p.value_at(9.5), 1.0);
        assert_eq!(p.value_at(11.5), 1.0);
    }

    #[test]
    fn test_sampling_is_deterministic() {
        let p = SignalPattern::from_name("triangle").unwrap();
        assert_eq!(p.sample(0.0, 1e-5, 64), p.sample(0.0, 1e-5, 64));
    }
}
