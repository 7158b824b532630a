use core::f32::consts::PI;

use crate::error::{ConfigError, Result};

/// Window functions applied before the transform. All are symmetric over
/// `n = 0..len`, i.e. the cosine terms use a denominator of `len - 1`.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum WindowKind {
    Rectangular,
    Hamming,
    #[default]
    Hanning,
    BlackmanHarris,
    Tukey25,
    Tukey75,
}

impl WindowKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "rectangular" | "rect" | "none" => Self::Rectangular,
            "hamming" => Self::Hamming,
            "hanning" | "hann" => Self::Hanning,
            "blackman-harris" | "blackmanharris" | "blackman" => Self::BlackmanHarris,
            "tukey-0.25" | "tukey25" => Self::Tukey25,
            "tukey-0.75" | "tukey75" => Self::Tukey75,
            _ => return None,
        })
    }

    /// Fill `table` with the window coefficients
    pub fn fill(&self, table: &mut [f32]) {
        let len = table.len();
        if len < 2 {
            table.fill(1.0);
            return;
        }
        let m = (len - 1) as f32;
        match self {
            Self::Rectangular => table.fill(1.0),
            Self::Hamming => {
                for (n, w) in table.iter_mut().enumerate() {
                    *w = 0.53836 - 0.46164 * libm::cosf(2.0 * PI * n as f32 / m);
                }
            }
            Self::Hanning => tukey(table, 1.0),
            Self::BlackmanHarris => {
                for (n, w) in table.iter_mut().enumerate() {
                    let x = 2.0 * PI * n as f32 / m;
                    *w = 0.35875 - 0.48829 * libm::cosf(x) + 0.14128 * libm::cosf(2.0 * x)
                        - 0.01168 * libm::cosf(3.0 * x);
                }
            }
            Self::Tukey25 => tukey(table, 0.25),
            Self::Tukey75 => tukey(table, 0.75),
        }
    }
}

/// Cosine taper over the first and last `ratio / 2` of the window, flat
/// in between. A ratio of 1.0 gives a Hann window.
fn tukey(table: &mut [f32], ratio: f32) {
    let m = (table.len() - 1) as f32;
    let edge = ratio * m / 2.0;
    for (n, w) in table.iter_mut().enumerate() {
        let n = n as f32;
        let d = n.min(m - n);
        *w = if d < edge {
            0.5 * (1.0 - libm::cosf(PI * d / edge))
        } else {
            1.0
        };
    }
}

/// Precomputed window table
#[derive(Clone, Debug)]
pub struct Window {
    kind: WindowKind,
    table: Vec<f32>,
}

impl Window {
    pub fn new(kind: WindowKind, len: usize) -> Result<Self> {
        let mut table = Vec::new();
        table
            .try_reserve_exact(len)
            .map_err(|_| ConfigError::resource_exhausted("window table"))?;
        table.resize(len, 0.0);
        kind.fill(&mut table);
        Ok(Self { kind, table })
    }

    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    pub fn table(&self) -> &[f32] {
        &self.table
    }

    /// Multiply `frame` by the window in place
    pub fn apply(&self, frame: &mut [f32]) {
        debug_assert_eq!(frame.len(), self.table.len());
        if self.kind == WindowKind::Rectangular {
            return;
        }
        for (x, w) in frame.iter_mut().zip(self.table.iter()) {
            *x *= w;
        }
    }
}
