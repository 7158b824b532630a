use crate::config::BitOrder;

/// Cascaded integrator-comb decimator for a single PDM channel.
///
/// Each input bit enters the integrators as +1/-1; every `decimation` bits the
/// comb section runs once and produces one sample. Integrators wrap on
/// overflow, which the comb section undoes as long as the true output fits in
/// an i32 (`decimation^STAGES <= 2^31`).
#[derive(Clone, Debug)]
pub struct CicFilter<const STAGES: usize> {
    integrator: [i32; STAGES],
    comb: [i32; STAGES],
    decimation: usize,
    pos: usize,
}

impl<const STAGES: usize> CicFilter<STAGES> {
    pub fn new(decimation: usize) -> Self {
        assert!(decimation > 0);
        Self {
            integrator: [0; STAGES],
            comb: [0; STAGES],
            decimation,
            pos: 0,
        }
    }

    pub fn decimation(&self) -> usize {
        self.decimation
    }

    /// Output magnitude for a full-scale (all ones) input
    pub fn full_scale(&self) -> f32 {
        (self.decimation as u64).pow(STAGES as u32) as f32
    }

    fn integrate(&mut self, value: i32) {
        let mut x = value;
        for stage in 0..STAGES {
            self.integrator[stage] = self.integrator[stage].wrapping_add(x);
            x = self.integrator[stage];
        }
    }

    fn comb(&mut self) -> i32 {
        // Last integrator stage is always input
        let mut x = self.integrator[STAGES - 1];
        for stage in 0..STAGES {
            let y = x.wrapping_sub(self.comb[stage]);
            self.comb[stage] = x;
            x = y;
        }
        x
    }

    pub fn push_sample<F>(&mut self, sample: i32, mut output: F)
    where
        F: FnMut(i32),
    {
        self.integrate(sample);
        self.pos += 1;
        if self.pos == self.decimation {
            self.pos = 0;
            output(self.comb());
        }
    }

    /// Push the eight bits of one PDM byte in capture order
    pub fn push_byte<F>(&mut self, byte: u8, bit_order: BitOrder, mut output: F)
    where
        F: FnMut(i32),
    {
        for i in 0..8 {
            let bit = match bit_order {
                BitOrder::LsbFirst => i,
                BitOrder::MsbFirst => 7 - i,
            };
            let x = if (byte & (1 << bit)) != 0 { 1 } else { -1 };
            self.push_sample(x, &mut output);
        }
    }

    pub fn reset(&mut self) {
        self.integrator = [0; STAGES];
        self.comb = [0; STAGES];
        self.pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_output_per_decimation_bits() {
        let mut cic = CicFilter::<4>::new(8);
        let mut count = 0;
        for _ in 0..10 {
            cic.push_byte(0x5a, BitOrder::LsbFirst, |_| count += 1);
        }
        assert_eq!(count, 10);

        let mut cic = CicFilter::<4>::new(12);
        let mut count = 0;
        for _ in 0..9 {
            cic.push_byte(0x00, BitOrder::LsbFirst, |_| count += 1);
        }
        assert_eq!(count, 6);
    }

    #[test]
    fn settles_to_full_scale_for_constant_input() {
        let mut cic = CicFilter::<4>::new(16);
        let mut last = 0;
        for _ in 0..64 {
            cic.push_byte(0xff, BitOrder::LsbFirst, |y| last = y);
        }
        assert_eq!(last as f32, cic.full_scale());

        let mut last = 0;
        for _ in 0..64 {
            cic.push_byte(0x00, BitOrder::MsbFirst, |y| last = y);
        }
        assert_eq!(last as f32, -cic.full_scale());
    }

    #[test]
    fn alternating_bits_average_to_zero() {
        let mut cic = CicFilter::<4>::new(32);
        let mut outputs = Vec::new();
        for _ in 0..64 {
            cic.push_byte(0xaa, BitOrder::LsbFirst, |y| outputs.push(y));
        }
        // After the transient the output sits at zero
        assert!(outputs[8..].iter().all(|&y| y == 0));
    }

    #[test]
    fn survives_integrator_wraparound() {
        let mut cic = CicFilter::<4>::new(64);
        let mut last = 0;
        // Long enough for the integrators to wrap many times over
        for _ in 0..200_000 {
            cic.push_byte(0xff, BitOrder::LsbFirst, |y| last = y);
        }
        assert_eq!(last, 1 << 24);
    }
}
