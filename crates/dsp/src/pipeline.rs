use num_complex::Complex32;

use crate::cic::CicDecimator;
use crate::fir::{design_anti_alias_fir, design_compensation_fir, FirFilter};
use crate::Error;

/// Minimum input length the pipeline will process in one call. Shorter
/// buffers produce no output rather than a misleadingly short one; the
/// caller accumulates more samples and calls again.
const MIN_INPUT_SAMPLES: usize = 1000;

/// The CIC stage's decimated rate that every registered (input_rate, R)
/// pair must land on: `input_rate_hz / cic_r == INTERMEDIATE_RATE_HZ`.
const INTERMEDIATE_RATE_HZ: u32 = 400;
const OUTPUT_RATE_HZ: u32 = 10;

/// One registered `(input_rate_hz, cic_r)` pair. New sample rates are
/// supported by adding an entry here, as long as `input_rate_hz / cic_r`
/// is 400.
#[derive(Debug, Clone, Copy)]
pub struct PipelineRates {
    pub input_rate_hz: u32,
    pub cic_r: u32,
}

impl PipelineRates {
    pub const KNOWN: &'static [PipelineRates] = &[
        PipelineRates {
            input_rate_hz: 20_000,
            cic_r: 50,
        },
        PipelineRates {
            input_rate_hz: 16_000,
            cic_r: 40,
        },
    ];

    pub fn for_input_rate(input_rate_hz: u32) -> Option<Self> {
        Self::KNOWN.iter().copied().find(|r| r.input_rate_hz == input_rate_hz)
    }
}

/// Stateful three-stage decimator: CIC (input_rate → 400 Hz) →
/// compensation FIR (400 Hz, unity rate) → Kaiser anti-alias FIR + ÷40
/// (400 Hz → 10 Hz). Filter delay lines and the CIC's integrator/comb
/// state persist across `process` calls.
pub struct DecimationPipeline {
    cic: CicDecimator,
    compensation: FirFilter,
    anti_alias: FirFilter,
    anti_alias_phase: u32,
}

impl DecimationPipeline {
    pub fn new(rates: PipelineRates) -> Result<Self, Error> {
        if rates.input_rate_hz / rates.cic_r != INTERMEDIATE_RATE_HZ {
            return Err(Error::UnsupportedRate {
                input_rate_hz: rates.input_rate_hz,
                cic_r: rates.cic_r,
            });
        }

        let compensation_taps = design_compensation_fir(
            INTERMEDIATE_RATE_HZ as f64,
            rates.input_rate_hz as f64,
            rates.cic_r,
            4,
            5.0,
            63,
        );
        let anti_alias_taps = design_anti_alias_fir(INTERMEDIATE_RATE_HZ as f64, 5.0, 1.0, 90.0, 401);

        Ok(Self {
            cic: CicDecimator::new(rates.cic_r, 4),
            compensation: FirFilter::new(compensation_taps),
            anti_alias: FirFilter::new(anti_alias_taps),
            anti_alias_phase: 0,
        })
    }

    pub fn for_input_rate(input_rate_hz: u32) -> Result<Self, Error> {
        let rates = PipelineRates::for_input_rate(input_rate_hz).ok_or(Error::UnsupportedRate {
            input_rate_hz,
            cic_r: 0,
        })?;
        Self::new(rates)
    }

    pub fn output_rate_hz(&self) -> u32 {
        OUTPUT_RATE_HZ
    }

    /// Runs `input` through all three stages, returning the decimated 10
    /// Hz output. Input lengths not divisible by the overall factor (2000
    /// for the 20 kHz pipeline) still produce the correct output count
    /// overall, since residual state carries into the next call.
    pub fn process(&mut self, input: &[Complex32]) -> Result<Vec<Complex32>, Error> {
        if input.len() < MIN_INPUT_SAMPLES {
            return Err(Error::TooShort);
        }

        let stage_a = self.cic.process(input);
        let stage_b = self.compensation.process(&stage_a);
        let stage_c = self
            .anti_alias
            .process_decimate(&stage_b, 40, &mut self.anti_alias_phase);
        Ok(stage_c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_short_input_produces_no_output() {
        let mut pipeline = DecimationPipeline::for_input_rate(20_000).unwrap();
        let input = vec![Complex32::new(1.0, 0.0); 100];
        assert!(matches!(pipeline.process(&input), Err(Error::TooShort)));
    }

    #[test]
    fn one_minute_of_20khz_produces_600_output_samples() {
        let mut pipeline = DecimationPipeline::for_input_rate(20_000).unwrap();
        let input = vec![Complex32::new(0.3, 0.1); 20_000 * 60];
        let out = pipeline.process(&input).unwrap();
        assert_eq!(out.len(), 600);
    }

    #[test]
    fn unsupported_rate_is_rejected() {
        assert!(matches!(
            DecimationPipeline::for_input_rate(44_100),
            Err(Error::UnsupportedRate { .. })
        ));
    }

    #[test]
    fn split_calls_preserve_continuity_of_output_count() {
        let mut a = DecimationPipeline::for_input_rate(20_000).unwrap();
        let mut b = DecimationPipeline::for_input_rate(20_000).unwrap();

        let full = vec![Complex32::new(0.2, -0.1); 120_000];
        let out_a = a.process(&full).unwrap();

        let mut out_b = b.process(&full[..60_000]).unwrap();
        out_b.extend(b.process(&full[60_000..]).unwrap());

        assert_eq!(out_a.len(), out_b.len());
    }
}
