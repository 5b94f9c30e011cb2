
use std::collections::VecDeque;

use rustfft::num_complex::Complex;

/// Signal-to-noise-variance C/N0 estimator over a window of prompt
/// accumulations, in dB-Hz.  Uses the rectified in-phase arm so data bits
/// do not cancel the signal estimate.
pub fn cn0_svn_estimator(prompts:&VecDeque<Complex<f64>>, coh_integration_time_s:f64) -> f64 {
	let n = prompts.len() as f64;
	let mut sum_abs_re:f64 = 0.0;
	let mut sum_power:f64  = 0.0;
	for p in prompts {
		sum_abs_re += p.re.abs();
		sum_power  += p.re*p.re + p.im*p.im;
	}
	let p_sig = (sum_abs_re / n).powi(2);
	let p_tot = sum_power / n;
	let snr = p_sig / (p_tot - p_sig);
	10.0 * snr.log10() - 10.0 * coh_integration_time_s.log10()
}

/// Narrowband-difference over narrowband-power carrier lock test.  Close to
/// +1 when the prompt energy sits in the in-phase arm, near zero or negative
/// when the carrier phase is random.
pub fn carrier_lock_detector(prompts:&VecDeque<Complex<f64>>) -> f64 {
	let mut sum_i:f64 = 0.0;
	let mut sum_q:f64 = 0.0;
	for p in prompts {
		sum_i += p.re;
		sum_q += p.im;
	}
	let nbp = sum_i*sum_i + sum_q*sum_q;
	let nbd = sum_i*sum_i - sum_q*sum_q;
	nbd / nbp
}

#[cfg(test)]
mod tests {

	use rand::SeedableRng;
	use rand::rngs::StdRng;
	use rand_distr::{Distribution, Normal};

	use super::*;

	#[test]
	fn locked_prompts_estimate_high_cn0() {
		let mut rng = StdRng::seed_from_u64(10);
		let noise = Normal::new(0.0, 30.0).unwrap();
		// One-millisecond prompts of a strong phase-locked signal, with the
		// 50 [bps] data flipping the sign every 20 entries
		let prompts:VecDeque<Complex<f64>> = (0..1000usize).map(|k| {
			let bit = if (k / 20) % 2 == 0 { 1.0 } else { -1.0 };
			Complex{ re: bit * 1000.0 + noise.sample(&mut rng), im: noise.sample(&mut rng) }
		}).collect();

		let cn0 = cn0_svn_estimator(&prompts, 1.0e-3);
		assert!(cn0 > 55.0 && cn0 < 65.0, "cn0 = {}", cn0);
	}

	#[test]
	fn noise_only_prompts_estimate_below_the_drop_threshold() {
		let mut rng = StdRng::seed_from_u64(11);
		let noise = Normal::new(0.0, 45.0).unwrap();
		let prompts:VecDeque<Complex<f64>> = (0..1000usize)
			.map(|_| Complex{ re: noise.sample(&mut rng), im: noise.sample(&mut rng) }).collect();

		// The rectified-arm estimator bottoms out near 26.7 dB-Hz on pure
		// noise at a 1 [ms] integration time
		let cn0 = cn0_svn_estimator(&prompts, 1.0e-3);
		assert!(cn0 < 27.5, "cn0 = {}", cn0);
	}

	#[test]
	fn carrier_lock_splits_in_phase_from_quadrature() {
		let locked:VecDeque<Complex<f64>> = (0..20)
			.map(|_| Complex{ re: 100.0, im: 2.0 }).collect();
		assert!(carrier_lock_detector(&locked) > 0.99);

		let unlocked:VecDeque<Complex<f64>> = (0..20)
			.map(|_| Complex{ re: 2.0, im: 100.0 }).collect();
		assert!(carrier_lock_detector(&unlocked) < -0.99);
	}

}
