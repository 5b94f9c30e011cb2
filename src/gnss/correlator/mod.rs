
use std::f64::consts;

use rustfft::num_complex::Complex;

use crate::Sample;
use crate::gnss::constants::{GPS_L1_FREQ_HZ, GPS_L1_CA_CODE_RATE_CHIPS_PER_SEC};
use crate::gnss::signal_modulation;

/// Slot reconfiguration issued by the scheduler
#[derive(Debug, Clone, Copy)]
pub struct Assign {
	pub prn:usize,
	pub doppler_hz:f64,
	/// Absolute sample index of a code-period boundary for this candidate
	pub boundary_sample_idx:usize,
	pub epoch:usize,
}

#[derive(Debug, Clone, Copy)]
pub enum SlotControl {
	Assign(Assign),
	Stop,
}

/// One code period of early/prompt/late accumulation, consumed exactly once
/// by the owning channel
#[derive(Debug, Clone, Copy)]
pub struct Correlation {
	pub slot:usize,
	pub prn:usize,
	pub epoch:usize,
	/// Index of the sample that closed this interval
	pub end_sample_idx:usize,
	pub early:  Complex<f64>,
	pub prompt: Complex<f64>,
	pub late:   Complex<f64>,
	pub input_power:f64,
	pub len_samples:usize,
	/// Carrier cycles integrated since assignment
	pub carrier_cycles:f64,
	pub carrier_dphase_rad:f64,
	pub code_dphase:f64,
	/// Fractional chip carried past the period boundary, in [0, code_dphase)
	pub code_phase_frac_chips:f64,
}

/// Rates both NCOs run at for the next interval
#[derive(Debug, Clone, Copy)]
pub struct TrackingFeedback {
	pub carrier_dphase_rad:f64,
	pub code_dphase:f64,
}

impl Correlation {

	pub fn carrier_freq_hz(&self, fs:f64) -> f64 { (self.carrier_dphase_rad * fs) / (2.0 * consts::PI) }
	pub fn code_rate_chips_per_sec(&self, fs:f64) -> f64 { self.code_dphase * fs }

	/// Reply that leaves both NCOs running at their current rates
	pub fn neutral_feedback(&self) -> TrackingFeedback {
		TrackingFeedback{ carrier_dphase_rad: self.carrier_dphase_rad, code_dphase: self.code_dphase }
	}

}

enum SlotState {
	Unassigned,
	AwaitingBoundary,
	Accumulating,
}

/// Carrier and code NCOs plus early/prompt/late accumulators for one channel
/// slot.  The correlator applies whatever rates the channel feeds back and
/// never decides anything itself.
pub struct Correlator {
	pub slot:usize,
	fs:f64,
	code_len_samples:usize,
	tap_offset_chips:f64,

	prn:usize,
	epoch:usize,
	boundary_sample_idx:usize,
	local_code:Vec<Complex<f64>>,

	carrier: Complex<f64>,
	carrier_inc: Complex<f64>,
	carrier_dphase_rad: f64,
	carrier_cycles: f64,
	code_phase: f64,
	code_dphase: f64,

	sum_early:  Complex<f64>,
	sum_prompt: Complex<f64>,
	sum_late:   Complex<f64>,
	input_power: f64,
	len_samples: usize,

	state: SlotState,
}

impl Correlator {

	pub fn is_assigned(&self) -> bool {
		match self.state {
			SlotState::Unassigned => false,
			_ => true,
		}
	}

	pub fn prn(&self) -> usize { self.prn }
	pub fn epoch(&self) -> usize { self.epoch }
	pub fn code_phase_chips(&self) -> f64 { self.code_phase }

	/// Feed one sample.  Returns a finished Correlation when this sample
	/// closes a code period; the caller must deliver the channel's feedback
	/// through `retune` before the next interval closes.
	pub fn apply(&mut self, sample:&Sample) -> Option<Correlation> {
		match self.state {
			SlotState::Unassigned => return None,
			SlotState::AwaitingBoundary => {
				// Accumulation starts on a code-period boundary so the first
				// interval is already roughly code-aligned
				if sample.idx < self.boundary_sample_idx { return None; }
				if (sample.idx - self.boundary_sample_idx) % self.code_len_samples != 0 { return None; }
				self.state = SlotState::Accumulating;
			},
			SlotState::Accumulating => (),
		}

		// Remove the carrier
		self.carrier = self.carrier * self.carrier_inc;
		let x = sample.val * self.carrier;
		self.input_power += x.norm_sqr();

		let mut idx:f64 = self.code_phase - self.tap_offset_chips;
		if idx < 0.0 { idx += 1023.0; }
		self.sum_early  += self.local_code[idx as usize] * x;

		idx += self.tap_offset_chips;
		if idx >= 1023.0 { idx -= 1023.0; }
		self.sum_prompt += self.local_code[idx as usize] * x;

		idx += self.tap_offset_chips;
		if idx >= 1023.0 { idx -= 1023.0; }
		self.sum_late   += self.local_code[idx as usize] * x;

		self.code_phase += self.code_dphase;
		self.len_samples += 1;

		if self.code_phase >= 1023.0 {
			// The interval just closed; the fractional chip carries over
			self.code_phase -= 1023.0;
			self.carrier = self.carrier / self.carrier.norm();
			self.carrier_cycles += (self.carrier_dphase_rad * (self.len_samples as f64)) / (2.0 * consts::PI);

			let correlation = Correlation{
				slot: self.slot, prn: self.prn, epoch: self.epoch,
				end_sample_idx: sample.idx,
				early: self.sum_early, prompt: self.sum_prompt, late: self.sum_late,
				input_power: self.input_power, len_samples: self.len_samples,
				carrier_cycles: self.carrier_cycles,
				carrier_dphase_rad: self.carrier_dphase_rad,
				code_dphase: self.code_dphase,
				code_phase_frac_chips: self.code_phase,
			};

			self.sum_early  = Complex{ re: 0.0, im: 0.0 };
			self.sum_prompt = Complex{ re: 0.0, im: 0.0 };
			self.sum_late   = Complex{ re: 0.0, im: 0.0 };
			self.input_power = 0.0;
			self.len_samples = 0;

			Some(correlation)
		} else { None }
	}

	/// Apply the channel's loop closure.  Only the rates change; phase state
	/// stays continuous across intervals.
	pub fn retune(&mut self, feedback:TrackingFeedback) {
		self.carrier_dphase_rad = feedback.carrier_dphase_rad;
		self.carrier_inc = Complex{ re: self.carrier_dphase_rad.cos(), im: -self.carrier_dphase_rad.sin() };
		self.code_dphase = feedback.code_dphase;
	}

	pub fn assign(&mut self, a:Assign) {
		self.local_code = signal_modulation::prn_complex(a.prn);
		self.prn = a.prn;
		self.epoch = a.epoch;
		self.boundary_sample_idx = a.boundary_sample_idx;

		let acq_carrier_rad_per_sec = a.doppler_hz * 2.0 * consts::PI;
		self.carrier            = Complex{ re: 1.0, im: 0.0 };
		self.carrier_dphase_rad = acq_carrier_rad_per_sec / self.fs;
		self.carrier_inc        = Complex{ re: self.carrier_dphase_rad.cos(), im: -self.carrier_dphase_rad.sin() };
		self.carrier_cycles     = 0.0;

		// Seed the code rate off the Doppler estimate so pull-in only has to
		// absorb the residual
		let radial_velocity_factor:f64 = (GPS_L1_FREQ_HZ + a.doppler_hz) / GPS_L1_FREQ_HZ;
		self.code_phase  = 0.0;
		self.code_dphase = (radial_velocity_factor * GPS_L1_CA_CODE_RATE_CHIPS_PER_SEC) / self.fs;

		self.sum_early  = Complex{ re: 0.0, im: 0.0 };
		self.sum_prompt = Complex{ re: 0.0, im: 0.0 };
		self.sum_late   = Complex{ re: 0.0, im: 0.0 };
		self.input_power = 0.0;
		self.len_samples = 0;

		self.state = SlotState::AwaitingBoundary;
	}

	pub fn stop(&mut self) {
		self.state = SlotState::Unassigned;
	}

}

pub fn new_correlator(slot:usize, fs:f64, tap_offset_chips:f64) -> Correlator {
	Correlator {
		slot, fs,
		code_len_samples: (fs / 1000.0) as usize,
		tap_offset_chips,
		prn: 0, epoch: 0, boundary_sample_idx: 0,
		local_code: vec![],
		carrier: Complex{ re: 1.0, im: 0.0 },
		carrier_inc: Complex{ re: 1.0, im: 0.0 },
		carrier_dphase_rad: 0.0,
		carrier_cycles: 0.0,
		code_phase: 0.0, code_dphase: 0.0,
		sum_early: Complex{ re: 0.0, im: 0.0 }, sum_prompt: Complex{ re: 0.0, im: 0.0 }, sum_late: Complex{ re: 0.0, im: 0.0 },
		input_power: 0.0, len_samples: 0,
		state: SlotState::Unassigned,
	}
}

#[cfg(test)]
mod tests {

	use super::*;

	const FS:f64 = 2.046e6;

	// Carrier and chip sequence matching what the correlator replicates for
	// a given assignment, preceded by junk before the boundary
	fn synth(prn:usize, doppler_hz:f64, boundary:usize, start_idx:usize, n:usize) -> Vec<Sample> {
		let code = signal_modulation::prn_int(prn);
		let code_dphase = ((GPS_L1_FREQ_HZ + doppler_hz) / GPS_L1_FREQ_HZ) * GPS_L1_CA_CODE_RATE_CHIPS_PER_SEC / FS;
		(0..n).map(|k| {
			let idx = start_idx + k;
			let val = if idx < boundary { Complex{ re: 1.0, im: -1.0 } } else {
				let m = (idx - boundary) as f64;
				let chip = code[((m * code_dphase) % 1023.0) as usize] as f64;
				let theta = 2.0 * consts::PI * doppler_hz * (m + 1.0) / FS;
				Complex{ re: theta.cos(), im: theta.sin() } * chip
			};
			Sample{ val, idx }
		}).collect()
	}

	fn run(correlator:&mut Correlator, samples:&[Sample]) -> Vec<Correlation> {
		let mut products = vec![];
		for s in samples {
			if let Some(c) = correlator.apply(s) {
				correlator.retune(c.neutral_feedback());
				products.push(c);
			}
		}
		products
	}

	#[test]
	fn aligned_signal_concentrates_power_in_prompt() {
		let mut correlator = new_correlator(0, FS, 0.5);
		correlator.assign(Assign{ prn: 5, doppler_hz: 1000.0, boundary_sample_idx: 100, epoch: 1 });

		let samples = synth(5, 1000.0, 100, 0, 2300);
		let products = run(&mut correlator, &samples);

		assert_eq!(products.len(), 1);
		let c = &products[0];
		assert_eq!(c.slot, 0);
		assert_eq!(c.prn, 5);
		assert_eq!(c.epoch, 1);
		assert_eq!(c.len_samples, 2046);
		assert_eq!(c.end_sample_idx, 100 + 2046 - 1);

		// Junk before the boundary never reached the accumulators
		assert!((c.input_power - 2046.0).abs() < 1e-6);
		assert!((c.prompt.re - 2046.0).abs() < 1e-6);
		assert!(c.prompt.im.abs() < 1e-6);

		// Half-chip taps sit about halfway down the correlation triangle
		assert!(c.early.re > 0.4 * c.prompt.re && c.early.re < 0.6 * c.prompt.re);
		assert!(c.late.re  > 0.4 * c.prompt.re && c.late.re  < 0.6 * c.prompt.re);

		// 1000 [Hz] over one code period integrates to exactly one cycle
		assert!((c.carrier_cycles - 1.0).abs() < 1e-9);
	}

	#[test]
	fn stale_boundary_waits_for_the_next_congruent_index() {
		let mut correlator = new_correlator(2, FS, 0.5);
		correlator.assign(Assign{ prn: 13, doppler_hz: 1000.0, boundary_sample_idx: 46, epoch: 1 });

		// The worker joins the stream well past the boundary
		let samples = synth(13, 1000.0, 46, 1000, 4000);
		let products = run(&mut correlator, &samples);

		assert_eq!(products[0].len_samples, 2046);
		assert_eq!(products[0].end_sample_idx, 46 + 2*2046 - 1);
		assert!(products[0].prompt.norm() > 0.99 * 2046.0);
	}

	#[test]
	fn nco_phase_is_continuous_across_intervals() {
		let mut correlator = new_correlator(1, FS, 0.5);
		correlator.assign(Assign{ prn: 9, doppler_hz: 1000.0, boundary_sample_idx: 0, epoch: 1 });

		let samples = synth(9, 1000.0, 0, 0, 3 * 2046);
		let products = run(&mut correlator, &samples);
		assert!(products.len() >= 2);

		// The fractional chip left by the first interval carries into the
		// second instead of snapping back to zero
		let leftover = correlator.code_phase_chips();
		assert!(leftover > 0.0 && leftover < 2.0 * products[0].code_dphase);

		// Integrated carrier phase keeps counting across the boundary
		assert!((products[1].carrier_cycles - 2.0).abs() < 1e-9);
	}

	#[test]
	fn retune_applies_new_rates_next_interval() {
		let mut correlator = new_correlator(0, FS, 0.5);
		correlator.assign(Assign{ prn: 3, doppler_hz: 0.0, boundary_sample_idx: 0, epoch: 1 });

		let samples = synth(3, 0.0, 0, 0, 4000);
		let mut products = vec![];
		for s in &samples {
			if let Some(c) = correlator.apply(s) {
				if products.is_empty() {
					// Double the code rate; the next interval closes in half
					// the samples
					correlator.retune(TrackingFeedback{
						carrier_dphase_rad: c.carrier_dphase_rad,
						code_dphase: 2.0 * c.code_dphase });
				} else {
					correlator.retune(c.neutral_feedback());
				}
				products.push(c);
			}
		}

		assert!(products.len() >= 2);
		assert_eq!(products[0].len_samples, 2046);
		assert_eq!(products[1].len_samples, 1023);
		assert!((products[1].code_dphase - 2.0 * products[0].code_dphase).abs() < 1e-12);
	}

	#[test]
	fn stop_idles_the_slot_until_reassignment() {
		let mut correlator = new_correlator(0, FS, 0.5);
		correlator.assign(Assign{ prn: 7, doppler_hz: 0.0, boundary_sample_idx: 0, epoch: 1 });
		assert!(correlator.is_assigned());

		correlator.stop();
		assert!(!correlator.is_assigned());
		let samples = synth(7, 0.0, 0, 0, 3000);
		assert!(run(&mut correlator, &samples).is_empty());

		correlator.assign(Assign{ prn: 7, doppler_hz: 0.0, boundary_sample_idx: 4092, epoch: 2 });
		let more = synth(7, 0.0, 4092, 3000, 4000);
		let products = run(&mut correlator, &more);
		assert_eq!(products.len(), 1);
		assert_eq!(products[0].epoch, 2);
	}

}
