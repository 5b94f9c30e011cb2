
use rustfft::FFTplanner;
use rustfft::num_complex::Complex;
use rustfft::num_traits::Zero;

use serde::{Serialize, Deserialize};

use crate::config::{AcquisitionConfig, DetectionClass};

pub mod pcps;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionResult {
	pub prn:usize,
	pub doppler_hz:f64,
	pub doppler_step_hz:f64,
	/// Offset of the code-period boundary in samples from the search window start
	pub code_phase:usize,
	/// Absolute sample index of a code-period boundary consistent with `code_phase`
	pub boundary_sample_idx:usize,
	/// Non-coherently accumulated power at the best bin
	pub peak_power:f64,
	/// Best accumulated power more than one chip away from the peak
	pub second_peak_power:f64,
	pub input_power_total:f64,
	pub mf_len:usize,
	pub non_coherent_sums:usize,
}

impl AcquisitionResult {

	/// Peak power as a fraction of total input power; 1.0 for a noiseless
	/// aligned replica, 1/mf_len on average for pure noise
	pub fn test_statistic(&self) -> f64 {
		if self.input_power_total > 0.0 {
			self.peak_power / (self.input_power_total * (self.mf_len as f64))
		} else { 0.0 }
	}

	/// Peak-to-second-peak power ratio used to reject autocorrelation
	/// side-peaks and noise spikes
	pub fn peak_ratio(&self) -> f64 {
		if self.second_peak_power > 0.0 { self.peak_power / self.second_peak_power } else { f64::INFINITY }
	}

	pub fn accepted(&self, test_statistic_threshold:f64, second_peak_margin:f64) -> bool {
		self.test_statistic() >= test_statistic_threshold && self.peak_ratio() >= second_peak_margin
	}

}

pub trait Acquisition {
	fn provide_sample(&mut self, sample:&crate::Sample);
	fn block_for_result(&mut self) -> Option<AcquisitionResult>;
}

pub fn make_acquisition(fs:f64, prn:usize, doppler_min_hz:f64, doppler_max_hz:f64, doppler_step_hz:f64,
	test_statistic_threshold:f64, second_peak_margin:f64, non_coherent_sums:usize) -> pcps::Acquisition {

	let len_fft:usize = (fs / 1000.0) as usize;

	let mut planner = FFTplanner::new(false);
	let fft = planner.plan_fft(len_fft);
	let mut inv_planner = FFTplanner::new(true);
	let ifft = inv_planner.plan_fft(len_fft);

	let mut doppler_freqs:Vec<f64> = vec![];
	let mut freq = doppler_min_hz;
	while freq <= doppler_max_hz + 1.0e-6 {
		doppler_freqs.push(freq);
		freq += doppler_step_hz;
	}

	let power_map:Vec<Vec<f64>> = doppler_freqs.iter().map(|_| vec![0.0; len_fft]).collect();

	let mut acq = pcps::Acquisition{ fs, prn, test_statistic_threshold, second_peak_margin, non_coherent_sums,
		doppler_freqs, doppler_step_hz,
		buffer: vec![], len_fft, fft, local_code_freq_domain: vec![Complex::zero(); len_fft],
		fft_out: vec![Complex::zero(); len_fft], ifft, ifft_out: vec![Complex::zero(); len_fft],
		power_map, sums_done: 0, input_power_total: 0.0, next_sample_idx: 0 };
	acq.retune(prn);
	acq
}

pub fn from_config(fs:f64, prn:usize, cfg:&AcquisitionConfig, class:DetectionClass) -> pcps::Acquisition {
	make_acquisition(fs, prn, cfg.doppler_min_hz, cfg.doppler_max_hz, cfg.doppler_step_hz,
		class.test_stat_threshold, cfg.second_peak_margin, class.non_coherent_sums)
}
