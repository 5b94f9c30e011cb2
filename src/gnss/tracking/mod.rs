
use std::f64::consts;

use rustfft::num_complex::Complex;

use crate::config::TrackingConfig;
use crate::filters::{self, ScalarFilter};
use crate::gnss::constants::{GPS_L1_FREQ_HZ, GPS_L1_CA_CODE_RATE_CHIPS_PER_SEC,
	GPS_L1_CA_CODE_PERIOD_SEC, CODE_CARRIER_RATIO};
use crate::gnss::correlator::{Correlation, TrackingFeedback};

pub mod discriminators;
pub mod lock_detectors;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopMode {
	/// Frequency-assisted wideband pull-in right after acquisition
	PullIn,
	/// Phase tracking with the frequency assist dropped
	Track,
}

/// Loop closure for one channel: discriminators and loop filters that turn
/// each Correlation into the rates the correlator runs next interval.
pub struct TrackingLoop {
	pub fs:f64,
	pub carrier_aiding:bool,
	carrier_filter: filters::FirstOrderFIR,
	freq_filter:    filters::FirstOrderFIR,
	code_filter:    filters::FirstOrderFIR,
	code_rate_residual:f64,
	code_dphase_base:f64,
	prev_prompt:Option<Complex<f64>>,
}

impl TrackingLoop {

	pub fn initialize(&mut self, acq_doppler_hz:f64) {
		self.carrier_filter.initialize();
		self.freq_filter.initialize();
		self.code_filter.initialize();
		self.code_rate_residual = 0.0;

		let radial_velocity_factor:f64 = (GPS_L1_FREQ_HZ + acq_doppler_hz) / GPS_L1_FREQ_HZ;
		self.code_dphase_base = (radial_velocity_factor * GPS_L1_CA_CODE_RATE_CHIPS_PER_SEC) / self.fs;
		self.prev_prompt = None;
	}

	/// Close the carrier and code loops over one correlation interval
	pub fn tick(&mut self, c:&Correlation, mode:LoopMode) -> TrackingFeedback {
		let phase_err_rad = discriminators::costas_phase_rad(c.prompt);
		let mut carrier_dphase_rad = c.carrier_dphase_rad + self.carrier_filter.apply(phase_err_rad / self.fs);

		if mode == LoopMode::PullIn {
			if let Some(prev) = self.prev_prompt {
				let freq_err = discriminators::cross_dot_phase_rad(prev, c.prompt) / (c.len_samples as f64);
				carrier_dphase_rad += self.freq_filter.apply(freq_err);
			}
		}
		self.prev_prompt = Some(c.prompt);

		let code_err_chips = discriminators::early_late_chips(c.early, c.late);
		self.code_rate_residual += self.code_filter.apply(code_err_chips / self.fs);
		let code_dphase = if self.carrier_aiding {
			// Slave the code rate to the Doppler estimate; the DLL only
			// carries the residual
			let doppler_hz = (carrier_dphase_rad * self.fs) / (2.0 * consts::PI);
			((GPS_L1_CA_CODE_RATE_CHIPS_PER_SEC + doppler_hz * CODE_CARRIER_RATIO) / self.fs) + self.code_rate_residual
		} else {
			self.code_dphase_base + self.code_rate_residual
		};

		TrackingFeedback{ carrier_dphase_rad, code_dphase }
	}

}

pub fn new_tracking_loop(fs:f64, cfg:&TrackingConfig) -> TrackingLoop {
	let pdi = GPS_L1_CA_CODE_PERIOD_SEC;
	TrackingLoop {
		fs,
		carrier_aiding: cfg.carrier_aiding,
		carrier_filter: filters::new_pi_loop_filter(cfg.pll_bw_hz, pdi, 0.25),
		freq_filter:    filters::new_frequency_loop_filter(cfg.fll_bw_hz, pdi),
		code_filter:    filters::new_pi_loop_filter(cfg.dll_bw_hz, pdi, 1.0),
		code_rate_residual: 0.0,
		code_dphase_base: GPS_L1_CA_CODE_RATE_CHIPS_PER_SEC / fs,
		prev_prompt: None,
	}
}
