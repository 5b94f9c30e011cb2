
use std::collections::VecDeque;

use rustfft::num_complex::Complex;

use log::{debug, info};
use serde::{Serialize, Deserialize};

use crate::config::TrackingConfig;
use crate::gnss::constants::{GPS_L1_CA_CODE_PERIOD_SEC, GPS_L1_CA_CODES_PER_BIT};
use crate::gnss::correlator::{Assign, Correlation, TrackingFeedback};
use crate::gnss::tracking::{self, LoopMode, TrackingLoop};
use crate::gnss::tracking::lock_detectors;

/// Prompt history length for the windowed lock detectors, one data bit
const LOCK_WINDOW_LEN:usize = GPS_L1_CA_CODES_PER_BIT;

/// Sign transitions a bit phase must collect before it is trusted
const BIT_SYNC_MIN_VOTES:usize = 5;

const CARRIER_LOCK_SMOOTHING:f64 = 0.9;
const CN0_SMOOTHING:f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ChannelState {
	Idle,
	/// Assigned but no correlation from the new epoch has arrived yet
	Acquired,
	PullIn,
	Track,
	NavigateReady,
}

/// One set of observables latched at a measurement boundary
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Measurement {
	pub slot:usize,
	pub prn:usize,
	/// Receiver time of the latching sample, seconds since the first sample
	pub rx_time_s:f64,
	/// Fractional code phase at the latest period close
	pub code_phase_chips:f64,
	pub code_rate_chips_per_sec:f64,
	pub doppler_hz:f64,
	pub carrier_phase_cycles:f64,
	/// Carrier cycles integrated since this assignment began
	pub icp_cycles:f64,
	pub cn0_dbhz:f64,
	pub navigation_valid:bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NavBit {
	pub slot:usize,
	pub prn:usize,
	pub bit:bool,
	/// Sample index of the interval that completed this bit
	pub sample_idx:usize,
}

/// Everything one tracking tick can produce besides advancing the state machine
#[derive(Debug, Clone, Copy)]
pub struct ChannelOutput {
	pub feedback:TrackingFeedback,
	pub nav_bit:Option<NavBit>,
	pub measurement:Option<Measurement>,
}

/// Per-slot state machine from assignment through navigation-ready tracking.
/// Consumes one Correlation per code period and always produces the feedback
/// the correlator is blocked on.
pub struct Channel {
	pub slot:usize,
	pub fs:f64,
	state:ChannelState,
	prn:usize,
	epoch:usize,
	trk:TrackingLoop,
	cfg:TrackingConfig,
	measurement_interval_samples:usize,

	prompt_buffer:VecDeque<Complex<f64>>,
	cn0_dbhz:f64,
	cn0_seeded:bool,
	carrier_lock_value:f64,
	pull_in_count:usize,
	lock_fail_count:usize,

	prev_prompt_sign:Option<bool>,
	transition_votes:[usize; GPS_L1_CA_CODES_PER_BIT],
	bit_phase:Option<usize>,
	bit_sum:f64,
	bit_len:usize,

	interval_count:usize,
	next_measurement_boundary:usize,
	navigate_ready_count:usize,
	fails_since_measurement:bool,
}

impl Channel {

	// Read-only getter methods
	pub fn state(&self) -> ChannelState { self.state }
	pub fn prn(&self) -> usize { self.prn }
	pub fn epoch(&self) -> usize { self.epoch }
	pub fn cn0_dbhz(&self) -> f64 { self.cn0_dbhz }
	pub fn carrier_lock_value(&self) -> f64 { self.carrier_lock_value }
	pub fn bit_synced(&self) -> bool { self.bit_phase.is_some() }

	/// Take ownership of a fresh acquisition candidate.  Every trace of the
	/// slot's previous occupant is discarded.
	pub fn assign(&mut self, a:Assign) {
		self.state = ChannelState::Acquired;
		self.prn   = a.prn;
		self.epoch = a.epoch;
		self.trk.initialize(a.doppler_hz);
		self.prompt_buffer.clear();
		self.cn0_dbhz = 0.0;
		self.cn0_seeded = false;
		self.carrier_lock_value = 0.0;
		self.pull_in_count = 0;
		self.lock_fail_count = 0;
		self.prev_prompt_sign = None;
		self.transition_votes = [0; GPS_L1_CA_CODES_PER_BIT];
		self.bit_phase = None;
		self.bit_sum = 0.0;
		self.bit_len = 0;
		self.interval_count = 0;
		self.next_measurement_boundary = 0;
		self.navigate_ready_count = 0;
		self.fails_since_measurement = false;
	}

	pub fn stop(&mut self) {
		if self.state != ChannelState::Idle {
			debug!("slot {}: PRN {} stopped", self.slot, self.prn);
		}
		self.state = ChannelState::Idle;
	}

	/// Consume one correlation and produce the reply its correlator is blocked
	/// on.  Correlations from a superseded epoch get a neutral reply and
	/// change nothing.
	pub fn apply(&mut self, c:&Correlation) -> ChannelOutput {
		let mut out = ChannelOutput{ feedback: c.neutral_feedback(), nav_bit: None, measurement: None };
		if c.epoch != self.epoch || self.state == ChannelState::Idle { return out; }
		debug_assert_eq!(c.slot, self.slot);
		debug_assert_eq!(c.prn, self.prn);

		if self.state == ChannelState::Acquired {
			self.state = ChannelState::PullIn;
			debug!("slot {}: PRN {} pull-in started", self.slot, self.prn);
		}

		let k = self.interval_count;
		self.interval_count += 1;

		// Single-prompt carrier lock indicator; squaring makes it insensitive
		// to the data bit sign, so it works before bit sync
		let prompt_power = c.prompt.norm_sqr();
		let inst_lock = if prompt_power > 0.0 {
			(c.prompt.re * c.prompt.re - c.prompt.im * c.prompt.im) / prompt_power
		} else { 0.0 };
		self.carrier_lock_value = CARRIER_LOCK_SMOOTHING * self.carrier_lock_value
		                        + (1.0 - CARRIER_LOCK_SMOOTHING) * inst_lock;

		self.prompt_buffer.push_back(c.prompt);
		while self.prompt_buffer.len() > LOCK_WINDOW_LEN { self.prompt_buffer.pop_front(); }
		if self.prompt_buffer.len() == LOCK_WINDOW_LEN {
			let inst_cn0 = lock_detectors::cn0_svn_estimator(&self.prompt_buffer, GPS_L1_CA_CODE_PERIOD_SEC);
			self.cn0_dbhz = if self.cn0_seeded {
				CN0_SMOOTHING * self.cn0_dbhz + (1.0 - CN0_SMOOTHING) * inst_cn0
			} else {
				self.cn0_seeded = true;
				inst_cn0
			};
		}

		let mode = if self.state == ChannelState::PullIn { LoopMode::PullIn } else { LoopMode::Track };
		out.feedback = self.trk.tick(c, mode);

		let sign = c.prompt.re >= 0.0;
		let flipped = match self.prev_prompt_sign {
			Some(prev) => prev != sign,
			None => false,
		};
		self.prev_prompt_sign = Some(sign);

		match self.state {
			ChannelState::PullIn => {
				if flipped && self.bit_phase.is_none() {
					let bin = k % GPS_L1_CA_CODES_PER_BIT;
					self.transition_votes[bin] += 1;
					let votes = self.transition_votes[bin];
					if votes >= BIT_SYNC_MIN_VOTES {
						let runner_up = self.transition_votes.iter().enumerate()
							.filter(|(i, _)| *i != bin)
							.map(|(_, v)| *v)
							.max().unwrap_or(0);
						if votes >= 2 * runner_up {
							self.bit_phase = Some(bin);
							debug!("slot {}: PRN {} bit sync at phase {}", self.slot, self.prn, bin);
						}
					}
				}

				let locked = self.prompt_buffer.len() == LOCK_WINDOW_LEN
					&& self.carrier_lock_value >= self.cfg.carrier_lock_enter
					&& self.cn0_dbhz >= self.cfg.cn0_lock_dbhz;
				if locked { self.pull_in_count += 1; } else { self.pull_in_count = 0; }

				if self.pull_in_count >= self.cfg.pull_in_locks && self.bit_phase.is_some() {
					self.state = ChannelState::Track;
					self.lock_fail_count = 0;
					self.navigate_ready_count = 0;
					self.fails_since_measurement = false;
					self.next_measurement_boundary =
						((c.end_sample_idx / self.measurement_interval_samples) + 1) * self.measurement_interval_samples;
					info!("slot {}: PRN {} locked after {} ms, cn0 {:.1} dB-Hz",
						self.slot, self.prn, self.interval_count, self.cn0_dbhz);
				}
				else if self.interval_count >= self.cfg.pull_in_limit_ms {
					self.state = ChannelState::Idle;
					info!("slot {}: PRN {} gave up pull-in after {} ms", self.slot, self.prn, self.interval_count);
				}
			},
			ChannelState::Track | ChannelState::NavigateReady => {
				if let Some(b) = self.bit_phase {
					if k % GPS_L1_CA_CODES_PER_BIT == b {
						self.bit_sum = 0.0;
						self.bit_len = 0;
					}
					self.bit_sum += c.prompt.re;
					self.bit_len += 1;

					if self.bit_len == GPS_L1_CA_CODES_PER_BIT {
						out.nav_bit = Some(NavBit{
							slot: self.slot, prn: self.prn,
							bit: self.bit_sum >= 0.0,
							sample_idx: c.end_sample_idx,
						});

						// The prompt history lines up exactly with the bit here,
						// so the windowed detector sees no sign change inside it
						let window_lock = lock_detectors::carrier_lock_detector(&self.prompt_buffer);
						let ok = window_lock >= self.cfg.carrier_lock_exit
							&& self.cn0_dbhz >= self.cfg.cn0_drop_dbhz;
						if ok {
							if self.lock_fail_count > 0 { self.lock_fail_count -= 1; }
						} else {
							self.lock_fail_count += 1;
							self.fails_since_measurement = true;
						}
						if self.lock_fail_count >= self.cfg.lock_fail_limit {
							self.state = ChannelState::Idle;
							info!("slot {}: PRN {} lost lock, cn0 {:.1} dB-Hz", self.slot, self.prn, self.cn0_dbhz);
						}
					}
				}

				if self.state != ChannelState::Idle && c.end_sample_idx >= self.next_measurement_boundary {
					out.measurement = Some(self.latch_measurement(c));
					while self.next_measurement_boundary <= c.end_sample_idx {
						self.next_measurement_boundary += self.measurement_interval_samples;
					}
					if self.fails_since_measurement { self.navigate_ready_count = 0; }
					else { self.navigate_ready_count += 1; }
					self.fails_since_measurement = false;
					if self.state == ChannelState::Track && self.navigate_ready_count >= self.cfg.navigate_ready_delay {
						self.state = ChannelState::NavigateReady;
						info!("slot {}: PRN {} navigation-ready", self.slot, self.prn);
					}
				}
			},
			_ => (),
		}

		out
	}

	fn latch_measurement(&self, c:&Correlation) -> Measurement {
		Measurement{
			slot: self.slot,
			prn: self.prn,
			rx_time_s: (c.end_sample_idx as f64) / self.fs,
			code_phase_chips: c.code_phase_frac_chips,
			code_rate_chips_per_sec: c.code_rate_chips_per_sec(self.fs),
			doppler_hz: c.carrier_freq_hz(self.fs),
			carrier_phase_cycles: c.carrier_cycles.fract(),
			icp_cycles: c.carrier_cycles,
			cn0_dbhz: self.cn0_dbhz,
			navigation_valid: self.state == ChannelState::NavigateReady,
		}
	}

}

pub fn new_channel(slot:usize, fs:f64, cfg:&TrackingConfig) -> Channel {
	let measurement_interval_samples = ((cfg.measurement_interval_ms as f64) * 1.0e-3 * fs).round() as usize;
	Channel{
		slot, fs,
		state: ChannelState::Idle,
		prn: 0,
		epoch: 0,
		trk: tracking::new_tracking_loop(fs, cfg),
		cfg: cfg.clone(),
		measurement_interval_samples,
		prompt_buffer: VecDeque::new(),
		cn0_dbhz: 0.0,
		cn0_seeded: false,
		carrier_lock_value: 0.0,
		pull_in_count: 0,
		lock_fail_count: 0,
		prev_prompt_sign: None,
		transition_votes: [0; GPS_L1_CA_CODES_PER_BIT],
		bit_phase: None,
		bit_sum: 0.0,
		bit_len: 0,
		interval_count: 0,
		next_measurement_boundary: 0,
		navigate_ready_count: 0,
		fails_since_measurement: false,
	}
}
