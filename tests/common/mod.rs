
use std::f64::consts;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use gps_sdr::config::ReceiverConfig;
use gps_sdr::gnss::constants::{GPS_L1_FREQ_HZ, GPS_L1_CA_CODE_RATE_CHIPS_PER_SEC};
use gps_sdr::gnss::signal_modulation;

pub const FS:f64 = 2.046e6;

/// Interleaved-i16 IQ byte stream carrying one satellite whose amplitude
/// follows the given `(amplitude, duration_s)` schedule.  Carrier phase, code
/// phase and the 50 [bps] alternating bit pattern run continuously across
/// segments, so a zero-amplitude segment looks like a real blackout rather
/// than a phase jump.
pub fn synth_if_bytes(prn:usize, doppler_hz:f64, segments:&[(f64, f64)], noise_sigma:f64, seed:u64) -> Vec<u8> {
	let code = signal_modulation::prn_int(prn);
	let code_dphase = ((GPS_L1_FREQ_HZ + doppler_hz) / GPS_L1_FREQ_HZ) * GPS_L1_CA_CODE_RATE_CHIPS_PER_SEC / FS;
	let mut rng = StdRng::seed_from_u64(seed);
	let noise = Normal::new(0.0, noise_sigma).unwrap();

	let mut bytes:Vec<u8> = vec![];
	let mut k:usize = 0;
	for &(amp, duration_s) in segments {
		let n = (duration_s * FS) as usize;
		for _ in 0..n {
			let chips = (k as f64) * code_dphase;
			let chip = code[(chips % 1023.0) as usize] as f64;
			let bit = if (((chips / 1023.0) as usize) / 20) % 2 == 0 { 1.0 } else { -1.0 };
			let theta = 2.0 * consts::PI * doppler_hz * (k as f64) / FS;
			let re = amp * chip * bit * theta.cos() + noise.sample(&mut rng);
			let im = amp * chip * bit * theta.sin() + noise.sample(&mut rng);
			bytes.extend_from_slice(&(re as i16).to_le_bytes());
			bytes.extend_from_slice(&(im as i16).to_le_bytes());
			k += 1;
		}
	}
	bytes
}

/// Small file-postprocessing configuration: two slots on one correlator core,
/// no SCHED_FIFO, a tight scheduler cadence and a narrowed Doppler search so
/// the scenarios finish quickly.
pub fn paced_config(wanted_prns:Vec<usize>) -> ReceiverConfig {
	let mut cfg = ReceiverConfig::new(FS);
	cfg.max_channels = 2;
	cfg.cpu_cores = 1;
	cfg.fabric.realtime = false;
	cfg.sv_select.survey_interval_ms = 1;
	cfg.sv_select.noise_floor_interval = 0;
	cfg.sv_select.wanted_prns = wanted_prns;
	cfg.acquisition.doppler_min_hz = -3500.0;
	cfg.acquisition.doppler_max_hz = 3500.0;
	cfg
}
