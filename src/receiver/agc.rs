
use log::debug;

use crate::Sample;
use crate::config::AgcConfig;

const MIN_GAIN:f64 = 2.0e-10;
const MAX_GAIN:f64 = 5.0e9;

/// Digital gain control holding block amplitudes near the target bit depth.
/// Gain moves in powers of two, and only once the block peak leaves the
/// low/high hysteresis band, so quantization character stays put while the
/// front end is behaving.
pub struct Agc {
	target_bits:i64,
	low_bits:i64,
	high_bits:i64,
	scale:f64,
}

impl Agc {

	pub fn scale(&self) -> f64 { self.scale }

	/// Apply the current gain to a block, then adapt it for the next one
	pub fn process(&mut self, block:&mut [Sample]) {
		let mut peak:f64 = 0.0;
		for s in block.iter_mut() {
			s.val = s.val * self.scale;
			let mag = s.val.re.abs().max(s.val.im.abs());
			if mag > peak { peak = mag; }
		}
		if peak <= 0.0 { return; }

		// Signed bits needed to hold the block peak
		let bits = (peak.log2().floor() as i64) + 2;
		if bits > self.high_bits {
			self.scale *= 0.5f64.powi((bits - self.target_bits) as i32);
			debug!("agc: {} bit peak, gain down to {:.3e}", bits, self.scale);
		} else if bits < self.low_bits {
			self.scale *= 2.0f64.powi((self.target_bits - bits) as i32);
			debug!("agc: {} bit peak, gain up to {:.3e}", bits, self.scale);
		}
		self.scale = self.scale.max(MIN_GAIN).min(MAX_GAIN);
	}

}

pub fn new_agc(cfg:&AgcConfig) -> Agc {
	Agc{
		target_bits: cfg.target_bits as i64,
		low_bits: cfg.low_bits as i64,
		high_bits: cfg.high_bits as i64,
		scale: 1.0,
	}
}
