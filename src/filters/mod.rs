
pub trait ScalarFilter {

	fn apply(&mut self, x:f64) -> f64;
	fn initialize(&mut self);

}

pub struct FirstOrderFIR { pub b0: f64, pub b1: f64,
						   pub x0: f64, pub x1: f64 }

impl FirstOrderFIR {

	pub fn new(b0: f64, b1: f64) -> Self { Self { b0, b1, x0: 0.0, x1: 0.0 } }

}

impl ScalarFilter for FirstOrderFIR {

	fn apply(&mut self, x:f64) -> f64 {
		self.x0 = self.x1;
		self.x1 = x;
		self.b0*self.x0 + self.b1*self.x1
	}

	fn initialize(&mut self) {
		self.x0 = 0.0;
		self.x1 = 0.0;
	}

}

/// Proportional-plus-integral filter closing a second-order tracking loop.
/// `bw_hz` is the noise bandwidth, `pdi_s` the discriminator update interval
/// and `gain` the discriminator gain (0.25 for a Costas arctangent phase
/// discriminator, 1.0 for a normalized early-late code discriminator).
pub fn new_pi_loop_filter(bw_hz:f64, pdi_s:f64, gain:f64) -> FirstOrderFIR {
	let zeta = 0.7;
	let wn = (bw_hz * 8.0 * zeta) / (4.0 * zeta * zeta + 1.0);
	let tau1 = gain / (wn * wn);
	let tau2 = (2.0 * zeta) / wn;
	FirstOrderFIR::new((pdi_s - 2.0*tau2) / (2.0*tau1), (pdi_s + 2.0*tau2) / (2.0*tau1))
}

/// Single-pole integrator closing a first-order frequency lock loop
pub fn new_frequency_loop_filter(bw_hz:f64, pdi_s:f64) -> FirstOrderFIR {
	FirstOrderFIR::new(0.0, 4.0 * bw_hz * pdi_s)
}

#[cfg(test)]
mod tests {

	use super::*;

	#[test]
	fn pi_filter_drives_constant_error_toward_correction() {
		let mut filter = new_pi_loop_filter(15.0, 0.001, 0.25);
		let mut rate:f64 = 0.0;
		for _ in 0..50 { rate += filter.apply(0.1); }
		// Constant positive error must keep pushing the rate in one direction
		assert!(rate > 0.0);
		let step_then = filter.apply(0.1);
		assert!(step_then > 0.0);
	}

	#[test]
	fn initialize_clears_history() {
		let mut filter = new_pi_loop_filter(2.0, 0.001, 1.0);
		filter.apply(1.0);
		filter.apply(-1.0);
		filter.initialize();
		assert_eq!(filter.x0, 0.0);
		assert_eq!(filter.x1, 0.0);
	}

	#[test]
	fn frequency_filter_gain_scales_with_bandwidth() {
		let mut narrow = new_frequency_loop_filter(5.0, 0.001);
		let mut wide = new_frequency_loop_filter(10.0, 0.001);
		let n = narrow.apply(1.0);
		let w = wide.apply(1.0);
		assert!((w - 2.0*n).abs() < 1e-12);
	}

}
