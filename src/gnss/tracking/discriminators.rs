
use rustfft::num_complex::Complex;

/// Costas arctangent phase discriminator.  Returns the residual carrier
/// phase in radians, bounded to (-pi/2, pi/2) and insensitive to the
/// data-bit sign.
pub fn costas_phase_rad(prompt:Complex<f64>) -> f64 {
	if prompt.re == 0.0 { 0.0 } else { (prompt.im / prompt.re).atan() }
}

/// Cross/dot product frequency discriminator over two successive prompts.
/// Returns the phase advanced between them in radians; dividing by the
/// interval length gives the frequency error.  Two-quadrant, so a data-bit
/// flip between the prompts cancels out.
pub fn cross_dot_phase_rad(prev:Complex<f64>, curr:Complex<f64>) -> f64 {
	let cross = prev.re * curr.im - prev.im * curr.re;
	let dot   = prev.re * curr.re + prev.im * curr.im;
	if dot == 0.0 { 0.0 } else { (cross / dot).atan() }
}

/// Normalized early-minus-late power discriminator.  Positive when the
/// replica runs behind the incoming code, in chips.
pub fn early_late_chips(early:Complex<f64>, late:Complex<f64>) -> f64 {
	let e = early.norm();
	let l = late.norm();
	if l + e == 0.0 { 0.0 } else { 0.5 * (l - e) / (l + e) }
}

#[cfg(test)]
mod tests {

	use super::*;

	#[test]
	fn costas_ignores_bit_sign() {
		let up = costas_phase_rad(Complex{ re: 1.0, im: 0.1 });
		let flipped = costas_phase_rad(Complex{ re: -1.0, im: -0.1 });
		assert!((up - 0.1f64.atan()).abs() < 1e-12);
		assert!((up - flipped).abs() < 1e-12);

		let down = costas_phase_rad(Complex{ re: 1.0, im: -0.1 });
		assert!(down < 0.0);
		assert_eq!(costas_phase_rad(Complex{ re: 0.0, im: 1.0 }), 0.0);
	}

	#[test]
	fn cross_dot_recovers_rotation_through_bit_flips() {
		let prev = Complex{ re: 1.0, im: 0.0 };
		let curr = Complex{ re: 0.3f64.cos(), im: 0.3f64.sin() };
		assert!((cross_dot_phase_rad(prev, curr) - 0.3).abs() < 1e-12);

		// Same rotation but the data bit flipped between the prompts
		let flipped = Complex{ re: -curr.re, im: -curr.im };
		assert!((cross_dot_phase_rad(prev, flipped) - 0.3).abs() < 1e-12);

		let backwards = Complex{ re: 0.3f64.cos(), im: -(0.3f64.sin()) };
		assert!((cross_dot_phase_rad(prev, backwards) + 0.3).abs() < 1e-12);
	}

	#[test]
	fn early_late_sign_matches_replica_offset() {
		// Early stronger: the replica leads the signal and must slow down
		let ahead = early_late_chips(Complex{ re: 0.8, im: 0.0 }, Complex{ re: 0.4, im: 0.0 });
		assert!(ahead < 0.0);

		// Late stronger: the replica lags and must speed up
		let behind = early_late_chips(Complex{ re: 0.4, im: 0.0 }, Complex{ re: 0.8, im: 0.0 });
		assert!(behind > 0.0);

		let balanced = early_late_chips(Complex{ re: 0.6, im: 0.0 }, Complex{ re: 0.6, im: 0.0 });
		assert!(balanced.abs() < 1e-12);
		assert_eq!(early_late_chips(Complex{ re: 0.0, im: 0.0 }, Complex{ re: 0.0, im: 0.0 }), 0.0);
	}

}
