
use rustfft::num_complex::Complex;

use crate::gnss::constants::{GPS_L1_CA_CODE_LENGTH_CHIPS, GPS_L1_CA_SEC_PER_CHIP};

// G2 output delay per PRN, IS-GPS-200 table 3-I (PRNs 1-37; 34 and 37 share a code)
const G2_DELAY:[usize; 37] = [
	  5,   6,   7,   8,  17,  18, 139, 140, 141, 251,
	252, 254, 255, 256, 257, 258, 469, 470, 471, 472,
	473, 474, 509, 512, 513, 514, 515, 516, 859, 860,
	861, 862, 863, 950, 947, 948, 950];

/// One period of the C/A Gold code for this PRN as +/-1 chips, a positive
/// value encoding a binary one
pub fn prn_int(prn:usize) -> Vec<i8> {
	debug_assert!(prn >= 1 && prn <= G2_DELAY.len());

	let mut g1 = [0i8; GPS_L1_CA_CODE_LENGTH_CHIPS];
	let mut g2 = [0i8; GPS_L1_CA_CODE_LENGTH_CHIPS];
	let mut r1 = [-1i8; 10];
	let mut r2 = [-1i8; 10];
	for i in 0..GPS_L1_CA_CODE_LENGTH_CHIPS {
		g1[i] = r1[9];
		g2[i] = r2[9];
		let c1 = r1[2] * r1[9];
		let c2 = r2[1] * r2[2] * r2[5] * r2[7] * r2[8] * r2[9];
		r1.rotate_right(1);
		r2.rotate_right(1);
		r1[0] = c1;
		r2[0] = c2;
	}

	let mut j = GPS_L1_CA_CODE_LENGTH_CHIPS - G2_DELAY[prn - 1];
	(0..GPS_L1_CA_CODE_LENGTH_CHIPS).map(|i| {
		let chip = -g1[i] * g2[j % GPS_L1_CA_CODE_LENGTH_CHIPS];
		j += 1;
		chip
	}).collect()
}

pub fn prn_complex(prn:usize) -> Vec<Complex<f64>> {
	prn_int(prn).iter().map(|x| Complex{ re: *x as f64, im: 0.0 }).collect()
}

/// One code period resampled to the given sample rate
pub fn prn_int_sampled(prn:usize, fs:f64) -> Vec<i8> {
	let samples_per_code:usize = (fs / 1000.0) as usize;
	let ts:f64 = 1.0 / fs;

	let code = prn_int(prn);

	(0..samples_per_code).map(|i| {
		let code_value_idx:usize = ((ts * ((i+1) as f64)) / GPS_L1_CA_SEC_PER_CHIP) as usize;
		if code_value_idx >= GPS_L1_CA_CODE_LENGTH_CHIPS { code[GPS_L1_CA_CODE_LENGTH_CHIPS-1] } else { code[code_value_idx] }
	}).collect()
}

#[cfg(test)]
mod tests {

	use super::*;

	#[test]
	fn codes_are_full_length_bipolar_and_balanced() {
		for prn in 1..=32 {
			let code = prn_int(prn);
			assert_eq!(code.len(), 1023);
			assert!(code.iter().all(|c| *c == 1 || *c == -1));
			// 512 of one polarity against 511 of the other
			let sum:i32 = code.iter().map(|c| *c as i32).sum();
			assert_eq!(sum.abs(), 1);
		}
	}

	#[test]
	fn prn1_starts_with_the_published_chip_pattern() {
		// First ten chips of PRN 1 are 1100100000 regardless of polarity convention
		let code = prn_int(1);
		let one = code[0];
		let expected = [one, one, -one, -one, one, -one, -one, -one, -one, -one];
		assert_eq!(&code[..10], &expected);
	}

	#[test]
	fn distinct_prns_have_bounded_cross_correlation() {
		let a = prn_int(3);
		let b = prn_int(7);
		for lag in 0..1023 {
			let xcorr:i32 = (0..1023).map(|i| (a[i] as i32) * (b[(i + lag) % 1023] as i32)).sum();
			// Gold code cross-correlation takes values in {-65, -1, 63}
			assert!(xcorr.abs() <= 65, "lag {} gave {}", lag, xcorr);
		}
	}

	#[test]
	fn autocorrelation_peaks_only_at_zero_lag() {
		let code = prn_int(9);
		let zero_lag:i32 = code.iter().map(|c| (*c as i32) * (*c as i32)).sum();
		assert_eq!(zero_lag, 1023);
		for lag in 1..1023 {
			let xcorr:i32 = (0..1023).map(|i| (code[i] as i32) * (code[(i + lag) % 1023] as i32)).sum();
			assert!(xcorr.abs() <= 65);
		}
	}

	#[test]
	fn resampling_holds_each_chip_for_the_right_span() {
		let fs = 4.092e6;
		let code = prn_int(5);
		let sampled = prn_int_sampled(5, fs);
		assert_eq!(sampled.len(), 4092);
		// Four samples per chip at this rate
		assert_eq!(sampled[0], code[0]);
		assert_eq!(sampled[2], code[0]);
		assert_eq!(sampled[5], code[1]);
		assert_eq!(sampled[4091], code[1022]);
	}

}
