
use std::f64::consts;
use std::sync::Arc;

use rustfft::FFT;
use rustfft::num_complex::Complex;

use crate::Sample;
use crate::gnss::signal_modulation;

/// Parallel code phase search: one coherent FFT correlation per Doppler bin
/// per 1 [ms] window, power-accumulated over a configurable number of
/// non-coherent passes.
pub struct Acquisition {
	pub fs:f64,
	pub prn:usize,
	pub test_statistic_threshold:f64,
	pub second_peak_margin:f64,
	pub non_coherent_sums:usize,
	pub doppler_freqs:Vec<f64>,
	pub doppler_step_hz:f64,
	pub buffer:Vec<Complex<f64>>,
	pub len_fft:usize,
	pub fft:Arc<dyn FFT<f64>>,
	pub local_code_freq_domain:Vec<Complex<f64>>,
	pub fft_out:  Vec<Complex<f64>>,
	pub ifft:Arc<dyn FFT<f64>>,
	pub ifft_out: Vec<Complex<f64>>,
	pub power_map:Vec<Vec<f64>>,
	pub sums_done:usize,
	pub input_power_total:f64,
	pub next_sample_idx:usize,
}

impl Acquisition {

	/// Aim the search at a different PRN, reusing the FFT plans and buffers
	pub fn retune(&mut self, prn:usize) {
		let symbol:Vec<i8> = signal_modulation::prn_int_sampled(prn, self.fs);
		let mut local_code_time_domain:Vec<Complex<f64>> = symbol.into_iter()
			.map(|b| Complex{ re: b as f64, im: 0.0 }).collect();
		self.fft.process(&mut local_code_time_domain, &mut self.fft_out);
		self.local_code_freq_domain = (&self.fft_out).into_iter().map(|p| p.conj()).collect();
		self.prn = prn;
		self.clear_search();
	}

	/// Drop buffered samples and any partially accumulated search
	pub fn clear_search(&mut self) {
		self.buffer.clear();
		for row in self.power_map.iter_mut() {
			for bin in row.iter_mut() { *bin = 0.0; }
		}
		self.sums_done = 0;
		self.input_power_total = 0.0;
	}

	/// Best bin over the full map whether or not it clears the detection
	/// policy.  Sub-threshold results from a non-allocated PRN are how the
	/// scheduler estimates the false-alarm floor.
	pub fn block_for_candidate(&mut self) -> Option<super::AcquisitionResult> {
		while self.buffer.len() >= self.len_fft {
			self.accumulate_window();
			if self.sums_done >= self.non_coherent_sums {
				return Some(self.finalize());
			}
		}
		None
	}

	fn accumulate_window(&mut self) {
		let signal:Vec<Complex<f64>> = self.buffer.drain(..self.len_fft).collect();

		self.input_power_total += signal.iter().map(|c| c.re*c.re + c.im*c.im).sum::<f64>();

		for (row, freq) in self.doppler_freqs.iter().enumerate() {
			// Wipe the carrier off the input signal
			let phase_step_rad:f64 = (-2.0 * consts::PI * (*freq)) / self.fs;
			let mut doppler_wiped_time_domain:Vec<Complex<f64>> = (0..(signal.len()))
				.map(|idx| {
					let phase = phase_step_rad * (idx as f64);
					signal[idx] * Complex{ re: phase.cos(), im: phase.sin() }
				}).collect();

			// Run the forward FFT
			self.fft.process(&mut doppler_wiped_time_domain, &mut self.fft_out);

			// Perform multiplication in the freq domain, which is convolution in the time domain
			let mut convolution_freq_domain:Vec<Complex<f64>> = (&self.fft_out).into_iter()
				.zip((&self.local_code_freq_domain).into_iter())
				.map( |(a,b)| a*b )
				.collect();

			// Run the inverse FFT to get correlation in the time domain
			self.ifft.process(&mut convolution_freq_domain, &mut self.ifft_out);
			let scale:f64 = self.len_fft as f64;
			for (idx, mf_response) in (&self.ifft_out).into_iter().enumerate() {
				self.power_map[row][idx] += (mf_response / scale).norm_sqr();
			}
		}

		self.sums_done += 1;
	}

	fn finalize(&mut self) -> super::AcquisitionResult {
		let mut peak_power:f64 = 0.0;
		let mut peak_row:usize = 0;
		let mut peak_idx:usize = 0;
		for (row, bins) in self.power_map.iter().enumerate() {
			for (idx, power) in bins.iter().enumerate() {
				if *power > peak_power {
					peak_power = *power;
					peak_row = row;
					peak_idx = idx;
				}
			}
		}

		// Best power in the same Doppler row more than one chip from the peak
		let chip_samples:usize = (self.len_fft + 1022) / 1023;
		let mut second_peak_power:f64 = 0.0;
		for (idx, power) in self.power_map[peak_row].iter().enumerate() {
			let direct = if idx > peak_idx { idx - peak_idx } else { peak_idx - idx };
			let circular = direct.min(self.len_fft - direct);
			if circular > chip_samples && *power > second_peak_power {
				second_peak_power = *power;
			}
		}

		// All windows since the last restart are contiguous, so the last
		// window's start anchors the code phase to an absolute sample index
		let last_window_start:usize = self.next_sample_idx - self.buffer.len() - self.len_fft;

		let result = super::AcquisitionResult{
			prn: self.prn,
			doppler_hz: self.doppler_freqs[peak_row],
			doppler_step_hz: self.doppler_step_hz,
			code_phase: peak_idx,
			boundary_sample_idx: last_window_start + peak_idx,
			peak_power, second_peak_power,
			input_power_total: self.input_power_total,
			mf_len: self.len_fft,
			non_coherent_sums: self.sums_done,
		};

		for row in self.power_map.iter_mut() {
			for bin in row.iter_mut() { *bin = 0.0; }
		}
		self.sums_done = 0;
		self.input_power_total = 0.0;

		result
	}

}

impl super::Acquisition for Acquisition {

	fn provide_sample(&mut self, sample:&Sample) {
		if sample.idx == self.next_sample_idx {
			self.buffer.push(sample.val);
			self.next_sample_idx = sample.idx + 1;
		} else if sample.idx > self.next_sample_idx {
			// The feed skipped.  Windows accumulated after the gap would no
			// longer share the pre-gap windows' code phase alignment, so the
			// whole search restarts on the new contiguous run.
			self.clear_search();
			self.buffer.push(sample.val);
			self.next_sample_idx = sample.idx + 1;
		}
	}

	fn block_for_result(&mut self) -> Option<super::AcquisitionResult> {
		self.block_for_candidate()
			.filter(|result| result.accepted(self.test_statistic_threshold, self.second_peak_margin))
	}

}
