
use std::fs::File;
use std::io::Read;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use rustfft::num_complex::Complex;

use crate::Sample;
use crate::config::SampleFormat;

pub const BUFFER_SIZE:usize = 2048;

pub fn bytes_per_sample(format:SampleFormat) -> usize {
	match format {
		SampleFormat::I16Complex => 4,
		SampleFormat::I8Complex  => 2,
		SampleFormat::I16Real    => 2,
	}
}

/// Buffered reader turning any byte source into a stream of indexed complex
/// samples in the configured wire format.  Real-sampled streams come out with
/// a zero imaginary part; down-conversion happens downstream.
pub struct BufferedSource<S: Read> {
	src: S,
	format: SampleFormat,
	buffer: Vec<u8>,
	valid_len: usize,
	pos: usize,
	idx: usize,
}

impl<S: Read> BufferedSource<S> {

	pub fn new(src:S, format:SampleFormat) -> Self {
		Self{ src, format, buffer: vec![0u8; BUFFER_SIZE * bytes_per_sample(format)],
			valid_len: 0, pos: 0, idx: 0 }
	}

	fn refill(&mut self) -> bool {
		// Carry any partial sample to the front before reading more
		self.buffer.copy_within(self.pos..self.valid_len, 0);
		self.valid_len -= self.pos;
		self.pos = 0;

		let bps = bytes_per_sample(self.format);
		while self.valid_len < bps {
			match self.src.read(&mut self.buffer[self.valid_len..]) {
				Ok(0) | Err(_) => return false,
				Ok(n) => self.valid_len += n,
			}
		}
		true
	}

	fn decode(&self, pos:usize) -> Complex<f64> {
		match self.format {
			SampleFormat::I16Complex => Complex{
				re: LittleEndian::read_i16(&self.buffer[pos..]) as f64,
				im: LittleEndian::read_i16(&self.buffer[pos+2..]) as f64,
			},
			SampleFormat::I8Complex => Complex{
				re: (self.buffer[pos]   as i8) as f64,
				im: (self.buffer[pos+1] as i8) as f64,
			},
			SampleFormat::I16Real => Complex{
				re: LittleEndian::read_i16(&self.buffer[pos..]) as f64,
				im: 0.0,
			},
		}
	}

}

impl<S: Read> Iterator for BufferedSource<S> {
	type Item = Sample;

	fn next(&mut self) -> Option<Sample> {
		let bps = bytes_per_sample(self.format);
		if self.pos + bps > self.valid_len {
			if !self.refill() { return None; }
		}
		let val = self.decode(self.pos);
		let ans = Sample{ val, idx: self.idx };
		self.pos += bps;
		self.idx += 1;
		Some(ans)
	}
}

pub fn file_source<P: AsRef<Path>>(fname:P, format:SampleFormat) -> std::io::Result<BufferedSource<File>> {
	Ok(BufferedSource::new(File::open(fname)?, format))
}
