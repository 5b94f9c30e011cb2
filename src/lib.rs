
use rustfft::num_complex::Complex;

pub mod config;
pub mod fabric;
pub mod filters;
pub mod gnss;
pub mod io;
pub mod receiver;

#[derive(Debug, Clone, Copy)]
pub struct Sample {
	pub val: Complex<f64>,
	pub idx: usize,
}
