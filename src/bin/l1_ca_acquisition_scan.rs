
extern crate clap;
extern crate colored;
extern crate env_logger;
extern crate gps_sdr;
extern crate serde;
extern crate serde_json;

use clap::{Arg, App};
use colored::*;
use serde::{Serialize, Deserialize};

use gps_sdr::Sample;
use gps_sdr::config::{AcquisitionConfig, SampleFormat, SignalClass, NUM_CODES, NON_ALLOCATED_PRN};
use gps_sdr::gnss::acquisition::{from_config, Acquisition};
use gps_sdr::io;

#[derive(Debug, Serialize, Deserialize)]
struct ScanRecord {
	pub prn:usize,
	pub doppler_hz:f64,
	pub code_phase:usize,
	pub test_statistic:f64,
	pub peak_ratio:f64,
	pub accepted:bool,
}

fn main() {

	env_logger::init();

	let matches = App::new("GPS L1 C/A Acquisition Scan")
		.version("0.1.0")
		.author("John Stanford (johnwstanford@gmail.com)")
		.about("Surveys all 32 L1 C/A PRNs over the start of an IQ sample file and reports the detections")
		.arg(Arg::with_name("filename")
			.short("f").long("filename")
			.help("Input filename")
			.required(true).takes_value(true))
		.arg(Arg::with_name("sample_rate_sps")
			.short("s").long("sample_rate_sps")
			.takes_value(true).required(true))
		.arg(Arg::with_name("input_type")
			.short("t").long("type")
			.takes_value(true)
			.possible_value("i16").possible_value("i8").possible_value("i16_real"))
		.arg(Arg::with_name("class")
			.long("class").takes_value(true)
			.possible_value("strong").possible_value("medium").possible_value("weak")
			.help("Detection class, trading search time against sensitivity"))
		.get_matches();

	let fname:&str = matches.value_of("filename").unwrap();
	let fs:f64 = matches.value_of("sample_rate_sps").unwrap().parse().unwrap();
	let format = match matches.value_of("input_type") {
		Some("i8")       => SampleFormat::I8Complex,
		Some("i16_real") => SampleFormat::I16Real,
		_                => SampleFormat::I16Complex,
	};
	let class = match matches.value_of("class") {
		Some("medium") => SignalClass::Medium,
		Some("weak")   => SignalClass::Weak,
		_              => SignalClass::Strong,
	};

	let cfg = AcquisitionConfig::default();
	let detection = cfg.class(class);

	// One spare window so every PRN closes its full non-coherent accumulation
	let n_samples = (detection.non_coherent_sums + 1) * ((fs / 1000.0) as usize);
	let samples:Vec<Sample> = io::file_source(&fname, format).unwrap().take(n_samples).collect();

	eprintln!("Scanning {} [samples] of {} at {} [samples/sec], {:?} class", samples.len(), &fname, &fs, class);

	let mut all_records:Vec<ScanRecord> = vec![];

	for prn in 1..=NUM_CODES {
		let mut acq = from_config(fs, prn, &cfg, detection);
		for s in samples.iter() { acq.provide_sample(s); }

		match acq.block_for_candidate() {
			Some(result) => {
				let accepted = result.accepted(detection.test_stat_threshold, cfg.second_peak_margin);
				let result_str = format!("{:9.2} [Hz], {:6} [chips], {:.8}, peak ratio {:6.2}",
					result.doppler_hz, result.code_phase, result.test_statistic(), result.peak_ratio());
				if accepted {
					eprintln!("PRN {:02} {}", prn, result_str.green());
				} else {
					eprintln!("PRN {:02} {}", prn, result_str.yellow());
				}

				all_records.push(ScanRecord{
					prn,
					doppler_hz:     result.doppler_hz,
					code_phase:     result.code_phase,
					test_statistic: result.test_statistic(),
					peak_ratio:     result.peak_ratio(),
					accepted,
				});
			},
			None => eprintln!("{}", format!("PRN {:02}: not enough samples for a full search", prn).red()),
		}
	}

	// A non-allocated code sets the false-alarm floor for these thresholds
	let mut floor_acq = from_config(fs, NON_ALLOCATED_PRN, &cfg, detection);
	for s in samples.iter() { floor_acq.provide_sample(s); }
	if let Some(floor) = floor_acq.block_for_candidate() {
		eprintln!("{}", format!("noise floor: test statistic {:.8} on PRN {}", floor.test_statistic(), NON_ALLOCATED_PRN).dimmed());
	}

	// Output data in JSON format
	println!("{}", serde_json::to_string_pretty(&all_records).unwrap());

}
