
extern crate clap;
extern crate colored;
extern crate crossbeam_channel;
extern crate env_logger;
extern crate gps_sdr;
extern crate libc;
extern crate serde_json;

use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::{Arg, App};
use colored::*;
use crossbeam_channel::TryRecvError;

use gps_sdr::config::{ReceiverConfig, SampleFormat, NUM_CODES};
use gps_sdr::receiver::{Receiver, Measurement, Event};

static RUNNING:AtomicBool = AtomicBool::new(true);

extern "C" fn handle_sigint(_sig:libc::c_int) {
	RUNNING.store(false, Ordering::SeqCst);
}

fn main() {

	env_logger::init();
	unsafe { libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t); }

	let matches = App::new("GPS L1 C/A Software Receiver")
		.version("0.1.0")
		.author("John Stanford (johnwstanford@gmail.com)")
		.about("Runs the acquisition and tracking engine over IQ samples centered on 1575.42 MHz and produces raw measurements")
		.arg(Arg::with_name("filename")
			.short("f").long("filename")
			.help("Input filename")
			.required(true).takes_value(true))
		.arg(Arg::with_name("sample_rate_sps")
			.short("s").long("sample_rate_sps")
			.takes_value(true).required_unless("config"))
		.arg(Arg::with_name("input_type")
			.short("t").long("type")
			.takes_value(true)
			.possible_value("i16").possible_value("i8").possible_value("i16_real"))
		.arg(Arg::with_name("if_hz")
			.long("if_hz").takes_value(true)
			.help("Center frequency of a real-sampled IF stream, zero for complex baseband"))
		.arg(Arg::with_name("config")
			.short("c").long("config").takes_value(true)
			.help("JSON receiver configuration; command line flags override its source settings"))
		.arg(Arg::with_name("max_channels")
			.short("m").long("max_channels").takes_value(true))
		.arg(Arg::with_name("realtime")
			.long("realtime")
			.help("Apply SCHED_FIFO task priorities and run the sample feed unpaced"))
		.get_matches();

	let fname:&str = matches.value_of("filename").unwrap();

	let mut cfg = match matches.value_of("config") {
		Some(path) => ReceiverConfig::from_file(path).unwrap(),
		None => ReceiverConfig::new(matches.value_of("sample_rate_sps").unwrap().parse().unwrap()),
	};
	if let Some(fs) = matches.value_of("sample_rate_sps") { cfg.source.fs_sps = fs.parse().unwrap(); }
	if let Some(t) = matches.value_of("input_type") {
		cfg.source.format = match t {
			"i8"       => SampleFormat::I8Complex,
			"i16_real" => SampleFormat::I16Real,
			_          => SampleFormat::I16Complex,
		};
	}
	if let Some(f) = matches.value_of("if_hz") { cfg.source.if_hz = f.parse().unwrap(); }
	if let Some(m) = matches.value_of("max_channels") { cfg.max_channels = m.parse().unwrap(); }
	cfg.fabric.realtime = matches.is_present("realtime");

	eprintln!("Decoding {} at {} [samples/sec]", &fname, cfg.source.fs_sps);

	let src = File::open(&fname).unwrap();
	let receiver = Receiver::start(cfg, src).unwrap();

	let measurements = receiver.measurements().clone();
	let nav_bits = receiver.nav_bits().clone();
	let events = receiver.events().clone();

	let mut all_measurements:Vec<Measurement> = vec![];
	let mut bit_counts:Vec<usize> = vec![0; NUM_CODES + 1];
	let mut measurements_open = true;
	let mut nav_bits_open = true;
	let mut events_open = true;

	while measurements_open || nav_bits_open || events_open {

		if !RUNNING.load(Ordering::SeqCst) { receiver.stop(); }

		let mut idle = true;

		if events_open {
			match events.try_recv() {
				Ok(event) => {
					idle = false;
					match event {
						Event::Assigned{ slot, prn, doppler_hz, test_stat } =>
							eprintln!("{}", format!("PRN {:02}: acquired at {:+7.0} [Hz] doppler, test statistic {:.2e}, tracking on slot {}",
								prn, doppler_hz, test_stat, slot).green()),
						Event::CandidateRejected{ prn, test_stat, reason } =>
							eprintln!("{}", format!("PRN {:02}: {}, test statistic {:.2e}", prn, reason, test_stat).yellow()),
						Event::ReacquireQueued{ prn, not_before_ms } =>
							eprintln!("PRN {:02}: queued for reacquisition at t+{} [ms]", prn, not_before_ms),
						Event::NoiseFloorUpdated{ test_stat } =>
							eprintln!("{}", format!("noise floor statistic {:.2e}", test_stat).dimmed()),
						Event::ChannelStateChanged{ slot, prn, from, to } =>
							eprintln!("{}", format!("slot {}: PRN {:02} {:?} -> {:?}", slot, prn, from, to).cyan()),
					}
				},
				Err(TryRecvError::Empty) => (),
				Err(TryRecvError::Disconnected) => events_open = false,
			}
		}

		if nav_bits_open {
			match nav_bits.try_recv() {
				Ok(b) => {
					idle = false;
					bit_counts[b.prn] += 1;
				},
				Err(TryRecvError::Empty) => (),
				Err(TryRecvError::Disconnected) => nav_bits_open = false,
			}
		}

		if measurements_open {
			match measurements.try_recv() {
				Ok(m) => {
					idle = false;
					if m.navigation_valid {
						eprintln!("{}", format!("{:9.3} [sec], PRN {:02}: {:5.1} [dB-Hz], {:+8.1} [Hz] doppler, code phase {:8.3} [chips]",
							m.rx_time_s, m.prn, m.cn0_dbhz, m.doppler_hz, m.code_phase_chips).green().bold());
					}
					all_measurements.push(m);
				},
				Err(TryRecvError::Empty) => (),
				Err(TryRecvError::Disconnected) => measurements_open = false,
			}
		}

		if idle { thread::sleep(Duration::from_millis(5)); }

	}

	receiver.join();

	for (prn, count) in bit_counts.iter().enumerate() {
		if *count > 0 { eprintln!("PRN {:02}: {} data bits recovered", prn, count); }
	}

	println!("{}", serde_json::to_string_pretty(&all_measurements).unwrap());

}
