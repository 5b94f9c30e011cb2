
pub mod agc;

use std::f64::consts;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, RecvTimeoutError, TryRecvError};
use rustfft::num_complex::Complex;

use log::{debug, info, warn};
use serde::{Serialize, Deserialize};

use crate::Sample;
use crate::config::{ConfigError, ReceiverConfig, SampleFormat, SourceConfig,
	AcquisitionConfig, DetectionClass, TrackingConfig};
use crate::fabric::{self, links};
use crate::fabric::links::NonBlockingSender;
use crate::gnss::acquisition::{self, Acquisition as AcquisitionTrait, AcquisitionResult};
use crate::gnss::channel::{self, Channel, ChannelState};
use crate::gnss::correlator::{self, Correlation, Correlator, SlotControl, TrackingFeedback};
use crate::gnss::sv_select::{self, CandidateDisposition, SlotStatus, SvSelect};
use crate::io::BufferedSource;

pub use crate::gnss::channel::{Measurement, NavBit};
pub use crate::gnss::sv_select::Event;

/// Operator commands accepted while the engine runs
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Command {
	ForceReacquire{ prn:usize },
	DropSlot{ slot:usize },
	Stop,
}

type Block = Arc<Vec<Sample>>;

/// Handle to a running engine: consumer ends of the outbound streams plus the
/// lifecycle controls.  Dropping the handle does not stop the engine; call
/// `stop` or send `Command::Stop`, then `join`.
pub struct Receiver {
	running:Arc<AtomicBool>,
	command_tx:Sender<Command>,
	measurement_rx:crossbeam_channel::Receiver<Measurement>,
	nav_bit_rx:crossbeam_channel::Receiver<NavBit>,
	event_rx:crossbeam_channel::Receiver<Event>,
	handles:Vec<JoinHandle<()>>,
}

impl Receiver {

	// Read-only getter methods
	pub fn is_running(&self) -> bool { self.running.load(Ordering::SeqCst) }
	pub fn measurements(&self) -> &crossbeam_channel::Receiver<Measurement> { &self.measurement_rx }
	pub fn nav_bits(&self) -> &crossbeam_channel::Receiver<NavBit> { &self.nav_bit_rx }
	pub fn events(&self) -> &crossbeam_channel::Receiver<Event> { &self.event_rx }

	/// Clonable handle for injecting operator commands
	pub fn commands(&self) -> Sender<Command> { self.command_tx.clone() }

	pub fn stop(&self) { self.running.store(false, Ordering::SeqCst); }

	/// Wait for every engine task to wind down.  Returns once the sample
	/// source is exhausted or after `stop`.
	pub fn join(self) {
		for handle in self.handles {
			let _ = handle.join();
		}
	}

	/// Validate the configuration, wire the task fabric and start every
	/// engine task.  The sample ingest task starts last so no task ever sees
	/// a half-built fabric.
	pub fn start<S: Read + Send + 'static>(cfg:ReceiverConfig, src:S) -> Result<Receiver, ConfigError> {
		cfg.validate()?;

		if cfg.fabric.lock_memory {
			if let Err(e) = fabric::lock_all_memory() { warn!("unable to lock memory: {}", e); }
		}

		let fs = cfg.source.fs_sps;
		let num_slots = cfg.max_channels;
		let num_workers = cfg.cpu_cores;
		let slots_per_worker = num_slots / num_workers;
		let paced = !cfg.fabric.realtime;
		let running = Arc::new(AtomicBool::new(true));

		// Sample fan-out, one bounded lane per correlator worker
		let mut block_txs:Vec<Sender<Block>> = Vec::with_capacity(num_workers);
		let mut block_rxs = Vec::with_capacity(num_workers);
		for _ in 0..num_workers {
			let (tx, rx) = links::blocking_link(4);
			block_txs.push(tx);
			block_rxs.push(rx);
		}
		let (acq_feed_tx, acq_feed_rx) = links::nonblocking_link::<Block>("acquisition_feed", 8);

		// Correlation rendezvous: many correlators in, one reply lane per slot
		let (correlation_tx, correlation_rx) = links::blocking_link::<Correlation>(num_slots);
		let mut feedback_txs:Vec<Sender<TrackingFeedback>> = Vec::with_capacity(num_slots);
		let mut feedback_rxs_by_worker:Vec<Vec<crossbeam_channel::Receiver<TrackingFeedback>>> =
			(0..num_workers).map(|_| vec![]).collect();
		for slot in 0..num_slots {
			let (tx, rx) = links::blocking_link(1);
			feedback_txs.push(tx);
			feedback_rxs_by_worker[slot / slots_per_worker].push(rx);
		}

		// Scheduler plumbing
		let mut corr_control_txs:Vec<Sender<(usize, SlotControl)>> = Vec::with_capacity(num_workers);
		let mut corr_control_rxs = Vec::with_capacity(num_workers);
		for _ in 0..num_workers {
			let (tx, rx) = links::blocking_link(num_slots);
			corr_control_txs.push(tx);
			corr_control_rxs.push(rx);
		}
		let (trk_control_tx, trk_control_rx) = links::blocking_link::<(usize, SlotControl)>(num_slots);
		let (status_tx, status_rx) = links::nonblocking_link::<SlotStatus>("slot_status", num_slots * 8);
		let (acq_request_tx, acq_request_rx) = links::blocking_link::<usize>(1);
		let (acq_result_tx, acq_result_rx) = links::blocking_link::<AcquisitionResult>(1);

		// Outbound streams and operator commands
		let (measurement_tx, measurement_rx) = links::nonblocking_link::<Measurement>("measurements", 64);
		let (nav_bit_tx, nav_bit_rx) = links::nonblocking_link::<NavBit>("nav_bits", 256);
		let (event_tx, event_rx) = links::nonblocking_link::<Event>("events", 64);
		let (command_tx, command_rx) = links::blocking_link::<Command>(16);

		let priorities = cfg.fabric.priorities;
		let realtime = cfg.fabric.realtime;
		let mut handles:Vec<JoinHandle<()>> = vec![];

		{
			let acq_cfg = cfg.acquisition.clone();
			let class = cfg.acquisition.class(cfg.sv_select.signal_class);
			handles.push(fabric::spawn_task("acquisition", priorities.acquisition, realtime, move || {
				run_acquisition(fs, acq_cfg, class, acq_request_rx, acq_feed_rx, acq_result_tx);
			})?);
		}

		{
			let scheduler = sv_select::new_sv_select(&cfg.sv_select, &cfg.acquisition, num_slots);
			let survey_interval = Duration::from_millis(cfg.sv_select.survey_interval_ms as u64);
			let corr_ctl = corr_control_txs;
			let running_sv = running.clone();
			handles.push(fabric::spawn_task("sv_select", priorities.sv_select, realtime, move || {
				run_sv_select(scheduler, survey_interval, slots_per_worker,
					command_rx, status_rx, acq_result_rx, acq_request_tx,
					corr_ctl, trk_control_tx, event_tx, running_sv);
			})?);
		}

		{
			let trk_cfg = cfg.tracking.clone();
			handles.push(fabric::spawn_task("tracking", priorities.tracking, realtime, move || {
				run_tracking(fs, trk_cfg, num_slots,
					correlation_rx, trk_control_rx, feedback_txs,
					status_tx, measurement_tx, nav_bit_tx);
			})?);
		}

		let worker_inputs = block_rxs.into_iter()
			.zip(corr_control_rxs.into_iter())
			.zip(feedback_rxs_by_worker.into_iter());
		for (worker, ((block_rx, control_rx), feedback_rxs)) in worker_inputs.enumerate() {
			let first_slot = worker * slots_per_worker;
			let correlators:Vec<Correlator> = (first_slot..first_slot + slots_per_worker)
				.map(|slot| correlator::new_correlator(slot, fs, cfg.tracking.correlator_spacing_chips))
				.collect();
			let tx = correlation_tx.clone();
			handles.push(fabric::spawn_task(&format!("correlator_{}", worker), priorities.correlator, realtime, move || {
				run_correlator_worker(first_slot, correlators, block_rx, control_rx, tx, feedback_rxs);
			})?);
		}
		// Tracking must see disconnect once the workers are gone
		drop(correlation_tx);

		{
			let source_cfg = cfg.source.clone();
			let running_ingest = running.clone();
			handles.push(fabric::spawn_task("sample_ingest", priorities.sample_ingest, realtime, move || {
				run_ingest(source_cfg, src, block_txs, acq_feed_tx, paced, running_ingest);
			})?);
		}

		info!("receiver started: {:.4e} sps, {} channels across {} correlator cores",
			fs, num_slots, num_workers);

		Ok(Receiver{ running, command_tx, measurement_rx, nav_bit_rx, event_rx, handles })
	}

}

/// Complex NCO translating a real-sampled IF stream to baseband
struct IfMixer {
	phasor:Complex<f64>,
	step:Complex<f64>,
}

impl IfMixer {
	fn apply(&mut self, block:&mut [Sample]) {
		for s in block.iter_mut() {
			s.val = s.val * self.phasor;
			self.phasor = self.phasor * self.step;
		}
		self.phasor = self.phasor / self.phasor.norm();
	}
}

fn new_if_mixer(if_hz:f64, fs:f64) -> IfMixer {
	let theta = (-2.0 * consts::PI * if_hz) / fs;
	IfMixer{
		phasor: Complex{ re: 1.0, im: 0.0 },
		step: Complex{ re: theta.cos(), im: theta.sin() },
	}
}

/// Reads, conditions and fans out sample blocks.  Exits when the source runs
/// dry or the running flag clears, and takes the engine down with it.
fn run_ingest<S: Read>(
	cfg:SourceConfig,
	src:S,
	block_txs:Vec<Sender<Block>>,
	mut acq_feed:NonBlockingSender<Block>,
	paced:bool,
	running:Arc<AtomicBool>,
) {
	let mut source = BufferedSource::new(src, cfg.format);
	let mut agc = agc::new_agc(&cfg.agc);
	let mut mixer = if cfg.format == SampleFormat::I16Real && cfg.if_hz != 0.0 {
		Some(new_if_mixer(cfg.if_hz, cfg.fs_sps))
	} else { None };

	'ingest: while running.load(Ordering::Relaxed) {
		let mut block:Vec<Sample> = Vec::with_capacity(cfg.block_size);
		block.extend(source.by_ref().take(cfg.block_size));
		if block.is_empty() {
			info!("sample source exhausted");
			break;
		}

		if let Some(m) = mixer.as_mut() { m.apply(&mut block); }
		agc.process(&mut block);

		let block = Arc::new(block);
		for tx in block_txs.iter() {
			if tx.send(block.clone()).is_err() { break 'ingest; }
		}
		if paced {
			acq_feed.send_blocking(block.clone());
		} else {
			acq_feed.send(block.clone());
		}
	}

	running.store(false, Ordering::SeqCst);
	debug!("sample ingest stopped");
}

/// Runs one bank of correlators over every sample block.  Each closed
/// interval rendezvouses with the tracking task: ship the correlation, block
/// until the retune comes back, apply it, move on.
fn run_correlator_worker(
	first_slot:usize,
	mut correlators:Vec<Correlator>,
	block_rx:crossbeam_channel::Receiver<Block>,
	control_rx:crossbeam_channel::Receiver<(usize, SlotControl)>,
	correlation_tx:Sender<Correlation>,
	feedback_rxs:Vec<crossbeam_channel::Receiver<TrackingFeedback>>,
) {
	loop {
		while let Ok((slot, ctl)) = control_rx.try_recv() {
			let correlator = &mut correlators[slot - first_slot];
			match ctl {
				SlotControl::Assign(a) => correlator.assign(a),
				SlotControl::Stop      => correlator.stop(),
			}
		}

		let block = match block_rx.recv() {
			Ok(block) => block,
			Err(_) => break,
		};
		for sample in block.iter() {
			for (lane, correlator) in correlators.iter_mut().enumerate() {
				if let Some(correlation) = correlator.apply(sample) {
					if correlation_tx.send(correlation).is_err() { return; }
					match feedback_rxs[lane].recv() {
						Ok(feedback) => correlator.retune(feedback),
						Err(_) => return,
					}
				}
			}
		}
	}
}

/// Owns the channel arena.  Every received correlation is answered with
/// exactly one feedback message so no correlator lane ever stays blocked.
fn run_tracking(
	fs:f64,
	cfg:TrackingConfig,
	num_slots:usize,
	correlation_rx:crossbeam_channel::Receiver<Correlation>,
	control_rx:crossbeam_channel::Receiver<(usize, SlotControl)>,
	feedback_txs:Vec<Sender<TrackingFeedback>>,
	mut status_tx:NonBlockingSender<SlotStatus>,
	mut measurement_tx:NonBlockingSender<Measurement>,
	mut nav_bit_tx:NonBlockingSender<NavBit>,
) {
	let mut channels:Vec<Channel> = (0..num_slots)
		.map(|slot| channel::new_channel(slot, fs, &cfg))
		.collect();
	let mut last_states:Vec<ChannelState> = vec![ChannelState::Idle; num_slots];
	let mut ticks:Vec<usize> = vec![0; num_slots];

	loop {
		while let Ok((slot, ctl)) = control_rx.try_recv() {
			match ctl {
				SlotControl::Assign(a) => channels[slot].assign(a),
				SlotControl::Stop      => channels[slot].stop(),
			}
			last_states[slot] = channels[slot].state();
			status_tx.send(slot_status(&channels[slot]));
		}

		let correlation = match correlation_rx.recv_timeout(Duration::from_millis(20)) {
			Ok(c) => c,
			Err(RecvTimeoutError::Timeout) => continue,
			Err(RecvTimeoutError::Disconnected) => break,
		};

		let slot = correlation.slot;
		let out = channels[slot].apply(&correlation);
		let _ = feedback_txs[slot].send(out.feedback);

		if let Some(m) = out.measurement { measurement_tx.send(m); }
		if let Some(b) = out.nav_bit { nav_bit_tx.send(b); }

		ticks[slot] += 1;
		let state = channels[slot].state();
		if state != last_states[slot] || ticks[slot] % 100 == 0 {
			last_states[slot] = state;
			status_tx.send(slot_status(&channels[slot]));
		}
	}
	debug!("tracking stopped");
}

fn slot_status(chn:&Channel) -> SlotStatus {
	SlotStatus{ slot: chn.slot, prn: chn.prn(), state: chn.state(), cn0_dbhz: chn.cn0_dbhz() }
}

/// Scheduler task: folds in status reports, judges acquisition candidates,
/// issues slot control and keeps exactly one search in flight.
fn run_sv_select(
	mut scheduler:SvSelect,
	survey_interval:Duration,
	slots_per_worker:usize,
	command_rx:crossbeam_channel::Receiver<Command>,
	status_rx:crossbeam_channel::Receiver<SlotStatus>,
	acq_result_rx:crossbeam_channel::Receiver<AcquisitionResult>,
	acq_request_tx:Sender<usize>,
	corr_control_txs:Vec<Sender<(usize, SlotControl)>>,
	trk_control_tx:Sender<(usize, SlotControl)>,
	mut event_tx:NonBlockingSender<Event>,
	running:Arc<AtomicBool>,
) {
	let started = Instant::now();

	let send_control = |slot:usize, ctl:SlotControl| {
		let _ = corr_control_txs[slot / slots_per_worker].send((slot, ctl));
		let _ = trk_control_tx.send((slot, ctl));
	};

	while running.load(Ordering::Relaxed) {
		let now_ms = started.elapsed().as_millis() as usize;

		while let Ok(cmd) = command_rx.try_recv() {
			match cmd {
				Command::ForceReacquire{ prn } => {
					info!("operator: reacquire PRN {}", prn);
					if let Some(slot) = scheduler.force_reacquire(prn, now_ms) {
						send_control(slot, SlotControl::Stop);
					}
				},
				Command::DropSlot{ slot } => {
					info!("operator: drop slot {}", slot);
					if scheduler.drop_slot(slot, now_ms) {
						send_control(slot, SlotControl::Stop);
					}
				},
				Command::Stop => {
					info!("operator: stop");
					running.store(false, Ordering::SeqCst);
				},
			}
		}

		while let Ok(status) = status_rx.try_recv() {
			if scheduler.observe(&status, now_ms) {
				// Loss of lock frees the slot; silence its correlator so a
				// dead assignment stops burning correlation time
				send_control(status.slot, SlotControl::Stop);
			}
		}

		while let Ok(result) = acq_result_rx.try_recv() {
			if let CandidateDisposition::Assigned{ slot, assign } = scheduler.candidate(&result, now_ms) {
				send_control(slot, SlotControl::Assign(assign));
			}
		}

		if let Some(prn) = scheduler.next_search(now_ms) {
			if acq_request_tx.send(prn).is_err() { break; }
		}

		for event in scheduler.drain_events() {
			event_tx.send(event);
		}

		std::thread::sleep(survey_interval);
	}
	debug!("sv select stopped");
}

/// Serves one search request at a time against the live sample feed.  While
/// idle the feed is drained and discarded so a paced producer never stalls
/// against a search nobody asked for.
fn run_acquisition(
	fs:f64,
	cfg:AcquisitionConfig,
	class:DetectionClass,
	request_rx:crossbeam_channel::Receiver<usize>,
	feed_rx:crossbeam_channel::Receiver<Block>,
	result_tx:Sender<AcquisitionResult>,
) {
	let mut acq = acquisition::from_config(fs, 1, &cfg, class);

	loop {
		match request_rx.try_recv() {
			Ok(prn) => {
				acq.retune(prn);
				let found = loop {
					let block = match feed_rx.recv() {
						Ok(block) => block,
						Err(_) => break None,
					};
					for sample in block.iter() {
						acq.provide_sample(sample);
					}
					if let Some(candidate) = acq.block_for_candidate() {
						break Some(candidate);
					}
				};
				match found {
					Some(candidate) => {
						debug!("PRN {}: statistic {:.2e} at {:+.0} Hz",
							candidate.prn, candidate.test_statistic(), candidate.doppler_hz);
						if result_tx.send(candidate).is_err() { break; }
					},
					// Feed gone mid-search; nothing further can ever finish
					None => break,
				}
			},
			Err(TryRecvError::Disconnected) => break,
			Err(TryRecvError::Empty) => {
				match feed_rx.recv_timeout(Duration::from_millis(20)) {
					Ok(_) => { while feed_rx.try_recv().is_ok() {} },
					Err(RecvTimeoutError::Timeout) => (),
					Err(RecvTimeoutError::Disconnected) => break,
				}
			},
		}
	}
	debug!("acquisition stopped");
}
