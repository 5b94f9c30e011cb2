
use std::collections::VecDeque;

use log::{debug, info};
use serde::Serialize;

use crate::config::{AcquisitionConfig, SvSelectConfig, NON_ALLOCATED_PRN};
use crate::gnss::acquisition::AcquisitionResult;
use crate::gnss::channel::ChannelState;
use crate::gnss::correlator::Assign;

const NOISE_FLOOR_SMOOTHING:f64 = 0.7;

/// Scheduler-visible slice of one channel, fed back from the tracking side
#[derive(Debug, Clone, Copy)]
pub struct SlotStatus {
	pub slot:usize,
	pub prn:usize,
	pub state:ChannelState,
	pub cn0_dbhz:f64,
}

/// What became of an acquisition response
#[derive(Debug, Clone)]
pub enum CandidateDisposition {
	Assigned{ slot:usize, assign:Assign },
	Rejected{ prn:usize, reason:&'static str },
	NoiseFloorUpdated,
}

#[derive(Debug, Clone, Serialize)]
pub enum Event {
	Assigned{ slot:usize, prn:usize, doppler_hz:f64, test_stat:f64 },
	CandidateRejected{ prn:usize, test_stat:f64, reason:&'static str },
	ReacquireQueued{ prn:usize, not_before_ms:usize },
	NoiseFloorUpdated{ test_stat:f64 },
	ChannelStateChanged{ slot:usize, prn:usize, from:ChannelState, to:ChannelState },
}

struct SlotMirror {
	prn:usize,
	state:ChannelState,
	cn0_dbhz:f64,
	assigned:bool,
}

/// Decides which PRN to search next and which slot a found satellite gets.
/// Purely sequential; the surrounding task owns all channel plumbing and this
/// type never blocks.
pub struct SvSelect {
	cfg:SvSelectConfig,
	acq_cfg:AcquisitionConfig,
	/// PRNs awaiting a search, each with the earliest time it may run
	queue:VecDeque<(usize, usize)>,
	slots:Vec<SlotMirror>,
	in_flight:Option<usize>,
	searches_since_floor:usize,
	noise_floor_stat:f64,
	epoch_counter:usize,
	events:Vec<Event>,
}

impl SvSelect {

	// Read-only getter methods
	pub fn in_flight(&self) -> Option<usize> { self.in_flight }
	pub fn noise_floor_stat(&self) -> f64 { self.noise_floor_stat }
	pub fn assigned_count(&self) -> usize { self.slots.iter().filter(|s| s.assigned).count() }

	pub fn drain_events(&mut self) -> Vec<Event> { std::mem::take(&mut self.events) }

	/// Fold one status report into the slot mirror.  A slot seen back at Idle
	/// releases its PRN into the queue with the reacquisition backoff applied;
	/// returns true when that happened so the caller can stop the slot's
	/// correlator, which otherwise keeps closing intervals against a dead
	/// assignment.
	pub fn observe(&mut self, status:&SlotStatus, now_ms:usize) -> bool {
		if status.slot >= self.slots.len() { return false; }
		let m = &mut self.slots[status.slot];
		if m.assigned && status.prn != m.prn { return false; }

		if m.assigned && status.state != m.state {
			self.events.push(Event::ChannelStateChanged{
				slot: status.slot, prn: m.prn, from: m.state, to: status.state });
		}
		let mut released = false;
		if m.assigned && status.state == ChannelState::Idle {
			m.assigned = false;
			released = true;
			let not_before_ms = now_ms + self.cfg.reacq_backoff_ms;
			self.queue.push_back((m.prn, not_before_ms));
			self.events.push(Event::ReacquireQueued{ prn: m.prn, not_before_ms });
		}
		let m = &mut self.slots[status.slot];
		m.state = status.state;
		m.cn0_dbhz = status.cn0_dbhz;
		released
	}

	/// Pick the PRN for the next acquisition run, or None when everything is
	/// either assigned or still backed off.  At most one search is in flight.
	pub fn next_search(&mut self, now_ms:usize) -> Option<usize> {
		if self.in_flight.is_some() { return None; }

		if self.cfg.noise_floor_interval > 0 && self.searches_since_floor >= self.cfg.noise_floor_interval {
			self.searches_since_floor = 0;
			self.in_flight = Some(NON_ALLOCATED_PRN);
			return self.in_flight;
		}

		for _ in 0..self.queue.len() {
			match self.queue.pop_front() {
				Some((prn, not_before_ms)) if not_before_ms <= now_ms => {
					self.searches_since_floor += 1;
					self.in_flight = Some(prn);
					return self.in_flight;
				},
				Some(entry) => self.queue.push_back(entry),
				None => break,
			}
		}
		None
	}

	/// Judge the best candidate an acquisition run produced and, if it holds
	/// up, hand its PRN a slot.
	pub fn candidate(&mut self, r:&AcquisitionResult, now_ms:usize) -> CandidateDisposition {
		self.in_flight = None;

		if r.prn == NON_ALLOCATED_PRN {
			let stat = r.test_statistic();
			self.noise_floor_stat = if self.noise_floor_stat > 0.0 {
				NOISE_FLOOR_SMOOTHING * self.noise_floor_stat + (1.0 - NOISE_FLOOR_SMOOTHING) * stat
			} else { stat };
			debug!("noise floor statistic now {:.2e}", self.noise_floor_stat);
			self.events.push(Event::NoiseFloorUpdated{ test_stat: self.noise_floor_stat });
			return CandidateDisposition::NoiseFloorUpdated;
		}

		// A PRN that already holds a slot never gets a second one; drop the
		// stale search outright instead of requeueing it
		if self.slots.iter().any(|m| m.assigned && m.prn == r.prn) {
			let reason = "already assigned";
			self.events.push(Event::CandidateRejected{ prn: r.prn, test_stat: r.test_statistic(), reason });
			return CandidateDisposition::Rejected{ prn: r.prn, reason };
		}

		let class = self.acq_cfg.class(self.cfg.signal_class);
		let mut threshold = class.test_stat_threshold;
		if self.noise_floor_stat > 0.0 {
			threshold = threshold.max(self.noise_floor_stat * self.acq_cfg.noise_floor_margin);
		}

		if !r.accepted(threshold, self.acq_cfg.second_peak_margin) {
			let reason = if r.test_statistic() < threshold { "below detection threshold" }
				else { "ambiguous code phase" };
			self.queue.push_back((r.prn, now_ms));
			self.events.push(Event::CandidateRejected{ prn: r.prn, test_stat: r.test_statistic(), reason });
			return CandidateDisposition::Rejected{ prn: r.prn, reason };
		}

		let slot = match self.find_slot() {
			Some(slot) => slot,
			None => {
				let reason = "no slot available";
				self.queue.push_back((r.prn, now_ms));
				self.events.push(Event::CandidateRejected{ prn: r.prn, test_stat: r.test_statistic(), reason });
				return CandidateDisposition::Rejected{ prn: r.prn, reason };
			},
		};

		if self.slots[slot].assigned {
			let evicted = self.slots[slot].prn;
			let not_before_ms = now_ms + self.cfg.reacq_backoff_ms;
			self.queue.push_back((evicted, not_before_ms));
			self.events.push(Event::ReacquireQueued{ prn: evicted, not_before_ms });
			info!("slot {}: PRN {} evicted for PRN {}", slot, evicted, r.prn);
		}

		let assign = Assign{
			prn: r.prn,
			doppler_hz: r.doppler_hz,
			boundary_sample_idx: r.boundary_sample_idx,
			epoch: self.epoch_counter,
		};
		self.epoch_counter += 1;
		self.slots[slot] = SlotMirror{ prn: r.prn, state: ChannelState::Acquired, cn0_dbhz: 0.0, assigned: true };
		self.events.push(Event::Assigned{
			slot, prn: r.prn, doppler_hz: r.doppler_hz, test_stat: r.test_statistic() });

		CandidateDisposition::Assigned{ slot, assign }
	}

	/// Put a PRN at the head of the queue, stopping its slot first if it has
	/// one.  Returns the slot to stop.
	pub fn force_reacquire(&mut self, prn:usize, now_ms:usize) -> Option<usize> {
		let occupied = self.slots.iter().position(|m| m.assigned && m.prn == prn);
		if let Some(slot) = occupied {
			self.slots[slot].assigned = false;
			self.slots[slot].state = ChannelState::Idle;
		}
		self.queue.retain(|(p, _)| *p != prn);
		self.queue.push_front((prn, now_ms));
		self.events.push(Event::ReacquireQueued{ prn, not_before_ms: now_ms });
		occupied
	}

	/// Free a slot on operator request.  Returns whether a stop is needed.
	pub fn drop_slot(&mut self, slot:usize, now_ms:usize) -> bool {
		if slot >= self.slots.len() || !self.slots[slot].assigned { return false; }
		let prn = self.slots[slot].prn;
		self.slots[slot].assigned = false;
		self.slots[slot].state = ChannelState::Idle;
		self.queue.push_back((prn, now_ms));
		true
	}

	fn find_slot(&self) -> Option<usize> {
		if let Some(slot) = self.slots.iter().position(|m| !m.assigned) {
			return Some(slot);
		}
		if !self.cfg.allow_reassignment { return None; }

		// Never bump a channel that already feeds navigation
		self.slots.iter().enumerate()
			.filter(|(_, m)| m.assigned && m.state != ChannelState::NavigateReady)
			.min_by(|(_, a), (_, b)| a.cn0_dbhz.partial_cmp(&b.cn0_dbhz).unwrap_or(std::cmp::Ordering::Equal))
			.map(|(slot, _)| slot)
	}

}

pub fn new_sv_select(cfg:&SvSelectConfig, acq_cfg:&AcquisitionConfig, num_slots:usize) -> SvSelect {
	let queue:VecDeque<(usize, usize)> = cfg.wanted_prns.iter().map(|&prn| (prn, 0)).collect();
	let slots:Vec<SlotMirror> = (0..num_slots)
		.map(|_| SlotMirror{ prn: 0, state: ChannelState::Idle, cn0_dbhz: 0.0, assigned: false })
		.collect();
	SvSelect{
		cfg: cfg.clone(),
		acq_cfg: acq_cfg.clone(),
		queue,
		slots,
		in_flight: None,
		searches_since_floor: 0,
		noise_floor_stat: 0.0,
		epoch_counter: 1,
		events: vec![],
	}
}

#[cfg(test)]
mod tests {

	use super::*;

	use crate::config::SignalClass;

	fn test_scheduler(wanted:Vec<usize>, num_slots:usize, allow_reassignment:bool, noise_floor_interval:usize) -> SvSelect {
		let cfg = SvSelectConfig{
			signal_class: SignalClass::Strong,
			reacq_backoff_ms: 2000,
			allow_reassignment,
			survey_interval_ms: 100,
			noise_floor_interval,
			wanted_prns: wanted,
		};
		new_sv_select(&cfg, &AcquisitionConfig::default(), num_slots)
	}

	fn result(prn:usize, test_stat:f64) -> AcquisitionResult {
		AcquisitionResult{
			prn,
			doppler_hz: 1500.0,
			doppler_step_hz: 500.0,
			code_phase: 400,
			boundary_sample_idx: 400,
			peak_power: test_stat * 1000.0,
			second_peak_power: test_stat * 1000.0 / 3.0,
			input_power_total: 1.0,
			mf_len: 1000,
			non_coherent_sums: 1,
		}
	}

	#[test]
	fn strong_candidates_fill_the_free_slots_in_queue_order() {
		let mut svs = test_scheduler(vec![1, 2, 3], 2, false, 0);

		assert_eq!(svs.next_search(0), Some(1));
		assert_eq!(svs.next_search(0), None);
		match svs.candidate(&result(1, 0.02), 0) {
			CandidateDisposition::Assigned{ slot, assign } => {
				assert_eq!(slot, 0);
				assert_eq!(assign.prn, 1);
				assert_eq!(assign.epoch, 1);
				assert_eq!(assign.boundary_sample_idx, 400);
			},
			other => panic!("expected assignment, got {:?}", other),
		}

		assert_eq!(svs.next_search(0), Some(2));
		match svs.candidate(&result(2, 0.02), 0) {
			CandidateDisposition::Assigned{ slot, assign } => {
				assert_eq!(slot, 1);
				assert_eq!(assign.epoch, 2);
			},
			other => panic!("expected assignment, got {:?}", other),
		}

		// Both slots taken, so the third PRN is turned away and requeued
		assert_eq!(svs.next_search(0), Some(3));
		match svs.candidate(&result(3, 0.02), 0) {
			CandidateDisposition::Rejected{ prn, reason } => {
				assert_eq!(prn, 3);
				assert_eq!(reason, "no slot available");
			},
			other => panic!("expected rejection, got {:?}", other),
		}
		assert_eq!(svs.next_search(0), Some(3));
	}

	#[test]
	fn weak_candidates_rotate_to_the_back_of_the_queue() {
		let mut svs = test_scheduler(vec![5, 9], 4, false, 0);

		assert_eq!(svs.next_search(0), Some(5));
		match svs.candidate(&result(5, 0.001), 0) {
			CandidateDisposition::Rejected{ reason, .. } => assert_eq!(reason, "below detection threshold"),
			other => panic!("expected rejection, got {:?}", other),
		}
		assert_eq!(svs.next_search(0), Some(9));
		match svs.candidate(&result(9, 0.001), 0) {
			CandidateDisposition::Rejected{ .. } => (),
			other => panic!("expected rejection, got {:?}", other),
		}
		assert_eq!(svs.next_search(0), Some(5));
		assert_eq!(svs.assigned_count(), 0);
	}

	#[test]
	fn side_peak_heavy_candidates_are_rejected() {
		let mut svs = test_scheduler(vec![5], 4, false, 0);
		assert_eq!(svs.next_search(0), Some(5));

		let mut r = result(5, 0.02);
		r.second_peak_power = r.peak_power / 1.2;
		match svs.candidate(&r, 0) {
			CandidateDisposition::Rejected{ reason, .. } => assert_eq!(reason, "ambiguous code phase"),
			other => panic!("expected rejection, got {:?}", other),
		}
	}

	#[test]
	fn noise_floor_searches_raise_the_acceptance_bar() {
		let mut svs = test_scheduler(vec![5, 9], 4, false, 2);

		assert_eq!(svs.next_search(0), Some(5));
		svs.candidate(&result(5, 0.001), 0);
		assert_eq!(svs.next_search(0), Some(9));
		svs.candidate(&result(9, 0.001), 0);

		// Two searches done, so the non-allocated PRN goes out next
		assert_eq!(svs.next_search(0), Some(NON_ALLOCATED_PRN));
		match svs.candidate(&result(NON_ALLOCATED_PRN, 0.006), 0) {
			CandidateDisposition::NoiseFloorUpdated => (),
			other => panic!("expected noise floor update, got {:?}", other),
		}
		assert!((svs.noise_floor_stat() - 0.006).abs() < 1e-12);

		// 0.009 clears the class threshold but not twice the measured floor
		assert_eq!(svs.next_search(0), Some(5));
		match svs.candidate(&result(5, 0.009), 0) {
			CandidateDisposition::Rejected{ reason, .. } => assert_eq!(reason, "below detection threshold"),
			other => panic!("expected rejection, got {:?}", other),
		}
		assert_eq!(svs.next_search(0), Some(9));
		match svs.candidate(&result(9, 0.02), 0) {
			CandidateDisposition::Assigned{ .. } => (),
			other => panic!("expected assignment, got {:?}", other),
		}
	}

	#[test]
	fn dropped_satellites_wait_out_the_backoff() {
		let mut svs = test_scheduler(vec![4], 2, false, 0);

		assert_eq!(svs.next_search(0), Some(4));
		let slot = match svs.candidate(&result(4, 0.02), 0) {
			CandidateDisposition::Assigned{ slot, .. } => slot,
			other => panic!("expected assignment, got {:?}", other),
		};

		svs.observe(&SlotStatus{ slot, prn: 4, state: ChannelState::Track, cn0_dbhz: 45.0 }, 5_000);
		assert_eq!(svs.next_search(5_000), None);

		svs.observe(&SlotStatus{ slot, prn: 4, state: ChannelState::Idle, cn0_dbhz: 20.0 }, 10_000);
		assert_eq!(svs.assigned_count(), 0);
		assert_eq!(svs.next_search(10_500), None);
		assert_eq!(svs.next_search(12_000), Some(4));

		let events = svs.drain_events();
		assert!(events.iter().any(|e| match e {
			Event::ReacquireQueued{ prn: 4, not_before_ms: 12_000 } => true,
			_ => false,
		}));
		assert!(events.iter().any(|e| match e {
			Event::ChannelStateChanged{ prn: 4, to: ChannelState::Idle, .. } => true,
			_ => false,
		}));
	}

	#[test]
	fn reassignment_takes_the_weakest_slot_but_spares_navigation() {
		let mut svs = test_scheduler(vec![1, 2, 3], 2, true, 0);

		svs.next_search(0);
		svs.candidate(&result(1, 0.02), 0);
		svs.next_search(0);
		svs.candidate(&result(2, 0.02), 0);

		// Slot 0 is weaker but already navigating; slot 1 gives way
		svs.observe(&SlotStatus{ slot: 0, prn: 1, state: ChannelState::NavigateReady, cn0_dbhz: 33.0 }, 1_000);
		svs.observe(&SlotStatus{ slot: 1, prn: 2, state: ChannelState::Track, cn0_dbhz: 41.0 }, 1_000);

		svs.next_search(1_000);
		match svs.candidate(&result(3, 0.02), 1_000) {
			CandidateDisposition::Assigned{ slot, assign } => {
				assert_eq!(slot, 1);
				assert_eq!(assign.prn, 3);
			},
			other => panic!("expected assignment, got {:?}", other),
		}
		assert_eq!(svs.next_search(1_000), None);
		assert_eq!(svs.next_search(3_000), Some(2));
	}

	#[test]
	fn a_satellite_never_holds_two_slots() {
		// A duplicate in the wanted list means two searches for the same PRN
		let mut svs = test_scheduler(vec![8, 8], 3, false, 0);

		assert_eq!(svs.next_search(0), Some(8));
		match svs.candidate(&result(8, 0.02), 0) {
			CandidateDisposition::Assigned{ slot, .. } => assert_eq!(slot, 0),
			other => panic!("expected assignment, got {:?}", other),
		}

		// The second search comes back just as strong, but the satellite
		// already holds a slot, so it is dropped rather than requeued
		assert_eq!(svs.next_search(0), Some(8));
		match svs.candidate(&result(8, 0.03), 0) {
			CandidateDisposition::Rejected{ prn, reason } => {
				assert_eq!(prn, 8);
				assert_eq!(reason, "already assigned");
			},
			other => panic!("expected rejection, got {:?}", other),
		}
		assert_eq!(svs.assigned_count(), 1);
		assert_eq!(svs.next_search(0), None);
	}

	#[test]
	fn loss_of_lock_reports_a_slot_to_stop() {
		let mut svs = test_scheduler(vec![4], 2, false, 0);

		svs.next_search(0);
		let slot = match svs.candidate(&result(4, 0.02), 0) {
			CandidateDisposition::Assigned{ slot, .. } => slot,
			other => panic!("expected assignment, got {:?}", other),
		};

		// Progress reports leave the correlator alone
		assert!(!svs.observe(&SlotStatus{ slot, prn: 4, state: ChannelState::Track, cn0_dbhz: 44.0 }, 1_000));
		// A stale report naming a previous occupant is ignored
		assert!(!svs.observe(&SlotStatus{ slot, prn: 9, state: ChannelState::Idle, cn0_dbhz: 0.0 }, 1_000));
		assert_eq!(svs.assigned_count(), 1);

		// Loss of lock frees the slot and asks for its correlator to stop
		assert!(svs.observe(&SlotStatus{ slot, prn: 4, state: ChannelState::Idle, cn0_dbhz: 18.0 }, 2_000));
		assert_eq!(svs.assigned_count(), 0);

		// The slot is already free; a repeat report stops nothing
		assert!(!svs.observe(&SlotStatus{ slot, prn: 4, state: ChannelState::Idle, cn0_dbhz: 18.0 }, 2_100));
	}

	#[test]
	fn force_reacquire_jumps_the_queue_and_stops_the_slot() {
		let mut svs = test_scheduler(vec![6, 7], 2, false, 0);

		svs.next_search(0);
		svs.candidate(&result(6, 0.02), 0);
		assert_eq!(svs.force_reacquire(6, 100), Some(0));
		assert_eq!(svs.assigned_count(), 0);

		// PRN 6 searches again immediately, ahead of PRN 7
		assert_eq!(svs.next_search(100), Some(6));
	}

}
