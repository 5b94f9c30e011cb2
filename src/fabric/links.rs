
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use log::debug;

/// Bounded single-producer single-consumer link whose sends block on a full
/// queue.  Used on the paths where skipping an interval's data would corrupt
/// tracking state.
pub fn blocking_link<T>(capacity:usize) -> (Sender<T>, Receiver<T>) {
	bounded(capacity)
}

/// Write side of a link that must never stall its producer.  A full queue
/// drops the new message and counts it; a disconnected consumer is treated
/// as gone, which only happens at shutdown.
pub struct NonBlockingSender<T> {
	name: &'static str,
	tx: Sender<T>,
	dropped: usize,
}

impl<T> NonBlockingSender<T> {

	pub fn send(&mut self, msg:T) -> bool {
		match self.tx.try_send(msg) {
			Ok(()) => true,
			Err(TrySendError::Full(_)) => {
				self.dropped += 1;
				if self.dropped.is_power_of_two() {
					debug!("{}: consumer backlog, {} messages dropped so far", self.name, self.dropped);
				}
				false
			},
			Err(TrySendError::Disconnected(_)) => false,
		}
	}

	/// Backpressure variant for paced file runs, where stalling the producer
	/// is preferable to losing samples
	pub fn send_blocking(&mut self, msg:T) -> bool {
		self.tx.send(msg).is_ok()
	}

	pub fn dropped(&self) -> usize { self.dropped }

}

pub fn nonblocking_link<T>(name:&'static str, capacity:usize) -> (NonBlockingSender<T>, Receiver<T>) {
	let (tx, rx) = bounded(capacity);
	(NonBlockingSender{ name, tx, dropped: 0 }, rx)
}
