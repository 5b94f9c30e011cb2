
pub mod links;

use std::thread::{self, JoinHandle};

use log::{debug, warn};

/// Spawns a named engine task, applying the configured SCHED_FIFO priority
/// from inside the new thread.  Missing privileges degrade to a warning so
/// file post-processing and tests run unprivileged.
pub fn spawn_task<F, T>(name:&str, priority:i32, realtime:bool, f:F) -> std::io::Result<JoinHandle<T>>
where F: FnOnce() -> T + Send + 'static,
      T: Send + 'static {

	let task_name = name.to_string();
	thread::Builder::new().name(task_name.clone()).spawn(move || {
		if realtime {
			match set_fifo_priority(priority) {
				Ok(())  => debug!("{}: running at SCHED_FIFO priority {}", task_name, priority),
				Err(e)  => warn!("{}: running without SCHED_FIFO priority {}: {}", task_name, priority, e),
			}
		}
		f()
	})
}

#[cfg(target_os = "linux")]
fn set_fifo_priority(priority:i32) -> Result<(), String> {
	unsafe {
		let mut param:libc::sched_param = std::mem::zeroed();
		param.sched_priority = priority;
		if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) != 0 {
			return Err(std::io::Error::last_os_error().to_string());
		}
	}
	Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_fifo_priority(_priority:i32) -> Result<(), String> {
	Err("real-time scheduling not supported on this platform".to_string())
}

/// Locks current and future pages so the sample path never takes a major fault
#[cfg(target_os = "linux")]
pub fn lock_all_memory() -> Result<(), String> {
	unsafe {
		if libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) != 0 {
			return Err(std::io::Error::last_os_error().to_string());
		}
	}
	Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn lock_all_memory() -> Result<(), String> {
	Err("memory locking not supported on this platform".to_string())
}
