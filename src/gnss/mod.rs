
pub mod constants;

/// C/A code generation for the GPS L1 signal
pub mod signal_modulation;

/// Code-phase by Doppler search for signals not yet being tracked
pub mod acquisition;

/// Early/prompt/late accumulation against the local replica
pub mod correlator;

/// Discriminators, loop filters and lock detectors closing the tracking loops
pub mod tracking;

/// Per-satellite lifecycle state machine
pub mod channel;

/// Satellite-to-channel assignment scheduling
pub mod sv_select;
