
use std::fs::File;
use std::path::Path;

use serde::{Serialize, Deserialize};
use thiserror::Error;

pub const NUM_CODES:usize         = 32;		// Number of CDMA codes
pub const NON_ALLOCATED_PRN:usize = 36;		// Searched to estimate the false-alarm floor
pub const MAX_CHANNELS:usize      = 12;
pub const CPU_CORES:usize         = 2;
pub const MEASUREMENT_INT_MS:usize  = 100;
pub const MEASUREMENT_DELAY:usize   = 10;	// Measurements marked navigate before the flag goes valid
pub const CORR_SPACING_CHIPS:f64    = 0.5;
pub const MAX_DOPPLER_HZ:f64        = 7000.0;
pub const PLL_BN_HZ:f64 = 15.0;
pub const FLL_BN_HZ:f64 = 10.0;
pub const DLL_BN_HZ:f64 = 2.0;
pub const AGC_BITS:usize = 5;
pub const AGC_LOW:usize  = 4;
pub const AGC_HIGH:usize = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("sample rate {0:.1} [sps] is below the 1.023 [Mcps] chip rate")]
	SampleRateTooLow(f64),
	#[error("block size must be nonzero")]
	ZeroBlockSize,
	#[error("channel count must be in 1..={}, got {0}", NUM_CODES)]
	BadChannelCount(usize),
	#[error("{channels} channels do not divide evenly across {cores} correlator cores")]
	UnevenChannelPartition{ channels:usize, cores:usize },
	#[error("this engine drives a single antenna, got {0}")]
	UnsupportedAntennaCount(usize),
	#[error("AGC bit depths must satisfy 1 <= low <= target <= high <= 16, got {low}/{target}/{high}")]
	BadAgcBits{ low:usize, target:usize, high:usize },
	#[error("doppler search range [{min:.1}, {max:.1}] [Hz] is empty or exceeds +/-{limit:.1} [Hz]")]
	BadDopplerRange{ min:f64, max:f64, limit:f64 },
	#[error("doppler step must be positive, got {0:.1} [Hz]")]
	BadDopplerStep(f64),
	#[error("test statistic thresholds and margins must be positive, margins at least 1.0")]
	BadDetectionPolicy,
	#[error("loop bandwidth must be positive, got {0:.2} [Hz]")]
	BadLoopBandwidth(f64),
	#[error("correlator spacing must be in (0.0, 1.0] chips, got {0:.2}")]
	BadCorrelatorSpacing(f64),
	#[error("{0} must be nonzero")]
	ZeroCount(&'static str),
	#[error("task priority {name} = {value} outside 1..=99")]
	BadPriority{ name:&'static str, value:i32 },
	#[error("task priorities must order ingest > correlator > tracking > sv_select > acquisition")]
	PriorityOrder,
	#[error("wanted PRN list must name distinct PRNs in 1..={}", NUM_CODES)]
	BadPrnList,
	#[error("unable to read configuration file: {0}")]
	Io(#[from] std::io::Error),
	#[error("unable to parse configuration file: {0}")]
	Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SampleFormat {
	I16Complex,
	I8Complex,
	I16Real,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AgcConfig {
	pub target_bits:usize,
	pub low_bits:usize,
	pub high_bits:usize,
}

impl Default for AgcConfig {
	fn default() -> Self { Self{ target_bits: AGC_BITS, low_bits: AGC_LOW, high_bits: AGC_HIGH } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
	pub fs_sps:f64,
	#[serde(default = "default_format")]
	pub format:SampleFormat,
	/// Center frequency of a real-sampled IF stream; zero for complex baseband
	#[serde(default)]
	pub if_hz:f64,
	#[serde(default = "default_block_size")]
	pub block_size:usize,
	#[serde(default = "default_antennas")]
	pub antennas:usize,
	#[serde(default)]
	pub agc:AgcConfig,
}

fn default_format() -> SampleFormat { SampleFormat::I16Complex }
fn default_block_size() -> usize { crate::io::BUFFER_SIZE }
fn default_antennas() -> usize { 1 }

impl SourceConfig {
	pub fn new(fs_sps:f64) -> Self {
		Self{ fs_sps, format: default_format(), if_hz: 0.0, block_size: default_block_size(),
			antennas: 1, agc: AgcConfig::default() }
	}

	/// Nominal number of samples in one 1 [ms] code period
	pub fn samples_per_code(&self) -> usize { (self.fs_sps / 1000.0) as usize }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SignalClass {
	Strong,
	Medium,
	Weak,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DetectionClass {
	pub test_stat_threshold:f64,
	pub non_coherent_sums:usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
	pub doppler_min_hz:f64,
	pub doppler_max_hz:f64,
	pub doppler_step_hz:f64,
	pub strong:DetectionClass,
	pub medium:DetectionClass,
	pub weak:DetectionClass,
	/// Main peak over best peak more than one chip away
	pub second_peak_margin:f64,
	/// Main peak over the PRN-36 noise floor estimate
	pub noise_floor_margin:f64,
}

impl Default for AcquisitionConfig {
	fn default() -> Self {
		Self{
			doppler_min_hz: -MAX_DOPPLER_HZ,
			doppler_max_hz:  MAX_DOPPLER_HZ,
			doppler_step_hz: 500.0,
			strong: DetectionClass{ test_stat_threshold: 0.008, non_coherent_sums: 1  },
			medium: DetectionClass{ test_stat_threshold: 0.005, non_coherent_sums: 4  },
			weak:   DetectionClass{ test_stat_threshold: 0.003, non_coherent_sums: 16 },
			second_peak_margin: 1.5,
			noise_floor_margin: 2.0,
		}
	}
}

impl AcquisitionConfig {
	pub fn class(&self, class:SignalClass) -> DetectionClass {
		match class {
			SignalClass::Strong => self.strong,
			SignalClass::Medium => self.medium,
			SignalClass::Weak   => self.weak,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
	pub pll_bw_hz:f64,
	pub fll_bw_hz:f64,
	pub dll_bw_hz:f64,
	pub carrier_aiding:bool,
	pub correlator_spacing_chips:f64,
	/// Consecutive locked intervals required to leave pull-in
	pub pull_in_locks:usize,
	/// Pull-in intervals allowed before the channel gives up
	pub pull_in_limit_ms:usize,
	pub cn0_lock_dbhz:f64,
	pub cn0_drop_dbhz:f64,
	pub carrier_lock_enter:f64,
	pub carrier_lock_exit:f64,
	pub lock_fail_limit:usize,
	pub measurement_interval_ms:usize,
	pub navigate_ready_delay:usize,
}

impl Default for TrackingConfig {
	fn default() -> Self {
		Self{
			pll_bw_hz: PLL_BN_HZ,
			fll_bw_hz: FLL_BN_HZ,
			dll_bw_hz: DLL_BN_HZ,
			carrier_aiding: true,
			correlator_spacing_chips: CORR_SPACING_CHIPS,
			pull_in_locks: 20,
			pull_in_limit_ms: 1500,
			cn0_lock_dbhz: 31.0,
			cn0_drop_dbhz: 28.0,
			carrier_lock_enter: 0.75,
			carrier_lock_exit: 0.55,
			lock_fail_limit: 50,
			measurement_interval_ms: MEASUREMENT_INT_MS,
			navigate_ready_delay: MEASUREMENT_DELAY,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvSelectConfig {
	pub signal_class:SignalClass,
	pub reacq_backoff_ms:usize,
	/// Give a strong candidate the weakest occupied slot when none are free
	pub allow_reassignment:bool,
	/// Scheduler housekeeping cadence
	pub survey_interval_ms:usize,
	/// Searches between PRN-36 noise floor refreshes; zero disables
	pub noise_floor_interval:usize,
	#[serde(default = "default_wanted_prns")]
	pub wanted_prns:Vec<usize>,
}

fn default_wanted_prns() -> Vec<usize> { (1..=NUM_CODES).collect() }

impl Default for SvSelectConfig {
	fn default() -> Self {
		Self{
			signal_class: SignalClass::Strong,
			reacq_backoff_ms: 2000,
			allow_reassignment: false,
			survey_interval_ms: MEASUREMENT_INT_MS,
			noise_floor_interval: 16,
			wanted_prns: default_wanted_prns(),
		}
	}
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TaskPriorities {
	pub sample_ingest:i32,
	pub correlator:i32,
	pub ephemeris:i32,
	pub pvt:i32,
	pub tracking:i32,
	pub command:i32,
	pub telemetry:i32,
	pub sv_select:i32,
	pub acquisition:i32,
}

impl Default for TaskPriorities {
	fn default() -> Self {
		Self{
			sample_ingest: 99,
			correlator:    98,
			ephemeris:     97,
			pvt:           96,
			tracking:      95,
			command:       93,
			telemetry:     92,
			sv_select:     91,
			acquisition:   70,
		}
	}
}

impl TaskPriorities {
	pub fn named(&self) -> [(&'static str, i32); 9] {
		[("sample_ingest", self.sample_ingest), ("correlator", self.correlator),
		 ("ephemeris", self.ephemeris), ("pvt", self.pvt), ("tracking", self.tracking),
		 ("command", self.command), ("telemetry", self.telemetry),
		 ("sv_select", self.sv_select), ("acquisition", self.acquisition)]
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricConfig {
	/// Apply SCHED_FIFO priorities; disable for file post-processing
	pub realtime:bool,
	pub lock_memory:bool,
	#[serde(default)]
	pub priorities:TaskPriorities,
}

impl Default for FabricConfig {
	fn default() -> Self { Self{ realtime: true, lock_memory: false, priorities: TaskPriorities::default() } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
	pub source:SourceConfig,
	#[serde(default = "default_max_channels")]
	pub max_channels:usize,
	#[serde(default = "default_cpu_cores")]
	pub cpu_cores:usize,
	#[serde(default)]
	pub acquisition:AcquisitionConfig,
	#[serde(default)]
	pub tracking:TrackingConfig,
	#[serde(default)]
	pub sv_select:SvSelectConfig,
	#[serde(default)]
	pub fabric:FabricConfig,
}

fn default_max_channels() -> usize { MAX_CHANNELS }
fn default_cpu_cores() -> usize { CPU_CORES }

impl ReceiverConfig {

	pub fn new(fs_sps:f64) -> Self {
		Self{
			source: SourceConfig::new(fs_sps),
			max_channels: MAX_CHANNELS,
			cpu_cores: CPU_CORES,
			acquisition: AcquisitionConfig::default(),
			tracking: TrackingConfig::default(),
			sv_select: SvSelectConfig::default(),
			fabric: FabricConfig::default(),
		}
	}

	pub fn from_file<P: AsRef<Path>>(path:P) -> Result<Self, ConfigError> {
		let file = File::open(path)?;
		let cfg:Self = serde_json::from_reader(file)?;
		cfg.validate()?;
		Ok(cfg)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if !(self.source.fs_sps.is_finite() && self.source.fs_sps >= 1.023e6) {
			return Err(ConfigError::SampleRateTooLow(self.source.fs_sps));
		}
		if self.source.block_size == 0 { return Err(ConfigError::ZeroBlockSize); }
		if self.source.antennas != 1 { return Err(ConfigError::UnsupportedAntennaCount(self.source.antennas)); }

		if self.max_channels == 0 || self.max_channels > NUM_CODES {
			return Err(ConfigError::BadChannelCount(self.max_channels));
		}
		if self.cpu_cores == 0 || self.max_channels % self.cpu_cores != 0 {
			return Err(ConfigError::UnevenChannelPartition{ channels: self.max_channels, cores: self.cpu_cores });
		}

		let agc = &self.source.agc;
		if agc.low_bits < 1 || agc.low_bits > agc.target_bits || agc.target_bits > agc.high_bits || agc.high_bits > 16 {
			return Err(ConfigError::BadAgcBits{ low: agc.low_bits, target: agc.target_bits, high: agc.high_bits });
		}

		let acq = &self.acquisition;
		let doppler_limit:f64 = 50_000.0;
		if acq.doppler_min_hz >= acq.doppler_max_hz
			|| acq.doppler_min_hz < -doppler_limit || acq.doppler_max_hz > doppler_limit {
			return Err(ConfigError::BadDopplerRange{ min: acq.doppler_min_hz, max: acq.doppler_max_hz, limit: doppler_limit });
		}
		if !(acq.doppler_step_hz > 0.0) { return Err(ConfigError::BadDopplerStep(acq.doppler_step_hz)); }
		for class in &[acq.strong, acq.medium, acq.weak] {
			if !(class.test_stat_threshold > 0.0) || class.non_coherent_sums == 0 {
				return Err(ConfigError::BadDetectionPolicy);
			}
		}
		if acq.second_peak_margin < 1.0 || acq.noise_floor_margin < 1.0 {
			return Err(ConfigError::BadDetectionPolicy);
		}

		let trk = &self.tracking;
		for bw in &[trk.pll_bw_hz, trk.fll_bw_hz, trk.dll_bw_hz] {
			if !(*bw > 0.0) { return Err(ConfigError::BadLoopBandwidth(*bw)); }
		}
		if !(trk.correlator_spacing_chips > 0.0 && trk.correlator_spacing_chips <= 1.0) {
			return Err(ConfigError::BadCorrelatorSpacing(trk.correlator_spacing_chips));
		}
		if trk.pull_in_locks == 0        { return Err(ConfigError::ZeroCount("pull_in_locks")); }
		if trk.pull_in_limit_ms == 0     { return Err(ConfigError::ZeroCount("pull_in_limit_ms")); }
		if trk.lock_fail_limit == 0      { return Err(ConfigError::ZeroCount("lock_fail_limit")); }
		if trk.measurement_interval_ms == 0 { return Err(ConfigError::ZeroCount("measurement_interval_ms")); }
		if trk.navigate_ready_delay == 0 { return Err(ConfigError::ZeroCount("navigate_ready_delay")); }

		if self.sv_select.survey_interval_ms == 0 { return Err(ConfigError::ZeroCount("survey_interval_ms")); }
		if self.sv_select.wanted_prns.is_empty() { return Err(ConfigError::BadPrnList); }
		let mut seen = [false; NUM_CODES + 1];
		for prn in &self.sv_select.wanted_prns {
			if *prn == 0 || *prn > NUM_CODES || seen[*prn] { return Err(ConfigError::BadPrnList); }
			seen[*prn] = true;
		}

		let p = &self.fabric.priorities;
		for &(name, value) in p.named().iter() {
			if value < 1 || value > 99 { return Err(ConfigError::BadPriority{ name, value }); }
		}
		if !(p.sample_ingest > p.correlator && p.correlator > p.tracking
			&& p.tracking > p.sv_select && p.sv_select > p.acquisition) {
			return Err(ConfigError::PriorityOrder);
		}

		Ok(())
	}

}
