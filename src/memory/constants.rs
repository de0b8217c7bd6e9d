/// Default low-memory trigger: fire when less than this fraction of memory is available
pub const DEFAULT_MEMORY_LOW_TRIGGER: f64 = 0.20;

/// Default interval between sampling cycles (milliseconds)
pub const DEFAULT_UPDATE_INTERVAL_MS: u64 = 1000;

/// Prefix of per-instance diagnostic log files
pub const DIAGNOSTIC_LOG_PREFIX: &str = "memwatch";

/// Bytes per kilobyte as reported by `/proc`
pub const KIB: u64 = 1024;
