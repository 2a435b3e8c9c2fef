//! Persistence: binary format, file I/O, and deferred sync scheduling.

pub(crate) mod fileio;
pub(crate) mod format;
pub(crate) mod scheduler;

/// Name of the persistent data file.
pub const DATA_FILE_NAME: &str = "basalt.dat";

/// Name of the scratch file renamed onto the data file on a successful
/// sync.
pub const SYNC_FILE_NAME: &str = "basalt.sync";
