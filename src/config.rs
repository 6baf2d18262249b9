use crate::transport::lan::LanConfig;
use std::{path::PathBuf, time::Duration};

pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(60);
pub const ACK_GRACE: Duration = Duration::from_millis(500);
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

// timing knobs of the share/receive protocol
#[derive(Clone, Debug)]
pub struct SessionConfig {
	// how long a receiver waits for a valid share after joining
	pub receive_timeout: Duration,
	// lets the ack reach the wire before the receiver tears down
	pub ack_grace: Duration,
	// bound on in-flight writes when a sharer is stopped
	pub shutdown_grace: Duration,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			receive_timeout: RECEIVE_TIMEOUT,
			ack_grace: ACK_GRACE,
			shutdown_grace: SHUTDOWN_GRACE,
		}
	}
}

#[derive(Clone, Debug)]
pub struct Config {
	pub data_dir: PathBuf,
	pub session: SessionConfig,
	pub lan: LanConfig,
}

// ~/.local/share/vaultshare and the platform equivalents, cwd as a last resort
pub fn default_data_dir() -> PathBuf {
	dirs::data_dir()
		.unwrap_or_else(|| PathBuf::from("."))
		.join("vaultshare")
}

impl Default for Config {
	fn default() -> Self {
		Self {
			data_dir: default_data_dir(),
			session: SessionConfig::default(),
			lan: LanConfig::default(),
		}
	}
}
