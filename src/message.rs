use crate::{totp::now_millis, vault::Vault};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;

// one of these per transport message, json encoded
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
#[serde(tag = "type")]
pub enum Message {
	#[serde(rename = "vault_share")]
	Share { v: u32, vault: Vault, ts: u64 },
	#[serde(rename = "vault_ack")]
	Ack { ts: u64 },
}

// why a payload is not something a session should act upon
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum Rejected {
	#[error("malformed payload: {0}")]
	Malformed(String),
	#[error("unsupported protocol version {0}")]
	Version(u32),
	#[error("vault name {0:?} is not acceptable")]
	InvalidVault(String),
}

impl Message {
	pub fn share(vault: &Vault) -> Self {
		Self::Share {
			v: PROTOCOL_VERSION,
			vault: vault.clone(),
			ts: now_millis(),
		}
	}

	pub fn ack() -> Self {
		Self::Ack { ts: now_millis() }
	}

	pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
		serde_json::to_vec(self)
	}

	// shares are checked for version and a usable vault name, acks are taken as is
	pub fn parse(bytes: &[u8]) -> Result<Self, Rejected> {
		let msg: Self =
			serde_json::from_slice(bytes).map_err(|e| Rejected::Malformed(e.to_string()))?;

		if let Self::Share { v, vault, .. } = &msg {
			if *v != PROTOCOL_VERSION {
				return Err(Rejected::Version(*v));
			}

			vault
				.validate()
				.map_err(|_| Rejected::InvalidVault(vault.name.clone()))?;
		}

		Ok(msg)
	}
}
