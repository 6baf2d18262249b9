use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};

// versioned; changing it splits the rendezvous space
const TOPIC_SALT: &[u8] = b"vaultshare/topic/v1:";
pub const TOPIC_SIZE: usize = 32;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ParseError {
	#[error("topic is not valid hex")]
	BadHex,
	#[error("expected 32 bytes, got {0}")]
	BadLength(usize),
}

// a rendezvous id two peers derive (or are handed) to find each other
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic {
	bytes: [u8; TOPIC_SIZE],
}

impl Topic {
	pub fn new(bytes: [u8; TOPIC_SIZE]) -> Self {
		Self { bytes }
	}

	pub fn derive(name: &str) -> Self {
		let mut hasher = Sha256::new();
		hasher.update(TOPIC_SALT);
		hasher.update(name.as_bytes());

		Self::new(hasher.finalize().into())
	}

	pub fn from_hex(hex_str: &str) -> Result<Self, ParseError> {
		let bytes = hex::decode(hex_str.trim()).map_err(|_| ParseError::BadHex)?;
		let len = bytes.len();
		let bytes: [u8; TOPIC_SIZE] = bytes.try_into().map_err(|_| ParseError::BadLength(len))?;

		Ok(Self::new(bytes))
	}

	// an exact 64 char hex key is taken as is, anything else is treated as a vault name
	pub fn resolve(input: &str) -> Self {
		Self::from_hex(input).unwrap_or_else(|_| Self::derive(input))
	}

	pub fn as_bytes(&self) -> &[u8; TOPIC_SIZE] {
		&self.bytes
	}

	pub fn to_hex(&self) -> String {
		hex::encode(self.bytes)
	}
}

impl FromStr for Topic {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::from_hex(s)
	}
}

impl fmt::Display for Topic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_hex())
	}
}

// short form, enough to correlate log lines
impl fmt::Debug for Topic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Topic({}…)", hex::encode(&self.bytes[..4]))
	}
}
