use crate::{
	error::{Error, Result},
	topic::Topic,
};
use aes_gcm::{
	aead::{Aead, KeyInit},
	Aes256Gcm, Nonce,
};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;

const KEY_SIZE: usize = 32;
const IV_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

// what sealing adds to every message
pub(crate) const SEAL_OVERHEAD: usize = IV_SIZE + TAG_SIZE;

const CHANNEL_LABEL: &[u8] = b"vaultshare/channel/v1";
const BEACON_LABEL: &[u8] = b"vaultshare/beacon/v1";

fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
	let mut mac =
		<Hmac<Sha256> as Mac>::new_from_slice(key).expect("hmac accepts keys of any length");
	mac.update(msg);

	mac.finalize().into_bytes().into()
}

// what announcers broadcast instead of the topic itself
pub(crate) fn beacon_tag(topic: &Topic) -> [u8; 32] {
	hmac_sha256(topic.as_bytes(), BEACON_LABEL)
}

// aes-256-gcm over every frame of a connection, keyed off the topic; frame = iv || ct
#[derive(Clone)]
pub(crate) struct ChannelKey {
	bytes: [u8; KEY_SIZE],
}

impl ChannelKey {
	pub fn derive(topic: &Topic) -> Self {
		Self {
			bytes: hmac_sha256(topic.as_bytes(), CHANNEL_LABEL),
		}
	}

	fn cipher(&self) -> Result<Aes256Gcm> {
		Aes256Gcm::new_from_slice(&self.bytes).map_err(|e| Error::Crypto(e.to_string()))
	}

	pub fn seal(&self, pt: &[u8]) -> Result<Vec<u8>> {
		let mut iv = [0u8; IV_SIZE];
		OsRng.fill_bytes(&mut iv);

		let ct = self
			.cipher()?
			.encrypt(Nonce::from_slice(&iv), pt)
			.map_err(|_| Error::Crypto("failed to seal frame".to_string()))?;

		Ok([iv.as_slice(), ct.as_slice()].concat())
	}

	pub fn open(&self, frame: &[u8]) -> Result<Vec<u8>> {
		if frame.len() < IV_SIZE {
			return Err(Error::Crypto("frame too short".to_string()));
		}

		let (iv, ct) = frame.split_at(IV_SIZE);

		self.cipher()?
			.decrypt(Nonce::from_slice(iv), ct)
			.map_err(|_| Error::Crypto("failed to open frame".to_string()))
	}
}
