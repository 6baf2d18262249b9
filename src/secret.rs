use crate::base32;
use rand::rngs::OsRng;
use rand::RngCore;

// 160 bits, the conventional otp key size
pub const SECRET_SIZE: usize = 20;

// a fresh base32 (padded) secret from the os csprng
pub fn generate() -> String {
	let mut bytes = [0u8; SECRET_SIZE];
	OsRng.fill_bytes(&mut bytes);

	base32::encode(&bytes)
}
