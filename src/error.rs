use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("malformed record: {0}")]
	Format(#[from] serde_json::Error),
	#[error("invalid vault name: {0:?}")]
	InvalidName(String),
	#[error("vault {0:?} already exists")]
	VaultExists(String),
	#[error("vault {0:?} not found")]
	VaultNotFound(String),
	#[error("transport error: {0}")]
	Transport(String),
	#[error("crypto error: {0}")]
	Crypto(String),
}

pub type Result<T> = std::result::Result<T, Error>;
