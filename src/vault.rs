use crate::{error::Error, topic::Topic, totp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
#[serde(from = "StoredEntry")]
pub struct Entry {
	pub label: String,
	issuer: String,
	// base32, kept verbatim: decoding is lenient and not invertible
	pub secret: String,
}

// an entry as found in records: older or foreign ones may omit the issuer or leave it empty
#[derive(Deserialize)]
struct StoredEntry {
	label: String,
	#[serde(default)]
	issuer: String,
	secret: String,
}

impl From<StoredEntry> for Entry {
	fn from(stored: StoredEntry) -> Self {
		Entry::new(&stored.label, Some(stored.issuer.as_str()), &stored.secret)
	}
}

impl Entry {
	// an empty or missing issuer means "same as label"
	pub fn new(label: &str, issuer: Option<&str>, secret: &str) -> Self {
		let issuer = issuer.filter(|i| !i.is_empty()).unwrap_or(label);

		Self {
			label: label.to_string(),
			issuer: issuer.to_string(),
			secret: secret.to_string(),
		}
	}

	pub fn issuer(&self) -> &str {
		&self.issuer
	}

	pub fn code_at(&self, at_millis: u64) -> String {
		totp::code(&self.secret, at_millis)
	}
}

// what a display loop renders for a single entry
#[derive(Debug, PartialEq)]
pub struct Code<'a> {
	pub entry: &'a Entry,
	pub code: String,
	pub remaining: u64,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Vault {
	pub name: String,
	pub created: DateTime<Utc>,
	// insertion order is display order
	pub entries: Vec<Entry>,
}

// names end up as file names, so keep them to a single path component
pub fn validate_name(name: &str) -> Result<(), Error> {
	let bad = name.trim().is_empty()
		|| name.starts_with('.')
		|| name.contains(['/', '\\', '\0']);

	if bad {
		Err(Error::InvalidName(name.to_string()))
	} else {
		Ok(())
	}
}

impl Vault {
	pub fn new(name: &str) -> Result<Self, Error> {
		validate_name(name)?;

		Ok(Self {
			name: name.to_string(),
			created: Utc::now(),
			entries: Vec::new(),
		})
	}

	pub fn validate(&self) -> Result<(), Error> {
		validate_name(&self.name)
	}

	pub fn topic(&self) -> Topic {
		Topic::derive(&self.name)
	}

	pub fn add(&mut self, entry: Entry) {
		self.entries.push(entry);
	}

	// removes the first entry with the given label
	pub fn remove(&mut self, label: &str) -> Option<Entry> {
		let idx = self.entries.iter().position(|e| e.label == label)?;

		Some(self.entries.remove(idx))
	}

	pub fn find(&self, label: &str) -> Option<&Entry> {
		self.entries.iter().find(|e| e.label == label)
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn codes_at(&self, at_millis: u64) -> Vec<Code<'_>> {
		let remaining = totp::seconds_remaining(at_millis);

		self.entries
			.iter()
			.map(|entry| Code {
				entry,
				code: entry.code_at(at_millis),
				remaining,
			})
			.collect()
	}
}
