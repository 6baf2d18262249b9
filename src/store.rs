use crate::{
	error::{Error, Result},
	vault::{validate_name, Vault},
};
use std::{
	io::ErrorKind,
	path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, warn};

const SUFFIX: &str = ".vault.json";

// one json record per vault, always overwritten as a whole
pub struct VaultStore {
	dir: PathBuf,
}

impl VaultStore {
	pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
		let dir = dir.into();
		fs::create_dir_all(&dir).await?;

		Ok(Self { dir })
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path_for(&self, name: &str) -> Result<PathBuf> {
		validate_name(name)?;

		Ok(self.dir.join(format!("{}{}", name, SUFFIX)))
	}

	pub async fn exists(&self, name: &str) -> Result<bool> {
		Ok(fs::try_exists(self.path_for(name)?).await?)
	}

	// a missing or unreadable record is reported as absent; only real io failures are errors
	pub async fn load(&self, name: &str) -> Result<Option<Vault>> {
		let path = self.path_for(name)?;

		let bytes = match fs::read(&path).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(e.into()),
		};

		match serde_json::from_slice::<Vault>(&bytes) {
			Ok(vault) => Ok(Some(vault)),
			Err(e) => {
				warn!(path = %path.display(), error = %e, "ignoring malformed vault record");
				Ok(None)
			}
		}
	}

	pub async fn load_existing(&self, name: &str) -> Result<Vault> {
		self.load(name)
			.await?
			.ok_or_else(|| Error::VaultNotFound(name.to_string()))
	}

	// write to a sibling file first so a crash never leaves a half written record behind
	pub async fn save(&self, vault: &Vault) -> Result<()> {
		let path = self.path_for(&vault.name)?;
		let tmp = path.with_extension("json.tmp");
		let json = serde_json::to_vec_pretty(vault)?;

		fs::write(&tmp, json).await?;
		fs::rename(&tmp, &path).await?;

		debug!(vault = %vault.name, entries = vault.entries.len(), "vault saved");

		Ok(())
	}

	pub async fn create(&self, name: &str) -> Result<Vault> {
		if self.exists(name).await? {
			return Err(Error::VaultExists(name.to_string()));
		}

		let vault = Vault::new(name)?;
		self.save(&vault).await?;

		Ok(vault)
	}

	pub async fn list(&self) -> Result<Vec<String>> {
		let mut names = Vec::new();
		let mut dir = fs::read_dir(&self.dir).await?;

		while let Some(item) = dir.next_entry().await? {
			if let Some(name) = item
				.file_name()
				.to_str()
				.and_then(|f| f.strip_suffix(SUFFIX))
			{
				names.push(name.to_string());
			}
		}
		names.sort();

		Ok(names)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::vault::Entry;

	async fn stub_store() -> (tempfile::TempDir, VaultStore) {
		let dir = tempfile::tempdir().unwrap();
		let store = VaultStore::open(dir.path()).await.unwrap();

		(dir, store)
	}

	#[tokio::test]
	async fn test_save_load() {
		let (_dir, store) = stub_store().await;
		let mut vault = Vault::new("work").unwrap();
		vault.add(Entry::new("github", None, "JBSWY3DPEHPK3PXP"));

		store.save(&vault).await.unwrap();

		assert_eq!(store.load("work").await.unwrap(), Some(vault));
	}

	#[tokio::test]
	async fn test_empty_vault_roundtrip() {
		let (_dir, store) = stub_store().await;
		let vault = store.create("empty").await.unwrap();

		let loaded = store.load_existing("empty").await.unwrap();

		assert_eq!(loaded, vault);
		assert!(loaded.entries.is_empty());
	}

	#[tokio::test]
	async fn test_save_overwrites() {
		let (_dir, store) = stub_store().await;
		let mut vault = store.create("work").await.unwrap();

		vault.add(Entry::new("a", None, "JBSWY3DPEHPK3PXP"));
		store.save(&vault).await.unwrap();
		vault.remove("a");
		vault.add(Entry::new("b", None, "JBSWY3DPEHPK3PXP"));
		store.save(&vault).await.unwrap();

		let loaded = store.load_existing("work").await.unwrap();
		assert_eq!(loaded.entries.len(), 1);
		assert_eq!(loaded.entries[0].label, "b");
	}

	#[tokio::test]
	async fn test_missing_is_absent() {
		let (_dir, store) = stub_store().await;

		assert_eq!(store.load("nope").await.unwrap(), None);
		assert!(matches!(
			store.load_existing("nope").await,
			Err(Error::VaultNotFound(_))
		));
	}

	#[tokio::test]
	async fn test_malformed_is_absent() {
		let (dir, store) = stub_store().await;
		std::fs::write(dir.path().join("broken.vault.json"), b"{ not json").unwrap();

		assert_eq!(store.load("broken").await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_missing_issuer_saved_as_label() {
		let (dir, store) = stub_store().await;
		let path = dir.path().join("old.vault.json");
		std::fs::write(
			&path,
			br#"{"name": "old", "created": "2024-01-01T00:00:00Z",
				"entries": [{"label": "github", "secret": "JBSWY3DPEHPK3PXP"}]}"#,
		)
		.unwrap();

		let vault = store.load_existing("old").await.unwrap();
		store.save(&vault).await.unwrap();

		let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
		assert_eq!(raw["entries"][0]["issuer"], "github");
	}

	#[tokio::test]
	async fn test_create_twice() {
		let (_dir, store) = stub_store().await;
		store.create("work").await.unwrap();

		assert!(matches!(
			store.create("work").await,
			Err(Error::VaultExists(_))
		));
	}

	#[tokio::test]
	async fn test_rejects_bad_names() {
		let (_dir, store) = stub_store().await;
		let mut vault = Vault::new("ok").unwrap();
		vault.name = "../escape".to_string();

		assert!(matches!(
			store.save(&vault).await,
			Err(Error::InvalidName(_))
		));
		assert!(store.load("../escape").await.is_err());
	}

	#[tokio::test]
	async fn test_list() {
		let (dir, store) = stub_store().await;
		store.create("b").await.unwrap();
		store.create("a").await.unwrap();
		std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

		assert_eq!(store.list().await.unwrap(), ["a", "b"]);
	}
}
