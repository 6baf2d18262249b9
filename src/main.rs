use clap::{Parser, Subcommand};
use std::{net::IpAddr, path::PathBuf, process::ExitCode, time::Duration};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vaultshare::{
	config::Config,
	receive, secret, share, totp,
	transport::lan::LanSwarm,
	vault::validate_name,
	Entry, Error, ReceiveOutcome, Result, Topic, VaultStore,
};

#[derive(Parser)]
#[command(name = "vaultshare")]
#[command(about = "totp codes and serverless vault sharing")]
#[command(version)]
struct Cli {
	/// directory holding the vaults
	#[arg(long, env = "VAULTSHARE_DIR", global = true)]
	data_dir: Option<PathBuf>,

	/// udp port beacons are sent to and looked up on
	#[arg(long, env = "VAULTSHARE_PORT", global = true)]
	port: Option<u16>,

	/// where beacons are sent (default: 255.255.255.255)
	#[arg(long, env = "VAULTSHARE_BEACON_ADDR", global = true)]
	beacon_addr: Option<IpAddr>,

	/// milliseconds between beacons
	#[arg(long, global = true)]
	beacon_interval_ms: Option<u64>,

	/// seconds a receiver waits for a vault
	#[arg(long, env = "VAULTSHARE_TIMEOUT", global = true)]
	timeout: Option<u64>,

	/// milliseconds a receiver lingers after acking
	#[arg(long, global = true)]
	ack_grace_ms: Option<u64>,

	/// milliseconds a sharer lingers to flush writes once stopped
	#[arg(long, global = true)]
	shutdown_grace_ms: Option<u64>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// create an empty vault
	Init { vault: String },
	/// add an entry, generating a secret unless one is given
	Add {
		vault: String,
		label: String,
		#[arg(long)]
		issuer: Option<String>,
		#[arg(long)]
		secret: Option<String>,
	},
	/// remove the first entry with this label
	Remove { vault: String, label: String },
	/// list local vaults
	List,
	/// print current codes
	Codes {
		vault: String,
		/// epoch millis to compute codes at instead of now
		#[arg(long)]
		at: Option<u64>,
	},
	/// print the topic a vault is shared on
	Topic { vault: String },
	/// share a vault with anyone joining its topic, until ctrl-c
	Share { vault: String },
	/// wait for a vault by name or 64 hex char topic and save it
	Receive { vault_or_topic: String },
}

impl Cli {
	fn config(&self) -> Config {
		let mut config = Config::default();

		if let Some(dir) = &self.data_dir {
			config.data_dir = dir.clone();
		}
		if let Some(port) = self.port {
			config.lan.discovery_port = port;
		}
		if let Some(addr) = self.beacon_addr {
			config.lan.beacon_addr = addr;
		}
		if let Some(ms) = self.beacon_interval_ms {
			config.lan.beacon_interval = Duration::from_millis(ms.max(1));
		}
		if let Some(secs) = self.timeout {
			config.session.receive_timeout = Duration::from_secs(secs);
		}
		if let Some(ms) = self.ack_grace_ms {
			config.session.ack_grace = Duration::from_millis(ms);
		}
		if let Some(ms) = self.shutdown_grace_ms {
			config.session.shutdown_grace = Duration::from_millis(ms);
		}

		config
	}
}

async fn ctrl_c() {
	if tokio::signal::ctrl_c().await.is_err() {
		// no signal handling available, run until killed
		std::future::pending::<()>().await;
	}
}

async fn run(command: Command, config: Config) -> Result<ExitCode> {
	let store = VaultStore::open(&config.data_dir).await?;

	match command {
		Command::Init { vault } => {
			let vault = store.create(&vault).await?;
			println!("created {} (topic {})", vault.name, vault.topic());
		}
		Command::Add {
			vault,
			label,
			issuer,
			secret: given,
		} => {
			let mut vault = store.load_existing(&vault).await?;
			let generated = given.is_none();
			let key = given.unwrap_or_else(secret::generate);

			vault.add(Entry::new(&label, issuer.as_deref(), &key));
			store.save(&vault).await?;

			if generated {
				println!("{}", key);
			}
		}
		Command::Remove { vault, label } => {
			let mut vault = store.load_existing(&vault).await?;

			if vault.remove(&label).is_none() {
				eprintln!("no entry labelled {:?} in {}", label, vault.name);
				return Ok(ExitCode::FAILURE);
			}
			store.save(&vault).await?;
		}
		Command::List => {
			for name in store.list().await? {
				println!("{}", name);
			}
		}
		Command::Codes { vault, at } => {
			let vault = store.load_existing(&vault).await?;
			let at = at.unwrap_or_else(totp::now_millis);

			for code in vault.codes_at(at) {
				println!(
					"{:<20} {:<20} {} ({:>2}s)",
					code.entry.issuer(),
					code.entry.label,
					code.code,
					code.remaining
				);
			}
		}
		Command::Topic { vault } => {
			validate_name(&vault)?;
			println!("{}", Topic::derive(&vault));
		}
		Command::Share { vault } => {
			let vault = store.load_existing(&vault).await?;
			let swarm = LanSwarm::new(config.lan.clone());

			println!("sharing {} on {}, ctrl-c to stop", vault.name, vault.topic());
			let report = share(&swarm, &vault, &config.session, ctrl_c()).await?;
			println!("served {} peer(s), {} ack(s)", report.served, report.acks);
		}
		Command::Receive { vault_or_topic } => {
			let topic = Topic::resolve(&vault_or_topic);
			let swarm = LanSwarm::new(config.lan.clone());

			match receive(&swarm, topic, &store, &config.session, ctrl_c()).await? {
				ReceiveOutcome::Received(vault) => {
					println!("saved {} with {} entries", vault.name, vault.entries.len());
				}
				ReceiveOutcome::TimedOut => {
					eprintln!("no vault arrived in time");
					return Ok(ExitCode::FAILURE);
				}
				ReceiveOutcome::Aborted => {
					eprintln!("aborted");
					return Ok(ExitCode::FAILURE);
				}
			}
		}
	}

	Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vaultshare=info")),
		)
		.init();

	let cli = Cli::parse();
	let config = cli.config();

	info!(data = %config.data_dir.display(), "vaultshare v{}", env!("CARGO_PKG_VERSION"));

	match run(cli.command, config).await {
		Ok(code) => code,
		Err(e) => {
			error!(error = %e, "failed");
			eprintln!("{}", e);

			match e {
				Error::VaultNotFound(_) | Error::VaultExists(_) | Error::InvalidName(_) => {
					ExitCode::from(2)
				}
				_ => ExitCode::FAILURE,
			}
		}
	}
}
