// every connection gets the vault once; acks are only counted

use crate::{
	config::SessionConfig,
	error::Result,
	message::Message,
	topic::Topic,
	transport::{ConnectionId, ConnectionSet, Event, Role, Transport},
	vault::Vault,
};
use std::{collections::HashMap, future::Future};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShareState {
	Idle,
	Announcing,
	Listening,
	Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
	Connected,
	Sent,
	Acked,
}

#[derive(Debug, PartialEq)]
pub enum ShareEvent {
	Joined,
	Connected(ConnectionId),
	// the share made it into the connection's outbound queue
	Sent(ConnectionId),
	Payload(ConnectionId, Vec<u8>),
	Failed(ConnectionId, String),
	Closed(ConnectionId),
	Shutdown,
}

#[derive(Debug, PartialEq)]
pub enum ShareAction {
	Send(ConnectionId, Vec<u8>),
	Drop(ConnectionId),
	Stop,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShareReport {
	pub served: usize,
	pub acks: usize,
}

pub struct ShareMachine {
	state: ShareState,
	vault: Vault,
	peers: HashMap<ConnectionId, PeerState>,
	report: ShareReport,
}

impl ShareMachine {
	pub fn new(vault: Vault) -> Self {
		Self {
			state: ShareState::Idle,
			vault,
			peers: HashMap::new(),
			report: ShareReport::default(),
		}
	}

	pub fn state(&self) -> ShareState {
		self.state
	}

	pub fn peer(&self, id: ConnectionId) -> Option<PeerState> {
		self.peers.get(&id).copied()
	}

	pub fn report(&self) -> ShareReport {
		self.report
	}

	// the topic to announce on
	pub fn announce(&mut self) -> Topic {
		self.state = ShareState::Announcing;
		self.vault.topic()
	}

	pub fn handle(&mut self, event: ShareEvent) -> Option<ShareAction> {
		if self.state == ShareState::Stopped {
			return None;
		}

		match event {
			ShareEvent::Joined => {
				self.state = ShareState::Listening;
				None
			}
			ShareEvent::Connected(id) => match Message::share(&self.vault).encode() {
				Ok(bytes) => {
					self.peers.insert(id, PeerState::Connected);
					Some(ShareAction::Send(id, bytes))
				}
				Err(e) => self.handle(ShareEvent::Failed(id, e.to_string())),
			},
			ShareEvent::Sent(id) => {
				if let Some(peer) = self.peers.get_mut(&id) {
					*peer = PeerState::Sent;
					self.report.served += 1;
				}
				None
			}
			ShareEvent::Payload(id, bytes) => {
				match Message::parse(&bytes) {
					Ok(Message::Ack { ts }) => match self.peers.get_mut(&id) {
						Some(peer) if *peer == PeerState::Sent => {
							*peer = PeerState::Acked;
							self.report.acks += 1;
							info!(connection = id, ts, vault = %self.vault.name, "peer acknowledged the vault");
						}
						_ => debug!(connection = id, "ignoring unexpected ack"),
					},
					Ok(Message::Share { .. }) => debug!(connection = id, "ignoring share from a peer"),
					Err(e) => debug!(connection = id, error = %e, "ignoring payload"),
				}
				None
			}
			ShareEvent::Failed(id, reason) => {
				warn!(connection = id, error = %reason, "dropping connection");
				self.peers.remove(&id);
				Some(ShareAction::Drop(id))
			}
			ShareEvent::Closed(id) => {
				debug!(connection = id, "peer went away");
				self.peers.remove(&id);
				Some(ShareAction::Drop(id))
			}
			ShareEvent::Shutdown => {
				self.state = ShareState::Stopped;
				Some(ShareAction::Stop)
			}
		}
	}
}

pub async fn share<T: Transport>(
	transport: &T,
	vault: &Vault,
	config: &SessionConfig,
	shutdown: impl Future<Output = ()>,
) -> Result<ShareReport> {
	vault.validate()?;

	let mut machine = ShareMachine::new(vault.clone());
	let topic = machine.announce();
	let mut membership = transport.join(topic, Role::Announce).await?;
	machine.handle(ShareEvent::Joined);

	info!(vault = %vault.name, entries = vault.entries.len(), %topic, "sharing vault");

	let mut set = ConnectionSet::default();
	let mut accepting = true;
	tokio::pin!(shutdown);

	loop {
		let event = tokio::select! {
			_ = &mut shutdown => ShareEvent::Shutdown,
			conn = membership.accept(), if accepting => match conn {
				Some(conn) => {
					info!(peer = %conn.peer, connection = conn.id, "peer connected");
					ShareEvent::Connected(set.insert(conn))
				}
				None => {
					warn!("transport stopped delivering connections");
					accepting = false;
					continue;
				}
			},
			Some((id, event)) = set.next(), if !set.is_empty() => match event {
				Some(Event::Message(bytes)) => ShareEvent::Payload(id, bytes),
				Some(Event::Error(reason)) => ShareEvent::Failed(id, reason),
				None => ShareEvent::Closed(id),
			},
		};

		match machine.handle(event) {
			Some(ShareAction::Send(id, bytes)) => {
				let outcome = match set.send(id, bytes).await {
					Ok(()) => ShareEvent::Sent(id),
					Err(e) => ShareEvent::Failed(id, e.to_string()),
				};

				if let Some(ShareAction::Drop(id)) = machine.handle(outcome) {
					set.remove(id);
				}
			}
			Some(ShareAction::Drop(id)) => set.remove(id),
			Some(ShareAction::Stop) => break,
			None => {}
		}
	}

	let open = set.len();
	set.close();
	membership.leave();

	// closing only stops new writes, queued frames still drain
	if open > 0 {
		tokio::time::sleep(config.shutdown_grace).await;
	}

	let report = machine.report();
	info!(vault = %vault.name, served = report.served, acks = report.acks, "stopped sharing");

	Ok(report)
}
