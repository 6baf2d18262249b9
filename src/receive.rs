// the first valid share wins: it's persisted and acked, anything after it is ignored

use crate::{
	config::SessionConfig,
	error::Result,
	message::Message,
	store::VaultStore,
	topic::Topic,
	transport::{ConnectionId, ConnectionSet, Event, Role, Transport},
	vault::Vault,
};
use std::future::Future;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiveState {
	Idle,
	Joining,
	AwaitingShare,
	Received,
	Persisted,
	Acked,
	Stopped,
	TimedOut,
	Aborted,
}

impl ReceiveState {
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Stopped | Self::TimedOut | Self::Aborted)
	}
}

#[derive(Debug, PartialEq)]
pub enum ReceiveEvent {
	Joined,
	Connected(ConnectionId),
	Payload(ConnectionId, Vec<u8>),
	Failed(ConnectionId, String),
	Closed(ConnectionId),
	Persisted,
	AckSent,
	AckFailed(String),
	Timeout,
	Shutdown,
}

#[derive(Debug, PartialEq)]
pub enum ReceiveAction {
	Persist(Vault),
	Ack(ConnectionId),
	Drop(ConnectionId),
	Teardown,
}

#[derive(Debug, PartialEq)]
pub enum ReceiveOutcome {
	Received(Vault),
	TimedOut,
	Aborted,
}

impl ReceiveOutcome {
	pub fn is_success(&self) -> bool {
		matches!(self, Self::Received(_))
	}
}

pub struct ReceiveMachine {
	state: ReceiveState,
	topic: Topic,
	// the connection the accepted vault came from, acks go back there
	source: Option<ConnectionId>,
	vault: Option<Vault>,
}

impl ReceiveMachine {
	pub fn new(topic: Topic) -> Self {
		Self {
			state: ReceiveState::Idle,
			topic,
			source: None,
			vault: None,
		}
	}

	pub fn state(&self) -> ReceiveState {
		self.state
	}

	// the topic to look up
	pub fn join(&mut self) -> Topic {
		self.state = ReceiveState::Joining;
		self.topic
	}

	fn waiting(&self) -> bool {
		matches!(
			self.state,
			ReceiveState::Idle | ReceiveState::Joining | ReceiveState::AwaitingShare
		)
	}

	pub fn handle(&mut self, event: ReceiveEvent) -> Option<ReceiveAction> {
		if self.state.is_terminal() {
			return None;
		}

		match event {
			ReceiveEvent::Joined => {
				if self.waiting() {
					self.state = ReceiveState::AwaitingShare;
				}
				None
			}
			ReceiveEvent::Connected(id) => {
				debug!(connection = id, "connected to an announcer");
				None
			}
			ReceiveEvent::Payload(id, bytes) => self.accept(id, &bytes),
			ReceiveEvent::Failed(id, reason) => {
				warn!(connection = id, error = %reason, "dropping connection");
				Some(ReceiveAction::Drop(id))
			}
			ReceiveEvent::Closed(id) => {
				debug!(connection = id, "announcer went away");
				Some(ReceiveAction::Drop(id))
			}
			ReceiveEvent::Persisted => match (self.state, self.source) {
				(ReceiveState::Received, Some(id)) => {
					self.state = ReceiveState::Persisted;
					Some(ReceiveAction::Ack(id))
				}
				_ => None,
			},
			ReceiveEvent::AckSent => {
				if self.state != ReceiveState::Persisted {
					return None;
				}
				self.state = ReceiveState::Acked;
				Some(ReceiveAction::Teardown)
			}
			ReceiveEvent::AckFailed(reason) => {
				if self.state != ReceiveState::Persisted {
					return None;
				}
				// the vault is already on disk, only the sender's report is short an ack
				warn!(error = %reason, "failed to acknowledge the vault");
				Some(ReceiveAction::Teardown)
			}
			ReceiveEvent::Timeout => {
				if !self.waiting() {
					return None;
				}
				self.state = ReceiveState::TimedOut;
				Some(ReceiveAction::Teardown)
			}
			ReceiveEvent::Shutdown => {
				if !self.waiting() {
					return None;
				}
				self.state = ReceiveState::Aborted;
				Some(ReceiveAction::Teardown)
			}
		}
	}

	// the latch: only the first valid share while awaiting one gets through
	fn accept(&mut self, id: ConnectionId, bytes: &[u8]) -> Option<ReceiveAction> {
		if self.state != ReceiveState::AwaitingShare {
			debug!(connection = id, state = ?self.state, "ignoring late payload");
			return None;
		}

		match Message::parse(bytes) {
			Ok(Message::Share { vault, ts, .. }) => {
				info!(connection = id, vault = %vault.name, entries = vault.entries.len(), ts, "received vault");
				self.state = ReceiveState::Received;
				self.source = Some(id);
				self.vault = Some(vault.clone());

				Some(ReceiveAction::Persist(vault))
			}
			Ok(Message::Ack { .. }) => {
				debug!(connection = id, "ignoring ack from an announcer");
				None
			}
			Err(e) => {
				warn!(connection = id, error = %e, "ignoring payload");
				None
			}
		}
	}

	// marks a finished teardown and turns the session into its outcome
	pub fn finish(&mut self) -> ReceiveOutcome {
		match self.state {
			ReceiveState::TimedOut => ReceiveOutcome::TimedOut,
			ReceiveState::Aborted => ReceiveOutcome::Aborted,
			_ => match self.vault.take() {
				Some(vault) => {
					self.state = ReceiveState::Stopped;
					ReceiveOutcome::Received(vault)
				}
				None => ReceiveOutcome::Aborted,
			},
		}
	}
}

pub async fn receive<T: Transport>(
	transport: &T,
	topic: Topic,
	store: &VaultStore,
	config: &SessionConfig,
	shutdown: impl Future<Output = ()>,
) -> Result<ReceiveOutcome> {
	let mut machine = ReceiveMachine::new(topic);
	let mut membership = transport.join(machine.join(), Role::Connect).await?;
	machine.handle(ReceiveEvent::Joined);

	info!(%topic, timeout = ?config.receive_timeout, "waiting for a vault");

	let mut set = ConnectionSet::default();
	let mut accepting = true;
	let deadline = tokio::time::sleep(config.receive_timeout);
	tokio::pin!(deadline, shutdown);

	'session: loop {
		let event = tokio::select! {
			_ = &mut shutdown => ReceiveEvent::Shutdown,
			_ = &mut deadline => ReceiveEvent::Timeout,
			conn = membership.accept(), if accepting => match conn {
				Some(conn) => {
					info!(peer = %conn.peer, connection = conn.id, "connected");
					ReceiveEvent::Connected(set.insert(conn))
				}
				None => {
					warn!("transport stopped delivering connections");
					accepting = false;
					continue;
				}
			},
			Some((id, event)) = set.next(), if !set.is_empty() => match event {
				Some(Event::Message(bytes)) => ReceiveEvent::Payload(id, bytes),
				Some(Event::Error(reason)) => ReceiveEvent::Failed(id, reason),
				None => ReceiveEvent::Closed(id),
			},
		};

		let mut next = Some(event);
		while let Some(event) = next.take() {
			match machine.handle(event) {
				Some(ReceiveAction::Persist(vault)) => {
					store.save(&vault).await?;
					next = Some(ReceiveEvent::Persisted);
				}
				Some(ReceiveAction::Ack(id)) => {
					let sent = match Message::ack().encode() {
						Ok(bytes) => set.send(id, bytes).await,
						Err(e) => Err(e.into()),
					};

					next = Some(match sent {
						Ok(()) => ReceiveEvent::AckSent,
						Err(e) => ReceiveEvent::AckFailed(e.to_string()),
					});
				}
				Some(ReceiveAction::Drop(id)) => set.remove(id),
				Some(ReceiveAction::Teardown) => break 'session,
				None => {}
			}
		}
	}

	if matches!(machine.state(), ReceiveState::Acked | ReceiveState::Persisted) {
		// lets the ack leave before the connection goes
		tokio::time::sleep(config.ack_grace).await;
	}

	set.close();
	membership.leave();

	let outcome = machine.finish();
	match &outcome {
		ReceiveOutcome::Received(vault) => info!(vault = %vault.name, "vault saved"),
		ReceiveOutcome::TimedOut => warn!(%topic, "no vault arrived in time"),
		ReceiveOutcome::Aborted => info!(%topic, "receive aborted"),
	}

	Ok(outcome)
}
