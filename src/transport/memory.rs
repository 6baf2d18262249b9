// In-process swarm: every announcer on a topic is paired with every connector on it, whichever
// joins first. Useful for tests and for embedding both roles in one process.

use super::{Connection, Event, Membership, Role, Transport, CHANNEL_CAPACITY};
use crate::{
	error::{Error, Result},
	topic::Topic,
};
use std::{
	collections::HashMap,
	sync::{Arc, Mutex},
};
use tokio::sync::mpsc;
use tracing::debug;

struct Member {
	id: u64,
	role: Role,
	connections: mpsc::UnboundedSender<Connection>,
}

#[derive(Default)]
struct Hub {
	next_member: u64,
	topics: HashMap<Topic, Vec<Member>>,
}

#[derive(Clone, Default)]
pub struct MemorySwarm {
	hub: Arc<Mutex<Hub>>,
}

impl MemorySwarm {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn members(&self, topic: &Topic) -> usize {
		self.hub
			.lock()
			.map(|hub| hub.topics.get(topic).map_or(0, Vec::len))
			.unwrap_or(0)
	}
}

async fn forward(mut outbound: mpsc::Receiver<Vec<u8>>, events: mpsc::Sender<Event>) {
	while let Some(bytes) = outbound.recv().await {
		if events.send(Event::Message(bytes)).await.is_err() {
			break;
		}
	}
}

// two connected ends; dropping either end's sender closes the other's event stream
fn pipe(a: String, b: String) -> (Connection, Connection) {
	let (a_out, a_out_rx) = mpsc::channel(CHANNEL_CAPACITY);
	let (b_out, b_out_rx) = mpsc::channel(CHANNEL_CAPACITY);
	let (a_events_tx, a_events) = mpsc::channel(CHANNEL_CAPACITY);
	let (b_events_tx, b_events) = mpsc::channel(CHANNEL_CAPACITY);

	tokio::spawn(forward(a_out_rx, b_events_tx));
	tokio::spawn(forward(b_out_rx, a_events_tx));

	(
		// a's connection is labelled with the peer it talks to
		Connection::new(b, a_out, a_events),
		Connection::new(a, b_out, b_events),
	)
}

impl Transport for MemorySwarm {
	async fn join(&self, topic: Topic, role: Role) -> Result<Membership> {
		let (tx, rx) = mpsc::unbounded_channel();
		let member_id = {
			let mut hub = self
				.hub
				.lock()
				.map_err(|_| Error::Transport("memory swarm is poisoned".to_string()))?;
			let member_id = hub.next_member;
			hub.next_member += 1;

			let members = hub.topics.entry(topic).or_default();
			members.retain(|m| !m.connections.is_closed());

			for other in members.iter().filter(|m| m.role != role) {
				let (ours, theirs) =
					pipe(format!("mem:{}", member_id), format!("mem:{}", other.id));

				if other.connections.send(theirs).is_ok() {
					// our receiver is alive, it's held right here
					let _ = tx.send(ours);
				}
			}

			members.push(Member {
				id: member_id,
				role,
				connections: tx,
			});

			member_id
		};

		debug!(?topic, ?role, member = member_id, "joined memory swarm");

		let hub = self.hub.clone();

		Ok(Membership::new(topic, role, rx, move || {
			if let Ok(mut hub) = hub.lock() {
				let now_empty = match hub.topics.get_mut(&topic) {
					Some(members) => {
						members.retain(|m| m.id != member_id);
						members.is_empty()
					}
					None => false,
				};

				if now_empty {
					hub.topics.remove(&topic);
				}
			}
		}))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_pairs_announcer_and_connector() {
		let swarm = MemorySwarm::new();
		let topic = Topic::derive("pair");

		let mut server = swarm.join(topic, Role::Announce).await.unwrap();
		let mut client = swarm.join(topic, Role::Connect).await.unwrap();

		let mut s = server.accept().await.unwrap();
		let mut c = client.accept().await.unwrap();

		s.send(b"ping".to_vec()).await.unwrap();
		assert_eq!(c.recv().await, Some(Event::Message(b"ping".to_vec())));

		c.send(b"pong".to_vec()).await.unwrap();
		assert_eq!(s.recv().await, Some(Event::Message(b"pong".to_vec())));
	}

	#[tokio::test]
	async fn test_order_does_not_matter() {
		let swarm = MemorySwarm::new();
		let topic = Topic::derive("order");

		let mut client = swarm.join(topic, Role::Connect).await.unwrap();
		let mut server = swarm.join(topic, Role::Announce).await.unwrap();

		assert!(client.accept().await.is_some());
		assert!(server.accept().await.is_some());
	}

	#[tokio::test]
	async fn test_same_role_or_other_topic_never_pairs() {
		let swarm = MemorySwarm::new();
		let topic = Topic::derive("a");

		let _s0 = swarm.join(topic, Role::Announce).await.unwrap();
		let _s1 = swarm.join(topic, Role::Announce).await.unwrap();
		let mut other = swarm
			.join(Topic::derive("b"), Role::Connect)
			.await
			.unwrap();
		let mut c = swarm.join(topic, Role::Connect).await.unwrap();

		// one per announcer
		assert!(c.accept().await.is_some());
		assert!(c.accept().await.is_some());
		assert!(other.connections.try_recv().is_err());
		assert!(c.connections.try_recv().is_err());
	}

	#[tokio::test]
	async fn test_close_is_observed() {
		let swarm = MemorySwarm::new();
		let topic = Topic::derive("close");

		let mut server = swarm.join(topic, Role::Announce).await.unwrap();
		let mut client = swarm.join(topic, Role::Connect).await.unwrap();
		let s = server.accept().await.unwrap();
		let mut c = client.accept().await.unwrap();

		drop(s);

		assert_eq!(c.recv().await, None);
	}

	#[tokio::test]
	async fn test_leave() {
		let swarm = MemorySwarm::new();
		let topic = Topic::derive("leave");

		let server = swarm.join(topic, Role::Announce).await.unwrap();
		assert_eq!(swarm.members(&topic), 1);

		server.leave();
		assert_eq!(swarm.members(&topic), 0);

		let mut client = swarm.join(topic, Role::Connect).await.unwrap();
		assert!(client.connections.try_recv().is_err());
	}
}
