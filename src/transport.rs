// sessions only see plaintext payloads, sealing is the transport's job

pub mod lan;
pub mod memory;
mod seal;

use crate::{
	error::{Error, Result},
	topic::Topic,
};
use futures_util::{
	future::AbortHandle,
	stream::{self, Abortable, SelectAll},
	StreamExt,
};
use std::{
	collections::HashMap,
	future::Future,
	sync::atomic::{AtomicU64, Ordering},
};
use tokio::sync::mpsc;

// per connection buffering, both directions
pub(crate) const CHANNEL_CAPACITY: usize = 32;

pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_connection_id() -> ConnectionId {
	NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
	// accept connections on the topic
	Announce,
	// look the topic up and dial whoever announces it
	Connect,
}

// end of stream means the connection is closed
#[derive(Debug, PartialEq)]
pub enum Event {
	Message(Vec<u8>),
	Error(String),
}

pub struct Connection {
	pub id: ConnectionId,
	pub peer: String,
	// largest message the transport can carry
	limit: usize,
	outbound: mpsc::Sender<Vec<u8>>,
	events: mpsc::Receiver<Event>,
}

fn check_limit(len: usize, limit: usize) -> Result<()> {
	if len > limit {
		Err(Error::Transport(format!(
			"message of {} bytes exceeds the limit of {}",
			len, limit
		)))
	} else {
		Ok(())
	}
}

impl Connection {
	pub fn new(
		peer: String,
		outbound: mpsc::Sender<Vec<u8>>,
		events: mpsc::Receiver<Event>,
	) -> Self {
		Self {
			id: next_connection_id(),
			peer,
			limit: usize::MAX,
			outbound,
			events,
		}
	}

	pub fn with_limit(mut self, limit: usize) -> Self {
		self.limit = limit;
		self
	}

	pub async fn send(&self, bytes: Vec<u8>) -> Result<()> {
		check_limit(bytes.len(), self.limit)?;

		self.outbound
			.send(bytes)
			.await
			.map_err(|_| Error::Transport(format!("connection to {} is closed", self.peer)))
	}

	// None once the peer is gone
	pub async fn recv(&mut self) -> Option<Event> {
		self.events.recv().await
	}
}

// a single topic join; leaving happens on drop as well
pub struct Membership {
	pub topic: Topic,
	pub role: Role,
	connections: mpsc::UnboundedReceiver<Connection>,
	on_leave: Option<Box<dyn FnOnce() + Send>>,
}

impl Membership {
	pub fn new(
		topic: Topic,
		role: Role,
		connections: mpsc::UnboundedReceiver<Connection>,
		on_leave: impl FnOnce() + Send + 'static,
	) -> Self {
		Self {
			topic,
			role,
			connections,
			on_leave: Some(Box::new(on_leave)),
		}
	}

	pub async fn accept(&mut self) -> Option<Connection> {
		self.connections.recv().await
	}

	pub fn leave(mut self) {
		self.release();
	}

	fn release(&mut self) {
		if let Some(on_leave) = self.on_leave.take() {
			on_leave();
		}
		self.connections.close();
	}
}

impl Drop for Membership {
	fn drop(&mut self) {
		self.release();
	}
}

pub trait Transport {
	fn join(&self, topic: Topic, role: Role) -> impl Future<Output = Result<Membership>> + Send;
}

// None stands for "closed"
type Inbound = std::pin::Pin<Box<dyn stream::Stream<Item = (ConnectionId, Option<Event>)> + Send + Sync>>;

struct Link {
	peer: String,
	limit: usize,
	outbound: mpsc::Sender<Vec<u8>>,
	abort: AbortHandle,
}

// the open connections of a session: one outbound handle each, inbound events merged into one stream
#[derive(Default)]
pub struct ConnectionSet {
	links: HashMap<ConnectionId, Link>,
	inbound: SelectAll<Abortable<Inbound>>,
}

impl ConnectionSet {
	pub fn insert(&mut self, conn: Connection) -> ConnectionId {
		let Connection {
			id,
			peer,
			limit,
			outbound,
			events,
		} = conn;

		let events: Inbound = Box::pin(stream::unfold(Some(events), move |events| async move {
			let mut events = events?;

			match events.recv().await {
				Some(event) => Some(((id, Some(event)), Some(events))),
				None => Some(((id, None), None)),
			}
		}));

		let (abort, registration) = AbortHandle::new_pair();
		self.inbound.push(Abortable::new(events, registration));
		self.links.insert(
			id,
			Link {
				peer,
				limit,
				outbound,
				abort,
			},
		);

		id
	}

	pub fn peer(&self, id: ConnectionId) -> Option<&str> {
		self.links.get(&id).map(|link| link.peer.as_str())
	}

	pub async fn send(&self, id: ConnectionId, bytes: Vec<u8>) -> Result<()> {
		let link = self
			.links
			.get(&id)
			.ok_or_else(|| Error::Transport(format!("unknown connection {}", id)))?;
		check_limit(bytes.len(), link.limit)?;

		link.outbound
			.send(bytes)
			.await
			.map_err(|_| Error::Transport(format!("connection to {} is closed", link.peer)))
	}

	pub fn remove(&mut self, id: ConnectionId) {
		if let Some(link) = self.links.remove(&id) {
			link.abort.abort();
		}
	}

	pub fn len(&self) -> usize {
		self.links.len()
	}

	pub fn is_empty(&self) -> bool {
		self.links.is_empty()
	}

	// pending until any connection has something to report; callers guard on `is_empty`
	pub async fn next(&mut self) -> Option<(ConnectionId, Option<Event>)> {
		self.inbound.next().await
	}

	pub fn close(&mut self) {
		for (_, link) in self.links.drain() {
			link.abort.abort();
		}
		self.inbound = SelectAll::new();
	}
}
