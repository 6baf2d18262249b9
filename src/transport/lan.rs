// beacon: tag(32) || port(u16 be), tag keyed on the topic
// frame: len(u32 be) || sealed payload

use super::{
	seal::{beacon_tag, ChannelKey, SEAL_OVERHEAD},
	Connection, Event, Membership, Role, Transport, CHANNEL_CAPACITY,
};
use crate::{error::Result, topic::Topic};
use std::{
	collections::HashSet,
	io,
	net::{IpAddr, Ipv4Addr, SocketAddr},
	time::Duration,
};
use tokio::{
	io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
	net::{
		tcp::{OwnedReadHalf, OwnedWriteHalf},
		TcpListener, TcpStream, UdpSocket,
	},
	sync::mpsc,
};
use tracing::{debug, info, warn};

// vaults are tiny; anything bigger is noise or an attack
const MAX_FRAME: usize = 1024 * 1024;
// plaintext that still fits a frame once sealed
const MAX_MESSAGE: usize = MAX_FRAME - SEAL_OVERHEAD;
const BEACON_SIZE: usize = 32 + 2;
// an announcer that doesn't answer within this is given up on
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_DISCOVERY_PORT: u16 = 47_311;

#[derive(Clone, Debug)]
pub struct LanConfig {
	pub discovery_port: u16,
	// where beacons go, the limited broadcast address by default
	pub beacon_addr: IpAddr,
	pub beacon_interval: Duration,
}

impl Default for LanConfig {
	fn default() -> Self {
		Self {
			discovery_port: DEFAULT_DISCOVERY_PORT,
			beacon_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
			beacon_interval: Duration::from_secs(1),
		}
	}
}

#[derive(Debug, PartialEq)]
struct Beacon {
	tag: [u8; 32],
	port: u16,
}

impl Beacon {
	fn encode(&self) -> [u8; BEACON_SIZE] {
		let mut bytes = [0u8; BEACON_SIZE];
		bytes[..32].copy_from_slice(&self.tag);
		bytes[32..].copy_from_slice(&self.port.to_be_bytes());

		bytes
	}

	fn decode(bytes: &[u8]) -> Option<Self> {
		if bytes.len() != BEACON_SIZE {
			return None;
		}

		Some(Self {
			tag: bytes[..32].try_into().ok()?,
			port: u16::from_be_bytes([bytes[32], bytes[33]]),
		})
	}
}

pub struct LanSwarm {
	config: LanConfig,
}

impl LanSwarm {
	pub fn new(config: LanConfig) -> Self {
		Self { config }
	}
}

impl Transport for LanSwarm {
	async fn join(&self, topic: Topic, role: Role) -> Result<Membership> {
		let key = ChannelKey::derive(&topic);
		let tag = beacon_tag(&topic);
		let (tx, rx) = mpsc::unbounded_channel();

		let task = match role {
			Role::Announce => {
				let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
				let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
				socket.set_broadcast(true)?;

				let beacon = Beacon {
					tag,
					port: listener.local_addr()?.port(),
				};
				info!(?topic, port = beacon.port, "announcing on lan");

				tokio::spawn(announce(listener, socket, beacon, key, self.config.clone(), tx))
			}
			Role::Connect => {
				let socket =
					UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.config.discovery_port)).await?;
				info!(?topic, port = self.config.discovery_port, "looking up peers on lan");

				tokio::spawn(discover(socket, tag, key, tx))
			}
		};

		Ok(Membership::new(topic, role, rx, move || task.abort()))
	}
}

async fn announce(
	listener: TcpListener,
	socket: UdpSocket,
	beacon: Beacon,
	key: ChannelKey,
	config: LanConfig,
	tx: mpsc::UnboundedSender<Connection>,
) {
	let beacon = beacon.encode();
	let target = SocketAddr::new(config.beacon_addr, config.discovery_port);
	let mut ticker = tokio::time::interval(config.beacon_interval);

	loop {
		tokio::select! {
			_ = ticker.tick() => {
				if let Err(e) = socket.send_to(&beacon, target).await {
					debug!(%target, error = %e, "beacon not sent");
				}
			}
			accepted = listener.accept() => match accepted {
				Ok((stream, addr)) => {
					debug!(%addr, "inbound connection");

					if tx.send(open(stream, addr, key.clone())).is_err() {
						break;
					}
				}
				Err(e) => warn!(error = %e, "failed to accept connection"),
			}
		}
	}
}

async fn discover(
	socket: UdpSocket,
	tag: [u8; 32],
	key: ChannelKey,
	tx: mpsc::UnboundedSender<Connection>,
) {
	let mut dialed = HashSet::new();
	let mut buf = [0u8; 64];

	loop {
		let (len, from) = match socket.recv_from(&mut buf).await {
			Ok(received) => received,
			Err(e) => {
				warn!(error = %e, "discovery socket failed");
				break;
			}
		};

		let beacon = match Beacon::decode(&buf[..len]) {
			Some(beacon) if beacon.tag == tag => beacon,
			_ => continue,
		};

		// no redials, not even after a failure
		let addr = SocketAddr::new(from.ip(), beacon.port);
		if !dialed.insert(addr) {
			continue;
		}

		if tx.is_closed() {
			break;
		}

		// dials run on their own so one silent announcer can't hold up the rest
		tokio::spawn(dial(addr, key.clone(), tx.clone()));
	}
}

async fn dial(addr: SocketAddr, key: ChannelKey, tx: mpsc::UnboundedSender<Connection>) {
	match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr)).await {
		Ok(Ok(stream)) => {
			debug!(%addr, "dialed announcer");
			let _ = tx.send(open(stream, addr, key));
		}
		Ok(Err(e)) => warn!(%addr, error = %e, "failed to dial announcer"),
		Err(_) => warn!(%addr, "announcer did not answer"),
	}
}

fn open(stream: TcpStream, addr: SocketAddr, key: ChannelKey) -> Connection {
	let (reader, writer) = stream.into_split();
	let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
	let (ev_tx, ev_rx) = mpsc::channel(CHANNEL_CAPACITY);

	tokio::spawn(write_frames(writer, out_rx, key.clone()));
	tokio::spawn(read_frames(reader, ev_tx, key));

	Connection::new(addr.to_string(), out_tx, ev_rx).with_limit(MAX_MESSAGE)
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
	if frame.len() > MAX_FRAME {
		return Err(io::Error::new(
			io::ErrorKind::InvalidInput,
			format!("frame of {} bytes exceeds the limit", frame.len()),
		));
	}

	writer.write_u32(frame.len() as u32).await?;
	writer.write_all(frame).await?;
	writer.flush().await
}

// Ok(None) on a clean eof between frames
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
	let len = match reader.read_u32().await {
		Ok(len) => len as usize,
		Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
		Err(e) => return Err(e),
	};

	if len > MAX_FRAME {
		return Err(io::Error::new(
			io::ErrorKind::InvalidData,
			format!("frame of {} bytes exceeds the limit", len),
		));
	}

	let mut frame = vec![0u8; len];
	reader.read_exact(&mut frame).await?;

	Ok(Some(frame))
}

// queued frames are flushed before the write side shuts down
async fn write_frames(
	mut writer: OwnedWriteHalf,
	mut outbound: mpsc::Receiver<Vec<u8>>,
	key: ChannelKey,
) {
	while let Some(bytes) = outbound.recv().await {
		let result = match key.seal(&bytes) {
			Ok(frame) => write_frame(&mut writer, &frame).await,
			Err(e) => Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
		};

		if let Err(e) = result {
			debug!(error = %e, "write side closed");
			break;
		}
	}

	let _ = writer.shutdown().await;
}

async fn read_frames(mut reader: OwnedReadHalf, events: mpsc::Sender<Event>, key: ChannelKey) {
	loop {
		let event = match read_frame(&mut reader).await {
			Ok(Some(frame)) => match key.open(&frame) {
				Ok(bytes) => Event::Message(bytes),
				Err(e) => Event::Error(e.to_string()),
			},
			Ok(None) => break,
			Err(e) => {
				let _ = events.send(Event::Error(e.to_string())).await;
				break;
			}
		};

		if events.send(event).await.is_err() {
			break;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_beacon_codec() {
		let beacon = Beacon {
			tag: [7u8; 32],
			port: 47_311,
		};

		assert_eq!(Beacon::decode(&beacon.encode()), Some(beacon));
		assert_eq!(Beacon::decode(&[0u8; 10]), None);
	}

	#[tokio::test]
	async fn test_frames_over_duplex() {
		let (mut a, mut b) = tokio::io::duplex(4096);

		write_frame(&mut a, b"first").await.unwrap();
		write_frame(&mut a, b"").await.unwrap();
		drop(a);

		assert_eq!(read_frame(&mut b).await.unwrap(), Some(b"first".to_vec()));
		assert_eq!(read_frame(&mut b).await.unwrap(), Some(vec![]));
		assert_eq!(read_frame(&mut b).await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_oversized_frame_rejected() {
		let (mut a, mut b) = tokio::io::duplex(64);

		a.write_u32(MAX_FRAME as u32 + 1).await.unwrap();

		let err = read_frame(&mut b).await.unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::InvalidData);
	}

	#[tokio::test]
	async fn test_oversized_frame_not_written() {
		let (mut a, mut b) = tokio::io::duplex(64);

		let err = write_frame(&mut a, &vec![0u8; MAX_FRAME + 1]).await.unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

		drop(a);
		assert_eq!(read_frame(&mut b).await.unwrap(), None);
	}

	async fn loopback_pair(a_topic: &str, b_topic: &str) -> (Connection, Connection) {
		let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
		let addr = listener.local_addr().unwrap();
		let (dialed, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
		let (accepted, peer) = accepted.unwrap();

		(
			open(dialed.unwrap(), addr, ChannelKey::derive(&Topic::derive(a_topic))),
			open(accepted, peer, ChannelKey::derive(&Topic::derive(b_topic))),
		)
	}

	#[tokio::test]
	async fn test_sealed_connection() {
		let (a, mut b) = loopback_pair("work", "work").await;

		a.send(b"hello".to_vec()).await.unwrap();
		assert_eq!(b.recv().await, Some(Event::Message(b"hello".to_vec())));

		drop(a);
		assert_eq!(b.recv().await, None);
	}

	#[tokio::test]
	async fn test_send_refuses_what_cannot_be_framed() {
		let (a, mut b) = loopback_pair("work", "work").await;

		assert!(a.send(vec![0u8; MAX_MESSAGE + 1]).await.is_err());

		a.send(vec![7u8; MAX_MESSAGE]).await.unwrap();
		assert_eq!(b.recv().await, Some(Event::Message(vec![7u8; MAX_MESSAGE])));
	}

	#[tokio::test]
	async fn test_foreign_key_is_an_error() {
		let (a, mut b) = loopback_pair("work", "home").await;

		a.send(b"hello".to_vec()).await.unwrap();
		assert!(matches!(b.recv().await, Some(Event::Error(_))));
	}

	async fn loopback_swarm() -> (LanSwarm, u16) {
		// grab a free udp port for discovery
		let port = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
			.await
			.unwrap()
			.local_addr()
			.unwrap()
			.port();
		let swarm = LanSwarm::new(LanConfig {
			discovery_port: port,
			beacon_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
			beacon_interval: Duration::from_millis(20),
		});

		(swarm, port)
	}

	#[tokio::test]
	async fn test_rendezvous_on_loopback() {
		let (swarm, _) = loopback_swarm().await;
		let topic = Topic::derive("lan");

		let mut client = swarm.join(topic, Role::Connect).await.unwrap();
		let mut server = swarm.join(topic, Role::Announce).await.unwrap();

		let mut c = client.accept().await.unwrap();
		let mut s = server.accept().await.unwrap();

		s.send(b"vault".to_vec()).await.unwrap();
		assert_eq!(c.recv().await, Some(Event::Message(b"vault".to_vec())));
		c.send(b"ack".to_vec()).await.unwrap();
		assert_eq!(s.recv().await, Some(Event::Message(b"ack".to_vec())));

		// a second beacon from the same announcer never leads to a second connection
		tokio::time::sleep(Duration::from_millis(100)).await;
		assert!(client.connections.try_recv().is_err());
	}

	#[tokio::test]
	async fn test_silent_announcer_does_not_block_others() {
		let (swarm, port) = loopback_swarm().await;
		let topic = Topic::derive("stall");
		let mut client = swarm.join(topic, Role::Connect).await.unwrap();

		// once its accept queue is full this listener leaves further dials hanging
		let stall = tokio::net::TcpSocket::new_v4().unwrap();
		stall.bind((Ipv4Addr::LOCALHOST, 0).into()).unwrap();
		let stall = stall.listen(0).unwrap();
		let stall_addr = stall.local_addr().unwrap();
		let _fillers: Vec<_> = (0..4)
			.map(|_| tokio::spawn(TcpStream::connect(stall_addr)))
			.collect();
		tokio::time::sleep(Duration::from_millis(50)).await;

		// anyone on the lan can replay a matching tag pointing anywhere
		let forged = Beacon {
			tag: beacon_tag(&topic),
			port: stall_addr.port(),
		};
		let udp = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
		udp.send_to(&forged.encode(), (Ipv4Addr::LOCALHOST, port))
			.await
			.unwrap();
		tokio::time::sleep(Duration::from_millis(50)).await;

		let mut server = swarm.join(topic, Role::Announce).await.unwrap();

		let accepted = tokio::time::timeout(Duration::from_secs(3), server.accept()).await;
		assert!(matches!(accepted, Ok(Some(_))));
		assert!(tokio::time::timeout(Duration::from_secs(3), client.accept())
			.await
			.is_ok());
	}
}
