// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The [`OnionMessenger`] sends, receives, and forwards onion messages over
//! a node's custom-message transport, and lives here along with the types,
//! traits, and utilities that it uses.

use bitcoin::secp256k1::PublicKey;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::node::{CustomMessage, NodeClient, NodeError, NodeErrorKind};
use crate::sphinx::{OnionRouter, PacketAction, ProcessedPacket, SphinxError};
use crate::util::logger::Logger;
use crate::util::ser::{Readable, Writeable};
use crate::wire::{
	validate_final_payload, BlindedRouteData, DecodeError, NotFinalPayload, OnionMessage,
	OnionMessagePayload, ReplyPath, FinalHopPayload, ONION_MESSAGES_TYPE,
};
use super::path::{blinded_path_hops, blinded_to_sphinx, reply_path_to_route, BlindedDataEncoder};

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::task::{self, Poll};
use std::time::Duration;

/// The number of times an outgoing peer is polled for after a connection
/// attempt before the send fails, unless overridden with
/// [`OnionMessenger::with_peer_lookup`].
pub const DEFAULT_LOOKUP_PEER_ATTEMPTS: usize = 5;

/// The wait between peer list polls, unless overridden with
/// [`OnionMessenger::with_peer_lookup`]. The total wait across
/// [`DEFAULT_LOOKUP_PEER_ATTEMPTS`] polls comfortably exceeds a typical peer
/// handshake.
pub const DEFAULT_LOOKUP_PEER_BACKOFF: Duration = Duration::from_secs(2);

// Multi-hop sends discover their path through the payment router, which
// requires an amount. The amount is a placeholder: no payment moves, the
// route is used purely for topology discovery.
const PATH_DISCOVERY_AMOUNT_MSAT: u64 = 1_000;

/// Errors that may occur when sending, receiving, or forwarding onion
/// messages. Callers should match on the variant, not its display text.
#[derive(Debug)]
pub enum MessengerError {
	/// A send request set neither a peer nor a blinded destination.
	NoDestination,
	/// A send request set both a peer and a blinded destination.
	BothDestinations,
	/// A send request's blinded destination has no hops.
	NoBlindedHops,
	/// A TLV type lies below the range reserved for final hop payloads.
	NotFinalPayload(u64),
	/// The target peer has no advertised addresses to connect to.
	NoAddresses(PublicKey),
	/// The target peer did not appear in our peer list after a connection
	/// attempt.
	NoConnection,
	/// No route to the target could be found for path discovery.
	NoPath,
	/// A hop returned by the routing layer is missing its public key; the
	/// value is the hop's channel id.
	MissingRoutePubkey(u64),
	/// Encoding the routing data of the intermediate hop at the given index
	/// failed.
	HopEncoding(usize, Box<dyn Error + Send + Sync>),
	/// An inbound message's envelope or onion could not be processed.
	BadOnionBlob(Box<dyn Error + Send + Sync>),
	/// An inbound onion indicated more hops but carried no packet to
	/// forward.
	NoForwardingPacket,
	/// An inbound onion addressed to a forwarding hop illegally carried
	/// final hop payloads.
	UnexpectedFinalPayload,
	/// An inbound onion produced a processing action we do not understand,
	/// or its payload is unusable for the action it produced.
	BadMessage,
	/// The messenger has not been started.
	NotStarted,
	/// The messenger was already started.
	AlreadyStarted,
	/// The messenger is shutting down.
	ShuttingDown,
	/// A handler is already registered for the TLV type.
	HandlerRegistered(u64),
	/// No handler is registered for the TLV type.
	HandlerNotFound(u64),
	/// The node's custom message streams closed, indicating the node has
	/// shut down.
	NodeShutdown,
	/// A node services call failed.
	Node(NodeError),
	/// A sphinx operation failed.
	Sphinx(SphinxError),
	/// Decoding a wire message failed.
	Decode(DecodeError),
	/// A registered onion message handler failed.
	Handler(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for MessengerError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			MessengerError::NoDestination => f.write_str("send request requires a destination"),
			MessengerError::BothDestinations =>
				f.write_str("send request may set only one of peer and blinded destination"),
			MessengerError::NoBlindedHops => f.write_str("blinded destination requires at least one hop"),
			MessengerError::NotFinalPayload(tlv_type) => write!(f, "{}", NotFinalPayload(tlv_type)),
			MessengerError::NoAddresses(ref peer) =>
				write!(f, "peer {} has no advertised addresses", crate::util::macro_logger::DebugPubKey(peer)),
			MessengerError::NoConnection => f.write_str("peer not connected after connection attempt"),
			MessengerError::NoPath => f.write_str("no path to target peer"),
			MessengerError::MissingRoutePubkey(channel_id) =>
				write!(f, "no pubkey for route hop over channel {}", channel_id),
			MessengerError::HopEncoding(hop, ref e) =>
				write!(f, "intermediate node: {} encoding failed: {}", hop, e),
			MessengerError::BadOnionBlob(ref e) => write!(f, "could not process onion blob: {}", e),
			MessengerError::NoForwardingPacket =>
				f.write_str("onion indicated more hops but had no packet to forward"),
			MessengerError::UnexpectedFinalPayload =>
				f.write_str("final hop payloads are illegal on forwarded messages"),
			MessengerError::BadMessage => f.write_str("onion message could not be acted on"),
			MessengerError::NotStarted => f.write_str("messenger not started"),
			MessengerError::AlreadyStarted => f.write_str("messenger already started"),
			MessengerError::ShuttingDown => f.write_str("messenger shutting down"),
			MessengerError::HandlerRegistered(tlv_type) =>
				write!(f, "handler already registered for tlv type {}", tlv_type),
			MessengerError::HandlerNotFound(tlv_type) =>
				write!(f, "no handler registered for tlv type {}", tlv_type),
			MessengerError::NodeShutdown => f.write_str("node shut down"),
			MessengerError::Node(ref e) => write!(f, "{}", e),
			MessengerError::Sphinx(ref e) => write!(f, "{}", e),
			MessengerError::Decode(ref e) => write!(f, "{}", e),
			MessengerError::Handler(ref e) => write!(f, "onion message handler failed: {}", e),
		}
	}
}

impl Error for MessengerError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match *self {
			MessengerError::HopEncoding(_, ref e) => Some(&**e),
			MessengerError::BadOnionBlob(ref e) => Some(&**e),
			MessengerError::Node(ref e) => Some(e),
			MessengerError::Sphinx(ref e) => Some(e),
			MessengerError::Decode(ref e) => Some(e),
			MessengerError::Handler(ref e) => Some(&**e),
			_ => None,
		}
	}
}

impl From<NotFinalPayload> for MessengerError {
	fn from(e: NotFinalPayload) -> Self {
		MessengerError::NotFinalPayload(e.0)
	}
}

impl From<NodeError> for MessengerError {
	fn from(e: NodeError) -> Self {
		MessengerError::Node(e)
	}
}

impl From<SphinxError> for MessengerError {
	fn from(e: SphinxError) -> Self {
		MessengerError::Sphinx(e)
	}
}

impl From<DecodeError> for MessengerError {
	fn from(e: DecodeError) -> Self {
		MessengerError::Decode(e)
	}
}

/// Result type for asynchronous messenger operations, including handler
/// invocations.
pub type AsyncMessengerResult<'a> =
	Pin<Box<dyn Future<Output = Result<(), MessengerError>> + 'a + Send>>;

/// A handler for onion message payloads of a single TLV type, registered
/// with [`OnionMessenger::register_handler`].
///
/// Handlers are invoked on the messenger's receive task and therefore SHOULD
/// hand their work off and return promptly rather than block the dispatch
/// loop; [`PayloadSubscription`] implements that pattern over a channel.
pub trait OnionMessageHandler: Send + Sync {
	/// Called with the payload value addressed to the handler's TLV type,
	/// along with the reply path and encrypted data found alongside it, if
	/// any.
	fn handle_message<'a>(
		&'a self, reply_path: Option<&'a ReplyPath>, encrypted_data: Option<&'a [u8]>,
		value: &'a [u8],
	) -> AsyncMessengerResult<'a>;
}

/// A request to send an onion message.
#[derive(Clone, Debug)]
pub struct SendMessageRequest {
	/// The cleartext peer to deliver the message to. Exactly one of `peer`
	/// and [`blinded_destination`] must be set.
	///
	/// [`blinded_destination`]: SendMessageRequest::blinded_destination
	pub peer: Option<PublicKey>,
	/// The blinded route to deliver the message over, typically a reply path
	/// received from another node.
	pub blinded_destination: Option<ReplyPath>,
	/// A reply path for the recipient to respond over, included in the final
	/// hop's payload.
	pub reply_path: Option<ReplyPath>,
	/// Application payloads for the final hop.
	pub final_payloads: Vec<FinalHopPayload>,
	/// Whether to connect directly to the peer rather than discovering a
	/// multi-hop path to it.
	pub direct_connect: bool,
}

impl SendMessageRequest {
	/// Creates a new send request.
	pub fn new(
		peer: Option<PublicKey>, blinded_destination: Option<ReplyPath>,
		reply_path: Option<ReplyPath>, final_payloads: Vec<FinalHopPayload>,
		direct_connect: bool,
	) -> Self {
		SendMessageRequest { peer, blinded_destination, reply_path, final_payloads, direct_connect }
	}

	/// Checks the request's input invariants: exactly one destination, at
	/// least one hop in a blinded destination, and every final payload type
	/// in the final payload range.
	pub fn validate(&self) -> Result<(), MessengerError> {
		match (&self.peer, &self.blinded_destination) {
			(Some(_), Some(_)) => return Err(MessengerError::BothDestinations),
			(None, None) => return Err(MessengerError::NoDestination),
			(None, Some(destination)) => {
				if destination.hops.is_empty() {
					return Err(MessengerError::NoBlindedHops);
				}
			},
			(Some(_), None) => {},
		}

		for payload in &self.final_payloads {
			validate_final_payload(payload.tlv_type)?;
		}

		Ok(())
	}
}

// We only need to select over multiple futures in two places, and taking on
// the full `tokio/macros` dependency tree in order to do so is excessive.
// Instead, we define trivial two- and three- way selectors and use those.

pub(super) enum SelectorOutput<A, B, C> {
	A(A), B(B), C(C),
}

pub(super) struct TwoSelector<A: Future + Unpin, B: Future + Unpin> {
	pub a: A,
	pub b: B,
}

impl<A: Future + Unpin, B: Future + Unpin> Future for TwoSelector<A, B> {
	type Output = SelectorOutput<A::Output, B::Output, ()>;
	fn poll(mut self: Pin<&mut Self>, ctx: &mut task::Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.a).poll(ctx) {
			Poll::Ready(res) => { return Poll::Ready(SelectorOutput::A(res)); },
			Poll::Pending => {},
		}
		match Pin::new(&mut self.b).poll(ctx) {
			Poll::Ready(res) => { return Poll::Ready(SelectorOutput::B(res)); },
			Poll::Pending => {},
		}
		Poll::Pending
	}
}

pub(super) struct ThreeSelector<A: Future + Unpin, B: Future + Unpin, C: Future + Unpin> {
	pub a: A,
	pub b: B,
	pub c: C,
}

impl<A: Future + Unpin, B: Future + Unpin, C: Future + Unpin> Future for ThreeSelector<A, B, C> {
	type Output = SelectorOutput<A::Output, B::Output, C::Output>;
	fn poll(mut self: Pin<&mut Self>, ctx: &mut task::Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.a).poll(ctx) {
			Poll::Ready(res) => { return Poll::Ready(SelectorOutput::A(res)); },
			Poll::Pending => {},
		}
		match Pin::new(&mut self.b).poll(ctx) {
			Poll::Ready(res) => { return Poll::Ready(SelectorOutput::B(res)); },
			Poll::Pending => {},
		}
		match Pin::new(&mut self.c).poll(ctx) {
			Poll::Ready(res) => { return Poll::Ready(SelectorOutput::C(res)); },
			Poll::Pending => {},
		}
		Poll::Pending
	}
}

// The inbound pipeline consumes its collaborators through single-operation
// traits so that tests can inject synchronous stubs for each stage.

pub(super) trait ProcessOnion: Send + Sync {
	fn process_onion(&self, onion_blob: &[u8], blinding_point: &PublicKey)
		-> Result<(PublicKey, ProcessedPacket), SphinxError>;
}

pub(super) trait DecodePayload: Send + Sync {
	fn decode_payload(&self, payload: &[u8]) -> Result<OnionMessagePayload, DecodeError>;
}

pub(super) trait DecryptBlob: Send + Sync {
	fn decrypt_blob(&self, blinding_point: &PublicKey, payload: &OnionMessagePayload)
		-> Result<BlindedRouteData, MessengerError>;
}

pub(super) trait ForwardMessage: Send + Sync {
	fn forward_message<'a>(
		&'a self, route_data: &'a BlindedRouteData, blinding_point: &'a PublicKey,
		onion_packet: &'a [u8],
	) -> AsyncMessengerResult<'a>;
}

/// The full set of capabilities the inbound pipeline needs to handle one
/// onion message.
pub(super) struct OnionMessageKit<PO: ProcessOnion, DP: DecodePayload, DB: DecryptBlob, FM: ForwardMessage> {
	process_onion: PO,
	decode_payload: DP,
	decrypt_blob: DB,
	forward_message: FM,
	handlers: Arc<RwLock<HashMap<u64, Arc<dyn OnionMessageHandler>>>>,
}

struct SphinxProcessor<S: Deref> where S::Target: OnionRouter {
	onion_router: S,
}

impl<S: Deref + Send + Sync> ProcessOnion for SphinxProcessor<S> where S::Target: OnionRouter {
	fn process_onion(&self, onion_blob: &[u8], blinding_point: &PublicKey)
		-> Result<(PublicKey, ProcessedPacket), SphinxError>
	{
		self.onion_router.process_onion(onion_blob, blinding_point)
	}
}

struct PayloadDecoder;

impl DecodePayload for PayloadDecoder {
	fn decode_payload(&self, payload: &[u8]) -> Result<OnionMessagePayload, DecodeError> {
		OnionMessagePayload::read(&mut &payload[..])
	}
}

struct BlobDecryptor<S: Deref> where S::Target: OnionRouter {
	onion_router: S,
}

impl<S: Deref + Send + Sync> DecryptBlob for BlobDecryptor<S> where S::Target: OnionRouter {
	fn decrypt_blob(&self, blinding_point: &PublicKey, payload: &OnionMessagePayload)
		-> Result<BlindedRouteData, MessengerError>
	{
		// A forwarding hop must carry a routing blob, otherwise there is no
		// way to learn the next node.
		let encrypted_data = match payload.encrypted_data {
			Some(ref data) => data,
			None => return Err(MessengerError::BadMessage),
		};

		let data = self.onion_router.decrypt_data_blob(blinding_point, encrypted_data)
			.map_err(MessengerError::Sphinx)?;
		BlindedRouteData::read(&mut &data[..]).map_err(MessengerError::Decode)
	}
}

struct MessageForwarder<N: Deref> where N::Target: NodeClient {
	node: N,
}

impl<N: Deref + Send + Sync> ForwardMessage for MessageForwarder<N> where N::Target: NodeClient {
	fn forward_message<'a>(
		&'a self, route_data: &'a BlindedRouteData, blinding_point: &'a PublicKey,
		onion_packet: &'a [u8],
	) -> AsyncMessengerResult<'a> {
		Box::pin(async move {
			// Forwards go out over the connection the message came through
			// the network on, so the next node is expected to already be a
			// peer and no connection resolution happens here.
			let next_node_id = match route_data.next_node_id {
				Some(next_node_id) => next_node_id,
				None => return Err(MessengerError::BadMessage),
			};

			let message = OnionMessage::new(*blinding_point, onion_packet.to_vec());
			let custom_message = CustomMessage {
				peer: next_node_id,
				msg_type: ONION_MESSAGES_TYPE,
				value: message.encode(),
			};
			self.node.send_custom_message(custom_message).await.map_err(MessengerError::Node)
		})
	}
}

/// Handles a single inbound custom message carrying an onion message:
/// processes the onion, decodes the payload addressed to us, and either
/// dispatches it to registered handlers or forwards it to the next hop.
async fn handle_onion_message<PO, DP, DB, FM>(
	msg: &CustomMessage, kit: &OnionMessageKit<PO, DP, DB, FM>,
) -> Result<(), MessengerError>
where
	PO: ProcessOnion,
	DP: DecodePayload,
	DB: DecryptBlob,
	FM: ForwardMessage,
{
	let onion_msg = OnionMessage::read(&mut &msg.value[..])
		.map_err(|e| MessengerError::BadOnionBlob(Box::new(e)))?;

	let (forward_blinding, packet) = kit.process_onion
		.process_onion(&onion_msg.onion_blob, &onion_msg.blinding_point)
		.map_err(|e| MessengerError::BadOnionBlob(Box::new(e)))?;

	let payload = kit.decode_payload.decode_payload(&packet.payload)
		.map_err(MessengerError::Decode)?;

	match packet.action {
		PacketAction::ExitNode => {
			for final_payload in &payload.final_hop_payloads {
				// Payload types nobody subscribed to are fine to drop.
				let handler = {
					let handlers = kit.handlers.read().unwrap();
					handlers.get(&final_payload.tlv_type).cloned()
				};
				if let Some(handler) = handler {
					handler.handle_message(
						payload.reply_path.as_ref(),
						payload.encrypted_data.as_deref(),
						&final_payload.value,
					).await?;
				}
			}
			Ok(())
		},
		PacketAction::MoreHops => {
			if !payload.final_hop_payloads.is_empty() {
				return Err(MessengerError::UnexpectedFinalPayload);
			}
			let next_packet = match packet.next_packet {
				Some(ref next_packet) => next_packet,
				None => return Err(MessengerError::NoForwardingPacket),
			};

			let route_data = kit.decrypt_blob.decrypt_blob(&onion_msg.blinding_point, &payload)?;
			kit.forward_message.forward_message(&route_data, &forward_blinding, next_packet).await
		},
		// Anything else is a processing outcome we don't understand; assume
		// nothing about what future action codes mean.
		_ => Err(MessengerError::BadMessage),
	}
}

/// The messenger's single background task: consumes the node's inbound
/// custom-message streams until the node shuts down, the subscription fails,
/// or the messenger is stopped.
///
/// Errors on individual messages never exit the loop; one bad onion must not
/// take the messenger down. Subscription-level failures are reported through
/// `request_shutdown`, exactly once.
async fn receive_onion_messages<PO, DP, DB, FM, L, RS>(
	mut messages: mpsc::Receiver<CustomMessage>, mut errors: mpsc::Receiver<NodeError>,
	mut quit: watch::Receiver<bool>, kit: OnionMessageKit<PO, DP, DB, FM>,
	request_shutdown: RS, logger: L,
) where
	PO: ProcessOnion,
	DP: DecodePayload,
	DB: DecryptBlob,
	FM: ForwardMessage,
	L: Deref,
	L::Target: Logger,
	RS: FnOnce(MessengerError),
{
	loop {
		let selector = ThreeSelector {
			a: Box::pin(messages.recv()),
			b: Box::pin(errors.recv()),
			c: Box::pin(quit.changed()),
		};
		match selector.await {
			SelectorOutput::A(Some(msg)) => {
				if msg.msg_type != ONION_MESSAGES_TYPE {
					log_trace!(logger, "Ignoring custom message of type {}", msg.msg_type);
					continue;
				}
				if let Err(e) = handle_onion_message(&msg, &kit).await {
					log_error!(
						logger, "Error handling onion message from peer {}: {}",
						log_pubkey!(msg.peer), e
					);
				}
			},
			SelectorOutput::A(None) | SelectorOutput::B(None) => {
				log_debug!(logger, "Custom message streams closed, requesting shutdown");
				request_shutdown(MessengerError::NodeShutdown);
				break;
			},
			SelectorOutput::B(Some(e)) => {
				log_error!(logger, "Message subscription failed: {}", e);
				request_shutdown(MessengerError::Node(e));
				break;
			},
			SelectorOutput::C(_) => break,
		}
	}
}

/// Resolves a multi-hop path of node public keys to the target by querying
/// the routing layer with a placeholder amount. Returns `None` when the
/// routing layer knows no path to the target.
pub(super) async fn multi_hop_path<N: NodeClient + ?Sized>(
	node: &N, target: &PublicKey,
) -> Result<Option<Vec<PublicKey>>, MessengerError> {
	let hops = match node.query_routes(target, PATH_DISCOVERY_AMOUNT_MSAT).await {
		Ok(hops) => hops,
		Err(e) if e.kind() == NodeErrorKind::NotFound => return Ok(None),
		Err(e) => return Err(MessengerError::Node(e)),
	};

	if hops.is_empty() {
		return Ok(None);
	}

	let mut path = Vec::with_capacity(hops.len());
	for hop in hops {
		match hop.pubkey {
			Some(pubkey) => path.push(pubkey),
			None => return Err(MessengerError::MissingRoutePubkey(hop.channel_id)),
		}
	}

	Ok(Some(path))
}

/// A sender, receiver and forwarder of onion messages over a host node's
/// custom-message transport.
///
/// # Sending
///
/// [`send_message`] may be called from any task once the messenger exists;
/// it does not depend on [`start`]. A request addresses either a cleartext
/// peer - reached directly (connecting first if needed) or over a discovered
/// multi-hop path - or a blinded destination, whose introduction node must
/// be reachable as a direct peer.
///
/// # Receiving
///
/// [`start`] subscribes to the node's inbound custom messages and spawns a
/// single background task which processes them in subscription order.
/// Messages terminating at this node are dispatched to the
/// [`OnionMessageHandler`] registered for each final payload's TLV type;
/// messages for other nodes are re-wrapped and forwarded. Fatal subscription
/// failures are delivered to the `request_shutdown` closure supplied at
/// construction, exactly once, after which the host should call [`stop`].
///
/// [`send_message`]: OnionMessenger::send_message
/// [`start`]: OnionMessenger::start
/// [`stop`]: OnionMessenger::stop
pub struct OnionMessenger<N: Deref, S: Deref, L: Deref, RS>
where
	N::Target: NodeClient,
	S::Target: OnionRouter,
	L::Target: Logger,
	RS: FnOnce(MessengerError) + Send + 'static,
{
	node: N,
	onion_router: S,
	logger: L,
	handlers: Arc<RwLock<HashMap<u64, Arc<dyn OnionMessageHandler>>>>,
	request_shutdown: Mutex<Option<RS>>,
	quit: watch::Sender<bool>,
	receive_task: Mutex<Option<JoinHandle<()>>>,
	started: AtomicBool,
	stopped: AtomicBool,
	lookup_peer_attempts: usize,
	lookup_peer_backoff: Duration,
}

impl<N, S, L, RS> OnionMessenger<N, S, L, RS>
where
	N: Deref + Clone + Send + Sync + 'static,
	S: Deref + Clone + Send + Sync + 'static,
	L: Deref + Clone + Send + Sync + 'static,
	N::Target: NodeClient,
	S::Target: OnionRouter,
	L::Target: Logger,
	RS: FnOnce(MessengerError) + Send + 'static,
{
	/// Constructs a new `OnionMessenger` over the given node and sphinx
	/// capabilities. `request_shutdown` is invoked (at most once) when the
	/// messenger encounters a failure it cannot recover from, such as the
	/// node's message streams closing underneath it.
	pub fn new(node: N, onion_router: S, logger: L, request_shutdown: RS) -> Self {
		let (quit, _) = watch::channel(false);
		OnionMessenger {
			node,
			onion_router,
			logger,
			handlers: Arc::new(RwLock::new(HashMap::new())),
			request_shutdown: Mutex::new(Some(request_shutdown)),
			quit,
			receive_task: Mutex::new(None),
			started: AtomicBool::new(false),
			stopped: AtomicBool::new(false),
			lookup_peer_attempts: DEFAULT_LOOKUP_PEER_ATTEMPTS,
			lookup_peer_backoff: DEFAULT_LOOKUP_PEER_BACKOFF,
		}
	}

	/// Overrides how often and how patiently an outgoing peer is polled for
	/// after a connection attempt.
	pub fn with_peer_lookup(mut self, attempts: usize, backoff: Duration) -> Self {
		self.lookup_peer_attempts = attempts;
		self.lookup_peer_backoff = backoff;
		self
	}

	/// A signal that fires when the messenger is stopped. Handlers that hand
	/// messages off to other tasks use this to avoid outliving the
	/// messenger, see [`PayloadSubscription`].
	pub fn quit_signal(&self) -> watch::Receiver<bool> {
		self.quit.subscribe()
	}

	/// Subscribes to the node's inbound custom messages and spawns the
	/// background task that dispatches them. May be called exactly once.
	pub async fn start(&self) -> Result<(), MessengerError> {
		if self.started.swap(true, Ordering::AcqRel) {
			return Err(MessengerError::AlreadyStarted);
		}

		let request_shutdown = match self.request_shutdown.lock().unwrap().take() {
			Some(request_shutdown) => request_shutdown,
			None => return Err(MessengerError::AlreadyStarted),
		};

		let (messages, errors) = self.node.subscribe_custom_messages().await
			.map_err(MessengerError::Node)?;

		let kit = OnionMessageKit {
			process_onion: SphinxProcessor { onion_router: self.onion_router.clone() },
			decode_payload: PayloadDecoder,
			decrypt_blob: BlobDecryptor { onion_router: self.onion_router.clone() },
			forward_message: MessageForwarder { node: self.node.clone() },
			handlers: Arc::clone(&self.handlers),
		};

		let task = tokio::spawn(receive_onion_messages(
			messages, errors, self.quit.subscribe(), kit, request_shutdown,
			self.logger.clone(),
		));
		*self.receive_task.lock().unwrap() = Some(task);

		log_info!(self.logger, "Onion messenger started");
		Ok(())
	}

	/// Signals the background task to exit and waits for it. May be called
	/// exactly once, after [`start`].
	///
	/// [`start`]: OnionMessenger::start
	pub async fn stop(&self) -> Result<(), MessengerError> {
		if !self.started.load(Ordering::Acquire) {
			return Err(MessengerError::NotStarted);
		}
		if self.stopped.swap(true, Ordering::AcqRel) {
			return Err(MessengerError::ShuttingDown);
		}

		let _ = self.quit.send(true);
		let task = self.receive_task.lock().unwrap().take();
		if let Some(task) = task {
			let _ = task.await;
		}

		log_info!(self.logger, "Onion messenger stopped");
		Ok(())
	}

	/// Registers a handler to be invoked with every final hop payload of the
	/// given TLV type addressed to this node. The type must lie in the final
	/// payload range and not be claimed by another handler.
	pub fn register_handler(
		&self, tlv_type: u64, handler: Arc<dyn OnionMessageHandler>,
	) -> Result<(), MessengerError> {
		if !self.started.load(Ordering::Acquire) {
			return Err(MessengerError::NotStarted);
		}
		if self.stopped.load(Ordering::Acquire) {
			return Err(MessengerError::ShuttingDown);
		}
		validate_final_payload(tlv_type)?;

		match self.handlers.write().unwrap().entry(tlv_type) {
			Entry::Occupied(_) => Err(MessengerError::HandlerRegistered(tlv_type)),
			Entry::Vacant(entry) => {
				entry.insert(handler);
				Ok(())
			},
		}
	}

	/// Removes the handler registered for the given TLV type.
	pub fn deregister_handler(&self, tlv_type: u64) -> Result<(), MessengerError> {
		if !self.started.load(Ordering::Acquire) {
			return Err(MessengerError::NotStarted);
		}
		if self.stopped.load(Ordering::Acquire) {
			return Err(MessengerError::ShuttingDown);
		}

		match self.handlers.write().unwrap().remove(&tlv_type) {
			Some(_) => Ok(()),
			None => Err(MessengerError::HandlerNotFound(tlv_type)),
		}
	}

	/// Sends an onion message as described by the request: resolves how to
	/// reach the first hop, builds and blinds the route, wraps it in an
	/// onion, and hands the result to the node as a custom message.
	pub async fn send_message(&self, request: &SendMessageRequest) -> Result<(), MessengerError> {
		request.validate()?;

		let (peer, route) = match (&request.peer, &request.blinded_destination) {
			(Some(peer), None) => {
				let path = if request.direct_connect {
					self.lookup_and_connect(peer).await?;
					vec![*peer]
				} else {
					match multi_hop_path(&*self.node, peer).await? {
						Some(path) if !path.is_empty() => path,
						_ => return Err(MessengerError::NoPath),
					}
				};

				let hops = blinded_path_hops(&path, &BlindedDataEncoder)?;
				let route = self.onion_router.blind_path(&hops).map_err(MessengerError::Sphinx)?;
				(path[0], route)
			},
			(None, Some(destination)) => {
				// A blinded destination is already a blinded route; its
				// introduction node must be reachable as a direct peer
				// because nothing in the route can splice us further away.
				self.lookup_and_connect(&destination.first_node_id).await?;
				(destination.first_node_id, reply_path_to_route(destination))
			},
			// validate() enforces exactly one destination.
			_ => {
				debug_assert!(false, "validated request had no destination");
				return Err(MessengerError::NoDestination);
			},
		};

		let sphinx_path = blinded_to_sphinx(&route, request.reply_path.as_ref(), &request.final_payloads)?;
		let onion_packet = self.onion_router.create_onion(&sphinx_path)
			.map_err(MessengerError::Sphinx)?;

		let message = OnionMessage::new(route.blinding_point, onion_packet);
		log_trace!(self.logger, "Sending onion message to peer {}", log_pubkey!(peer));
		self.node.send_custom_message(CustomMessage {
			peer,
			msg_type: ONION_MESSAGES_TYPE,
			value: message.encode(),
		}).await.map_err(MessengerError::Node)
	}

	/// Makes sure we have a connection to the peer: checks the current peer
	/// list, and failing that looks the peer up in the graph, connects to
	/// its advertised address, and polls until the connection (and its
	/// handshake) completes.
	async fn lookup_and_connect(&self, peer: &PublicKey) -> Result<(), MessengerError> {
		let peers = self.node.list_peers().await.map_err(MessengerError::Node)?;
		if peers.contains(peer) {
			return Ok(());
		}

		log_debug!(
			self.logger, "Peer {} not connected, looking up its addresses",
			log_pubkey!(peer)
		);
		let node_info = self.node.get_node_info(peer).await.map_err(MessengerError::Node)?;
		if node_info.addresses.is_empty() {
			return Err(MessengerError::NoAddresses(*peer));
		}

		let address = &node_info.addresses[0];
		self.node.connect_peer(peer, address, true).await.map_err(MessengerError::Node)?;

		// The connection races the send: poll the peer list until the
		// handshake completes, backing off between attempts.
		for attempt in 0..self.lookup_peer_attempts {
			let peers = self.node.list_peers().await.map_err(MessengerError::Node)?;
			if peers.contains(peer) {
				return Ok(());
			}

			log_trace!(
				self.logger, "Peer {} not yet connected, attempt {}", log_pubkey!(peer),
				attempt
			);
			tokio::time::sleep(self.lookup_peer_backoff).await;
		}

		Err(MessengerError::NoConnection)
	}
}

/// An onion message payload delivered through a [`PayloadSubscription`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnionPayload {
	/// The reply path the sender included, if any.
	pub reply_path: Option<ReplyPath>,
	/// The payload value.
	pub value: Vec<u8>,
}

/// An [`OnionMessageHandler`] which forwards payloads into a channel,
/// bridging the messenger's dispatch loop to a consumer task such as an RPC
/// stream.
///
/// The channel is buffered by one message and delivery races the messenger's
/// quit signal, so a stalled consumer can delay the dispatch loop by at most
/// one in-flight payload and never wedges shutdown.
pub struct PayloadSubscription {
	sender: mpsc::Sender<OnionPayload>,
	quit: watch::Receiver<bool>,
}

impl PayloadSubscription {
	/// Creates a subscription handler and the receiving end its payloads are
	/// delivered to. The quit signal should come from
	/// [`OnionMessenger::quit_signal`].
	pub fn new(quit: watch::Receiver<bool>) -> (Self, mpsc::Receiver<OnionPayload>) {
		let (sender, receiver) = mpsc::channel(1);
		(PayloadSubscription { sender, quit }, receiver)
	}
}

impl OnionMessageHandler for PayloadSubscription {
	fn handle_message<'a>(
		&'a self, reply_path: Option<&'a ReplyPath>, _encrypted_data: Option<&'a [u8]>,
		value: &'a [u8],
	) -> AsyncMessengerResult<'a> {
		Box::pin(async move {
			let mut quit = self.quit.clone();
			if *quit.borrow() {
				return Err(MessengerError::ShuttingDown);
			}

			let payload = OnionPayload {
				reply_path: reply_path.cloned(),
				value: value.to_vec(),
			};
			let selector = TwoSelector {
				a: Box::pin(self.sender.send(payload)),
				b: Box::pin(quit.changed()),
			};
			match selector.await {
				SelectorOutput::A(Ok(())) => Ok(()),
				// The receiver is gone or the messenger is stopping; either
				// way the subscription is over.
				SelectorOutput::A(Err(_)) => Err(MessengerError::ShuttingDown),
				SelectorOutput::B(_) | SelectorOutput::C(_) => Err(MessengerError::ShuttingDown),
			}
		})
	}
}
