// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! An abstract interface over the services of the enclosing Lightning node.
//!
//! The messenger never talks to a node implementation directly; everything it
//! needs - the peer list, the graph, connection establishment, the
//! custom-message transport, and route queries - is consumed through the
//! [`NodeClient`] trait so that any node backend (or a test mock) can host
//! it.

use bitcoin::secp256k1::PublicKey;

use tokio::sync::mpsc;

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Result type for [`NodeClient`] requests.
pub type NodeResult<T> = Result<T, NodeError>;

// TODO: Replace with NodeResult once `async` trait functions are supported.
// For details, see: https://areweasyncyet.rs.
/// Result type for asynchronous [`NodeClient`] requests.
pub type AsyncNodeResult<'a, T> = Pin<Box<dyn Future<Output = NodeResult<T>> + 'a + Send>>;

/// Error type for [`NodeClient`] requests.
///
/// Transient errors may be resolved when re-polling, but no attempt will be
/// made to re-poll on persistent errors.
#[derive(Debug)]
pub struct NodeError {
	kind: NodeErrorKind,
	error: Box<dyn Error + Send + Sync>,
}

/// The kind of [`NodeError`], either persistent, transient, or a lookup that
/// found nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeErrorKind {
	/// Indicates an error that won't resolve when retrying a request (e.g.,
	/// invalid data).
	Persistent,

	/// Indicates an error that may resolve when retrying a request (e.g.,
	/// unresponsive).
	Transient,

	/// Indicates a lookup which completed but found nothing, such as a node
	/// missing from the graph or a route query with no path to the target.
	NotFound,
}

impl NodeError {
	/// Creates a new persistent error originated from the given error.
	pub fn persistent<E>(error: E) -> Self
	where E: Into<Box<dyn Error + Send + Sync>> {
		Self {
			kind: NodeErrorKind::Persistent,
			error: error.into(),
		}
	}

	/// Creates a new transient error originated from the given error.
	pub fn transient<E>(error: E) -> Self
	where E: Into<Box<dyn Error + Send + Sync>> {
		Self {
			kind: NodeErrorKind::Transient,
			error: error.into(),
		}
	}

	/// Creates a new not-found error originated from the given error.
	pub fn not_found<E>(error: E) -> Self
	where E: Into<Box<dyn Error + Send + Sync>> {
		Self {
			kind: NodeErrorKind::NotFound,
			error: error.into(),
		}
	}

	/// Returns the kind of error.
	pub fn kind(&self) -> NodeErrorKind {
		self.kind
	}

	/// Converts the error into the underlying error.
	pub fn into_inner(self) -> Box<dyn Error + Send + Sync> {
		self.error
	}
}

impl fmt::Display for NodeError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{:?} node error: {}", self.kind, self.error)
	}
}

impl Error for NodeError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		Some(self.error.as_ref())
	}
}

/// Addressing information for a node, looked up from the graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
	/// The network addresses the node has advertised, if any.
	pub addresses: Vec<String>,
}

/// A custom message exchanged with a peer over the node's custom-message
/// transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomMessage {
	/// The peer the message was received from or should be sent to.
	pub peer: PublicKey,
	/// The custom message type.
	pub msg_type: u16,
	/// The raw message value.
	pub value: Vec<u8>,
}

/// One hop of a route returned by [`NodeClient::query_routes`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteHop {
	/// The channel the hop traverses.
	pub channel_id: u64,
	/// The public key of the hop's node, if the routing layer surfaced it.
	pub pubkey: Option<PublicKey>,
}

/// Abstract type for the node services the messenger consumes.
pub trait NodeClient: Send + Sync {
	/// Returns the public keys of the peers we currently have a connection
	/// with.
	fn list_peers<'a>(&'a self) -> AsyncNodeResult<'a, Vec<PublicKey>>;

	/// Looks up a node's announced information in the graph. Fails with a
	/// [`NodeErrorKind::NotFound`] error if the node is not known.
	fn get_node_info<'a>(&'a self, node_id: &'a PublicKey) -> AsyncNodeResult<'a, NodeInfo>;

	/// Attempts a connection to the given node at the given address. If
	/// `permanent`, the node should retain the peer across restarts.
	fn connect_peer<'a>(&'a self, node_id: &'a PublicKey, address: &'a str, permanent: bool)
		-> AsyncNodeResult<'a, ()>;

	/// Sends a custom message to a connected peer.
	fn send_custom_message<'a>(&'a self, message: CustomMessage) -> AsyncNodeResult<'a, ()>;

	/// Subscribes to custom messages received by the node, returning a stream
	/// of messages and a stream of subscription errors. Both streams are
	/// closed when the node shuts down.
	fn subscribe_custom_messages<'a>(&'a self)
		-> AsyncNodeResult<'a, (mpsc::Receiver<CustomMessage>, mpsc::Receiver<NodeError>)>;

	/// Queries the routing layer for a route to the target, moving the
	/// provided amount. Fails with a [`NodeErrorKind::NotFound`] error (or
	/// returns an empty route) when the target is unreachable.
	fn query_routes<'a>(&'a self, target: &'a PublicKey, amount_msat: u64)
		-> AsyncNodeResult<'a, Vec<RouteHop>>;
}
