// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};

use tokio::sync::mpsc;

use crate::node::{AsyncNodeResult, CustomMessage, NodeClient, NodeError, NodeInfo, RouteHop};
use crate::sphinx::{
	BlindedPath, BlindedPathHop, OnionRouter, PaymentPath, ProcessedPacket, SphinxError,
};
use crate::util::logger::{Logger, Record};

use std::collections::VecDeque;
use std::sync::Mutex;

/// A deterministic test public key derived from the given non-zero byte.
pub fn pubkey(byte: u8) -> PublicKey {
	debug_assert!(byte != 0);
	let secp_ctx = Secp256k1::new();
	let secret_key = SecretKey::from_slice(&[byte; 32]).unwrap();
	PublicKey::from_secret_key(&secp_ctx, &secret_key)
}

pub struct TestLogger {
	id: String,
	lines: Mutex<Vec<String>>,
}

impl TestLogger {
	pub fn new() -> TestLogger {
		Self::with_id("".to_string())
	}

	pub fn with_id(id: String) -> TestLogger {
		TestLogger {
			id,
			lines: Mutex::new(Vec::new()),
		}
	}

	#[allow(dead_code)]
	pub fn assert_log_contains(&self, needle: &str, count: usize) {
		let lines = self.lines.lock().unwrap();
		let found = lines.iter().filter(|line| line.contains(needle)).count();
		assert_eq!(found, count, "expected {} lines containing {:?}, found {}", count, needle, found);
	}
}

impl Logger for TestLogger {
	fn log(&self, record: &Record) {
		let line = format!(
			"{:<5} [{} : {}] {}", record.level, record.module_path, record.line, record.args,
		);
		println!("{} {}", self.id, line);
		self.lines.lock().unwrap().push(line);
	}
}

/// One scripted response of a [`MockNodeClient`]. Calls are consumed in the
/// order they were primed with [`MockNodeClient::expect`]; a call the script
/// did not anticipate panics the test.
#[derive(Debug)]
pub enum MockNodeCall {
	ListPeers(Result<Vec<PublicKey>, NodeError>),
	GetNodeInfo(Result<NodeInfo, NodeError>),
	ConnectPeer(Result<(), NodeError>),
	SendCustomMessage(Result<(), NodeError>),
	QueryRoutes(Result<Vec<RouteHop>, NodeError>),
}

/// A [`NodeClient`] driven by a per-test script of expected calls.
pub struct MockNodeClient {
	expected: Mutex<VecDeque<MockNodeCall>>,
	sent: Mutex<Vec<CustomMessage>>,
	subscription: Mutex<Option<(mpsc::Receiver<CustomMessage>, mpsc::Receiver<NodeError>)>>,
}

impl MockNodeClient {
	pub fn new() -> Self {
		MockNodeClient {
			expected: Mutex::new(VecDeque::new()),
			sent: Mutex::new(Vec::new()),
			subscription: Mutex::new(None),
		}
	}

	pub fn expect(&self, call: MockNodeCall) {
		self.expected.lock().unwrap().push_back(call);
	}

	/// Sets the streams the next [`NodeClient::subscribe_custom_messages`]
	/// call hands out.
	pub fn prime_subscription(
		&self, messages: mpsc::Receiver<CustomMessage>, errors: mpsc::Receiver<NodeError>,
	) {
		*self.subscription.lock().unwrap() = Some((messages, errors));
	}

	/// The custom messages sent through the client, in order.
	pub fn sent_messages(&self) -> Vec<CustomMessage> {
		self.sent.lock().unwrap().clone()
	}

	/// Asserts that the whole call script was consumed.
	pub fn assert_complete(&self) {
		let expected = self.expected.lock().unwrap();
		assert!(expected.is_empty(), "unconsumed node calls: {:?}", *expected);
	}

	fn next_call(&self) -> MockNodeCall {
		self.expected.lock().unwrap().pop_front().expect("node called with an empty script")
	}
}

impl NodeClient for MockNodeClient {
	fn list_peers<'a>(&'a self) -> AsyncNodeResult<'a, Vec<PublicKey>> {
		Box::pin(async move {
			match self.next_call() {
				MockNodeCall::ListPeers(result) => result,
				other => panic!("expected list_peers, script had {:?}", other),
			}
		})
	}

	fn get_node_info<'a>(&'a self, _node_id: &'a PublicKey) -> AsyncNodeResult<'a, NodeInfo> {
		Box::pin(async move {
			match self.next_call() {
				MockNodeCall::GetNodeInfo(result) => result,
				other => panic!("expected get_node_info, script had {:?}", other),
			}
		})
	}

	fn connect_peer<'a>(&'a self, _node_id: &'a PublicKey, _address: &'a str, _permanent: bool)
		-> AsyncNodeResult<'a, ()>
	{
		Box::pin(async move {
			match self.next_call() {
				MockNodeCall::ConnectPeer(result) => result,
				other => panic!("expected connect_peer, script had {:?}", other),
			}
		})
	}

	fn send_custom_message<'a>(&'a self, message: CustomMessage) -> AsyncNodeResult<'a, ()> {
		Box::pin(async move {
			self.sent.lock().unwrap().push(message);
			match self.next_call() {
				MockNodeCall::SendCustomMessage(result) => result,
				other => panic!("expected send_custom_message, script had {:?}", other),
			}
		})
	}

	fn subscribe_custom_messages<'a>(&'a self)
		-> AsyncNodeResult<'a, (mpsc::Receiver<CustomMessage>, mpsc::Receiver<NodeError>)>
	{
		Box::pin(async move {
			Ok(self.subscription.lock().unwrap().take().expect("subscription not primed"))
		})
	}

	fn query_routes<'a>(&'a self, _target: &'a PublicKey, _amount_msat: u64)
		-> AsyncNodeResult<'a, Vec<RouteHop>>
	{
		Box::pin(async move {
			match self.next_call() {
				MockNodeCall::QueryRoutes(result) => result,
				other => panic!("expected query_routes, script had {:?}", other),
			}
		})
	}
}

/// An [`OnionRouter`] whose blinding derives a transparent dummy route from
/// its input and whose processing results are primed per test. Processing an
/// onion without priming fails, which stands in for any junk packet.
pub struct MockOnionRouter {
	process_onion: Mutex<VecDeque<Result<(PublicKey, ProcessedPacket), SphinxError>>>,
	decrypt_blobs: Mutex<VecDeque<Result<Vec<u8>, SphinxError>>>,
	created_onions: Mutex<Vec<PaymentPath>>,
}

impl MockOnionRouter {
	pub fn new() -> Self {
		MockOnionRouter {
			process_onion: Mutex::new(VecDeque::new()),
			decrypt_blobs: Mutex::new(VecDeque::new()),
			created_onions: Mutex::new(Vec::new()),
		}
	}

	pub fn prime_process_onion(&self, result: Result<(PublicKey, ProcessedPacket), SphinxError>) {
		self.process_onion.lock().unwrap().push_back(result);
	}

	#[allow(dead_code)]
	pub fn prime_decrypt_blob(&self, result: Result<Vec<u8>, SphinxError>) {
		self.decrypt_blobs.lock().unwrap().push_back(result);
	}

	/// The sphinx paths onions were created from, in order.
	pub fn created_onions(&self) -> Vec<PaymentPath> {
		self.created_onions.lock().unwrap().clone()
	}
}

impl OnionRouter for MockOnionRouter {
	fn blind_path(&self, hops: &[BlindedPathHop]) -> Result<BlindedPath, SphinxError> {
		assert!(!hops.is_empty(), "blinding an empty path");
		Ok(BlindedPath {
			introduction_point: hops[0].node_pub,
			blinding_point: hops[0].node_pub,
			blinded_hops: hops.iter().map(|hop| hop.node_pub).collect(),
			encrypted_data: hops.iter()
				.map(|hop| hop.payload.clone().unwrap_or_default())
				.collect(),
		})
	}

	fn create_onion(&self, path: &PaymentPath) -> Result<Vec<u8>, SphinxError> {
		self.created_onions.lock().unwrap().push(path.clone());
		Ok(vec![1, 2, 3])
	}

	fn process_onion(&self, _onion_blob: &[u8], _blinding_point: &PublicKey)
		-> Result<(PublicKey, ProcessedPacket), SphinxError>
	{
		self.process_onion.lock().unwrap().pop_front()
			.unwrap_or_else(|| Err(SphinxError::new("unprocessable onion")))
	}

	fn decrypt_data_blob(&self, _blinding_point: &PublicKey, _encrypted_data: &[u8])
		-> Result<Vec<u8>, SphinxError>
	{
		self.decrypt_blobs.lock().unwrap().pop_front()
			.unwrap_or_else(|| Err(SphinxError::new("undecryptable blob")))
	}

	fn ecdh(&self, _remote_point: &PublicKey) -> Result<[u8; 32], SphinxError> {
		Ok([0; 32])
	}
}
