// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! An onion messenger for Lightning nodes which expose a custom-message
//! transport.
//!
//! The messenger sends onion messages over blinded routes, forwards messages
//! addressed to other nodes, and dispatches messages addressed to us to
//! per-TLV-type handlers. It is deliberately node-agnostic: the enclosing
//! node is consumed through the [`node::NodeClient`] capability (peer
//! listing, connection, custom messages, route queries) and all mix-net
//! cryptography through the [`sphinx::OnionRouter`] capability, so any node
//! with a custom-message transport and a sphinx implementation can host it.
//!
//! Sends run on caller tasks; a single background task, spawned by
//! [`OnionMessenger::start`], consumes the node's inbound custom-message
//! stream and must run inside a Tokio runtime.
//!
//! [`OnionMessenger::start`]: onion_message::OnionMessenger::start

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

#![deny(missing_docs)]
#![deny(unsafe_code)]

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate bitcoin;
#[cfg(test)]
extern crate hex;

#[macro_use]
pub mod util;
pub mod node;
pub mod onion_message;
pub mod sphinx;
pub mod wire;
