//! chatwarden - a resilient chat-bot runtime.
//!
//! The engine is the part of a chat bot that survives contact with
//! production: session credentials that corrupt on disk, connections that
//! drop with ambiguous close codes, decryption failures that loop forever,
//! command floods, and an AI backend that takes minutes to answer. The
//! actual chat protocol stays behind the [`transport`] seam; everything
//! else here is transport-agnostic and driven by scripted transports in
//! tests.
//!
//! Data flow: [`supervisor`] owns the connect/reconnect loop and feeds raw
//! events through [`normalize`] into [`dispatch`], which applies the
//! [`rate`] limits and runs command handlers, including the long-running
//! AI task in [`task`]. Credential persistence and repair live in [`auth`].

pub mod auth;
pub mod config;
pub mod contact;
pub mod dispatch;
pub mod error;
pub mod normalize;
pub mod rate;
pub mod repl;
pub mod stats;
pub mod supervisor;
pub mod task;
pub mod transport;
pub mod vcard;

pub use error::{Error, Result};
