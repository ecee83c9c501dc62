//! Multi-client text chat relay.
//!
//! Clients connect over TCP, send a screen name as their first line and then chat with
//! newline-delimited text. Plain lines are broadcast to everyone and echoed back to the
//! sender; `_createmessageroom_<name>` invites another user to a private chat and
//! `_pm<name>_<text>` delivers text privately.
//!
//! - [`relay`] binds the listener and spawns one session task per connection.
//! - [`session`] runs the handshake and command loop for one client and cleans up after it.
//! - [`router`] decides who receives each line.
//! - [`registry`] maps sessions to unique screen names and holds their outbound mailboxes.
//! - [`message`] classifies inbound lines and renders outbound ones.
//! - [`cli`], [`config`] and [`client`] provide the command-line surface and a terminal client.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod registry;
pub mod relay;
pub mod router;
pub mod session;
