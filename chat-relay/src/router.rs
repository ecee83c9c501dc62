//! Delivery decisions for a single dispatched line.
//!
//! A [`Router`] only borrows the registry and configuration; it is built for one
//! dispatch and dropped afterwards. Every delivery is a non-blocking enqueue onto the
//! recipient's mailbox, so a slow peer never holds up the sender.

use tracing::{debug, warn};

use crate::{
    config::RelayConfig,
    error::DeliveryError,
    message::{Message, SELF_INVITE, USER_NOT_FOUND},
    registry::{ConnectionRegistry, Mailbox, SessionId},
};

pub struct Router<'a> {
    registry: &'a ConnectionRegistry,
    config: &'a RelayConfig,
}

impl<'a> Router<'a> {
    pub fn new(registry: &'a ConnectionRegistry, config: &'a RelayConfig) -> Self {
        Self { registry, config }
    }

    /// Sends `"<sender_name>: <body>"` to every registered session other than `sender`.
    /// Returns how many sessions accepted the line.
    pub async fn broadcast(&self, sender: SessionId, sender_name: &str, body: &str) -> usize {
        let line = Message::Broadcast {
            sender: sender_name.to_string(),
            body: body.to_string(),
        }
        .render();

        let mut delivered = 0;
        for entry in self.registry.snapshot().await {
            if entry.session == sender {
                continue;
            }
            if deliver(&entry.mailbox, &entry.name, line.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Sends the sender's own line back to it, formatted exactly like a broadcast.
    pub fn echo(&self, sender: &Mailbox, sender_name: &str, body: &str) {
        let message = Message::Echo {
            sender: sender_name.to_string(),
            body: body.to_string(),
        };
        deliver(sender, sender_name, message.render());
    }

    /// Asks `target` to open a private conversation with the requester.
    ///
    /// An unknown target earns the requester a `_usernotfound_` notice after the configured
    /// delay. Inviting oneself is declined locally.
    pub async fn invite(&self, requester: &Mailbox, requester_name: &str, target: &str) {
        if target == requester_name {
            self.echo(requester, requester_name, SELF_INVITE);
            return;
        }

        match self.registry.find(target).await {
            Some(entry) => {
                let message = Message::Invite {
                    requester: requester_name.to_string(),
                    target: entry.name.clone(),
                };
                deliver(&entry.mailbox, &entry.name, message.render());
            }
            None => {
                debug!(
                    requester = requester_name,
                    invitee = target,
                    "invite target not found"
                );
                if !self.config.not_found_delay.is_zero() {
                    tokio::time::sleep(self.config.not_found_delay).await;
                }
                let notice = Message::SystemNotice {
                    body: USER_NOT_FOUND.to_string(),
                };
                deliver(requester, requester_name, notice.render());
            }
        }
    }

    /// Delivers `body` verbatim to `target`. Unknown targets are dropped without notice.
    pub async fn private_message(&self, target: &str, body: &str) -> bool {
        let Some(entry) = self.registry.find(target).await else {
            debug!(recipient = target, "private message target not found; dropping");
            return false;
        };

        let message = Message::PrivateMessage {
            target: entry.name.clone(),
            body: body.to_string(),
        };
        deliver(&entry.mailbox, &entry.name, message.render())
    }
}

fn deliver(mailbox: &Mailbox, recipient: &str, line: String) -> bool {
    match mailbox.deliver(line) {
        Ok(()) => true,
        Err(DeliveryError::Closed) => {
            debug!(recipient, "recipient is shutting down; line dropped");
            false
        }
        Err(DeliveryError::Full) => {
            warn!(recipient, "outbound queue full; evicting slow consumer");
            false
        }
    }
}
