//! LISTEN/NOTIFY routing.
//!
//! Two registries live side by side. The handler map holds at most one
//! closure per channel and is managed with [`Session::listen`]. The receiver
//! registry is a multimap of [`NotificationReceiver`] objects managed with
//! [`Session::add_receiver`] and [`Session::remove_receiver`]; it predates the
//! handler map and is kept for callers that still use it.
//!
//! The router itself issues no statements. The session decides when LISTEN
//! and UNLISTEN go out and asks the router what is registered.
//!
//! [`Session::listen`]: crate::Session::listen
//! [`Session::add_receiver`]: crate::Session::add_receiver
//! [`Session::remove_receiver`]: crate::Session::remove_receiver

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::notice::NoticeContext;
use crate::transport::RawNotification;

/// A notification as delivered to handlers. Built per delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification<'a> {
    pub channel: &'a str,
    pub payload: &'a str,
    /// Process id of the backend that sent the notification.
    pub backend_pid: u32,
}

/// Error returned by a handler or receiver. Reported as a notice.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback for one channel.
pub type NotificationHandler =
    Box<dyn FnMut(&Notification<'_>) -> Result<(), HandlerError> + Send>;

/// A listener bound to one channel, registered by identity.
pub trait NotificationReceiver: Send + Sync {
    fn channel(&self) -> &str;

    fn receive(&self, payload: &str, backend_pid: u32) -> Result<(), HandlerError>;
}

#[derive(Default)]
pub struct NotificationRouter {
    handlers: BTreeMap<String, NotificationHandler>,
    receivers: BTreeMap<String, Vec<Arc<dyn NotificationReceiver>>>,
}

impl std::fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRouter")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("receivers", &self.receivers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl NotificationRouter {
    pub fn has_handler(&self, channel: &str) -> bool {
        self.handlers.contains_key(channel)
    }

    /// Install or replace the handler for `channel`.
    pub fn set_handler(&mut self, channel: &str, handler: NotificationHandler) {
        self.handlers.insert(channel.to_string(), handler);
    }

    pub fn remove_handler(&mut self, channel: &str) -> Option<NotificationHandler> {
        self.handlers.remove(channel)
    }

    /// Channels with a handler installed.
    pub fn handler_channels(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn has_receivers(&self, channel: &str) -> bool {
        self.receivers.contains_key(channel)
    }

    /// Whether any receiver is registered on any channel.
    pub fn any_receivers(&self) -> bool {
        !self.receivers.is_empty()
    }

    pub fn add_receiver(&mut self, receiver: Arc<dyn NotificationReceiver>) {
        self.receivers
            .entry(receiver.channel().to_string())
            .or_default()
            .push(receiver);
    }

    /// Remove `receiver`, matched by identity.
    ///
    /// Returns `None` if it was not registered, otherwise whether it was the
    /// last receiver on its channel.
    pub fn remove_receiver(&mut self, receiver: &Arc<dyn NotificationReceiver>) -> Option<bool> {
        let channel = receiver.channel();
        let list = self.receivers.get_mut(channel)?;
        let index = list.iter().position(|r| Arc::ptr_eq(r, receiver))?;
        list.remove(index);
        let gone = list.is_empty();
        if gone {
            self.receivers.remove(channel);
        }
        Some(gone)
    }

    pub fn clear_receivers(&mut self) {
        self.receivers.clear();
    }

    /// Deliver one notification: every receiver on the channel, then the
    /// channel's handler. Failures become notices and do not stop delivery.
    pub fn dispatch(&mut self, raw: &RawNotification, notices: &NoticeContext) {
        let channel = raw.channel.as_str();
        if let Some(receivers) = self.receivers.get(channel) {
            // Receivers may be shared, so deliver to a snapshot.
            for receiver in receivers.clone() {
                if let Err(e) = receiver.receive(&raw.payload, raw.backend_pid) {
                    notices.process_notice(&format!(
                        "Exception in notification receiver '{channel}': {e}\n"
                    ));
                }
            }
        }

        if let Some(handler) = self.handlers.get_mut(channel) {
            let notification = Notification {
                channel,
                payload: &raw.payload,
                backend_pid: raw.backend_pid,
            };
            if let Err(e) = handler(&notification) {
                notices.process_notice(&format!(
                    "Exception in notification handler '{channel}': {e}\n"
                ));
            }
        }
    }
}
