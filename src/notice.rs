//! Notice routing shared between a session and the results it produced.
//!
//! A [`NoticeContext`] is reference counted. Every [`QueryResult`] keeps a
//! handle to the context of the session that created it, so a result that
//! outlives its session can still route notices.
//!
//! [`QueryResult`]: crate::QueryResult

use std::sync::{Arc, Mutex, MutexGuard};

/// Whether an [`ErrorHandler`] consumed a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeFlow {
    /// Stop propagation; older handlers and the callback do not see it.
    Consumed,
    /// Pass the notice on to the next handler.
    Continue,
}

/// A link in the notice handling chain.
///
/// Handlers run most recently registered first.
pub trait ErrorHandler: Send + Sync {
    /// Look at one notice, newline terminated.
    fn handle(&self, notice: &str) -> NoticeFlow;

    /// Called once when the handler is removed from its session, either
    /// explicitly or because the session closed.
    fn unregistered(&self) {}
}

/// Catch-all receiver for notices no handler consumed.
pub type NoticeCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Routing {
    handlers: Vec<Arc<dyn ErrorHandler>>,
    callback: Option<NoticeCallback>,
}

/// Ordered error handlers plus an optional catch-all notice callback.
#[derive(Default)]
pub struct NoticeContext {
    routing: Mutex<Routing>,
}

impl std::fmt::Debug for NoticeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routing = self.lock();
        f.debug_struct("NoticeContext")
            .field("handlers", &routing.handlers.len())
            .field("callback", &routing.callback.is_some())
            .finish()
    }
}

impl NoticeContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // Handlers never run under the lock, so a poisoned mutex only means a
    // panic between two plain field updates.
    fn lock(&self) -> MutexGuard<'_, Routing> {
        self.routing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Route a notice through the handler chain, newest first. If no
    /// handler consumes it, the callback (if any) receives it.
    pub fn process_notice(&self, notice: &str) {
        let (handlers, callback) = {
            let routing = self.lock();
            (routing.handlers.clone(), routing.callback.clone())
        };

        for handler in handlers.iter().rev() {
            if handler.handle(notice) == NoticeFlow::Consumed {
                return;
            }
        }

        match callback {
            Some(callback) => callback(notice),
            None => tracing::debug!(notice = notice.trim_end(), "unhandled notice"),
        }
    }

    pub fn register(&self, handler: Arc<dyn ErrorHandler>) {
        self.lock().handlers.push(handler);
    }

    /// Remove a handler by identity. Returns false if it was not registered.
    pub fn unregister(&self, handler: &Arc<dyn ErrorHandler>) -> bool {
        let removed = {
            let mut routing = self.lock();
            let pos = routing
                .handlers
                .iter()
                .rposition(|h| std::ptr::addr_eq(Arc::as_ptr(h), Arc::as_ptr(handler)));
            pos.map(|pos| routing.handlers.remove(pos))
        };
        match removed {
            Some(handler) => {
                handler.unregistered();
                true
            }
            None => false,
        }
    }

    /// Remove every handler, newest first, notifying each.
    pub fn unregister_all(&self) {
        let handlers = std::mem::take(&mut self.lock().handlers);
        for handler in handlers.iter().rev() {
            handler.unregistered();
        }
    }

    /// Registered handlers in registration order.
    pub fn handlers(&self) -> Vec<Arc<dyn ErrorHandler>> {
        self.lock().handlers.clone()
    }

    /// Install or clear the notice callback.
    pub fn set_callback(&self, callback: Option<NoticeCallback>) {
        self.lock().callback = callback;
    }
}
