//! Event system for pipeline lifecycle hooks.
//!
//! Provides an optional, non-intrusive way to observe calls. The pipeline
//! emits events when a call starts and ends, the redirect and retry stages
//! emit one per extra attempt, and paged collections emit one per fetched
//! page. Implement [`EventHandler`] to receive them for progress tracking
//! or metrics; logging itself goes through `tracing`.

use std::sync::Arc;
use std::time::Duration;

/// Events emitted while a call travels through the pipeline.
#[derive(Debug, Clone)]
pub enum Event {
    /// A call entered the pipeline.
    RequestStart {
        method: String,
        url: String,
    },
    /// A call left the pipeline.
    ResponseEnd {
        method: String,
        url: String,
        /// Final status, when a response was received.
        status: Option<u16>,
        /// Whether the call resolved successfully.
        ok: bool,
        elapsed: Duration,
    },
    /// The redirect stage is following a redirect.
    Redirect {
        status: u16,
        from: String,
        to: String,
        /// Redirects still allowed after this one.
        remaining: u32,
    },
    /// The retry stage is about to retry.
    Retry {
        /// The retry attempt number (1-indexed).
        attempt: u32,
        delay: Duration,
        /// Why the previous attempt failed.
        reason: String,
    },
    /// A paged collection fetched another page.
    PageFetched {
        /// Items on the new page.
        items: usize,
        /// Whether the server returned another continuation token.
        has_more: bool,
    },
}

/// Handler for pipeline lifecycle events.
///
/// This is entirely optional -- pipelines work without an event handler.
///
/// # Example
///
/// ```
/// use sdk_pipeline::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::RequestStart { method, url } => println!("[start] {method} {url}"),
///             Event::ResponseEnd { status, ok, .. } => println!("[end] {status:?} ok={ok}"),
///             _ => {} // Redirect, Retry, PageFetched
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// # Example
///
/// ```
/// use sdk_pipeline::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::Retry { attempt, .. } = event {
///         eprintln!("retry #{attempt}");
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}

/// An [`EventHandler`] that keeps every event, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingEventHandler {
    events: parking_lot::Mutex<Vec<Event>>,
}

impl RecordingEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, oldest first.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl EventHandler for RecordingEventHandler {
    fn on_event(&self, event: Event) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_handler_is_noop() {
        emit(&None, Event::PageFetched { items: 1, has_more: false });
    }

    #[test]
    fn test_recording_handler_keeps_order() {
        let recorder = Arc::new(RecordingEventHandler::new());
        let handler: Option<Arc<dyn EventHandler>> = Some(recorder.clone());
        emit(&handler, Event::RequestStart { method: "GET".into(), url: "u".into() });
        emit(&handler, Event::PageFetched { items: 2, has_more: true });

        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::RequestStart { .. }));
        assert!(matches!(events[1], Event::PageFetched { items: 2, has_more: true }));
    }
}
