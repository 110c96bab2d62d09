//! Event Grid webhook plumbing: envelopes, the event cache, handler
//! registry and type dispatch

pub mod cache;
pub mod dispatcher;
pub mod envelope;
pub mod handler;

pub use cache::EventCache;
pub use dispatcher::{BatchReport, DispatchResponse, EnvelopeReport, EnvelopeStatus, TypeDispatcher};
pub use envelope::{NotificationEnvelope, BLOB_CREATED, SUBSCRIPTION_VALIDATION};
pub use handler::{EventHandler, HandlerOutcome, HandlerRegistry, RequestScope};
