//! Log-tailing statistics engine.
//!
//! - [`line_reader`]: splits appended bytes into bounded lines
//! - [`registry`]: the tailed `current` files and their rotation handling
//! - [`notifier`]: directory subscriptions and filesystem events
//! - [`dispatcher`]: applies filesystem events to the registry
//! - [`scheduler`]: the event loop and flush cycle
//! - [`collector`]: the collector contract and the concrete collectors
//! - [`emitter`]: the reporting protocol writer
//! - [`discovery`]: finds log directories under a root

pub mod collector;
pub mod discovery;
pub mod dispatcher;
pub mod emitter;
pub mod error;
pub mod line_reader;
pub mod notifier;
pub mod registry;
pub mod scheduler;

pub use error::{EngineError, Result};
