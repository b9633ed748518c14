//! Gotify side of the relay: stream connection, REST client, enrichment

mod client;
mod connection;
mod enricher;
mod types;

pub use client::SourceClient;
pub use connection::{ConnectionManager, ConnectionState, READ_DEADLINE};
pub use enricher::Enricher;
pub use types::{EnrichedMessage, EntityMetadata, Event, Extra};
