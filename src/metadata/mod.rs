//! Application metadata cache used to enrich stream events

mod cache;
mod types;

pub use cache::{DEFAULT_TTL, EntitySource, MetadataCache};
pub use types::{CacheEntry, CacheStats};

#[cfg(test)]
pub(crate) use cache::tests::{FakeSource, app};
