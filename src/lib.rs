//! JSON:API client with a schema-aware serializer and a query cache.

pub mod cache;
pub mod client;
pub mod config;
pub mod event;
pub mod query;
pub mod schema;
pub mod serializer;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_support;

pub use cache::{has_errors, QueryCache, QueryEntry};
pub use client::{ApiClient, ClientBuilder, ClientOptions, FetchOptions, Invalidate, MutateOptions};
pub use event::{Action, QueryEvent, Subscription};
pub use query::{parse_query_arg, QueryArg, RequestDescriptor, Segment};
pub use schema::Schema;
pub use serializer::Serializer;
