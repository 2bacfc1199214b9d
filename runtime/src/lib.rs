extern crate chrono;
extern crate regex;

pub mod client;
pub mod config;
pub mod decoder;
pub mod exemplar;
pub mod interval;
pub mod query;
pub mod types;

mod runtime_error;

#[cfg(test)]
mod testing;

pub use client::{Client, ClientCache, ClientProvider, DefaultClientProvider, HttpTransport};
pub use config::{DatasourceSettings, HttpMethod, SamplerKind};
pub use decoder::{decode, decode_response, DecodeOptions};
pub use query::{FetchKind, QueryService};
pub use runtime_error::*;
pub use types::*;
