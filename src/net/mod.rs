//! HTTP model and the network seam used by every strategy.

mod fetcher;
mod request;

pub use fetcher::{Fetcher, HttpFetcher};
pub use request::{Headers, Request, RequestKey, RequestMode, Response, ResponseType};
