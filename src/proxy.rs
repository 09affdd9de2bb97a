pub mod client;
pub mod headers;

pub use client::{RoutingClient, UpstreamResponse};
pub use headers::{decode_header_params, encode_header_params, filter_forward_headers};
