//! Wire protocols.
//!
//! - `http`: one-shot HTTP-style request/response framing

pub mod http;
