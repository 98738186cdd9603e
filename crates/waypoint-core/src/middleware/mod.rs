//! Cross-cutting middleware wrapping the whole request chain: request-ID
//! generation/propagation. Access logging and panic recovery are provided by
//! `actix_web::middleware::{Logger, Compat}` at the server level.

pub mod request_id;
