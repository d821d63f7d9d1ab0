//! OAuth 2.0 / OpenID Connect authorization server core.
//!
//! Validates authorize and token requests, runs the consent decision, and issues
//! signed JWT access and identity tokens along with opaque authorization codes and
//! refresh tokens. Persistence and resource-owner login are supplied by the host
//! through the traits in [`storage`].

pub mod config;
pub mod errors;
pub mod http;
pub mod keys;
pub mod oauth;
pub mod storage;
pub mod templates;
