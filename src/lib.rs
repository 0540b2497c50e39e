//! Specchio mirrors a remote profile-hosting site under your own domain:
//! it classifies and proxies requests, rewrites textual responses so the
//! mirror appears self-hosted, and caches static assets in an object store
//! with TTL eviction.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
