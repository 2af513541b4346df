//! Test module for nlm-core
//!
//! Covers the I/O-owning layer against a scripted transport:
//! - Call driver: request shape, status classification, refresh-and-retry
//! - Session refresh coalescing under concurrent expiry
//! - Poll engine timing with paused tokio time
//! - Source, generation and research waits
//! - Resumable upload handshake
//! - Health check classification
//! - Configuration loading

mod config_tests;
mod fixtures;
mod session_tests;
mod upload_tests;
