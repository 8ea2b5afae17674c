//! Inbound Lead Email API Library
//!
//! This library provides the core functionality for the inbound lead email
//! service: normalizing SendGrid Inbound Parse webhook deliveries into a
//! canonical message, extracting structured lead fields via DeepSeek,
//! reconciling leads onto GoHighLevel contacts, and filling NDA documents.
//!
//! # Modules
//!
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `db_storage`: Persisted lead record storage.
//! - `errors`: Error handling types.
//! - `extractor`: DeepSeek lead extraction.
//! - `ghl_client`: GoHighLevel API client.
//! - `ghl_sync`: CRM contact reconciliation and media upload.
//! - `handlers`: HTTP request handlers.
//! - `models`: Core data models.
//! - `nda`: NDA document fill merge contract.
//! - `normalize`: Phone/name normalizers.
//! - `transport`: Email transport normalizer.
//! - `webhook_handler`: Inbound webhook handler and orchestrator.

pub mod config;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod extractor;
pub mod ghl_client;
pub mod ghl_sync;
pub mod handlers;
pub mod models;
pub mod nda;
pub mod normalize;
pub mod transport;
pub mod webhook_handler;
