#![forbid(unsafe_code)]

//! NeonTube: a small browsing front end that proxies `yt-dlp`.
//!
//! The library holds everything the server binary needs: the process invoker,
//! the record normalizer, the query operations with their fallback tiers, and
//! the secondary music and share-card features.

pub mod cards;
pub mod catalog;
pub mod config;
pub mod extractor;
pub mod format;
pub mod metadata;
pub mod music;
pub mod security;
