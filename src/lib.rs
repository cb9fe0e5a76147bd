#![forbid(unsafe_code)]

//! Library half of subfeed: a personal aggregator that follows YouTube
//! channels through their public feeds, stores the uploads in SQLite and
//! serves them back over a small HTTP API.

pub mod api;
pub mod config;
pub mod error;
pub mod feed;
pub mod fetcher;
pub mod logging;
pub mod models;
pub mod scrape;
pub mod store;
pub mod sync;
