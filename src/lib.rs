//! # Film RAG
//!
//! Retrieval-augmented film recommendations over a merged movie catalog.
//!
//! Film RAG merges a TMDB export and a Letterboxd scrape into one
//! catalog, turns every film into a metadata chunk and a plot chunk,
//! embeds them into an inverted-file vector index, and answers queries
//! by retrieving the nearest chunks and handing them to a chat model.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────────┐
//! │  prepare    │──▶│    build     │──▶│ index + meta   │
//! │ TMDB + LB   │   │ chunk+embed  │   │  (two files)   │
//! └─────────────┘   │ train + add  │   └───────┬────────┘
//!                   └──────────────┘           │ lazy load
//!                                              ▼
//!                           ┌──────────┐  ┌──────────┐
//!                           │ generate │◀─│  search  │
//!                           └──────────┘  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! filmrag prepare                  # merge raw datasets into the catalog
//! filmrag build                    # embed chunks, train and persist the index
//! filmrag search "space horror"    # ranked chunks
//! filmrag chat                     # interactive recommendations
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`catalog`] | Catalog CSV loading |
//! | [`prepare`] | TMDB + Letterboxd merge |
//! | [`embedding`] | Embedding providers |
//! | [`indexer`] | Index build orchestration |
//! | [`store`] | On-disk index + metadata pair |
//! | [`engine`] | Lazy-loading search engine |
//! | [`generate`] | Answer generation |
//! | [`chat`] | Interactive query loop |
//! | [`progress`] | Build progress on stderr |

pub mod catalog;
pub mod chat;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod generate;
pub mod http;
pub mod indexer;
pub mod prepare;
pub mod progress;
pub mod store;
