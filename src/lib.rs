//! # Price Harness
//!
//! Selector-driven price scraping and aggregation.
//!
//! A registry of sites, each a (title, url, selector) record, is loaded from
//! a spreadsheet. A run fetches every page, extracts the first element the
//! selector matches, normalizes its text into a price, and aggregates the
//! outcomes into a report: per-site prices, per-site errors, and the mean
//! price for every title.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌───────────┐
//! │ Registry │──▶│ Fetcher  │──▶│ Extractor │──▶│ Aggregator│
//! │ SQLite   │   │ reqwest  │   │ scraper   │   │  Report   │
//! └────▲─────┘   └──────────┘   └───────────┘   └─────┬─────┘
//!      │                                              │
//! ┌────┴─────┐                           ┌────────────┤
//! │ .xlsx /  │                           ▼            ▼
//! │ .csv     │                     ┌──────────┐ ┌──────────┐
//! └──────────┘                     │   CLI    │ │   HTTP   │
//!                                  │  (ph)    │ │  (axum)  │
//!                                  └──────────┘ └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ph init                       # create database
//! ph load sites.xlsx            # replace the site list
//! ph scrape                     # fetch, extract, report
//! ph serve                      # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`registry`] | Site registry (SQLite and in-memory) |
//! | [`tabular`] | Spreadsheet (`.xlsx`, `.csv`) parsing |
//! | [`fetch`] | HTTP page fetching |
//! | [`selector`] | XPath-subset and CSS selector compilation |
//! | [`extract`] | Price extraction and normalization |
//! | [`aggregate`] | Report building |
//! | [`pipeline`] | Run orchestration |
//! | [`progress`] | Run notifications |
//! | [`commands`] | Chat-style command routing |
//! | [`sites`] | Site list CLI commands |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod aggregate;
pub mod commands;
pub mod config;
pub mod db;
pub mod extract;
pub mod fetch;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod selector;
pub mod server;
pub mod sites;
pub mod tabular;
