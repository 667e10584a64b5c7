//! Listing Sniper Library
//!
//! Watches announced exchange listings, buys the new pair the moment a venue
//! lists it, and exits through a deadline-driven ladder of slow limit, fast
//! limit and forced market sells, with an optional bracket on top.
//!
//! # Modules
//!
//! - `domain`: Core logic (Symbol, Position, Bracket, Countdown, Escalation, Ledger)
//! - `ports`: Trait abstractions (VenueClient, AnnouncementSource, Notifier, Clock)
//! - `adapters`: External implementations (paper venue, announcement file, webhooks, CLI)
//! - `config`: Configuration loading and validation
//! - `application`: Per-venue engine and tick scheduler

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
