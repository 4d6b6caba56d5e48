//! prospector - scheduled lead-sourcing automations with human-reviewed
//! agent proposals.
//!
//! Automations run a search on an interval, turn fresh candidates into
//! pending proposals, and adapt their own query and prompt from run
//! history. Humans review proposals; an external applier executes the
//! approved ones.

pub mod cli;
pub mod config;
pub mod llm;
pub mod mail;
pub mod migrations;
pub mod models;
pub mod repository;
pub mod schema;
pub mod search;
pub mod services;
