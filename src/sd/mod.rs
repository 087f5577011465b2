

pub mod asyncutil;
pub mod auth;
pub mod cli;
pub mod config;
pub mod dashboard;
pub mod dispatch;
pub mod journal;
pub mod registry;
pub mod status;
pub mod unit;
pub mod web;
