pub mod alpha_vantage;
pub mod commands;
pub mod config;
pub mod context;
pub mod dataset;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod models;
pub mod report;
pub mod service;
