//! PazDeploy Library
//!
//! Core modules for the PazPaz blue/green deployment orchestrator.

pub mod backup;
pub mod cli;
pub mod config;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod health;
pub mod lock;
pub mod logs;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod preflight;
pub mod rollback;
pub mod services;
pub mod storage;
pub mod utils;
