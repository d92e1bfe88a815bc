//! Blue/green deployment

pub mod controller;

pub use controller::DeploymentController;
