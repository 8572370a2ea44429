//! Configuration module
//!
//! Handles CLI configuration including the controller URL.

use keel_client::ControllerClient;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the controller service
    pub controller_url: String,
}

impl Config {
    pub fn client(&self) -> ControllerClient {
        ControllerClient::new(&self.controller_url)
    }
}
