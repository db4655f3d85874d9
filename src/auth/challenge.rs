//! Sign-in challenge construction.
//!
//! The server reconstructs the challenge text from the submitted fields and
//! verifies the signature against it, so rendering must be byte-for-byte
//! deterministic for a given (service, address, timestamp).

use crate::store::Identity;

/// One-time challenge binding an address to a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub address: String,
    pub issued_at_millis: i64,
    message: String,
}

impl Challenge {
    /// The exact text handed to the wallet for signing.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Renders challenges for one service name.
#[derive(Debug, Clone)]
pub struct ChallengeBuilder {
    service_name: String,
}

impl ChallengeBuilder {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn build(&self, identity: &Identity, issued_at_millis: i64) -> Challenge {
        let address = identity.address().to_string();
        let message = format!(
            "Sign in to {}\n\nAddress: {}\nTimestamp: {}",
            self.service_name, address, issued_at_millis
        );
        Challenge {
            address,
            issued_at_millis,
            message,
        }
    }
}

impl Default for ChallengeBuilder {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SERVICE_NAME)
    }
}
