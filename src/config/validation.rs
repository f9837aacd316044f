//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use std::collections::HashSet;

use slirc_proto::{irc_eq, irc_to_lower, is_valid_sid};
use thiserror::Error;

use super::Config;

/// Validation errors for configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("server.name must be a dotted name, got '{0}'")]
    InvalidServerName(String),
    #[error("server.network is required")]
    MissingNetworkName,
    #[error("server.sid must match pattern [0-9][A-Z0-9][A-Z0-9], got '{0}'")]
    InvalidSidFormat(String),
    #[error("timeouts.ping_timeout ({timeout}) must be greater than timeouts.ping_interval ({interval})")]
    PingTimeoutTooShort { interval: u64, timeout: u64 },
    #[error("autoconnect.initial_backoff must be at least 1 and at most max_backoff")]
    InvalidBackoff,
    #[error("limits.sendq_lines must be at least 1")]
    EmptySendQueue,
    #[error("link '{0}' is defined more than once")]
    DuplicateLink(String),
    #[error("link '{0}' has an empty password")]
    EmptyLinkPassword(String),
    #[error("link '{0}' has an invalid sid '{1}'")]
    InvalidLinkSid(String, String),
    #[error("link '{0}' uses the local server's name or sid")]
    LinkToSelf(String),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let server = &config.server;
    if server.name.is_empty() || !server.name.contains('.') || server.name.contains(' ') {
        errors.push(ValidationError::InvalidServerName(server.name.clone()));
    }
    if server.network.is_empty() {
        errors.push(ValidationError::MissingNetworkName);
    }
    if !is_valid_sid(&server.sid) {
        errors.push(ValidationError::InvalidSidFormat(server.sid.clone()));
    }

    let timeouts = &config.timeouts;
    if timeouts.ping_timeout <= timeouts.ping_interval {
        errors.push(ValidationError::PingTimeoutTooShort {
            interval: timeouts.ping_interval,
            timeout: timeouts.ping_timeout,
        });
    }

    let autoconnect = &config.autoconnect;
    if autoconnect.initial_backoff == 0 || autoconnect.initial_backoff > autoconnect.max_backoff {
        errors.push(ValidationError::InvalidBackoff);
    }

    if config.limits.sendq_lines == 0 {
        errors.push(ValidationError::EmptySendQueue);
    }

    let mut seen = HashSet::new();
    for link in &config.links {
        if !seen.insert(irc_to_lower(&link.name)) {
            errors.push(ValidationError::DuplicateLink(link.name.clone()));
        }
        if link.password.is_empty() {
            errors.push(ValidationError::EmptyLinkPassword(link.name.clone()));
        }
        if let Some(ref sid) = link.sid {
            if !is_valid_sid(sid) {
                errors.push(ValidationError::InvalidLinkSid(link.name.clone(), sid.clone()));
            } else if *sid == server.sid {
                errors.push(ValidationError::LinkToSelf(link.name.clone()));
            }
        }
        if irc_eq(&link.name, &server.name) {
            errors.push(ValidationError::LinkToSelf(link.name.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
