//! Configuration validation.
//!
//! Serde handles syntax; this module checks semantics: value ranges, URL
//! formats, and that fallback plans only reference configured organs and
//! tools. Every problem is reported, not just the first.

use std::collections::HashSet;
use std::fmt;

use url::Url;

use crate::config::schema::{FallbackOptionConfig, GatewayConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_url(field: String, value: &str, errors: &mut Vec<ValidationError>) {
    match Url::parse(value) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(_) => errors.push(ValidationError::new(field, "URL must start with http:// or https://")),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL: {}", e))),
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut organ_names = HashSet::new();
    for (i, organ) in config.organs.iter().enumerate() {
        if organ.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("organs[{}].name", i), "must not be empty"));
        }
        if !organ_names.insert(organ.name.as_str()) {
            errors.push(ValidationError::new(
                format!("organs[{}].name", i),
                format!("duplicate organ '{}'", organ.name),
            ));
        }
        check_url(format!("organs[{}].base_url", i), &organ.base_url, &mut errors);
        if !organ.health_path.starts_with('/') {
            errors.push(ValidationError::new(
                format!("organs[{}].health_path", i),
                "must start with '/'",
            ));
        }
    }

    let mut tool_names = HashSet::new();
    for (i, tool) in config.native_tools.iter().enumerate() {
        if !tool_names.insert(tool.name.as_str()) {
            errors.push(ValidationError::new(
                format!("native_tools[{}].name", i),
                format!("duplicate tool '{}'", tool.name),
            ));
        }
        check_url(format!("native_tools[{}].base_url", i), &tool.base_url, &mut errors);
    }

    // Plans for resources that are not configured are inert and not checked.
    for (primary, plan) in &config.fallback_plans {
        if !organ_names.contains(primary.as_str()) {
            continue;
        }
        for (i, option) in plan.iter().enumerate() {
            let field = format!("fallback_plans.{}[{}]", primary, i);
            match option {
                FallbackOptionConfig::Secondary { target, .. } => {
                    if target == primary {
                        errors.push(ValidationError::new(field, "secondary target must differ from primary"));
                    } else if !organ_names.contains(target.as_str()) {
                        errors.push(ValidationError::new(field, format!("unknown organ '{}'", target)));
                    }
                }
                FallbackOptionConfig::NativeTool { tool, .. } => {
                    if !tool_names.contains(tool.as_str()) {
                        errors.push(ValidationError::new(field, format!("unknown native tool '{}'", tool)));
                    }
                }
                FallbackOptionConfig::Cached { .. } | FallbackOptionConfig::None { .. } => {}
            }
        }
    }

    if config.rate_limit.window_secs == 0 {
        errors.push(ValidationError::new("rate_limit.window_secs", "must be greater than 0"));
    }
    if config.rate_limit.premium_multiplier < 1.0 {
        errors.push(ValidationError::new("rate_limit.premium_multiplier", "must be at least 1.0"));
    }
    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be greater than 0"));
    }
    if config.circuit_breaker.reset_timeout_secs == 0 {
        errors.push(ValidationError::new("circuit_breaker.reset_timeout_secs", "must be greater than 0"));
    }
    if config.cache.default_ttl_secs == 0 {
        errors.push(ValidationError::new("cache.default_ttl_secs", "must be greater than 0"));
    }
    if config.timeouts.dispatch_secs == 0 {
        errors.push(ValidationError::new("timeouts.dispatch_secs", "must be greater than 0"));
    }
    if config.timeouts.probe_secs == 0 {
        errors.push(ValidationError::new("timeouts.probe_secs", "must be greater than 0"));
    }
    if config.health_check.enabled && config.health_check.interval_secs == 0 {
        errors.push(ValidationError::new("health_check.interval_secs", "must be greater than 0"));
    }
    if config.admin.enabled && config.admin.api_key.len() < 16 {
        errors.push(ValidationError::new("admin.api_key", "must be at least 16 characters"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
