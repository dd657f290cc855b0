// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Outbound network access validation.
//!
//! The block list is always evaluated before the allow list: an explicit
//! block overrides an explicit allow for the same host. Loopback,
//! link-local and private-network addresses are denied unless explicitly
//! allow-listed, so a sandboxed tool cannot be steered into internal
//! services. Unparseable URLs are denied (fail-closed).

use std::net::IpAddr;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::json;
use tracing::warn;
use url::Url;

use crate::domain::config::EngineConfig;
use crate::domain::error::EngineError;
use crate::domain::events::SecurityEventType;
use crate::domain::security_context::{OperationId, SecurityContext};
use crate::domain::tool::ToolConfiguration;

/// Hot-reloadable validator settings.
#[derive(Debug, Clone)]
pub struct NetworkAccessSettings {
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
    pub max_network_requests: u32,
}

impl NetworkAccessSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            allowed_domains: config.allowed_domains.clone(),
            blocked_domains: config.blocked_domains.clone(),
            max_network_requests: config.max_network_requests,
        }
    }
}

/// Decides whether a URL/method pair is permitted and tracks per-context
/// request quotas.
pub struct NetworkAccessValidator {
    settings: RwLock<NetworkAccessSettings>,
    counters: DashMap<OperationId, u32>,
}

impl NetworkAccessValidator {
    pub fn new(settings: NetworkAccessSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            counters: DashMap::new(),
        }
    }

    /// Replace the active settings (hot reload).
    pub fn update_settings(&self, settings: NetworkAccessSettings) {
        *self.settings.write() = settings;
    }

    /// Validate a URL/method pair against the global lists and the caller's
    /// request quota.
    pub fn validate_url(
        &self,
        url: &str,
        method: &str,
        ctx: &SecurityContext,
    ) -> Result<(), EngineError> {
        self.evaluate(url, method, &[], &[], ctx)
    }

    /// Validate with a tool's own domain lists merged in. The per-tool block
    /// list participates in block precedence exactly like the global one.
    pub fn validate_url_for_tool(
        &self,
        url: &str,
        method: &str,
        tool_config: &ToolConfiguration,
        ctx: &SecurityContext,
    ) -> Result<(), EngineError> {
        self.evaluate(
            url,
            method,
            &tool_config.allowed_domains,
            &tool_config.blocked_domains,
            ctx,
        )
    }

    fn evaluate(
        &self,
        url: &str,
        method: &str,
        extra_allowed: &[String],
        extra_blocked: &[String],
        ctx: &SecurityContext,
    ) -> Result<(), EngineError> {
        let settings = self.settings.read().clone();

        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                return Err(self.deny(url, method, &format!("unparseable URL: {}", e), ctx));
            }
        };

        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(self.deny(url, method, &format!("scheme '{}' not permitted", other), ctx));
            }
        }

        let Some(host) = parsed.host_str() else {
            return Err(self.deny(url, method, "URL has no host", ctx));
        };
        let host = host.to_lowercase();

        // Block list first: an explicit block always wins.
        if settings
            .blocked_domains
            .iter()
            .chain(extra_blocked.iter())
            .any(|pattern| matches_domain(pattern, &host))
        {
            return Err(self.deny(url, method, &format!("domain {} is blocked", host), ctx));
        }

        let explicitly_allowed = settings
            .allowed_domains
            .iter()
            .chain(extra_allowed.iter())
            .any(|pattern| matches_domain(pattern, &host));

        // SSRF guard: internal addresses need an explicit allow.
        if is_internal_host(&host) && !explicitly_allowed {
            return Err(self.deny(
                url,
                method,
                &format!("internal address {} requires explicit allow", host),
                ctx,
            ));
        }

        let allow_list_active =
            !settings.allowed_domains.is_empty() || !extra_allowed.is_empty();
        if allow_list_active && !explicitly_allowed {
            return Err(self.deny(url, method, &format!("domain {} not allowed", host), ctx));
        }

        // Quota: incremented only on a permitted call.
        {
            let mut counter = self.counters.entry(ctx.operation_id()).or_insert(0);
            if *counter >= settings.max_network_requests {
                return Err(self.deny(
                    url,
                    method,
                    &format!(
                        "request quota of {} exhausted",
                        settings.max_network_requests
                    ),
                    ctx,
                ));
            }
            *counter += 1;
        }

        ctx.log_operation(
            SecurityEventType::NetworkRequest,
            json!({"url": url, "method": method, "host": host, "allowed": true}),
        );
        Ok(())
    }

    fn deny(
        &self,
        url: &str,
        method: &str,
        reason: &str,
        ctx: &SecurityContext,
    ) -> EngineError {
        warn!(url = url, method = method, reason = reason, "network request denied");
        ctx.log_operation(
            SecurityEventType::SecurityViolation,
            json!({
                "kind": "network_request",
                "url": url,
                "method": method,
                "reason": reason,
            }),
        );
        EngineError::SecurityViolation(format!("{} {} denied: {}", method, url, reason))
    }

    /// Requests already spent by an operation.
    pub fn requests_used(&self, operation: OperationId) -> u32 {
        self.counters.get(&operation).map(|c| *c).unwrap_or(0)
    }

    /// Drop the quota counter when a context ends.
    pub fn end_context(&self, operation: OperationId) {
        self.counters.remove(&operation);
    }
}

/// Exact match or `*.suffix` wildcard, as in agent permission manifests.
fn matches_domain(pattern: &str, host: &str) -> bool {
    if pattern == host {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return host.ends_with(suffix);
    }
    false
}

/// Hosts that reach loopback, link-local or private networks.
fn is_internal_host(host: &str) -> bool {
    if host == "localhost" {
        return true;
    }
    // IPv6 hosts come back bracketed from the URL parser.
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    let Ok(addr) = bare.parse::<IpAddr>() else {
        return false;
    };
    match addr {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique-local
                || (segments[0] & 0xfe00) == 0xfc00
                // fe80::/10 link-local
                || (segments[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{EventSink, SecurityEvent};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct NullSink {
        events: Mutex<Vec<SecurityEvent>>,
    }

    impl EventSink for NullSink {
        fn record(&self, event: SecurityEvent) {
            self.events.lock().push(event);
        }
    }

    fn validator(settings: NetworkAccessSettings) -> (NetworkAccessValidator, Arc<NullSink>) {
        let sink = Arc::new(NullSink::default());
        (NetworkAccessValidator::new(settings), sink)
    }

    fn default_settings() -> NetworkAccessSettings {
        NetworkAccessSettings {
            allowed_domains: vec![],
            blocked_domains: vec![
                "localhost".to_string(),
                "127.0.0.1".to_string(),
                "evil.example".to_string(),
            ],
            max_network_requests: 10,
        }
    }

    #[test]
    fn test_plain_https_allowed() {
        let (validator, sink) = validator(default_settings());
        let ctx = SecurityContext::new(None, sink);
        assert!(validator
            .validate_url("https://docs.rs/tokio", "GET", &ctx)
            .is_ok());
        assert_eq!(validator.requests_used(ctx.operation_id()), 1);
    }

    #[test]
    fn test_non_http_scheme_denied() {
        let (validator, sink) = validator(default_settings());
        let ctx = SecurityContext::new(None, sink);
        assert!(validator
            .validate_url("ftp://mirror.example.com/file", "GET", &ctx)
            .is_err());
        assert!(validator
            .validate_url("file:///etc/passwd", "GET", &ctx)
            .is_err());
    }

    #[test]
    fn test_blocked_domain_denied() {
        let (validator, sink) = validator(default_settings());
        let ctx = SecurityContext::new(None, sink);
        assert!(validator
            .validate_url("https://evil.example/page", "GET", &ctx)
            .is_err());
    }

    #[test]
    fn test_block_list_wins_over_allow_list() {
        let mut settings = default_settings();
        settings.allowed_domains = vec!["evil.example".to_string()];
        let (validator, sink) = validator(settings);
        let ctx = SecurityContext::new(None, sink);
        assert!(validator
            .validate_url("https://evil.example/page", "GET", &ctx)
            .is_err());
    }

    #[test]
    fn test_allow_list_excludes_other_hosts() {
        let mut settings = default_settings();
        settings.allowed_domains = vec!["api.example.com".to_string()];
        let (validator, sink) = validator(settings);
        let ctx = SecurityContext::new(None, sink);
        assert!(validator
            .validate_url("https://api.example.com/v1", "GET", &ctx)
            .is_ok());
        assert!(validator
            .validate_url("https://other.example.com/v1", "GET", &ctx)
            .is_err());
    }

    #[test]
    fn test_wildcard_subdomain_match() {
        let mut settings = default_settings();
        settings.allowed_domains = vec!["*.example.com".to_string()];
        let (validator, sink) = validator(settings);
        let ctx = SecurityContext::new(None, sink);
        assert!(validator
            .validate_url("https://api.example.com/v1", "GET", &ctx)
            .is_ok());
    }

    #[test]
    fn test_private_addresses_denied_without_explicit_allow() {
        let (validator, sink) = validator(default_settings());
        let ctx = SecurityContext::new(None, sink);
        for url in [
            "http://localhost:8080/admin",
            "http://127.0.0.1/metrics",
            "http://10.0.0.5/internal",
            "http://192.168.1.1/router",
            "http://169.254.169.254/latest/meta-data",
            "http://[::1]/",
        ] {
            assert!(validator.validate_url(url, "GET", &ctx).is_err(), "{}", url);
        }
    }

    #[test]
    fn test_private_address_permitted_when_explicitly_allowed() {
        let mut settings = default_settings();
        settings.blocked_domains.clear();
        settings.allowed_domains = vec!["10.0.0.5".to_string()];
        let (validator, sink) = validator(settings);
        let ctx = SecurityContext::new(None, sink);
        assert!(validator
            .validate_url("http://10.0.0.5/internal", "GET", &ctx)
            .is_ok());
    }

    #[test]
    fn test_quota_exhaustion_within_one_context() {
        let mut settings = default_settings();
        settings.max_network_requests = 1;
        let (validator, sink) = validator(settings);
        let ctx = SecurityContext::new(None, sink);

        assert!(validator
            .validate_url("https://docs.rs/a", "GET", &ctx)
            .is_ok());
        // Same URL class would be allowed, but the quota is spent.
        assert!(validator
            .validate_url("https://docs.rs/b", "GET", &ctx)
            .is_err());
    }

    #[test]
    fn test_quota_resets_when_context_ends() {
        let mut settings = default_settings();
        settings.max_network_requests = 1;
        let (validator, sink) = validator(settings);
        let ctx = SecurityContext::new(None, sink.clone());

        assert!(validator
            .validate_url("https://docs.rs/a", "GET", &ctx)
            .is_ok());
        validator.end_context(ctx.operation_id());
        assert_eq!(validator.requests_used(ctx.operation_id()), 0);

        let fresh = SecurityContext::new(None, sink);
        assert!(validator
            .validate_url("https://docs.rs/a", "GET", &fresh)
            .is_ok());
    }

    #[test]
    fn test_denied_request_does_not_consume_quota() {
        let mut settings = default_settings();
        settings.max_network_requests = 5;
        let (validator, sink) = validator(settings);
        let ctx = SecurityContext::new(None, sink);

        let _ = validator.validate_url("https://evil.example/x", "GET", &ctx);
        assert_eq!(validator.requests_used(ctx.operation_id()), 0);
    }

    #[test]
    fn test_per_tool_blocked_domains_merge() {
        let (validator, sink) = validator(default_settings());
        let ctx = SecurityContext::new(None, sink);
        let tool_config = ToolConfiguration {
            blocked_domains: vec!["tracker.example.net".to_string()],
            ..Default::default()
        };
        assert!(validator
            .validate_url_for_tool("https://tracker.example.net/ping", "GET", &tool_config, &ctx)
            .is_err());
        assert!(validator
            .validate_url_for_tool("https://docs.rs/", "GET", &tool_config, &ctx)
            .is_ok());
    }

    #[test]
    fn test_unparseable_url_denied() {
        let (validator, sink) = validator(default_settings());
        let ctx = SecurityContext::new(None, sink);
        assert!(validator.validate_url("not a url", "GET", &ctx).is_err());
    }
}
