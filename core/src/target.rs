//! Target normalization, validation, and scope filtering.

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::EngineError;

static FQDN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z0-9][a-zA-Z0-9\-]{0,61}[a-zA-Z0-9]$")
        .expect("fqdn pattern")
});

static LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?$").expect("label pattern")
});

/// A validated, normalized fully-qualified domain name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    fqdn: String,
}

impl Target {
    /// Normalize and validate a raw operator-supplied target. Scheme, path,
    /// query, fragment, port, and surrounding whitespace are stripped; the
    /// remainder must be a plausible FQDN and must not be a loopback,
    /// private, or link-local address literal.
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let fqdn = normalize(raw);
        if fqdn.is_empty() {
            return Err(EngineError::InvalidTarget("empty target".into()));
        }
        if let Ok(ip) = fqdn.parse::<IpAddr>() {
            if is_disallowed_ip(ip) {
                return Err(EngineError::InvalidTarget(format!(
                    "{fqdn} is loopback/private/link-local"
                )));
            }
            return Err(EngineError::InvalidTarget(format!(
                "{fqdn} is an IP address, expected a domain"
            )));
        }
        if !FQDN_RE.is_match(&fqdn) {
            return Err(EngineError::InvalidTarget(fqdn));
        }
        Ok(Target { fqdn })
    }

    pub fn fqdn(&self) -> &str {
        &self.fqdn
    }

    /// Registrable domain, handling the common two-level public suffixes
    /// (`example.co.uk` stays intact).
    pub fn registrable_domain(&self) -> String {
        let parts: Vec<&str> = self.fqdn.split('.').collect();
        let n = parts.len();
        if n > 2
            && matches!(parts[n - 2], "co" | "com" | "net" | "org" | "gov" | "edu")
            && matches!(parts[n - 1], "uk" | "au" | "nz" | "jp")
        {
            parts[n - 3..].join(".")
        } else if n >= 2 {
            parts[n - 2..].join(".")
        } else {
            self.fqdn.clone()
        }
    }

    /// True when `host` is the target itself or a well-formed subdomain of it.
    pub fn owns(&self, host: &str) -> bool {
        if host == self.fqdn {
            return true;
        }
        match host.strip_suffix(&format!(".{}", self.fqdn)) {
            Some(prefix) => prefix.split('.').all(|l| LABEL_RE.is_match(l)),
            None => false,
        }
    }

    /// Best-effort resolution check: reject targets whose addresses land in
    /// loopback, RFC1918, or link-local space. A target that does not
    /// resolve at all passes (passive stages can still run against it).
    pub fn ensure_routable(&self) -> Result<(), EngineError> {
        if let Ok(addrs) = (self.fqdn.as_str(), 0u16).to_socket_addrs() {
            for addr in addrs {
                if is_disallowed_ip(addr.ip()) {
                    return Err(EngineError::InvalidTarget(format!(
                        "{} resolves to {}",
                        self.fqdn,
                        addr.ip()
                    )));
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.fqdn)
    }
}

/// Strip scheme, path, query, fragment, port, and whitespace; lowercase.
pub fn normalize(raw: &str) -> String {
    let mut t = raw.trim();
    if let Some((_, rest)) = t.split_once("://") {
        t = rest;
    }
    let t = t
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .split(':')
        .next()
        .unwrap_or_default();
    t.trim().to_ascii_lowercase()
}

pub fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4 == Ipv4Addr::UNSPECIFIED,
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

/// Include/exclude filters applied to discovered hostnames before any
/// downstream stage acts on them.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl Scope {
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Result<Self, EngineError> {
        let compile = |p: &str| {
            Regex::new(p).map_err(|e| EngineError::InvalidTarget(format!("bad scope pattern {p}: {e}")))
        };
        Ok(Scope {
            include: include.map(compile).transpose()?,
            exclude: exclude.map(compile).transpose()?,
        })
    }

    pub fn allows(&self, host: &str) -> bool {
        if let Some(inc) = &self.include {
            if !inc.is_match(host) {
                return false;
            }
        }
        if let Some(exc) = &self.exclude {
            if exc.is_match(host) {
                return false;
            }
        }
        true
    }

    /// Stable fingerprint of the patterns, for the resume config hash.
    pub fn fingerprint(&self) -> String {
        format!(
            "include={};exclude={}",
            self.include.as_ref().map(|r| r.as_str()).unwrap_or(""),
            self.exclude.as_ref().map(|r| r.as_str()).unwrap_or("")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_scheme_path_port() {
        assert_eq!(normalize("https://Example.COM:8443/a/b?q=1#f"), "example.com");
        assert_eq!(normalize("  sub.example.com  "), "sub.example.com");
    }

    #[test]
    fn rejects_garbage_and_private_literals() {
        assert!(Target::parse("").is_err());
        assert!(Target::parse("not a domain").is_err());
        assert!(Target::parse("127.0.0.1").is_err());
        assert!(Target::parse("192.168.1.10").is_err());
        assert!(Target::parse("-bad-.example.com").is_err());
    }

    #[test]
    fn accepts_valid_fqdn() {
        let t = Target::parse("https://www.example.com/login").unwrap();
        assert_eq!(t.fqdn(), "www.example.com");
    }

    #[test]
    fn registrable_domain_handles_two_level_suffix() {
        assert_eq!(
            Target::parse("shop.example.co.uk").unwrap().registrable_domain(),
            "example.co.uk"
        );
        assert_eq!(
            Target::parse("a.b.example.com").unwrap().registrable_domain(),
            "example.com"
        );
    }

    #[test]
    fn ownership_requires_valid_labels() {
        let t = Target::parse("example.com").unwrap();
        assert!(t.owns("example.com"));
        assert!(t.owns("api.example.com"));
        assert!(t.owns("a.b.example.com"));
        assert!(!t.owns("evil-example.com"));
        assert!(!t.owns("-x.example.com"));
    }

    #[test]
    fn scope_include_exclude() {
        let s = Scope::new(Some(r"^(api|www)\."), Some(r"^www\.dev\.")).unwrap();
        assert!(s.allows("api.example.com"));
        assert!(!s.allows("mail.example.com"));
        let open = Scope::default();
        assert!(open.allows("anything.example.com"));
    }
}
