//! Core primitives shared by the recon engine: target handling, secret
//! redaction, path containment, and the concurrency governor/breaker pair.

pub mod breaker;
pub mod errors;
pub mod governor;
pub mod pathguard;
pub mod redact;
pub mod target;

pub use errors::EngineError;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }
}
