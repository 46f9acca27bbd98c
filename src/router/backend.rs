//! Backend Kinds
//!
//! The fixed set of downstream worker classes a task can be routed to.

use crate::error::ProxyError;
use serde::Serialize;
use std::str::FromStr;

/// A known backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Qwen worker (stubbed)
    Qwen,

    /// The upstream Gemini API, reached through the token pool
    Gemini,

    /// Claude worker (stubbed)
    Claude,
}

impl BackendKind {
    /// Every backend kind, in reporting order
    pub const ALL: [BackendKind; 3] = [BackendKind::Qwen, BackendKind::Gemini, BackendKind::Claude];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Qwen => "qwen",
            BackendKind::Gemini => "gemini",
            BackendKind::Claude => "claude",
        }
    }

    /// Human-readable name reported in dispatch results
    pub fn display_name(&self) -> &'static str {
        match self {
            BackendKind::Qwen => "Qwen Agent",
            BackendKind::Gemini => "Gemini API",
            BackendKind::Claude => "Claude Agent",
        }
    }

    /// Whether tasks for this kind go to the upstream generative API
    pub fn is_generative(&self) -> bool {
        matches!(self, BackendKind::Gemini)
    }
}

impl FromStr for BackendKind {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qwen" => Ok(BackendKind::Qwen),
            "gemini" => Ok(BackendKind::Gemini),
            "claude" => Ok(BackendKind::Claude),
            other => Err(ProxyError::UnknownBackendType(other.to_string())),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_parse_unknown() {
        let err = "mistral".parse::<BackendKind>().unwrap_err();
        assert!(matches!(err, ProxyError::UnknownBackendType(ref name) if name == "mistral"));

        // Matching is exact
        assert!("Gemini".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", BackendKind::Claude), "claude");
        assert_eq!(BackendKind::Gemini.display_name(), "Gemini API");
        assert!(BackendKind::Gemini.is_generative());
        assert!(!BackendKind::Qwen.is_generative());
    }
}
