//! Central error catalog: every failure the server surfaces to players is
//! registered here with a stable numeric code and symbolic reason.
//!
//! The catalog is fixed at compile time. Handlers look definitions up by
//! reason, attach optional detail, and the wire layer maps the catalog
//! category onto the client-facing category set.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Internal taxonomy of a cataloged error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogCategory {
    Validation,
    Conflict,
    Capacity,
    State,
    RateLimit,
    Security,
    Internal,
}

/// Client-facing error category carried in `event.error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Consistency,
    RateLimit,
    Auth,
    Validation,
    System,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Consistency => "CONSISTENCY",
            Self::RateLimit => "RATE_LIMIT",
            Self::Auth => "AUTH",
            Self::Validation => "VALIDATION",
            Self::System => "SYSTEM",
        };
        write!(f, "{s}")
    }
}

/// A single catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorDef {
    /// Stable numeric code, `Exxxx`.
    pub numeric_code: &'static str,
    /// Stable symbolic reason key. This is what clients branch on.
    pub reason: &'static str,
    pub category: CatalogCategory,
    pub retryable: bool,
    pub human_message: &'static str,
}

pub const INVALID_TILE_PLACEMENT: &str = "invalid_tile_placement";
pub const PRECEDENCE_CONFLICT: &str = "precedence_conflict";
pub const INSTANCE_CAPACITY_EXCEEDED: &str = "instance_capacity_exceeded";
pub const INSTANCE_TERMINATED: &str = "instance_terminated";
pub const GRACE_PERIOD_EXPIRED: &str = "grace_period_expired";
pub const RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";
pub const CROSS_INSTANCE_ACTION: &str = "cross_instance_action";
pub const UNAUTHORIZED_PRIVATE_MESSAGE: &str = "unauthorized_private_message";
pub const RETENTION_EXPIRED: &str = "retention_expired";
pub const INTERNAL_ERROR: &str = "internal_error";

/// The full catalog, ordered by numeric code.
pub const CATALOG: &[ErrorDef] = &[
    ErrorDef {
        numeric_code: "E1001",
        reason: INVALID_TILE_PLACEMENT,
        category: CatalogCategory::Validation,
        retryable: false,
        human_message: "That tile cannot be placed there.",
    },
    ErrorDef {
        numeric_code: "E1002",
        reason: PRECEDENCE_CONFLICT,
        category: CatalogCategory::Conflict,
        retryable: true,
        human_message: "Another action took precedence this tick.",
    },
    ErrorDef {
        numeric_code: "E1003",
        reason: INSTANCE_CAPACITY_EXCEEDED,
        category: CatalogCategory::Capacity,
        retryable: true,
        human_message: "The instance is full.",
    },
    ErrorDef {
        numeric_code: "E1004",
        reason: INSTANCE_TERMINATED,
        category: CatalogCategory::State,
        retryable: false,
        human_message: "The instance has been terminated.",
    },
    ErrorDef {
        numeric_code: "E1005",
        reason: GRACE_PERIOD_EXPIRED,
        category: CatalogCategory::State,
        retryable: false,
        human_message: "The reconnect window has expired.",
    },
    ErrorDef {
        numeric_code: "E1006",
        reason: RATE_LIMIT_EXCEEDED,
        category: CatalogCategory::RateLimit,
        retryable: true,
        human_message: "Too many requests; slow down.",
    },
    ErrorDef {
        numeric_code: "E1007",
        reason: CROSS_INSTANCE_ACTION,
        category: CatalogCategory::Validation,
        retryable: false,
        human_message: "Actions cannot target another instance.",
    },
    ErrorDef {
        numeric_code: "E1008",
        reason: UNAUTHORIZED_PRIVATE_MESSAGE,
        category: CatalogCategory::Security,
        retryable: false,
        human_message: "You are not allowed to message that player.",
    },
    ErrorDef {
        numeric_code: "E1009",
        reason: RETENTION_EXPIRED,
        category: CatalogCategory::State,
        retryable: false,
        human_message: "The requested history is no longer retained.",
    },
    ErrorDef {
        numeric_code: "E1010",
        reason: INTERNAL_ERROR,
        category: CatalogCategory::Internal,
        retryable: true,
        human_message: "An internal error occurred.",
    },
];

/// Returns every catalog entry.
pub fn list() -> &'static [ErrorDef] {
    CATALOG
}

/// Looks an entry up by its numeric code (`E1006`).
pub fn by_code(code: &str) -> Option<&'static ErrorDef> {
    CATALOG.iter().find(|def| def.numeric_code == code)
}

/// Looks an entry up by its symbolic reason (`rate_limit_exceeded`).
pub fn by_reason(reason: &str) -> Option<&'static ErrorDef> {
    CATALOG.iter().find(|def| def.reason == reason)
}

/// A concrete, surfaceable error: a catalog definition plus per-occurrence
/// context (detail text, retry-after for rate limits).
#[derive(Debug, Clone)]
pub struct CatalogError {
    def: &'static ErrorDef,
    detail: Option<String>,
    retry_after_seconds: Option<u64>,
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.reason(), self.numeric_code(), self.message())
    }
}

impl std::error::Error for CatalogError {}

impl CatalogError {
    /// Builds an error from a symbolic reason. Unknown reasons collapse to
    /// `internal_error` rather than panicking in a handler path.
    pub fn from_reason(reason: &str) -> Self {
        let def = by_reason(reason)
            .or_else(|| by_reason(INTERNAL_ERROR))
            .expect("catalog always contains internal_error");
        Self {
            def,
            detail: None,
            retry_after_seconds: None,
        }
    }

    /// Shorthand for `internal_error` with detail text.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::from_reason(INTERNAL_ERROR).with_detail(detail)
    }

    /// Attaches free-form detail appended to the human message.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attaches a retry-after hint (rate-limit category).
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = Some(seconds);
        self
    }

    pub fn def(&self) -> &'static ErrorDef {
        self.def
    }

    pub fn reason(&self) -> &'static str {
        self.def.reason
    }

    pub fn numeric_code(&self) -> &'static str {
        self.def.numeric_code
    }

    pub fn category(&self) -> CatalogCategory {
        self.def.category
    }

    pub fn retryable(&self) -> bool {
        self.def.retryable
    }

    pub fn retry_after_seconds(&self) -> Option<u64> {
        self.retry_after_seconds
    }

    /// Full human-readable message: catalog text plus detail and retry
    /// hint when present.
    pub fn message(&self) -> String {
        let mut msg = self.def.human_message.to_string();
        if let Some(detail) = &self.detail {
            msg.push_str(": ");
            msg.push_str(detail);
        }
        if let Some(secs) = self.retry_after_seconds {
            msg.push_str(&format!(" Retry after {secs}s."));
        }
        msg
    }

    /// Maps the catalog category onto the client-facing category set.
    ///
    /// Security maps to AUTH (unauthorized_private_message is the only
    /// security entry today); validation, state, and capacity all surface
    /// as VALIDATION; conflicts surface as CONSISTENCY.
    pub fn wire_category(&self) -> ErrorCategory {
        match self.def.category {
            CatalogCategory::Security => ErrorCategory::Auth,
            CatalogCategory::Validation
            | CatalogCategory::State
            | CatalogCategory::Capacity => ErrorCategory::Validation,
            CatalogCategory::RateLimit => ErrorCategory::RateLimit,
            CatalogCategory::Conflict => ErrorCategory::Consistency,
            CatalogCategory::Internal => ErrorCategory::System,
        }
    }
}
