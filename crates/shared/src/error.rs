//! Validation errors raised while constructing shared types.

use thiserror::Error;

/// Errors produced by shared type constructors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// Principal is empty after trimming.
    #[error("Principal must not be empty")]
    EmptyPrincipal,

    /// Principal exceeds the maximum length.
    #[error("Principal is {len} bytes long, maximum is {max}")]
    PrincipalTooLong {
        /// Actual length in bytes.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },
}

impl TypeError {
    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyPrincipal => "EMPTY_PRINCIPAL",
            Self::PrincipalTooLong { .. } => "PRINCIPAL_TOO_LONG",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(TypeError::EmptyPrincipal.error_code(), "EMPTY_PRINCIPAL");
        assert_eq!(
            TypeError::PrincipalTooLong { len: 200, max: 128 }.error_code(),
            "PRINCIPAL_TOO_LONG"
        );
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            TypeError::EmptyPrincipal.to_string(),
            "Principal must not be empty"
        );
        assert_eq!(
            TypeError::PrincipalTooLong { len: 200, max: 128 }.to_string(),
            "Principal is 200 bytes long, maximum is 128"
        );
    }
}
