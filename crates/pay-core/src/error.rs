//! # Payment Error Types
//!
//! Typed error handling for the litecart payment engine.
//! All payment operations return `Result<T, PaymentError>`.
//!
//! Notification failures are deliberately a separate type
//! ([`NotificationError`]): they are reported after a cart transition has
//! committed and never undo it.

use thiserror::Error;

/// Core error type for all payment operations
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Configuration errors (missing keys, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed request, no state change
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Cart not found in the store
    #[error("Cart not found: {cart_id}")]
    CartNotFound { cart_id: String },

    /// Product not found in catalog
    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: String },

    /// A cart with this ID already exists
    #[error("Duplicate cart id: {cart_id}")]
    DuplicateCart { cart_id: String },

    /// Remote payment API failed, timed out or was unreachable
    #[error("Provider unavailable [{provider}]: {message}")]
    ProviderUnavailable { provider: String, message: String },

    /// Provider payload failed signature or shape validation
    #[error("Provider payload rejected [{provider}]: {message}")]
    ProviderRejected { provider: String, message: String },

    /// Provider is configured but switched off
    #[error("Payment provider disabled: {provider}")]
    ProviderDisabled { provider: String },

    /// Cart store read or write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Notification delivery failed
    #[error(transparent)]
    Notification(#[from] NotificationError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PaymentError {
    pub fn unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        PaymentError::ProviderUnavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn rejected(provider: impl Into<String>, message: impl Into<String>) -> Self {
        PaymentError::ProviderRejected {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Returns true if the whole operation can safely be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::ProviderUnavailable { .. } | PaymentError::Persistence(_)
        )
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            PaymentError::Configuration(_) => 500,
            PaymentError::Validation(_) => 400,
            PaymentError::CartNotFound { .. } => 404,
            PaymentError::ProductNotFound { .. } => 404,
            PaymentError::DuplicateCart { .. } => 409,
            PaymentError::ProviderUnavailable { .. } => 502,
            PaymentError::ProviderRejected { .. } => 401,
            PaymentError::ProviderDisabled { .. } => 404,
            PaymentError::Persistence(_) => 500,
            PaymentError::Notification(_) => 500,
            PaymentError::Serialization(_) => 500,
            PaymentError::Internal(_) => 500,
        }
    }
}

/// Result type alias for payment operations
pub type PaymentResult<T> = Result<T, PaymentError>;

/// Notification channel that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationChannel {
    Email,
    Webhook,
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationChannel::Email => write!(f, "email"),
            NotificationChannel::Webhook => write!(f, "webhook"),
        }
    }
}

/// Email or webhook delivery failure
#[derive(Debug, Clone, Error)]
#[error("Notification failed [{channel}]: {message}")]
pub struct NotificationError {
    pub channel: NotificationChannel,
    pub message: String,
}

impl NotificationError {
    pub fn email(message: impl Into<String>) -> Self {
        Self {
            channel: NotificationChannel::Email,
            message: message.into(),
        }
    }

    pub fn webhook(message: impl Into<String>) -> Self {
        Self {
            channel: NotificationChannel::Webhook,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(PaymentError::unavailable("stripe", "timeout").is_retryable());
        assert!(PaymentError::Persistence("disk full".into()).is_retryable());
        assert!(!PaymentError::Validation("bad data".into()).is_retryable());
        assert!(!PaymentError::rejected("paypal", "bad signature").is_retryable());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(PaymentError::Validation("test".into()).status_code(), 400);
        assert_eq!(
            PaymentError::CartNotFound {
                cart_id: "x".into()
            }
            .status_code(),
            404
        );
        assert_eq!(PaymentError::unavailable("stripe", "down").status_code(), 502);
        assert_eq!(PaymentError::rejected("stripe", "sig").status_code(), 401);
        assert_eq!(
            PaymentError::from(NotificationError::email("smtp down")).status_code(),
            500
        );
    }

    #[test]
    fn test_notification_error_display() {
        let err = NotificationError::webhook("HTTP 503");
        assert_eq!(err.to_string(), "Notification failed [webhook]: HTTP 503");
    }
}
