/*!
 * Tests for error types and conversions
 */

use subrelay::errors::{AppError, ProviderError, SubtitleError, TranslationError};

#[test]
fn test_providerError_apiError_shouldDisplayStatusAndMessage() {
    let error = ProviderError::ApiError {
        status_code: 503,
        message: "Overloaded".to_string(),
    };
    let display = format!("{}", error);
    assert!(display.contains("503"));
    assert!(display.contains("Overloaded"));
}

#[test]
fn test_providerError_transientClassification_shouldFollowStatus() {
    let api = |status_code| ProviderError::ApiError {
        status_code,
        message: String::new(),
    };
    for status in [408, 425, 429, 500, 502, 503, 504] {
        assert!(api(status).is_transient(), "{} should be transient", status);
    }
    for status in [400, 404, 422] {
        assert!(!api(status).is_transient(), "{} should be permanent", status);
    }
    assert!(ProviderError::ConnectionError("reset".into()).is_transient());
    assert!(ProviderError::ParseError("truncated".into()).is_transient());
    assert!(ProviderError::RateLimitExceeded("slow down".into()).is_transient());
    assert!(!ProviderError::AuthenticationError("bad key".into()).is_transient());
}

#[test]
fn test_providerError_fromStatus_shouldPickVariant() {
    assert!(matches!(ProviderError::from_status(401, "x"), ProviderError::AuthenticationError(_)));
    assert!(matches!(ProviderError::from_status(403, "x"), ProviderError::AuthenticationError(_)));
    assert!(matches!(ProviderError::from_status(429, "x"), ProviderError::RateLimitExceeded(_)));
    assert!(matches!(
        ProviderError::from_status(500, "x"),
        ProviderError::ApiError { status_code: 500, .. }
    ));
}

#[test]
fn test_translationError_fromProviderError_shouldWrapCorrectly() {
    let translation_error: TranslationError = ProviderError::RequestFailed("Test error".to_string()).into();
    assert!(format!("{}", translation_error).contains("Provider error"));
}

#[test]
fn test_translationError_retryableLater_shouldCoverQuotaAndTimeout() {
    assert!(TranslationError::DailyLimitExceeded { limit: 1500 }.is_retryable_later());
    assert!(TranslationError::TimedOut(3600).is_retryable_later());
    assert!(!TranslationError::Cancelled.is_retryable_later());
    assert!(!TranslationError::PermanentBackend(ProviderError::AuthenticationError("x".into())).is_retryable_later());
    assert!(format!("{}", TranslationError::DailyLimitExceeded { limit: 1500 }).contains("1500"));
}

#[test]
fn test_appError_fromNestedErrors_shouldWrapCorrectly() {
    let app_error: AppError = ProviderError::ConnectionError("Network down".to_string()).into();
    assert!(format!("{}", app_error).contains("Network down"));

    let app_error: AppError = SubtitleError::Format("empty".to_string()).into();
    assert!(format!("{}", app_error).contains("Subtitle error"));

    let app_error: AppError = TranslationError::Cancelled.into();
    assert!(format!("{}", app_error).contains("cancelled"));
}

#[test]
fn test_appError_fromAnyhow_shouldKeepMessage() {
    let app_error: AppError = anyhow::anyhow!("disk full").into();
    assert!(format!("{}", app_error).contains("disk full"));
}
