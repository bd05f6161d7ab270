//! User-presence authenticator capability
//!
//! The vault never talks to a biometric API directly. It is handed an
//! [`Authenticator`] and awaits it; prompts that need the UI thread are the
//! implementor's concern and must not block the caller's executor thread.

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{AuthenticationResult, PromptInfo};

/// Performs the biometric / device credential check
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Show the prompt and resolve once the user passes, fails or cancels
    async fn prompt_user_presence(&self, prompt: &PromptInfo) -> AuthenticationResult;

    /// Whether any presence method is enrolled
    fn is_available(&self) -> bool {
        true
    }

    /// Short description for status output
    fn method(&self) -> &'static str;
}

#[async_trait]
impl<T: Authenticator + ?Sized> Authenticator for Arc<T> {
    async fn prompt_user_presence(&self, prompt: &PromptInfo) -> AuthenticationResult {
        (**self).prompt_user_presence(prompt).await
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn method(&self) -> &'static str {
        (**self).method()
    }
}

/// Always passes. For non-secure test environments only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuthenticator;

#[async_trait]
impl Authenticator for NoopAuthenticator {
    async fn prompt_user_presence(&self, _prompt: &PromptInfo) -> AuthenticationResult {
        AuthenticationResult::passed()
    }

    fn method(&self) -> &'static str {
        "none"
    }
}

/// Reports that no presence method is enrolled
#[derive(Debug, Clone)]
pub struct UnavailableAuthenticator {
    reason: String,
}

impl UnavailableAuthenticator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Default for UnavailableAuthenticator {
    fn default() -> Self {
        Self::new("Biometric authentication not available on this platform")
    }
}

#[async_trait]
impl Authenticator for UnavailableAuthenticator {
    async fn prompt_user_presence(&self, _prompt: &PromptInfo) -> AuthenticationResult {
        AuthenticationResult::unavailable(self.reason.clone())
    }

    fn is_available(&self) -> bool {
        false
    }

    fn method(&self) -> &'static str {
        "unavailable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_passes() {
        let result = NoopAuthenticator.prompt_user_presence(&PromptInfo::default()).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_unavailable_reports_missing_method() {
        let auth = UnavailableAuthenticator::default();
        assert!(!auth.is_available());
        let result = auth.prompt_user_presence(&PromptInfo::default()).await;
        assert!(!result.success);
        assert!(!result.method_available);
    }

    #[tokio::test]
    async fn test_arc_forwards() {
        let auth: Arc<dyn Authenticator> = Arc::new(NoopAuthenticator);
        assert_eq!(auth.method(), "none");
        assert!(auth.prompt_user_presence(&PromptInfo::default()).await.success);
    }
}
