use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    application::{feed::FeedError, images::ImageError},
    infra::error::InfraError,
};

/// Flattened view of an error and its `source()` chain, used for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    /// Messages joined outermost first.
    pub fn chain(&self) -> String {
        self.messages.join(": ")
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("feed ranking failed")]
    Feed(#[from] FeedError),
    #[error("image lookup failed")]
    Image(#[from] ImageError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::repos::RepoError;

    #[test]
    fn report_walks_the_source_chain() {
        let err = AppError::from(FeedError::Repo(RepoError::Timeout));

        let report = err.report();

        assert_eq!(
            report.messages,
            vec!["feed ranking failed".to_string(), "database timeout".to_string()]
        );
        assert_eq!(report.chain(), "feed ranking failed: database timeout");
    }

    #[test]
    fn transparent_variants_keep_inner_message() {
        let err = AppError::from(InfraError::configuration("missing database url"));
        assert_eq!(err.to_string(), "configuration error: missing database url");
    }
}
