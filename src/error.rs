use thiserror::Error;

pub type Result<T, E = DocCacheError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DocCacheError {
    /// A type field or a custom resolver produced something that is neither a string nor null.
    #[error("expected the document type to be a string or null but received {0}")]
    InvalidType(String),

    #[error("value is not a document: {0}")]
    NotADocument(String),

    #[error("cannot subscribe to a value with no document references")]
    EmptyTopics,

    #[error("store failure: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("failed to build {0}")]
    Build(String),
}

impl DocCacheError {
    pub fn store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Store(Box::new(err))
    }

    pub(crate) fn not_a_document(value: &impl std::fmt::Display) -> Self {
        let mut text = value.to_string();
        if text.len() > 80 {
            let cut = (0..=80).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0);
            text.truncate(cut);
            text.push_str("...");
        }
        Self::NotADocument(text)
    }
}

