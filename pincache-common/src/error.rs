// Copyright 2025 pincache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    backtrace::Backtrace,
    fmt::{Debug, Display},
    sync::Arc,
};

/// All kinds of [`Error`] raised by pincache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Error raised by an external collaborator, e.g. the loader of a cache miss.
    External,
    /// Invalid configuration.
    Config,
    /// The cache has been closed.
    Closed,
    /// The slot was invalidated before the loaded entry could be pinned.
    Invalidated,
    /// A background task was cancelled before it completed.
    TaskCancelled,
}

impl ErrorKind {
    /// Convert self into static str.
    pub fn into_static(self) -> &'static str {
        self.into()
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.into_static())
    }
}

impl From<ErrorKind> for &'static str {
    fn from(v: ErrorKind) -> &'static str {
        match v {
            ErrorKind::External => "External error",
            ErrorKind::Config => "Config error",
            ErrorKind::Closed => "Closed",
            ErrorKind::Invalidated => "Invalidated",
            ErrorKind::TaskCancelled => "Task cancelled",
        }
    }
}

/// The error returned by all pincache functions.
///
/// `Display` renders a single line:
///
/// ```shell
/// External error, context: { key: 42 } => load entry failed, source: page not found
/// ```
///
/// `Debug` renders multiple lines with the context, the source and the backtrace (if captured). `{:#?}` falls back to
/// the conventional struct-style representation.
///
/// The source is shared, so cloning an error is cheap enough to hand the same failure to every waiter of a
/// population.
pub struct Error {
    kind: ErrorKind,
    message: String,

    context: Vec<(&'static str, String)>,

    source: Option<Arc<anyhow::Error>>,
    backtrace: Option<Arc<Backtrace>>,
}

impl Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            let mut de = f.debug_struct("Error");
            de.field("kind", &self.kind);
            de.field("message", &self.message);
            de.field("context", &self.context);
            de.field("source", &self.source);
            de.field("backtrace", &self.backtrace);
            return de.finish();
        }

        write!(f, "{}", self.kind)?;
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        writeln!(f)?;

        if !self.context.is_empty() {
            writeln!(f)?;
            writeln!(f, "Context:")?;
            for (k, v) in self.context.iter() {
                writeln!(f, "  {}: {}", k, v)?;
            }
        }

        if let Some(source) = &self.source {
            writeln!(f)?;
            writeln!(f, "Source:")?;
            writeln!(f, "  {source:#}")?;
        }

        if let Some(backtrace) = &self.backtrace {
            writeln!(f)?;
            writeln!(f, "Backtrace:")?;
            writeln!(f, "{backtrace}")?;
        }

        Ok(())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;

        if !self.context.is_empty() {
            write!(f, ", context: {{ ")?;
            let mut iter = self.context.iter().peekable();
            while let Some((k, v)) = iter.next() {
                write!(f, "{}: {}", k, v)?;
                if iter.peek().is_some() {
                    write!(f, ", ")?;
                }
            }
            write!(f, " }}")?;
        }

        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }

        if let Some(source) = &self.source {
            write!(f, ", source: {source}")?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|v| v.as_ref().as_ref())
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            context: self.context.clone(),
            source: self.source.clone(),
            backtrace: self.backtrace.clone(),
        }
    }
}

impl Error {
    /// Create a new error.
    ///
    /// If the error needs to carry a source error, please use `with_source` method.
    ///
    /// ```rust
    /// # use pincache_common::error::{Error, ErrorKind};
    /// let io_error = std::io::Error::other("page file is truncated");
    /// Error::new(ErrorKind::External, "load entry failed").with_source(io_error);
    /// ```
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Vec::new(),
            source: None,
            backtrace: Some(Arc::new(Backtrace::capture())),
        }
    }

    /// Add more context in error.
    pub fn with_context(mut self, key: &'static str, value: impl ToString) -> Self {
        self.context.push((key, value.to_string()));
        self
    }

    /// Set source for error.
    ///
    /// # Notes
    ///
    /// If the source has been set, we will raise a panic here.
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "the source error has been set");
        self.source = Some(Arc::new(source.into()));
        self
    }

    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the error context.
    pub fn context(&self) -> &Vec<(&'static str, String)> {
        &self.context
    }

    /// Get the error backtrace.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_deref()
    }

    /// Get the error source.
    pub fn source(&self) -> Option<&anyhow::Error> {
        self.source.as_deref()
    }

    /// Downcast the reference of the source error to a specific error type reference.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source.as_deref().and_then(|e| e.downcast_ref::<E>())
    }
}

/// Result type for pincache.
pub type Result<T> = std::result::Result<T, Error>;

/// Helper methods for Error.
impl Error {
    /// Helper for wrapping the failure of a loader into an [`ErrorKind::External`] error.
    pub fn loader(source: impl Into<anyhow::Error>) -> Self {
        Error::new(ErrorKind::External, "load entry failed").with_source(source)
    }

    /// Helper for creating an [`ErrorKind::Closed`] error.
    pub fn closed() -> Self {
        Error::new(ErrorKind::Closed, "the cache has been closed")
    }

    /// Helper for creating an [`ErrorKind::Invalidated`] error for the given key.
    pub fn invalidated(key: impl Debug) -> Self {
        Error::new(ErrorKind::Invalidated, "entry was invalidated before it was pinned")
            .with_context("key", format!("{key:?}"))
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<Error>();
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct PageNotFound(u64);

    impl std::fmt::Display for PageNotFound {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "page {} not found", self.0)
        }
    }

    impl std::error::Error for PageNotFound {}

    #[test]
    fn test_error_display() {
        let err = Error::loader(PageNotFound(7))
            .with_context("key", 7)
            .with_context("file", "t1/c0.arrow");

        assert_eq!(
            "External error, context: { key: 7, file: t1/c0.arrow } => load entry failed, source: page 7 not found",
            err.to_string()
        );
    }

    #[test]
    fn test_error_downcast_survives_clone() {
        let err = Error::loader(PageNotFound(42));
        let cloned = err.clone();

        assert_eq!(cloned.kind(), ErrorKind::External);
        assert_eq!(cloned.downcast_ref::<PageNotFound>(), Some(&PageNotFound(42)));
        assert!(Arc::ptr_eq(
            err.source.as_ref().unwrap(),
            cloned.source.as_ref().unwrap()
        ));
    }

    #[test]
    fn test_invalidated_carries_key() {
        let err = Error::invalidated(("t1", 3u32));
        assert_eq!(err.kind(), ErrorKind::Invalidated);
        assert_eq!(err.context(), &vec![("key", "(\"t1\", 3)".to_string())]);
    }

    #[test]
    fn test_error_format() {
        let e = Error::closed().with_context("name", "buffer-pool");

        println!("========== BEGIN DISPLAY FORMAT ==========");
        println!("{e}");
        println!("========== END DISPLAY FORMAT ==========");

        println!();

        println!("========== BEGIN DEBUG FORMAT ==========");
        println!("{e:?}");
        println!("========== END DEBUG FORMAT ==========");
    }
}
