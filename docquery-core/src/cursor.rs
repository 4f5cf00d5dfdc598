//! Lazy result cursors.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use bson::Document;
use futures::{Stream, StreamExt, stream::BoxStream};

use crate::{
    backend::DocumentStream,
    error::QueryResult,
    model::{Model, ModelExt},
};

/// Forward-only, single-pass view over a query's results.
///
/// Documents are pulled from the store as the cursor is polled. Restarting means running the
/// query again. Dropping the cursor releases the underlying store cursor.
pub struct ResultCursor {
    collection: String,
    inner: DocumentStream,
}

impl ResultCursor {
    pub fn new(collection: impl Into<String>, inner: DocumentStream) -> Self {
        Self {
            collection: collection.into(),
            inner,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Deserializes each document into `M` as it is pulled.
    pub fn models<M: Model>(self) -> BoxStream<'static, QueryResult<M>> {
        self.inner
            .map(|document| document.and_then(M::from_document))
            .boxed()
    }

    /// Releases the cursor without draining it.
    pub fn close(self) {
        drop(self.inner);
    }
}

impl Stream for ResultCursor {
    type Item = QueryResult<Document>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl std::fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCursor")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}
