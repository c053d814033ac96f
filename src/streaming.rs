//! Lazy delivery of paged query results.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use tokio::sync::mpsc;

use crate::{codec::Row, error::ConnectionError};

/// Consumer handle for a paged result.
///
/// Returned inside [`QueryResult::Stream`](crate::QueryResult::Stream)
/// when the first page of a result carries a continuation token. Rows
/// arrive in server order, within and across pages; the next page is
/// only requested once the previous one has been delivered. The stream
/// ends after the final page, or yields a terminal `Err` if a follow-up
/// page fails server-side. Dropping the stream abandons the remaining
/// pages.
#[derive(Debug)]
pub struct RowStream {
    rx: mpsc::Receiver<Result<Row, ConnectionError>>,
}

impl RowStream {
    pub(crate) fn new(rx: mpsc::Receiver<Result<Row, ConnectionError>>) -> Self { Self { rx } }

    /// Receive the next row; `None` marks the end of the result.
    pub async fn next_row(&mut self) -> Option<Result<Row, ConnectionError>> {
        self.rx.recv().await
    }

    /// Drain the stream into a vector.
    ///
    /// # Errors
    ///
    /// Returns the first error the stream yields, discarding any rows
    /// already collected.
    pub async fn collect_rows(mut self) -> Result<Vec<Row>, ConnectionError> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await {
            rows.push(row?);
        }
        Ok(rows)
    }
}

impl Stream for RowStream {
    type Item = Result<Row, ConnectionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
