//! Cancellable record streams.
//!
//! A [`RecordStream`] hands out query results one row at a time. A spawned
//! producer drives the database cursor and forwards rows over a channel with
//! room for a single record, so at most one decoded row is buffered ahead of
//! the consumer. The producer watches for the consumer going away while it
//! waits on the cursor; once that happens the cursor and its pooled connection
//! are released without reading the remaining rows.

use crate::error::{MetadataError, MetadataResult};
use futures::{Stream, StreamExt};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Pool, Sqlite};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A stream of records backed by a live database cursor.
///
/// Decode failures of individual rows are yielded as `Err` items and the
/// stream continues with the next row. Dropping the stream stops the producer;
/// [`RecordStream::close`] additionally waits for it to finish.
pub struct RecordStream<T> {
    rx: mpsc::Receiver<MetadataResult<T>>,
    producer: JoinHandle<()>,
}

impl<T> RecordStream<T>
where
    T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin + 'static,
{
    /// Run `sql` with the given text parameters and stream the decoded rows.
    pub(crate) fn spawn(pool: Pool<Sqlite>, sql: String, params: Vec<String>) -> Self {
        let (tx, rx) = mpsc::channel(1);

        let producer = tokio::spawn(async move {
            let mut query = sqlx::query_as::<_, T>(&sql);
            for param in params {
                query = query.bind(param);
            }
            let mut rows = query.fetch(&pool);

            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        debug!("record stream consumer went away, releasing cursor");
                        break;
                    }
                    next = rows.next() => next,
                };

                let Some(item) = next else {
                    break;
                };
                if tx.send(item.map_err(MetadataError::from)).await.is_err() {
                    break;
                }
            }
        });

        Self { rx, producer }
    }
}

impl<T> RecordStream<T> {
    /// Pull the next record. Returns `None` once the query is exhausted.
    pub async fn next(&mut self) -> Option<MetadataResult<T>> {
        self.rx.recv().await
    }

    /// Stop the stream and wait until the producer has released its cursor.
    pub async fn close(self) {
        let RecordStream { rx, producer } = self;
        drop(rx);
        if let Err(e) = producer.await
            && e.is_panic()
        {
            warn!(error = %e, "record stream producer panicked");
        }
    }

    /// Drain the remaining records, failing on the first error.
    pub async fn try_collect_all(mut self) -> MetadataResult<Vec<T>> {
        let mut out = Vec::new();
        while let Some(item) = self.rx.recv().await {
            out.push(item?);
        }
        Ok(out)
    }
}

impl<T> Stream for RecordStream<T> {
    type Item = MetadataResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
