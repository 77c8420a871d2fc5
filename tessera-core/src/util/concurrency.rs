//! Bounded-concurrency helpers
//!
//! Used at startup to load many sources (for instance one task per file)
//! without unbounded fan-out.

use crate::error::TesseraResult;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;

/// Run `total` indexed tasks with at most `concurrency` in flight.
///
/// The first error is returned and every task still in flight is dropped,
/// which cancels it. On success the results come back in index order.
pub async fn concurrent<F, Fut, T>(total: usize, concurrency: usize, f: F) -> TesseraResult<Vec<T>>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = TesseraResult<T>>,
{
    let limit = concurrency.max(1);
    let mut indexed: Vec<(usize, T)> = stream::iter(0..total)
        .map(|i| {
            let fut = f(i);
            async move { fut.await.map(|value| (i, value)) }
        })
        .buffer_unordered(limit)
        .try_collect()
        .await?;
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, value)| value).collect())
}

/// Map `items` concurrently with at most `max_concurrent` in flight,
/// keeping the successes and errors apart.
pub async fn concurrent_try_map<T, F, R, E, Fut>(
    items: Vec<T>,
    max_concurrent: usize,
    f: F,
) -> (Vec<R>, Vec<E>)
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let results: Vec<Result<R, E>> = stream::iter(items)
        .map(f)
        .buffer_unordered(max_concurrent.max(1))
        .collect()
        .await;

    let mut successes = Vec::new();
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(value) => successes.push(value),
            Err(error) => errors.push(error),
        }
    }
    (successes, errors)
}
