use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt, TryStreamExt};

use crate::error::{Error, Result};
use crate::result_shape::ResultShape;

/// Element type of every response.
pub type Payload = serde_json::Value;

/// Values produced by a transport over time. Nothing happens until the stream is polled and
/// dropping it cancels whatever is still in flight.
pub type ResponseStream = BoxStream<'static, Result<Payload>>;

/// Result handed back to the caller, in the shape the operation was declared with.
pub enum AsyncResult {
    Single(BoxFuture<'static, Result<Option<Payload>>>),
    Multiple(ResponseStream),
}

impl AsyncResult {
    /// Bridges a transport stream into the requested shape. A single result resolves with the
    /// first value and drops the rest of the stream, cancelling the remainder of the exchange.
    pub fn from_stream(stream: ResponseStream, shape: ResultShape) -> Self {
        match shape {
            ResultShape::Single => AsyncResult::Single(first_value(stream).boxed()),
            ResultShape::Multiple => AsyncResult::Multiple(stream),
        }
    }

    pub fn shape(&self) -> ResultShape {
        match self {
            AsyncResult::Single(_) => ResultShape::Single,
            AsyncResult::Multiple(_) => ResultShape::Multiple,
        }
    }

    /// Waits for the whole result. A single result yields zero or one value.
    pub async fn collect(self) -> Result<Vec<Payload>> {
        match self {
            AsyncResult::Single(future) => Ok(future.await?.into_iter().collect()),
            AsyncResult::Multiple(stream) => stream.try_collect().await,
        }
    }

    /// Views either shape as a stream, a single result becomes a stream of at most one value.
    pub fn into_stream(self) -> ResponseStream {
        match self {
            AsyncResult::Single(future) => future
                .into_stream()
                .filter_map(|value| async move { value.transpose() })
                .boxed(),
            AsyncResult::Multiple(stream) => stream,
        }
    }
}

async fn first_value(mut stream: ResponseStream) -> Result<Option<Payload>> {
    stream.next().await.transpose()
}

/// A result that fails as soon as it is awaited.
pub(crate) fn failed(error: Error) -> ResponseStream {
    futures::stream::once(async move { Err(error) }).boxed()
}
