//! User callbacks and the pool that runs blocking ones off the event loop.

use std::error::Error;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::Semaphore;

/// Failure raised by a user callback.
///
/// Any `std::error::Error` converts into it, so handlers can use `?` freely.
pub struct HandlerError {
    message: String,
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl HandlerError {
    /// Builds an error carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Text rendered into error replies.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Underlying error, when the failure wrapped one.
    #[must_use]
    pub fn source(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.source.as_deref()
    }
}

impl<E> From<E> for HandlerError
where
    E: Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("message", &self.message)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Result returned by user callbacks.
pub type HandlerResult<T = ()> = Result<T, HandlerError>;

const PANICKED: &str = "handler panicked";

type BlockingFn<I, O> = dyn Fn(&mut I) -> HandlerResult<O> + Send + Sync;
type CooperativeFn<I, O> =
    dyn for<'a> Fn(&'a mut I) -> BoxFuture<'a, HandlerResult<O>> + Send + Sync;

/// A registered callback and how it must be scheduled.
///
/// Blocking callbacks run on the handler pool so they never stall the event
/// loop. Cooperative callbacks run on the worker task itself and may only
/// suspend at their own await points.
pub enum Callback<I, O = ()> {
    /// Synchronous callback executed on a pool thread.
    Blocking(Arc<BlockingFn<I, O>>),
    /// Asynchronous callback polled on the worker task.
    Cooperative(Arc<CooperativeFn<I, O>>),
}

impl<I, O> Clone for Callback<I, O> {
    fn clone(&self) -> Self {
        match self {
            Self::Blocking(callback) => Self::Blocking(Arc::clone(callback)),
            Self::Cooperative(callback) => Self::Cooperative(Arc::clone(callback)),
        }
    }
}

impl<I, O> fmt::Debug for Callback<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocking(_) => f.write_str("Callback::Blocking"),
            Self::Cooperative(_) => f.write_str("Callback::Cooperative"),
        }
    }
}

impl<I, O> Callback<I, O> {
    /// Wraps a synchronous callback.
    pub fn blocking<F>(callback: F) -> Self
    where
        F: Fn(&mut I) -> HandlerResult<O> + Send + Sync + 'static,
    {
        Self::Blocking(Arc::new(callback))
    }

    /// Wraps an asynchronous callback.
    pub fn cooperative<F>(callback: F) -> Self
    where
        F: for<'a> Fn(&'a mut I) -> BoxFuture<'a, HandlerResult<O>> + Send + Sync + 'static,
    {
        Self::Cooperative(Arc::new(callback))
    }

    /// Reports whether the callback runs on the handler pool.
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocking(_))
    }
}

/// Outcome of running a callback: the input, when it survived, and the result.
///
/// The input is lost only when the callback panics.
pub struct Invocation<I, O> {
    /// The callback input after the call.
    pub input: Option<I>,
    /// What the callback returned.
    pub result: HandlerResult<O>,
}

impl<I, O> Callback<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Runs the callback, using `pool` for blocking callbacks.
    pub async fn invoke(&self, mut input: I, pool: &HandlerPool) -> Invocation<I, O> {
        match self {
            Self::Cooperative(callback) => {
                let outcome = AssertUnwindSafe(async { callback(&mut input).await })
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(result) => Invocation {
                        input: Some(input),
                        result,
                    },
                    Err(_) => Invocation {
                        input: None,
                        result: Err(HandlerError::new(PANICKED)),
                    },
                }
            }
            Self::Blocking(callback) => pool.run(Arc::clone(callback), input).await,
        }
    }
}

/// Bounded pool for blocking callbacks.
///
/// Caps how many blocking callbacks a process runs at once; callers past the
/// cap wait for a permit without blocking the event loop.
#[derive(Debug, Clone)]
pub struct HandlerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl HandlerPool {
    /// Builds a pool running at most `size` callbacks at once.
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Maximum number of concurrent blocking callbacks.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    async fn run<I, O>(&self, callback: Arc<BlockingFn<I, O>>, mut input: I) -> Invocation<I, O>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return Invocation {
                input: Some(input),
                result: Err(HandlerError::new("handler pool is closed")),
            };
        };
        let task = tokio::task::spawn_blocking(move || {
            let result = callback(&mut input);
            (input, result)
        });
        match task.await {
            Ok((input, result)) => Invocation {
                input: Some(input),
                result,
            },
            Err(error) => Invocation {
                input: None,
                result: Err(HandlerError::new(if error.is_panic() {
                    PANICKED
                } else {
                    "handler was cancelled"
                })),
            },
        }
    }
}
