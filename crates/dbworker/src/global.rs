//! Process-wide default pool.
//!
//! A convenience layer for applications that want one pool registered at
//! startup and reachable from anywhere, instead of passing a [`Pool`] handle
//! down from the composition root. Explicit pool instances remain the primary
//! API; everything here forwards to one.
//!
//! ```
//! use dbworker::{Context, Pool, PoolConfig, global};
//! use std::{convert::Infallible, sync::Arc};
//!
//! global::start(Pool::with_resource(Arc::new(1_u8), &PoolConfig::default())?)?;
//! let n = global::submit_blocking(Context::new(), |_, n: &u8| Ok::<_, Infallible>(*n));
//! assert_eq!(n.ok(), Some(1));
//! global::stop()?;
//! # Ok::<(), dbworker::Error>(())
//! ```

use crate::{Context, Error, Pool, Result};
use core::any::Any;
use parking_lot::{RwLock, const_rwlock};
use std::sync::Arc;

struct Registered {
    pool: Arc<dyn Any + Send + Sync>,
    close: Box<dyn Fn() -> Result<()> + Send + Sync>,
}

static DEFAULT: RwLock<Option<Registered>> = const_rwlock(None);

/// Registers `pool` as the process default.
///
/// # Errors
///
/// Returns [`Error::AlreadyStarted`] if a default pool is already registered;
/// `pool` is closed before returning in that case, and a failure to close it
/// is logged.
pub fn start<R>(pool: Pool<R>) -> Result<()>
where
    R: Send + Sync + 'static,
{
    let mut slot = DEFAULT.write();
    if slot.is_some() {
        drop(slot);
        if let Err(_err) = pool.close() {
            #[cfg(feature = "tracing")]
            tracing::error!("Error closing rejected default worker pool: {_err}");
        }
        return Err(Error::AlreadyStarted);
    }

    let pool = Arc::new(pool);
    let closer = Arc::clone(&pool);
    *slot = Some(Registered {
        pool,
        close: Box::new(move || closer.close()),
    });
    Ok(())
}

/// Closes and unregisters the default pool. Does nothing if none is
/// registered.
///
/// # Errors
///
/// Returns the pool's close error; the pool is unregistered regardless.
pub fn stop() -> Result<()> {
    // Unregister first so the lock is not held while the pool drains.
    let Some(registered) = DEFAULT.write().take() else {
        return Ok(());
    };

    let closed = (registered.close)();
    if let Err(_err) = &closed {
        #[cfg(feature = "tracing")]
        tracing::error!("Error closing default worker pool: {_err}");
    }
    #[cfg(feature = "tracing")]
    tracing::info!("Default worker pool stopped");
    closed
}

pub fn is_started() -> bool {
    DEFAULT.read().is_some()
}

/// Returns the default pool if one is registered over resource type `R`.
pub fn get<R>() -> Option<Arc<Pool<R>>>
where
    R: Send + Sync + 'static,
{
    let pool = Arc::clone(&DEFAULT.read().as_ref()?.pool);
    pool.downcast::<Pool<R>>().ok()
}

fn expect_pool<R>() -> Arc<Pool<R>>
where
    R: Send + Sync + 'static,
{
    match get::<R>() {
        Some(pool) => pool,
        None if is_started() => panic!(
            "default worker pool was not started over `{}`",
            core::any::type_name::<R>()
        ),
        None => panic!("default worker pool not started"),
    }
}

/// Submits a work item to the default pool. See [`Pool::submit`].
///
/// # Errors
///
/// Same as [`Pool::submit`].
///
/// # Panics
///
/// Panics if no default pool is registered, or if it was registered over a
/// resource type other than `R`. Both are programming errors.
pub async fn submit<R, T, E, F>(ctx: Context, work: F) -> Result<T, Error<E>>
where
    R: Send + Sync + 'static,
    F: FnOnce(&Context, &R) -> core::result::Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    expect_pool::<R>().submit(ctx, work).await
}

/// Blocking form of [`submit`].
///
/// # Errors
///
/// Same as [`Pool::submit`].
///
/// # Panics
///
/// Same as [`submit`].
pub fn submit_blocking<R, T, E, F>(ctx: Context, work: F) -> Result<T, Error<E>>
where
    R: Send + Sync + 'static,
    F: FnOnce(&Context, &R) -> core::result::Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    expect_pool::<R>().submit_blocking(ctx, work)
}
