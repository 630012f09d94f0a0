/// A resource the pool can acquire and release on its own.
///
/// Pools built with [`Pool::connect`](crate::Pool::connect) own their resource:
/// they call [`Connect::connect`] during construction and
/// [`Connect::disconnect`] exactly once during
/// [`Pool::close`](crate::Pool::close), after every worker has stopped.
/// Resources attached with [`Pool::with_resource`](crate::Pool::with_resource)
/// need not implement this trait and are never released by the pool.
///
/// The resource is shared by all workers at once, so it must tolerate
/// concurrent use from as many threads as the pool has workers.
pub trait Connect: Sized + Send + Sync + 'static {
    /// Whatever is needed to reach the resource.
    type Config;

    /// Error returned when the resource cannot be reached or released.
    type Error: core::error::Error + Send + Sync + 'static;

    /// Acquires a connected handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is unreachable.
    fn connect(config: &Self::Config) -> Result<Self, Self::Error>;

    /// Releases the handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the release itself failed.
    fn disconnect(&self) -> Result<(), Self::Error>;
}
