//! # Farmstead Runtime
//!
//! Runtime implementation for the Farmstead state container.
//!
//! This crate provides the Store runtime that coordinates reducer execution
//! and effect handling.
//!
//! ## Core Components
//!
//! - **Store**: the runtime that owns state and executes effects
//! - **Effect Executor**: executes effect descriptions and feeds actions back
//!   to the reducer
//! - **`EffectHandle`**: lets callers wait for the effects of one action
//!
//! ## Concurrency model
//!
//! The reducer runs synchronously while holding the state write lock, so every
//! observer sees either the aggregate before an action or after it, never a
//! torn intermediate. Effects run in spawned tasks after the lock is released;
//! they never hold a reference into the aggregate.
//!
//! ## Example
//!
//! ```ignore
//! use farmstead_runtime::Store;
//!
//! let store = Store::new(initial_state, my_reducer, environment);
//!
//! // Send an action
//! let handle = store.send(Action::DoSomething).await?;
//!
//! // Read state
//! let value = store.state(|s| s.some_field).await;
//! ```

use farmstead_core::{effect::Effect, reducer::Reducer};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};

/// Retry logic for transient collaborator failures
pub mod retry;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// An effect execution failed
        ///
        /// This error is logged but does not halt the store.
        /// Effects are fire-and-forget operations.
        #[error("Effect execution failed: {0}")]
        EffectFailed(String),

        /// Store is shutting down and not accepting new actions
        ///
        /// This error is returned when `send()` is called after shutdown initiated.
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        ///
        /// Some effects were still running when the timeout elapsed.
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),
    }
}

pub use error::StoreError;

/// Handle for tracking effect completion
///
/// Returned by [`Store::send()`] to allow waiting for effects to complete.
/// Each action gets a handle that can be awaited to know when its effects are
/// done.
///
/// # Example
///
/// ```ignore
/// let mut handle = store.send(Action::Start).await?;
/// handle.wait_with_timeout(Duration::from_secs(5)).await?;
/// // All effects from Action::Start are now complete
/// ```
#[derive(Clone)]
pub struct EffectHandle {
    effects: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    /// Create a new effect handle
    ///
    /// Returns the handle for the caller plus the tracking side used
    /// internally during effect execution.
    fn new() -> (Self, EffectTracking) {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(());

        let handle = Self {
            effects: Arc::clone(&counter),
            completion: rx,
        };

        let tracking = EffectTracking {
            counter,
            notifier: tx,
        };

        (handle, tracking)
    }

    /// Create a handle that's already complete
    ///
    /// Useful for initialization in loops where you need a `last_handle`.
    #[must_use]
    pub fn completed() -> Self {
        let (tx, rx) = watch::channel(());
        let _ = tx.send(());

        Self {
            effects: Arc::new(AtomicUsize::new(0)),
            completion: rx,
        }
    }

    /// Wait for all effects to complete
    ///
    /// Blocks until the effect counter reaches zero.
    pub async fn wait(&mut self) {
        while self.effects.load(Ordering::SeqCst) > 0 {
            let _ = self.completion.changed().await;
        }
    }

    /// Wait for all effects to complete with a timeout
    ///
    /// # Errors
    ///
    /// Returns `Err(())` if the timeout expires before all effects complete.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), ()> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| ())
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending_effects", &self.effects.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Internal: effect tracking context passed through effect execution
#[derive(Clone)]
struct EffectTracking {
    counter: Arc<AtomicUsize>,
    notifier: watch::Sender<()>,
}

impl EffectTracking {
    /// Increment the effect counter (effect started)
    fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement the effect counter (effect completed)
    fn decrement(&self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            // Counter reached zero, notify waiters
            let _ = self.notifier.send(());
        }
    }
}

/// Internal: RAII guard that decrements the effect counter on drop
///
/// Ensures the counter is always decremented, even if the effect panics.
struct DecrementGuard(EffectTracking);

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Guard that decrements an atomic counter on drop (for shutdown tracking)
struct AtomicCounterGuard(Arc<AtomicUsize>);

impl Drop for AtomicCounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The Store - runtime coordinator for a reducer
///
/// The Store manages:
/// 1. State (behind `RwLock` for concurrent access)
/// 2. Reducer (business logic)
/// 3. Environment (injected dependencies)
/// 4. Effect execution (with feedback loop)
///
/// # Type Parameters
///
/// - `S`: State type
/// - `A`: Action type
/// - `E`: Environment type
/// - `R`: Reducer implementation
pub struct Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    state: Arc<RwLock<S>>,
    reducer: R,
    environment: E,
    shutdown: Arc<AtomicBool>,
    pending_effects: Arc<AtomicUsize>,
}

impl<S, A, E, R> Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
    A: Send + Clone + 'static,
    S: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a new store with initial state, reducer, and environment
    ///
    /// # Arguments
    ///
    /// - `initial_state`: The starting state for the store
    /// - `reducer`: The reducer implementation (business logic)
    /// - `environment`: Injected dependencies
    #[must_use]
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial_state)),
            reducer,
            environment,
            shutdown: Arc::new(AtomicBool::new(false)),
            pending_effects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Send an action to the store
    ///
    /// This is the primary way to interact with the store:
    /// 1. Acquires write lock on state
    /// 2. Calls reducer with (state, action, environment)
    /// 3. Executes returned effects asynchronously
    /// 4. Effects may produce more actions (feedback loop)
    ///
    /// The reducer executes synchronously while holding the write lock, so
    /// concurrent `send()` calls serialize at the reducer level and snapshots
    /// are never torn. `send()` returns after starting effect execution, not
    /// after completion; use the returned [`EffectHandle`] to wait.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
    #[tracing::instrument(skip(self, action), name = "store_send")]
    pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError> {
        if self.shutdown.load(Ordering::Acquire) {
            tracing::warn!("Rejected action: store is shutting down");
            return Err(StoreError::ShutdownInProgress);
        }

        tracing::debug!("Processing action");

        let (handle, tracking) = EffectHandle::new();

        let effects = {
            let mut state = self.state.write().await;
            tracing::trace!("Acquired write lock on state");

            let effects = self.reducer.reduce(&mut state, action, &self.environment);
            tracing::trace!("Reducer completed, returned {} effects", effects.len());

            effects
        };

        for effect in effects {
            self.execute_effect(effect, tracking.clone());
        }

        Ok(handle)
    }

    /// Read current state via a closure
    ///
    /// Access state through a closure to ensure the lock is released promptly:
    ///
    /// ```ignore
    /// let order_count = store.state(|s| s.orders.len()).await;
    /// ```
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let state = self.state.read().await;
        f(&state)
    }

    /// Number of effects currently in flight
    ///
    /// Mainly useful in tests and diagnostics.
    #[must_use]
    pub fn pending_effects(&self) -> usize {
        self.pending_effects.load(Ordering::Acquire)
    }

    /// Initiate graceful shutdown of the store
    ///
    /// This method:
    /// 1. Sets the shutdown flag (rejecting new actions)
    /// 2. Waits for pending effects to complete (with timeout)
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if the timeout expires before
    /// all pending effects complete.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        tracing::info!("Initiating graceful shutdown");

        self.shutdown.store(true, Ordering::Release);

        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(10);

        loop {
            let pending = self.pending_effects.load(Ordering::Acquire);

            if pending == 0 {
                tracing::info!("All effects completed, shutdown successful");
                return Ok(());
            }

            if start.elapsed() >= timeout {
                tracing::error!(
                    pending_effects = pending,
                    "Shutdown timeout: {} effects still running",
                    pending
                );
                return Err(StoreError::ShutdownTimeout(pending));
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Execute an effect with tracking
    ///
    /// # Effect Types
    ///
    /// - `None`: no-op
    /// - `Future`: executes async computation, sends resulting action if `Some`
    /// - `Delay`: waits for duration, then sends action
    /// - `Parallel`: executes effects concurrently
    /// - `Sequential`: executes effects in order, waiting for each to complete
    ///
    /// # Error Handling Strategy
    ///
    /// Reducer panics propagate (fail fast); reducers must be pure functions
    /// that do not panic. Effect failures are logged and other effects
    /// continue; the [`DecrementGuard`] keeps the counters consistent even on
    /// panic.
    #[tracing::instrument(skip(self, effect, tracking), name = "execute_effect")]
    fn execute_effect(&self, effect: Effect<A>, tracking: EffectTracking) {
        match effect {
            Effect::None => {
                tracing::trace!("Executing Effect::None (no-op)");
            },
            Effect::Future(fut) => {
                tracing::trace!("Executing Effect::Future");
                tracking.increment();

                self.pending_effects.fetch_add(1, Ordering::SeqCst);
                let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));

                let tracking_clone = tracking.clone();
                let store = self.clone();

                tokio::spawn(async move {
                    let _guard = DecrementGuard(tracking_clone);
                    let _pending_guard = pending_guard; // Decrement on drop

                    if let Some(action) = fut.await {
                        tracing::trace!("Effect::Future produced an action, sending to store");
                        let _ = store.send(action).await;
                    } else {
                        tracing::trace!("Effect::Future completed with no action");
                    }
                });
            },
            Effect::Delay { duration, action } => {
                tracing::trace!("Executing Effect::Delay (duration: {:?})", duration);
                tracking.increment();

                self.pending_effects.fetch_add(1, Ordering::SeqCst);
                let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));

                let tracking_clone = tracking.clone();
                let store = self.clone();

                tokio::spawn(async move {
                    let _guard = DecrementGuard(tracking_clone);
                    let _pending_guard = pending_guard; // Decrement on drop

                    tokio::time::sleep(duration).await;
                    tracing::trace!("Effect::Delay completed, sending action");

                    let _ = store.send(*action).await;
                });
            },
            Effect::Parallel(effects) => {
                tracing::trace!("Executing Effect::Parallel with {} effects", effects.len());

                for effect in effects {
                    self.execute_effect(effect, tracking.clone());
                }
            },
            Effect::Sequential(effects) => {
                let effect_count = effects.len();
                tracing::trace!("Executing Effect::Sequential with {} effects", effect_count);

                tracking.increment();

                self.pending_effects.fetch_add(1, Ordering::SeqCst);
                let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));

                let tracking_clone = tracking.clone();
                let store = self.clone();

                tokio::spawn(async move {
                    let _guard = DecrementGuard(tracking_clone);
                    let _pending_guard = pending_guard; // Decrement on drop

                    for (idx, effect) in effects.into_iter().enumerate() {
                        tracing::trace!(
                            "Executing sequential effect {} of {}",
                            idx + 1,
                            effect_count
                        );

                        let (sub_tx, mut sub_rx) = watch::channel(());
                        let sub_tracking = EffectTracking {
                            counter: Arc::new(AtomicUsize::new(0)),
                            notifier: sub_tx,
                        };

                        store.execute_effect(effect, sub_tracking.clone());

                        // Wait for this effect to complete before continuing
                        while sub_tracking.counter.load(Ordering::SeqCst) > 0 {
                            let _ = sub_rx.changed().await;
                        }
                    }
                    tracing::trace!("Effect::Sequential completed");
                });
            },
        }
    }
}

impl<S, A, E, R> Clone for Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Clone,
    E: Clone,
{
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            reducer: self.reducer.clone(),
            environment: self.environment.clone(),
            shutdown: Arc::clone(&self.shutdown),
            pending_effects: Arc::clone(&self.pending_effects),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farmstead_core::{SmallVec, smallvec};

    #[derive(Clone, Debug, Default)]
    struct CounterState {
        count: i64,
        pings: usize,
    }

    #[derive(Clone, Debug)]
    enum CounterAction {
        Increment,
        IncrementLater(Duration),
        Ping,
        PingAsync,
    }

    #[derive(Clone)]
    struct CounterReducer;

    #[derive(Clone)]
    struct CounterEnv;

    impl Reducer for CounterReducer {
        type State = CounterState;
        type Action = CounterAction;
        type Environment = CounterEnv;

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            _env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]> {
            match action {
                CounterAction::Increment => {
                    state.count += 1;
                    SmallVec::new()
                },
                CounterAction::IncrementLater(duration) => {
                    smallvec![Effect::Delay {
                        duration,
                        action: Box::new(CounterAction::Increment),
                    }]
                },
                CounterAction::Ping => {
                    state.pings += 1;
                    SmallVec::new()
                },
                CounterAction::PingAsync => {
                    smallvec![Effect::future(async { Some(CounterAction::Ping) })]
                },
            }
        }
    }

    fn make_store() -> Store<CounterState, CounterAction, CounterEnv, CounterReducer> {
        Store::new(CounterState::default(), CounterReducer, CounterEnv)
    }

    #[tokio::test]
    async fn send_serializes_mutations_in_call_order() {
        let store = make_store();

        for _ in 0..10 {
            store
                .send(CounterAction::Increment)
                .await
                .unwrap_or_else(|_| EffectHandle::completed());
        }

        let count = store.state(|s| s.count).await;
        assert_eq!(count, 10);
    }

    #[tokio::test]
    async fn future_effect_feeds_action_back() {
        let store = make_store();

        let mut handle = match store.send(CounterAction::PingAsync).await {
            Ok(handle) => handle,
            Err(error) => unreachable!("send failed: {error}"),
        };
        handle.wait().await;

        // The feedback action goes through a second send; give it a turn.
        tokio::task::yield_now().await;

        let pings = store.state(|s| s.pings).await;
        assert_eq!(pings, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_effect_fires_after_duration() {
        let store = make_store();

        let result = store
            .send(CounterAction::IncrementLater(Duration::from_secs(2)))
            .await;
        assert!(result.is_ok());

        tokio::time::sleep(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;

        let count = store.state(|s| s.count).await;
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_actions() {
        let store = make_store();

        let shut = store.shutdown(Duration::from_secs(1)).await;
        assert!(shut.is_ok());

        let result = store.send(CounterAction::Increment).await;
        assert!(matches!(result, Err(StoreError::ShutdownInProgress)));
    }

}
