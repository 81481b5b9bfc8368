//! The store facade: the single mutation surface of the application.
//!
//! UI code holds an [`AppStore`] and nothing else. Reads go through
//! [`AppStore::state`] / [`AppStore::snapshot`]; every mutation is a typed
//! method that dispatches one [`AppAction`] and reports a [`Rejection`] as an
//! `Err`, never as a silent no-op. The facade also owns the lifecycle: the
//! one-time load happens in [`AppStore::open`] before the store exists, and
//! [`AppStore::close`] drains effects and flushes the final snapshot.

use crate::persistence::{DEFAULT_DEBOUNCE_WINDOW, Persister, StateStorage, load_or_default};
use crate::reducer::{AppAction, AppEnvironment, AppReducer, CropSlot, IdSource};
use crate::types::{
    AppState, BookingId, CartItem, CropEntry, LivestockEntry, Money, OrderId, Profile, Rejection,
    RentCartItem, Shipping,
};
use chrono::NaiveDate;
use farmstead_core::environment::Clock;
use farmstead_runtime::{EffectHandle, Store, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Tuning knobs for an [`AppStore`]
#[derive(Clone, Copy, Debug)]
pub struct AppStoreConfig {
    /// Quiet window before a mutation burst is written to storage
    pub debounce_window: Duration,
    /// How long `close` waits for in-flight effects
    pub shutdown_timeout: Duration,
}

impl Default for AppStoreConfig {
    fn default() -> Self {
        Self {
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Errors surfaced by the facade
#[derive(Debug, Error)]
pub enum AppStoreError {
    /// The mutation was invalid and the aggregate is unchanged
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// The underlying store runtime refused the action
    #[error(transparent)]
    Runtime(#[from] StoreError),
}

/// The application store
///
/// One instance per session. Mutations from concurrent tasks are serialized
/// by the runtime's state lock; rejection reporting assumes the cooperative
/// single-dispatcher usage the UI layer follows (two racing mutations could
/// otherwise read each other's verdict). There is no cross-instance
/// consistency: two stores over the same storage last-write-win.
pub struct AppStore {
    store: Store<AppState, AppAction, AppEnvironment, AppReducer>,
    persister: Arc<Persister>,
    shutdown_timeout: Duration,
}

impl AppStore {
    /// Opens a store over the given storage
    ///
    /// The durable document is loaded (fail-soft) before the store exists,
    /// so no mutation can ever observe pre-load state.
    #[must_use]
    pub fn open(storage: Arc<dyn StateStorage>, clock: Arc<dyn Clock>, config: AppStoreConfig) -> Self {
        let initial = load_or_default(storage.as_ref());
        let persister = Arc::new(Persister::new(storage, config.debounce_window));

        let environment = AppEnvironment {
            clock,
            ids: Arc::new(IdSource::new()),
            persister: Arc::clone(&persister),
        };

        Self {
            store: Store::new(initial, AppReducer, environment),
            persister,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Reads through a closure, releasing the lock before returning
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&AppState) -> T,
    {
        self.store.state(f).await
    }

    /// Clones the whole aggregate
    pub async fn snapshot(&self) -> AppState {
        self.store.state(Clone::clone).await
    }

    /// Replaces the farmer profile
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::Runtime`] if the store is shutting down.
    pub async fn update_profile(&self, profile: Profile) -> Result<(), AppStoreError> {
        self.dispatch(AppAction::UpdateProfile { profile }).await?;
        Ok(())
    }

    /// Appends a crop to the primary or secondary list
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::Runtime`] if the store is shutting down.
    pub async fn add_crop(&self, slot: CropSlot, entry: CropEntry) -> Result<(), AppStoreError> {
        self.dispatch(AppAction::AddCrop { slot, entry }).await?;
        Ok(())
    }

    /// Removes a crop by name
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::Runtime`] if the store is shutting down.
    pub async fn remove_crop(&self, slot: CropSlot, name: String) -> Result<(), AppStoreError> {
        self.dispatch(AppAction::RemoveCrop { slot, name }).await?;
        Ok(())
    }

    /// Appends a livestock entry
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::Runtime`] if the store is shutting down.
    pub async fn add_livestock(&self, entry: LivestockEntry) -> Result<(), AppStoreError> {
        self.dispatch(AppAction::AddLivestock { entry }).await?;
        Ok(())
    }

    /// Removes a livestock entry by kind
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::Runtime`] if the store is shutting down.
    pub async fn remove_livestock(&self, kind: String) -> Result<(), AppStoreError> {
        self.dispatch(AppAction::RemoveLivestock { kind }).await?;
        Ok(())
    }

    /// Marks the onboarding wizard finished (or not)
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::Runtime`] if the store is shutting down.
    pub async fn set_onboarding_complete(&self, complete: bool) -> Result<(), AppStoreError> {
        self.dispatch(AppAction::SetOnboardingComplete { complete })
            .await?;
        Ok(())
    }

    /// Adds units of a product to the purchase cart, merging by id
    ///
    /// # Errors
    ///
    /// Rejects a zero quantity; the cart is unchanged.
    pub async fn add_to_cart(&self, item: CartItem, quantity: u32) -> Result<(), AppStoreError> {
        self.dispatch(AppAction::AddToCart { item, quantity })
            .await?;
        Ok(())
    }

    /// Removes a cart line unconditionally
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::Runtime`] if the store is shutting down.
    pub async fn remove_from_cart(&self, id: u64) -> Result<(), AppStoreError> {
        self.dispatch(AppAction::RemoveFromCart { id }).await?;
        Ok(())
    }

    /// Replaces a cart line's quantity; zero removes the line
    ///
    /// # Errors
    ///
    /// Rejects an id that is not in the cart.
    pub async fn update_quantity(&self, id: u64, quantity: u32) -> Result<(), AppStoreError> {
        self.dispatch(AppAction::UpdateQuantity { id, quantity })
            .await?;
        Ok(())
    }

    /// Empties the purchase cart
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::Runtime`] if the store is shutting down.
    pub async fn clear_cart(&self) -> Result<(), AppStoreError> {
        self.dispatch(AppAction::ClearCart).await?;
        Ok(())
    }

    /// Adds equipment to the rental cart
    ///
    /// # Errors
    ///
    /// Rejects a duplicate id; the rental cart keeps its single entry.
    pub async fn add_to_rent_cart(&self, item: RentCartItem) -> Result<(), AppStoreError> {
        self.dispatch(AppAction::AddToRentCart { item }).await?;
        Ok(())
    }

    /// Removes a rental line
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::Runtime`] if the store is shutting down.
    pub async fn remove_from_rent_cart(&self, id: u64) -> Result<(), AppStoreError> {
        self.dispatch(AppAction::RemoveFromRentCart { id }).await?;
        Ok(())
    }

    /// Empties the rental cart
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::Runtime`] if the store is shutting down.
    pub async fn clear_rent_cart(&self) -> Result<(), AppStoreError> {
        self.dispatch(AppAction::ClearRentCart).await?;
        Ok(())
    }

    /// Creates an order from the given lines and clears the purchase cart
    ///
    /// Returns the id of the new order.
    ///
    /// # Errors
    ///
    /// Rejects an empty item list.
    pub async fn place_order(
        &self,
        items: Vec<CartItem>,
        total: Money,
        shipping: Shipping,
    ) -> Result<OrderId, AppStoreError> {
        self.dispatch(AppAction::PlaceOrder {
            items,
            total,
            shipping,
        })
        .await?;

        self.store
            .state(|state| state.orders.first().map(|order| order.id))
            .await
            .ok_or_else(|| StoreError::EffectFailed("order missing after placement".into()).into())
    }

    /// Creates a booking from the given lines and clears the rental cart
    ///
    /// Returns the id of the new booking.
    ///
    /// # Errors
    ///
    /// Rejects an empty item list and empty or inverted rental periods.
    pub async fn place_booking(
        &self,
        items: Vec<RentCartItem>,
        total: Money,
        rental_start_date: NaiveDate,
        rental_end_date: NaiveDate,
        rental_duration_days: u32,
        shipping: Shipping,
    ) -> Result<BookingId, AppStoreError> {
        self.dispatch(AppAction::PlaceBooking {
            items,
            total,
            rental_start_date,
            rental_end_date,
            rental_duration_days,
            shipping,
        })
        .await?;

        self.store
            .state(|state| state.bookings.first().map(|booking| booking.id))
            .await
            .ok_or_else(|| {
                StoreError::EffectFailed("booking missing after placement".into()).into()
            })
    }

    /// Cancels an order that is still `Placed`, recording the reason
    ///
    /// # Errors
    ///
    /// Rejects unknown ids and orders past `Placed`; the order is unchanged.
    pub async fn cancel_order(&self, id: OrderId, reason: String) -> Result<(), AppStoreError> {
        self.dispatch(AppAction::CancelOrder { id, reason }).await?;
        Ok(())
    }

    /// Cancels a booking that is still `Confirmed`, recording the reason
    ///
    /// # Errors
    ///
    /// Rejects unknown ids and bookings past `Confirmed`.
    pub async fn cancel_booking(&self, id: BookingId, reason: String) -> Result<(), AppStoreError> {
        self.dispatch(AppAction::CancelBooking { id, reason })
            .await?;
        Ok(())
    }

    /// Moves an order one step along the fulfilment path
    ///
    /// # Errors
    ///
    /// Rejects unknown ids and terminal orders.
    pub async fn advance_order(&self, id: OrderId) -> Result<(), AppStoreError> {
        self.dispatch(AppAction::AdvanceOrder { id }).await?;
        Ok(())
    }

    /// Moves a booking one step along the rental path
    ///
    /// # Errors
    ///
    /// Rejects unknown ids and terminal bookings.
    pub async fn advance_booking(&self, id: BookingId) -> Result<(), AppStoreError> {
        self.dispatch(AppAction::AdvanceBooking { id }).await?;
        Ok(())
    }

    /// Repopulates the purchase cart from a past order's frozen lines
    ///
    /// # Errors
    ///
    /// Rejects unknown order ids.
    pub async fn reorder(&self, order_id: OrderId) -> Result<(), AppStoreError> {
        self.dispatch(AppAction::Reorder { order_id }).await?;
        Ok(())
    }

    /// Wipes the aggregate and its durable copy
    ///
    /// Waits for the durable clear to finish, so the reset cannot be undone
    /// by a straggling debounced write.
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::Runtime`] if the store is shutting down.
    pub async fn reset_to_default(&self) -> Result<(), AppStoreError> {
        let mut handle = self.dispatch(AppAction::ResetToDefault).await?;
        handle.wait().await;
        Ok(())
    }

    /// Drains in-flight effects and flushes the final snapshot to storage
    ///
    /// The flush runs even when the drain times out, so whatever snapshot the
    /// persister last saw still reaches storage.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] when effects were still
    /// running after the configured timeout.
    pub async fn close(&self) -> Result<(), AppStoreError> {
        let drained = self.store.shutdown(self.shutdown_timeout).await;
        self.persister.flush().await;
        drained?;
        Ok(())
    }

    /// Sends one action and turns a recorded rejection into an `Err`.
    async fn dispatch(&self, action: AppAction) -> Result<EffectHandle, AppStoreError> {
        let handle = self.store.send(action).await?;

        // The reducer records the verdict under the same write lock the send
        // held, so reading it immediately afterwards observes this dispatch.
        if let Some(rejection) = self.store.state(|state| state.last_rejection.clone()).await {
            return Err(rejection.into());
        }

        Ok(handle)
    }
}

impl std::fmt::Debug for AppStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppStore")
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStorage;
    use crate::types::OrderStatus;
    use farmstead_core::environment::SystemClock;

    fn open_with(storage: Arc<MemoryStorage>) -> AppStore {
        AppStore::open(
            storage,
            Arc::new(SystemClock),
            AppStoreConfig {
                debounce_window: Duration::from_millis(100),
                ..AppStoreConfig::default()
            },
        )
    }

    fn urea(quantity: u32) -> CartItem {
        CartItem {
            id: 1,
            name: "Urea".into(),
            price: Money::from_major(268),
            image: String::new(),
            quantity,
            unit: "45 kg bag".into(),
        }
    }

    #[tokio::test]
    async fn rejected_mutation_surfaces_as_error() {
        let store = open_with(Arc::new(MemoryStorage::new()));

        let result = store.add_to_cart(urea(0), 0).await;
        assert!(matches!(
            result,
            Err(AppStoreError::Rejected(Rejection::NonPositiveQuantity { id: 1 }))
        ));

        assert!(store.state(|state| state.cart.is_empty()).await);
    }

    #[tokio::test]
    async fn place_order_returns_the_new_id() {
        let store = open_with(Arc::new(MemoryStorage::new()));

        assert!(store.add_to_cart(urea(0), 2).await.is_ok());
        let (items, total) = store
            .state(|state| (state.cart.clone(), state.cart_total()))
            .await;

        let placed = store.place_order(items, total, Shipping::default()).await;
        let id = match placed {
            Ok(id) => id,
            Err(error) => unreachable!("placement failed: {error}"),
        };

        store
            .state(move |state| {
                assert!(state.cart.is_empty());
                assert_eq!(state.orders[0].id, id);
                assert_eq!(state.orders[0].status, OrderStatus::Placed);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_flushes_the_final_snapshot() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open_with(Arc::clone(&storage));

        assert!(store.add_to_cart(urea(0), 3).await.is_ok());
        // Close inside the quiet window; the flush must still land.
        assert!(store.close().await.is_ok());

        assert_eq!(storage.save_count(), 1);
        let reloaded = load_or_default(storage.as_ref());
        assert_eq!(reloaded.cart.len(), 1);
        assert_eq!(reloaded.cart[0].quantity, 3);
    }

    #[tokio::test]
    async fn reset_to_default_clears_storage_durably() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open_with(Arc::clone(&storage));

        assert!(store.add_to_cart(urea(0), 1).await.is_ok());
        assert!(store.reset_to_default().await.is_ok());

        assert_eq!(storage.document(), None);
        assert_eq!(store.snapshot().await, AppState::default());
    }

    #[tokio::test]
    async fn open_recovers_from_a_corrupt_document() {
        let storage = Arc::new(MemoryStorage::with_document("][ not json"));
        let store = open_with(storage);

        assert_eq!(store.snapshot().await, AppState::default());
    }
}
