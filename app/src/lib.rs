//! # Farmstead App
//!
//! The farming-advisory application state container.
//!
//! One [`AppState`](types::AppState) aggregate holds everything a session
//! persists: the farmer's profile and onboarding data, a purchase cart, an
//! equipment rental cart, and the order/booking history. The aggregate is
//! mutated only through the [`AppStore`](store::AppStore) facade, which
//! dispatches [`AppAction`](reducer::AppAction)s into the reducer, reports
//! invalid mutations as explicit rejections, and write-through persists
//! every accepted mutation with a debounce.
//!
//! ## Layout
//!
//! - [`types`] — the entity model and the rejection taxonomy
//! - [`reducer`] — every mutation of the aggregate, in one pure function
//! - [`persistence`] — single-document JSON storage with debounced writes
//! - [`store`] — the facade the UI layer holds
//! - [`advisory`] — the AI-backed advisory collaborator, with retries

pub mod advisory;
pub mod persistence;
pub mod reducer;
pub mod store;
pub mod types;

pub use advisory::{
    AdvisoryClient, AdvisoryError, AdvisoryRequest, AdvisoryResponse, ScriptedAdvisory,
    call_with_retry,
};
pub use persistence::{FileStorage, MemoryStorage, Persister, StateStorage, StorageError};
pub use reducer::{AppAction, AppEnvironment, AppReducer, CropSlot, IdSource};
pub use store::{AppStore, AppStoreConfig, AppStoreError};
pub use types::{
    AppState, Booking, BookingId, BookingStatus, CartItem, CropEntry, LivestockEntry, Money, Order,
    OrderId, OrderStatus, Profile, Rejection, RentCartItem, Shipping,
};
