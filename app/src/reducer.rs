//! The application reducer: every mutation of the aggregate in one place.
//!
//! UI components never touch [`AppState`](crate::types::AppState) directly;
//! they dispatch an [`AppAction`] and the reducer either applies it and
//! schedules a persistence write, or records a [`Rejection`] and leaves the
//! aggregate untouched. Validation happens before any field is written, so a
//! rejected action can never leave partial state behind.

use crate::persistence::Persister;
use crate::types::{
    AppState, Booking, BookingId, BookingStatus, CartItem, CropEntry, LivestockEntry, Money, Order,
    OrderId, OrderStatus, Profile, Rejection, RentCartItem, Shipping,
};
use chrono::NaiveDate;
use farmstead_core::environment::Clock;
use farmstead_core::{SmallVec, effect::Effect, reducer::Reducer, smallvec};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Which crop list an onboarding action targets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CropSlot {
    /// The main crops grown on the farm
    Primary,
    /// Additional crops
    Secondary,
}

/// All mutations of the aggregate
///
/// Commands, not events: each variant describes what the caller wants, and
/// the reducer decides whether it is legal against the current state.
#[derive(Debug, Clone)]
pub enum AppAction {
    /// Replace the farmer profile wholesale
    UpdateProfile {
        /// The new profile
        profile: Profile,
    },
    /// Append a crop to the primary or secondary list
    AddCrop {
        /// Which list to append to
        slot: CropSlot,
        /// The crop entry
        entry: CropEntry,
    },
    /// Remove a crop by name from the given list
    RemoveCrop {
        /// Which list to remove from
        slot: CropSlot,
        /// Name of the crop to remove
        name: String,
    },
    /// Append a livestock entry
    AddLivestock {
        /// The livestock entry
        entry: LivestockEntry,
    },
    /// Remove a livestock entry by kind
    RemoveLivestock {
        /// Animal kind to remove
        kind: String,
    },
    /// Mark the onboarding wizard finished (or not)
    SetOnboardingComplete {
        /// New completion flag
        complete: bool,
    },

    /// Add units of a product to the purchase cart, merging by id
    AddToCart {
        /// The product line (quantity field is ignored; see `quantity`)
        item: CartItem,
        /// How many units to add; zero is rejected
        quantity: u32,
    },
    /// Remove a cart line unconditionally
    RemoveFromCart {
        /// Product id
        id: u64,
    },
    /// Replace a cart line's quantity; zero removes the line
    UpdateQuantity {
        /// Product id
        id: u64,
        /// New quantity
        quantity: u32,
    },
    /// Empty the purchase cart
    ClearCart,

    /// Add a piece of equipment to the rental cart; duplicates are rejected
    AddToRentCart {
        /// The equipment line
        item: RentCartItem,
    },
    /// Remove a rental line
    RemoveFromRentCart {
        /// Equipment id
        id: u64,
    },
    /// Empty the rental cart
    ClearRentCart,

    /// Create an order from the given lines and clear the purchase cart
    PlaceOrder {
        /// Lines to freeze into the order
        items: Vec<CartItem>,
        /// Order total
        total: Money,
        /// Delivery details (tracking fields are derived here)
        shipping: Shipping,
    },
    /// Create a booking from the given lines and clear the rental cart
    PlaceBooking {
        /// Lines to freeze into the booking
        items: Vec<RentCartItem>,
        /// Booking total
        total: Money,
        /// First rental day
        rental_start_date: NaiveDate,
        /// Last rental day
        rental_end_date: NaiveDate,
        /// Rental duration in days
        rental_duration_days: u32,
        /// Delivery details
        shipping: Shipping,
    },
    /// Cancel an order that is still `Placed`
    CancelOrder {
        /// Order id
        id: OrderId,
        /// Mandatory reason shown in the order history
        reason: String,
    },
    /// Cancel a booking that is still `Confirmed`
    CancelBooking {
        /// Booking id
        id: BookingId,
        /// Mandatory reason
        reason: String,
    },
    /// Move an order one step along the fulfilment path
    AdvanceOrder {
        /// Order id
        id: OrderId,
    },
    /// Move a booking one step along the rental path
    AdvanceBooking {
        /// Booking id
        id: BookingId,
    },
    /// Repopulate the purchase cart from a past order's frozen lines
    Reorder {
        /// Order to copy from
        order_id: OrderId,
    },

    /// Wipe the aggregate and its durable copy
    ResetToDefault,
}

/// Monotonic id source for orders and bookings
///
/// Ids are creation timestamps in milliseconds, clamped strictly increasing
/// so two entities created within the same millisecond still get distinct,
/// chronologically ordered ids. Shared between orders and bookings.
#[derive(Debug, Default)]
pub struct IdSource {
    last: AtomicI64,
}

impl IdSource {
    /// Creates a fresh source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id for the given wall-clock milliseconds
    pub fn next(&self, now_millis: i64) -> i64 {
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let candidate = now_millis.max(last + 1);
            match self.last.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return candidate,
                Err(observed) => last = observed,
            }
        }
    }
}

/// Injected dependencies of the application reducer
#[derive(Clone)]
pub struct AppEnvironment {
    /// Wall clock (fixed in tests)
    pub clock: Arc<dyn Clock>,
    /// Order/booking id source
    pub ids: Arc<IdSource>,
    /// Debounced write-through persistence
    pub persister: Arc<Persister>,
}

impl std::fmt::Debug for AppEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppEnvironment")
            .field("ids", &self.ids)
            .field("persister", &self.persister)
            .finish_non_exhaustive()
    }
}

/// The application reducer
#[derive(Clone, Copy, Debug, Default)]
pub struct AppReducer;

type Effects = SmallVec<[Effect<AppAction>; 4]>;

impl Reducer for AppReducer {
    type State = AppState;
    type Action = AppAction;
    type Environment = AppEnvironment;

    #[allow(clippy::too_many_lines)] // One arm per action keeps the dispatch readable
    fn reduce(&self, state: &mut AppState, action: AppAction, env: &AppEnvironment) -> Effects {
        let verdict = match action {
            AppAction::UpdateProfile { profile } => {
                state.profile = profile;
                Ok(())
            }
            AppAction::AddCrop { slot, entry } => {
                crop_list(state, slot).push(entry);
                Ok(())
            }
            AppAction::RemoveCrop { slot, name } => {
                crop_list(state, slot).retain(|crop| crop.name != name);
                Ok(())
            }
            AppAction::AddLivestock { entry } => {
                state.livestock.push(entry);
                Ok(())
            }
            AppAction::RemoveLivestock { kind } => {
                state.livestock.retain(|animal| animal.kind != kind);
                Ok(())
            }
            AppAction::SetOnboardingComplete { complete } => {
                state.onboarding_complete = complete;
                Ok(())
            }

            AppAction::AddToCart { item, quantity } => add_to_cart(state, item, quantity),
            AppAction::RemoveFromCart { id } => {
                state.cart.retain(|line| line.id != id);
                Ok(())
            }
            AppAction::UpdateQuantity { id, quantity } => update_quantity(state, id, quantity),
            AppAction::ClearCart => {
                state.cart.clear();
                Ok(())
            }

            AppAction::AddToRentCart { item } => add_to_rent_cart(state, item),
            AppAction::RemoveFromRentCart { id } => {
                state.rent_cart.retain(|line| line.id != id);
                Ok(())
            }
            AppAction::ClearRentCart => {
                state.rent_cart.clear();
                Ok(())
            }

            AppAction::PlaceOrder {
                items,
                total,
                shipping,
            } => place_order(state, env, items, total, shipping),
            AppAction::PlaceBooking {
                items,
                total,
                rental_start_date,
                rental_end_date,
                rental_duration_days,
                shipping,
            } => place_booking(
                state,
                env,
                items,
                total,
                rental_start_date,
                rental_end_date,
                rental_duration_days,
                shipping,
            ),
            AppAction::CancelOrder { id, reason } => cancel_order(state, id, reason),
            AppAction::CancelBooking { id, reason } => cancel_booking(state, id, reason),
            AppAction::AdvanceOrder { id } => advance_order(state, id),
            AppAction::AdvanceBooking { id } => advance_booking(state, id),
            AppAction::Reorder { order_id } => reorder(state, order_id),

            AppAction::ResetToDefault => {
                *state = AppState::default();
                let persister = Arc::clone(&env.persister);
                let seq = persister.stamp();
                // Reset bypasses the debounce window; the durable copy is
                // cleared immediately.
                return smallvec![Effect::future(async move {
                    persister.reset_stamped(seq).await;
                    None
                })];
            }
        };

        match verdict {
            Ok(()) => {
                state.last_rejection = None;
                smallvec![persist_effect(state, env)]
            }
            Err(rejection) => {
                tracing::debug!(%rejection, "Mutation rejected");
                state.last_rejection = Some(rejection);
                SmallVec::new()
            }
        }
    }
}

/// Schedules a debounced write of the current aggregate.
///
/// The sequence number is taken here, while the reducer still holds the
/// state write lock, so snapshots stay ordered even when the spawned effect
/// tasks reach the persister out of order.
fn persist_effect(state: &AppState, env: &AppEnvironment) -> Effect<AppAction> {
    let snapshot = state.clone();
    let persister = Arc::clone(&env.persister);
    let seq = persister.stamp();
    Effect::future(async move {
        persister.schedule_stamped(seq, snapshot).await;
        None
    })
}

fn crop_list(state: &mut AppState, slot: CropSlot) -> &mut Vec<CropEntry> {
    match slot {
        CropSlot::Primary => &mut state.primary_crops,
        CropSlot::Secondary => &mut state.secondary_crops,
    }
}

fn add_to_cart(state: &mut AppState, item: CartItem, quantity: u32) -> Result<(), Rejection> {
    if quantity == 0 {
        return Err(Rejection::NonPositiveQuantity { id: item.id });
    }

    if let Some(line) = state.cart.iter_mut().find(|line| line.id == item.id) {
        line.quantity = line.quantity.saturating_add(quantity);
    } else {
        state.cart.push(CartItem { quantity, ..item });
    }
    Ok(())
}

fn update_quantity(state: &mut AppState, id: u64, quantity: u32) -> Result<(), Rejection> {
    if quantity == 0 {
        // Floor removal: dropping to zero deletes the line.
        state.cart.retain(|line| line.id != id);
        return Ok(());
    }

    match state.cart.iter_mut().find(|line| line.id == id) {
        Some(line) => {
            line.quantity = quantity;
            Ok(())
        }
        None => Err(Rejection::UnknownCartItem { id }),
    }
}

fn add_to_rent_cart(state: &mut AppState, item: RentCartItem) -> Result<(), Rejection> {
    if state.rent_cart.iter().any(|line| line.id == item.id) {
        return Err(Rejection::AlreadyInRentCart { id: item.id });
    }

    state.rent_cart.push(item);
    Ok(())
}

fn place_order(
    state: &mut AppState,
    env: &AppEnvironment,
    items: Vec<CartItem>,
    total: Money,
    shipping: Shipping,
) -> Result<(), Rejection> {
    if items.is_empty() {
        return Err(Rejection::EmptyOrder);
    }
    if let Some(line) = items.iter().find(|line| line.quantity == 0) {
        return Err(Rejection::NonPositiveQuantity { id: line.id });
    }

    let placed_at = env.clock.now();
    let id = OrderId::from_millis(env.ids.next(placed_at.timestamp_millis()));

    let order = Order {
        id,
        date: placed_at,
        status: OrderStatus::Placed,
        total,
        items,
        shipping: shipping.with_tracking(id, placed_at),
        cancellation_reason: None,
    };

    tracing::info!(order_id = %order.id, total = %order.total, "Order placed");

    // Newest first; the cart empties in the same reduction, so a successful
    // placement can never leave the lines behind.
    state.orders.insert(0, order);
    state.cart.clear();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn place_booking(
    state: &mut AppState,
    env: &AppEnvironment,
    items: Vec<RentCartItem>,
    total: Money,
    rental_start_date: NaiveDate,
    rental_end_date: NaiveDate,
    rental_duration_days: u32,
    shipping: Shipping,
) -> Result<(), Rejection> {
    if items.is_empty() {
        return Err(Rejection::EmptyBooking);
    }
    if rental_duration_days == 0 || rental_end_date < rental_start_date {
        return Err(Rejection::InvalidRentalPeriod);
    }

    let created_at = env.clock.now();
    let id = BookingId::from_millis(env.ids.next(created_at.timestamp_millis()));

    let booking = Booking {
        id,
        date: created_at,
        status: BookingStatus::Confirmed,
        total,
        items,
        rental_start_date,
        rental_end_date,
        rental_duration_days,
        shipping,
        cancellation_reason: None,
    };

    tracing::info!(booking_id = %booking.id, total = %booking.total, "Booking created");

    state.bookings.insert(0, booking);
    state.rent_cart.clear();
    Ok(())
}

fn cancel_order(state: &mut AppState, id: OrderId, reason: String) -> Result<(), Rejection> {
    let order = state
        .orders
        .iter_mut()
        .find(|order| order.id == id)
        .ok_or(Rejection::UnknownOrder { id })?;

    if !order.status.can_cancel() {
        return Err(Rejection::OrderNotTransitionable {
            id,
            status: order.status,
        });
    }

    order.status = OrderStatus::Cancelled;
    order.cancellation_reason = Some(reason);
    tracing::info!(order_id = %id, "Order cancelled");
    Ok(())
}

fn cancel_booking(state: &mut AppState, id: BookingId, reason: String) -> Result<(), Rejection> {
    let booking = state
        .bookings
        .iter_mut()
        .find(|booking| booking.id == id)
        .ok_or(Rejection::UnknownBooking { id })?;

    if !booking.status.can_cancel() {
        return Err(Rejection::BookingNotTransitionable {
            id,
            status: booking.status,
        });
    }

    booking.status = BookingStatus::Cancelled;
    booking.cancellation_reason = Some(reason);
    tracing::info!(booking_id = %id, "Booking cancelled");
    Ok(())
}

fn advance_order(state: &mut AppState, id: OrderId) -> Result<(), Rejection> {
    let order = state
        .orders
        .iter_mut()
        .find(|order| order.id == id)
        .ok_or(Rejection::UnknownOrder { id })?;

    match order.status.advanced() {
        Some(next) => {
            tracing::info!(order_id = %id, from = %order.status, to = %next, "Order advanced");
            order.status = next;
            Ok(())
        }
        None => Err(Rejection::OrderNotTransitionable {
            id,
            status: order.status,
        }),
    }
}

fn advance_booking(state: &mut AppState, id: BookingId) -> Result<(), Rejection> {
    let booking = state
        .bookings
        .iter_mut()
        .find(|booking| booking.id == id)
        .ok_or(Rejection::UnknownBooking { id })?;

    match booking.status.advanced() {
        Some(next) => {
            tracing::info!(booking_id = %id, from = %booking.status, to = %next, "Booking advanced");
            booking.status = next;
            Ok(())
        }
        None => Err(Rejection::BookingNotTransitionable {
            id,
            status: booking.status,
        }),
    }
}

fn reorder(state: &mut AppState, order_id: OrderId) -> Result<(), Rejection> {
    let frozen: Vec<CartItem> = state
        .order(order_id)
        .ok_or(Rejection::UnknownOrder { id: order_id })?
        .items
        .clone();

    // Validate every frozen line before touching the cart: a rejection must
    // leave the cart exactly as it was, never half-merged.
    if let Some(line) = frozen.iter().find(|line| line.quantity == 0) {
        return Err(Rejection::NonPositiveQuantity { id: line.id });
    }

    // Frozen lines go back through the normal add path with their original
    // quantities and prices, so the cart composition matches the order
    // exactly even if catalog prices changed since.
    for line in frozen {
        let quantity = line.quantity;
        add_to_cart(state, line, quantity)?;
    }
    Ok(())
}
