//! Property tests for the cart invariants.
//!
//! These drive the reducer directly (no runtime) with arbitrary command
//! sequences and check the structural invariants that the unit tests only
//! probe pointwise.

use farmstead_app::persistence::{MemoryStorage, Persister};
use farmstead_app::reducer::{AppAction, AppEnvironment, AppReducer, IdSource};
use farmstead_app::types::{AppState, CartItem, Money, RentCartItem};
use farmstead_core::environment::SystemClock;
use farmstead_core::reducer::Reducer;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn env() -> AppEnvironment {
    AppEnvironment {
        clock: Arc::new(SystemClock),
        ids: Arc::new(IdSource::new()),
        persister: Arc::new(Persister::new(
            Arc::new(MemoryStorage::new()),
            Duration::from_secs(1),
        )),
    }
}

fn catalog_item(id: u64) -> CartItem {
    CartItem {
        id,
        name: format!("Product {id}"),
        price: Money::from_major(i64::try_from(id).unwrap_or(1) * 10),
        image: String::new(),
        quantity: 0,
        unit: "unit".into(),
    }
}

proptest! {
    /// Merging: the final quantity of each id equals the sum of all its
    /// accepted adds, regardless of interleaving with other ids.
    #[test]
    fn add_to_cart_quantities_sum_per_id(adds in prop::collection::vec((1u64..5, 0u32..4), 1..40)) {
        let env = env();
        let mut state = AppState::default();

        let mut expected = std::collections::BTreeMap::new();
        for &(id, quantity) in &adds {
            AppReducer.reduce(
                &mut state,
                AppAction::AddToCart { item: catalog_item(id), quantity },
                &env,
            );
            if quantity > 0 {
                *expected.entry(id).or_insert(0u32) += quantity;
            }
        }

        prop_assert_eq!(state.cart.len(), expected.len());
        for line in &state.cart {
            prop_assert_eq!(Some(&line.quantity), expected.get(&line.id));
            prop_assert!(line.quantity >= 1);
        }
    }

    /// Floor removal: after any command sequence, an update to zero leaves
    /// the id absent and every surviving line positive.
    #[test]
    fn update_to_zero_always_removes(ops in prop::collection::vec((1u64..5, 0u32..4), 1..40), victim in 1u64..5) {
        let env = env();
        let mut state = AppState::default();

        for &(id, quantity) in &ops {
            AppReducer.reduce(
                &mut state,
                AppAction::AddToCart { item: catalog_item(id), quantity },
                &env,
            );
        }

        AppReducer.reduce(
            &mut state,
            AppAction::UpdateQuantity { id: victim, quantity: 0 },
            &env,
        );

        prop_assert!(state.cart.iter().all(|line| line.id != victim));
        prop_assert!(state.cart.iter().all(|line| line.quantity >= 1));
    }

    /// Rental uniqueness: however often an id is added, at most one entry
    /// exists for it.
    #[test]
    fn rent_cart_never_holds_duplicates(adds in prop::collection::vec(1u64..4, 1..20)) {
        let env = env();
        let mut state = AppState::default();

        for &id in &adds {
            AppReducer.reduce(
                &mut state,
                AppAction::AddToRentCart {
                    item: RentCartItem {
                        id,
                        name: format!("Equipment {id}"),
                        price_per_day: Money::from_major(500),
                        image: String::new(),
                    },
                },
                &env,
            );
        }

        let mut ids: Vec<u64> = state.rent_cart.iter().map(|line| line.id).collect();
        let before = ids.len();
        ids.sort_unstable();
        ids.dedup();
        prop_assert_eq!(ids.len(), before);
    }
}
