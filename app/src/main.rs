//! Demo walkthrough of the Farmstead state container.
//!
//! Runs one session end to end: onboarding, cart work, an order with a
//! cancellation, an advisory call that survives a transient overload, then a
//! clean shutdown followed by a reopen to show the state came back from disk.

use anyhow::Result;
use chrono::NaiveDate;
use farmstead_app::advisory::{
    AdvisoryClient, AdvisoryError, AdvisoryRequest, AdvisoryResponse, ScriptedAdvisory,
    call_with_retry,
};
use farmstead_app::persistence::{DEFAULT_STATE_FILE, FileStorage, StateStorage};
use farmstead_app::reducer::CropSlot;
use farmstead_app::store::{AppStore, AppStoreConfig};
use farmstead_app::types::{
    CartItem, CropEntry, LivestockEntry, Money, Profile, RentCartItem, Shipping,
};
use farmstead_core::environment::SystemClock;
use farmstead_runtime::retry::RetryPolicy;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let state_dir = std::env::temp_dir().join("farmstead-demo");
    let file_storage = FileStorage::new(state_dir.join(DEFAULT_STATE_FILE));
    tracing::info!(path = %file_storage.path().display(), "Opening session");
    let storage: Arc<dyn StateStorage> = Arc::new(file_storage);

    let store = AppStore::open(
        Arc::clone(&storage),
        Arc::new(SystemClock),
        AppStoreConfig::default(),
    );

    onboard(&store).await?;
    shop(&store).await?;
    ask_advisor().await?;

    store.close().await?;
    tracing::info!("Session closed");

    // Reopen: everything above came back from the JSON document.
    let reopened = AppStore::open(
        storage,
        Arc::new(SystemClock),
        AppStoreConfig::default(),
    );
    let (name, orders, bookings) = reopened
        .state(|state| {
            (
                state.profile.name.clone(),
                state.orders.len(),
                state.bookings.len(),
            )
        })
        .await;
    tracing::info!(%name, orders, bookings, "Session restored");
    reopened.close().await?;

    Ok(())
}

async fn onboard(store: &AppStore) -> Result<()> {
    store
        .update_profile(Profile {
            name: "Ramesh Patil".into(),
            phone: "9822012345".into(),
            village: "Baramati".into(),
            district: "Pune".into(),
            state: "Maharashtra".into(),
            farm_size_acres: 4.5,
            soil_type: "Black".into(),
            language: "mr".into(),
        })
        .await?;

    store
        .add_crop(
            CropSlot::Primary,
            CropEntry {
                name: "Sugarcane".into(),
                area: 3.0,
                season: "Annual".into(),
            },
        )
        .await?;
    store
        .add_crop(
            CropSlot::Secondary,
            CropEntry {
                name: "Onion".into(),
                area: 1.5,
                season: "Rabi".into(),
            },
        )
        .await?;
    store
        .add_livestock(LivestockEntry {
            kind: "Buffalo".into(),
            count: 2,
        })
        .await?;
    store.set_onboarding_complete(true).await?;

    tracing::info!("Onboarding complete");
    Ok(())
}

async fn shop(store: &AppStore) -> Result<()> {
    let urea = CartItem {
        id: 1,
        name: "Urea".into(),
        price: Money::from_major(268),
        image: "/images/urea.png".into(),
        quantity: 0,
        unit: "45 kg bag".into(),
    };

    // Two adds of the same product merge into one line of three bags.
    store.add_to_cart(urea.clone(), 1).await?;
    store.add_to_cart(urea, 2).await?;

    let (items, total) = store
        .state(|state| (state.cart.clone(), state.cart_total()))
        .await;
    tracing::info!(%total, "Checking out");

    let shipping = Shipping {
        name: "Ramesh Patil".into(),
        phone: "9822012345".into(),
        address: "Patil Wasti, Baramati".into(),
        district: "Pune".into(),
        state: "Maharashtra".into(),
        pincode: "413102".into(),
        ..Shipping::default()
    };

    let order_id = store.place_order(items, total, shipping.clone()).await?;
    tracing::info!(%order_id, "Order placed");

    // A second cancel of the same order is an explicit rejection, not a
    // silent overwrite.
    store
        .cancel_order(order_id, "Ordered the wrong fertilizer".into())
        .await?;
    if let Err(error) = store.cancel_order(order_id, "Double click".into()).await {
        tracing::info!(%error, "Second cancel rejected as expected");
    }

    let tractor = RentCartItem {
        id: 101,
        name: "Tractor with rotavator".into(),
        price_per_day: Money::from_major(1200),
        image: "/images/tractor.png".into(),
    };
    store.add_to_rent_cart(tractor.clone()).await?;
    if let Err(error) = store.add_to_rent_cart(tractor).await {
        tracing::info!(%error, "Duplicate rental add rejected as expected");
    }

    let rent_items = store.state(|state| state.rent_cart.clone()).await;
    let start = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap_or_default();
    let end = NaiveDate::from_ymd_opt(2026, 9, 3).unwrap_or_default();
    let booking_id = store
        .place_booking(rent_items, Money::from_major(3600), start, end, 3, shipping)
        .await?;
    tracing::info!(%booking_id, "Booking created");

    Ok(())
}

async fn ask_advisor() -> Result<()> {
    // The scripted backend sheds the first request; the retry policy
    // absorbs it.
    let client: Arc<dyn AdvisoryClient> = Arc::new(ScriptedAdvisory::new(vec![
        Err(AdvisoryError::Overloaded),
        Ok(AdvisoryResponse {
            answer: "Black soil holds moisture well; cotton or soybean suit Kharif.".into(),
        }),
    ]));

    let response = call_with_retry(
        &client,
        RetryPolicy::new(),
        AdvisoryRequest {
            flow: "crop-suggestion".into(),
            prompt: "Which crop suits black soil in Kharif?".into(),
            language: "mr".into(),
        },
    )
    .await?;

    tracing::info!(answer = %response.answer, "Advisory answered");
    Ok(())
}
