//! # Dioxus binding
//!
//! Mirrors a [`Subscription`] into a [`Signal`] so components re-render when the
//! snapshot changes. The subscription is created once per component instance and torn
//! down when the component unmounts.
//!
//! ```rust,ignore
//! use dioxus::prelude::*;
//! use storefront_sync::{global, hooks::use_subscription, resources};
//!
//! #[component]
//! fn Alerts(api: MyApi) -> Element {
//!     let (alerts, _) = use_subscription(|| {
//!         let runtime = global::runtime().expect("runtime initialized at startup");
//!         resources::subscribe_stock_alerts(&runtime, &api)
//!     });
//!     rsx! { "{alerts.read().value.as_ref().map_or(0, |a| a.len())} alerts" }
//! }
//! ```

use dioxus::prelude::*;

use crate::{state::Snapshot, subscription::Subscription, types::ResourceValue};

/// Create a subscription for this component and expose its snapshot as a signal.
///
/// `init` runs once, on first render.
pub fn use_subscription<T: ResourceValue>(
    init: impl FnOnce() -> Subscription<T>,
) -> (Signal<Snapshot<T>>, Subscription<T>) {
    let subscription = use_hook(init);
    let mut snapshot = use_signal(|| subscription.read());

    use_hook({
        let subscription = subscription.clone();
        move || {
            let mut changes = subscription.changes();
            spawn(async move {
                while changes.changed().await.is_ok() {
                    let next = changes.borrow_and_update().clone();
                    snapshot.set(next);
                }
            });
        }
    });

    use_drop({
        let subscription = subscription.clone();
        move || subscription.teardown()
    });

    (snapshot, subscription)
}
