//! Browsing-context and realm registries

pub mod browsing;
pub mod realm;

pub use browsing::{BrowsingContext, BrowsingContextStore, LifecycleState};
pub use realm::{Realm, RealmFilter, RealmStore, RealmType};
