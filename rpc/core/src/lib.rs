pub mod api;
pub mod model;
pub mod quantity;

pub use api::{NodeApi, Subscription, SubscriptionControl, SubscriptionId, Topic};
pub use model::*;
pub use quantity::{JsonBytes, Uint128, Uint32, Uint64};
pub use mirror_hashes::Hash;
