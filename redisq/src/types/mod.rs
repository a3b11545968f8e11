pub mod ids;
pub mod item;
pub mod keys;
pub mod events;
pub mod claimed;

pub use ids::ItemId;
pub use item::Item;
pub use keys::QueueKeys;
pub use events::QueueEvent;
pub use claimed::{ClaimedItem, Disposition, Settlement};
