pub mod coalesce;
pub mod controller;
pub mod error;
pub mod reducer;
pub mod store;

pub use coalesce::Coalescer;
pub use controller::{ChatController, ChatSettings, TurnHandle};
pub use error::Error;
pub use reducer::{Step, StreamReducer, TurnOutcome};
pub use store::{ChatStore, SharedChatStore};
