mod bus;
mod cache;
mod dragon;
mod lru;
mod mesi;
mod processor;
mod transaction;

pub use bus::{Bus, BusController};
pub use cache::{Cache, CacheState, CoherentCache, Protocol};
pub use dragon::{Dragon, DragonState};
pub use lru::RecencyTracker;
pub use mesi::{Mesi, MesiState};
pub use processor::{ProcState, Processor};
pub use transaction::{BusEvent, BusTransaction, CacheId};
