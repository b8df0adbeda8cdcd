//! Static universe map: named locations, stargate adjacency and jump distances.

mod esi;
mod graph;
mod location;
mod table;

pub use esi::{EsiClient, DEFAULT_CONCURRENCY, DEFAULT_ESI_BASE};
pub use graph::{Distance, LocationGraph};
pub use location::canonical_location;
pub use table::{SystemEntry, UniverseTable};
