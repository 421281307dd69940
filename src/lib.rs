pub mod auth;
pub mod config;
pub mod entry;
pub mod error;
pub mod event;
pub mod kernel;
pub mod local;
pub mod neighbor;
#[cfg(feature = "netlink")]
pub mod netlink;
pub mod node;
pub mod packet;
pub mod routing;
pub mod scheduler;
pub mod transport;
pub mod update;

pub use config::Config;
pub use error::{Error, Result};
pub use event::Control;
pub use neighbor::{Neighbor, NeighborTable};
pub use node::Router;
pub use routing::{AdjEntry, AdjacencyTable, RouteKey};
pub use scheduler::Scheduler;
