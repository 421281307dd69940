// src/event.rs
//! Events consumed by the scheduler loops.
//!
//! Each loop waits on several sources at once (aging tick, update tick,
//! control channel) and reduces whatever fired to one `Event`.

use std::fmt;

/// Out-of-band requests delivered to a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Re-read the configuration file.
    Reload,
    /// Log the adjacency table.
    DumpAdjacency,
    /// Log the neighbor table.
    DumpNeighbors,
    Stop,
    /// Terminate the loop and relaunch it with the current configuration.
    Reset,
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Control::Reload => "reload",
            Control::DumpAdjacency => "dump-adjacency",
            Control::DumpNeighbors => "dump-neighbors",
            Control::Stop => "stop",
            Control::Reset => "reset",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Aging tick (fixed 5 s).
    FastTick,
    /// Regular update tick.
    SlowTick,
    Control(Control),
}
