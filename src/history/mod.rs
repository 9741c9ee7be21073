//! Decoded packets and bounded history of past epochs.
//!
//! Each evaluated epoch becomes one [`HistoryEntry`]: the decoder packets,
//! merged into start-time order, plus shared handles to every buffer the
//! graph published. [`HistoryManager`] bounds how many entries are kept and
//! never evicts one that is pinned, marked or still referenced.

mod manager;
mod packet;

pub use manager::{HistoryEntry, HistoryError, HistoryHandle, HistoryManager, Marker, RetentionPolicy};
pub use packet::{Packet, PacketList};
