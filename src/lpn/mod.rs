//! Latency Petri nets and the request matching that feeds them.

pub mod handshake;
pub mod matcher;
pub mod net;
pub mod place;
pub mod transition;

pub use handshake::{AuxHandle, AuxPort, AuxState, HandshakeError, SharedRequestMap};
pub use matcher::{DmaChunk, Matcher, MemReq, ReqState, RequestMap, WriteBack};
pub use net::{Net, NetBuilder};
pub use place::{Place, PlaceId, PlaceSet, Token};
pub use transition::{Transition, TransitionId, Weight};
