//! Remote participant handles
//!
//! A node identifier (`host:application:port`) resolves to a
//! [`RemoteParticipant`], either fresh per resolution (stateful) or cached
//! once per application name (stateless).

mod identifier;
mod remote;
mod resolver;

pub use identifier::{NodeIdentifier, RemoteAddr, RemoteNode, RemoteNodeDirectory};
pub use remote::{
    HttpParticipantTransport, ParticipantOperation, ParticipantRequest, ParticipantTransport,
    RemoteCoordinator, RemoteParticipant,
};
pub use resolver::ParticipantResolver;
