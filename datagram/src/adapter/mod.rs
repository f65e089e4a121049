//! Drive every session of a participant from a single task.
//!
//! # Design
//!
//! The [Actor] owns all per-peer state: one outbound [Session](crate::session::Session) for
//! each peer the application has sent to, and up to two inbound readers per peer (a candidate
//! still negotiating and the accepted reader holding the current session key). Inbound
//! datagrams, application requests (via the [Mailbox]), and a periodic tick are handled one at
//! a time, so no state is shared between tasks.
//!
//! ## Sending
//!
//! The first payload sent to a peer starts a handshake. Payloads wait in a per-peer queue
//! until the session key arrives and are then sealed into `DATA` packets in the order they were
//! sent. Once the number of unacknowledged packets reaches `max_retransmit_backlog`, new
//! payloads are queued instead of sent. A payload larger than [Mailbox::max_payload] is
//! rejected before it reaches the actor.
//!
//! ## Receiving
//!
//! Each datagram is size-checked, decoded, and dispatched by kind. Anything malformed,
//! addressed to someone else, sent by a peer outside the directory, replayed, or failing
//! authentication is logged and counted, then dropped. Every `DATA` packet that decrypts is
//! acknowledged (including duplicates) and delivered to the [Handler] at most once.
//!
//! ## Timers
//!
//! On every tick, unacknowledged packets are re-sent with backoff and handshakes that have not
//! completed within `handshake_timeout` are restarted with a fresh sequence number. When a `DATA`
//! packet runs out of attempts, the session is considered broken: its in-flight payloads are
//! reported to [Handler::broken] and a new handshake is started.

mod actor;
mod ingress;
mod metrics;

pub use actor::Actor;
pub use ingress::{Handler, Mailbox, Message};
