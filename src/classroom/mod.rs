//! Live-classroom signaling core: session lifecycle, room membership,
//! envelope relay and per-connection presence.

mod envelope;
mod lifecycle;
mod link;
mod participant;
mod relay;
mod room;
mod server;
mod session;

pub use envelope::{Envelope, SignalType};
pub use lifecycle::{Admission, ConnectionManager};
pub use link::{PeerLink, PushOutcome};
pub use participant::{generate_participant_id, ConnectionState, Participant, ParticipantId, Role};
pub use relay::{RouteOutcome, SignalingRelay};
pub use room::{Admitted, Departure, Member, Recipients, RoomManager};
pub use server::ClassroomServer;
pub use session::{Session, SessionAction, SessionId, SessionRegistry, SessionStatus};
