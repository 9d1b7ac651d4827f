//! Control-message envelope exchanged over a viewer connection.
//!
//! Every frame is one JSON object shaped `{type, message?, data?}`.

mod inbound;
pub use inbound::{Ballot, BallotData, ClientMessage};

mod outbound;
pub use outbound::{
    ServerMessage, StatusData, VoteEndedData, VoteOutcome, VoteStartedData, VoteUpdateData,
};
