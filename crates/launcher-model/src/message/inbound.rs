use serde::{Deserialize, Serialize};

/// Message sent by a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Application-level heartbeat, answered with `pong`.
    Ping,
    /// Start the workload if it is stopped.
    Start,
    /// Ask the other viewers to agree on a restart.
    Restart,
    /// Ballot in the active restart vote.
    Vote { data: BallotData },
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Ping => "ping",
            ClientMessage::Start => "start",
            ClientMessage::Restart => "restart",
            ClientMessage::Vote { .. } => "vote",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotData {
    pub value: Ballot,
}

/// One viewer's answer in a restart vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ballot {
    Yes,
    No,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unit_messages() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);

        // Extra envelope fields are tolerated.
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"start","message":null,"data":{}}"#).unwrap();
        assert_eq!(msg, ClientMessage::Start);
    }

    #[test]
    fn parses_vote() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"vote","data":{"value":"no"}}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Vote {
                data: BallotData { value: Ballot::No }
            }
        );
    }

    #[test]
    fn rejects_unknown_type_and_bad_ballot() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"stop"}"#).is_err());
        assert!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"vote","data":{"value":"maybe"}}"#)
                .is_err()
        );
    }
}
