/// Connection management: degradation state machine, transports and the manager driving them
pub mod machine;
pub mod manager;
pub mod timeout;
pub mod transport;

pub use machine::{ConnectionMachine, ConnectionState, InvalidTransition, Transition};
pub use manager::{ConnectionManager, LastKnownGood};
pub use transport::{
    HistorySource, HttpHistorySource, HttpPollTransport, PollTransport, PushStream, PushTransport,
    WsPushTransport,
};
