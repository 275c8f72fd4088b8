//! Nubot core library: the robot, its listeners and middleware chains, the
//! brain and the transport adapters. Used by the CLI.

pub mod adapters;
pub mod brain;
pub mod config;
pub mod error;
pub mod listener;
pub mod message;
pub mod middleware;
pub mod response;
pub mod robot;

pub use adapters::{Adapter, AdapterContext, AdapterError, SendMethod};
pub use brain::Brain;
pub use error::DispatchError;
pub use listener::{Attempt, Listener, ListenerOptions};
pub use message::{Envelope, Message, User};
pub use middleware::{ChainOutcome, Flow};
pub use response::Response;
pub use robot::{Dispatch, Robot, RobotEvent};
