//! Stream consumer: drives one chat-completion request at a time and folds the
//! reply into the session transcript while recording telemetry.

pub mod session;

pub use session::{ConsumerState, SendOutcome, Session, SessionHandle};
