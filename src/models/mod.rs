pub mod session;

pub use session::{Outbox, Session, SessionState, TEXT_ROOT};
