pub mod cancel;
pub mod evolution;
pub mod lanes;
pub mod manager;
pub mod restart;
pub mod toolcall;
pub mod turn;

pub use cancel::CancelMap;
pub use manager::{SessionManager, TurnOutcome, TurnRunRequest};
