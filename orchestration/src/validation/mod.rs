//! Human-in-the-loop validation: requests, responses, actions, reply
//! interpretation and the escalating notification wait.

pub mod notify;
pub mod replies;
pub mod store;
pub mod types;

pub use notify::{NotificationCoordinator, ValidationWaitParams};
pub use replies::{decision_to_response, interpret_reply, ReplyDecision};
pub use store::ValidationStore;
pub use types::*;
