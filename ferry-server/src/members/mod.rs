//! Connected members (one per signaling connection)

mod manager;
mod member;

pub use manager::MemberManager;
pub use member::{Member, MemberSender};
