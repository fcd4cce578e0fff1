pub mod confirmation;
pub mod destination;
pub mod group;
pub mod interest;

pub use confirmation::{MemberConfirmation, PaymentStatus};
pub use destination::Destination;
pub use group::{Group, GroupStatus};
pub use interest::{Contact, Interest, InterestStatus};
