pub mod notifier;
pub mod payments;

pub use notifier::{LogNotifier, NotificationKey, Notifier, RecordingNotifier};
pub use payments::{MockPayments, PaymentIntent, PaymentResult, Payments};
