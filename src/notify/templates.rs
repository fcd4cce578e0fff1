//! Typed notification templates.
//!
//! Each template id maps to a typed payload struct and a renderer, so the
//! set of messages the engine can send is closed and checked at compile
//! time. Transport (email/SMS) belongs to the Notifier implementation.

use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
pub struct GroupFormationData {
    pub user_name: String,
    pub group_name: String,
    pub destination_name: String,
    pub date_from: String,
    pub date_to: String,
    pub group_size: u32,
    pub member_cost: f64,
    pub savings_amount: f64,
    pub confirmation_deadline: String,
    pub confirmation_path: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ConfirmationReminderData {
    pub user_name: String,
    pub group_name: String,
    pub confirmation_deadline: String,
    pub confirmation_path: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct GroupConfirmedData {
    pub user_name: String,
    pub group_name: String,
    pub destination_name: String,
    pub date_from: String,
    pub date_to: String,
    pub final_group_size: u32,
    pub final_price: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct GroupCancelledData {
    pub user_name: String,
    pub group_name: String,
    pub destination_name: String,
    pub cancellation_reason: String,
    pub refund_info: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct DepositRetryData {
    pub user_name: String,
    pub group_name: String,
    pub deposit_amount: f64,
    pub retry_path: String,
}

#[derive(Clone, Debug)]
pub enum Template {
    GroupFormation(GroupFormationData),
    ConfirmationReminder(ConfirmationReminderData),
    GroupConfirmed(GroupConfirmedData),
    GroupCancelled(GroupCancelledData),
    DepositRetry(DepositRetryData),
}

/// A rendered message, ready for a transport.
#[derive(Clone, Debug)]
pub struct Rendered {
    pub template_id: &'static str,
    pub subject: String,
    pub body: String,
}

impl Template {
    pub fn id(&self) -> &'static str {
        match self {
            Template::GroupFormation(_) => "group_formation",
            Template::ConfirmationReminder(_) => "confirmation_reminder",
            Template::GroupConfirmed(_) => "group_confirmed",
            Template::GroupCancelled(_) => "group_cancelled",
            Template::DepositRetry(_) => "deposit_retry",
        }
    }

    pub fn render(&self) -> Rendered {
        match self {
            Template::GroupFormation(d) => Rendered {
                template_id: self.id(),
                subject: format!("You're matched: {}", d.group_name),
                body: format!(
                    "Hi {}, we found a group of {} for {} ({} to {}). \
                     Your cost is {:.2} (you save {:.2}). \
                     Confirm by {} at {}.",
                    d.user_name,
                    d.group_size,
                    d.destination_name,
                    d.date_from,
                    d.date_to,
                    d.member_cost,
                    d.savings_amount,
                    d.confirmation_deadline,
                    d.confirmation_path,
                ),
            },
            Template::ConfirmationReminder(d) => Rendered {
                template_id: self.id(),
                subject: format!("Reminder: confirm {}", d.group_name),
                body: format!(
                    "Hi {}, your spot in {} is waiting. Confirm by {} at {}.",
                    d.user_name, d.group_name, d.confirmation_deadline, d.confirmation_path,
                ),
            },
            Template::GroupConfirmed(d) => Rendered {
                template_id: self.id(),
                subject: format!("{} is confirmed!", d.group_name),
                body: format!(
                    "Hi {}, {} to {} is confirmed for {} travelers, {} to {}. \
                     Final price per person: {:.2}.",
                    d.user_name,
                    d.group_name,
                    d.destination_name,
                    d.final_group_size,
                    d.date_from,
                    d.date_to,
                    d.final_price,
                ),
            },
            Template::GroupCancelled(d) => Rendered {
                template_id: self.id(),
                subject: format!("{} was cancelled", d.group_name),
                body: format!(
                    "Hi {}, {} to {} was cancelled: {}. {}",
                    d.user_name,
                    d.group_name,
                    d.destination_name,
                    d.cancellation_reason,
                    d.refund_info,
                ),
            },
            Template::DepositRetry(d) => Rendered {
                template_id: self.id(),
                subject: format!("Payment issue for {}", d.group_name),
                body: format!(
                    "Hi {}, your deposit of {:.2} for {} did not go through. \
                     Retry at {}.",
                    d.user_name, d.deposit_amount, d.group_name, d.retry_path,
                ),
            },
        }
    }
}
