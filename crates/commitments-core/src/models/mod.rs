//! Data models for the commitment tracker's REST resources.
//!
//! - `User`, `Role`: accounts and their roles
//! - `Commitment`, `Task`, `Status`, `CommitmentCategory`: tracked work
//! - `Notification`, `NotificationInvitation`: reminders and guest invites
//! - `Report`, `ReportRequest`: completed-work reports
//! - `Page<T>`: the paginated envelope list endpoints answer with

pub mod commitment;
pub mod notification;
pub mod page;
pub mod report;
pub mod user;

pub use commitment::{Commitment, CommitmentCategory, Status, Task};
pub use notification::{Notification, NotificationInvitation};
pub use page::Page;
pub use report::{Report, ReportRequest};
pub use user::{Role, User, ADMIN_ROLE};
