//! Domain model: ids, recipients, fragments, tasks, outgoing messages, errors.

pub mod equality;
pub mod errors;
pub mod fragment;
pub mod ids;
pub mod message;
pub mod request;
pub mod state;
pub mod task;

pub use self::errors::{DeliveryError, MailTimeError};
pub use self::fragment::{MailFragment, Recipient};
pub use self::ids::{ParseTaskIdError, TaskId};
pub use self::message::MailMessage;
pub use self::request::MailRequest;
pub use self::state::TaskState;
pub use self::task::MailTask;
