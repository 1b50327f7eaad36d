// Durable notification task queue
// Two pending tasks per session start; the dispatch worker is the only writer afterwards.

pub mod scheduling;
pub mod store;
pub mod task;

pub use scheduling::{schedule_notifications, ScheduleError, ScheduleRequest};
pub use store::{JsonTaskStore, QueueError, TaskStore};
pub use task::{NotificationPayload, NotificationTask, TaskStatus};
