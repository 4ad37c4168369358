pub mod jobs;
pub mod market_hours;

pub use jobs::{JobName, Scheduler, SchedulerStatus};
pub use market_hours::MarketCalendar;
