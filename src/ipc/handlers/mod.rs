pub mod attendance;
pub mod core;
pub mod grades;
pub mod schedules;
pub mod setup;
pub mod students;
