pub mod attendance;
pub mod core;
pub mod coursework;
pub mod grades;
pub mod roster;
pub mod schedule;
pub mod study_plan;
