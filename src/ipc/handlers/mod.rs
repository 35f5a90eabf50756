pub mod attendance;
pub mod core;
pub mod registrations;
pub mod subjects;
pub mod users;
