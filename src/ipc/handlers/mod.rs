pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod curriculum;
pub mod dashboard;
pub mod grades;
pub mod materials;
pub mod session;
pub mod students;
