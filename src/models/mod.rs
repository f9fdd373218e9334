pub mod driver;
pub mod ride;
