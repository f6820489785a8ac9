pub mod recipient;
pub mod user;
