pub mod transaction;
pub mod requests;
