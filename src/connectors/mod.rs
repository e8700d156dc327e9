pub mod broker;
pub mod messages;
pub mod okx;
pub mod signing;
pub mod traits;
