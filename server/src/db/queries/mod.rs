pub mod channels;
pub mod messages;
pub mod presence;
pub mod read_receipts;
pub mod users;
