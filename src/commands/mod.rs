pub mod account;
pub mod receipts;
pub mod settings;
pub mod upload;
