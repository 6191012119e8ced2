pub mod customer;
pub mod export;
