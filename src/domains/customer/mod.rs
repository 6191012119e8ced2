pub mod types;
pub mod repository;

pub use types::Customer;
pub use repository::{CustomerSource, CustomerStream, SqliteCustomerRepository};
