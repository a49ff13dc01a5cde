pub mod crm;
pub mod hook;
