pub mod system;
pub mod tempvoice;
