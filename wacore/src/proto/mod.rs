pub mod signal;
pub mod whatsapp;
