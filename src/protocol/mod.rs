pub mod settings;
pub mod transport;
pub mod tty;
pub mod worker;
