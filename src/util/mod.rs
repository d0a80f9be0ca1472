mod log;

pub use log::init_logging;
