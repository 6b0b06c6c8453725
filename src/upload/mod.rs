mod file_handler;

pub use file_handler::{sanitize_filename, FileHandler, FileHandlerError};
