pub mod dispatcher;
pub mod http;
pub mod loader;
pub mod node;
pub mod operation;
