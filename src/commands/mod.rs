mod health;
mod index;
mod init;
mod search;
mod stats;

pub use health::health;
pub use index::index_file;
pub use init::init_config;
pub use search::search;
pub use stats::show_stats;
