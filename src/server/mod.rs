mod daemon;

pub use daemon::Daemon;
