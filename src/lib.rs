pub mod compare;
pub mod config;
pub mod cost;
pub mod error;
pub mod job;
pub mod local;
pub mod models;
pub mod remote;
pub mod runner;
pub mod telemetry;

#[macro_export]
macro_rules! exit_err {
    ($msg:expr) => {
        {
            tracing::error!("{}", $msg);
            std::process::exit(1);
        }
    };
    ($code:expr, $fmt:expr $(, $arg:expr)*) => {
        {
            tracing::error!($fmt $(, $arg)*);
            std::process::exit($code);
        }
    };
}
