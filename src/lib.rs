pub mod app;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod metrics;
pub mod normalize;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod stats;
pub mod window;

// Re-export commonly used types for tests
pub use dispatch::{Backend, DispatchFuture, DispatchRequest, QuerySource};
pub use error::QueryError;
pub use normalize::{NormalizeOptions, Point, RawQueryResult, Series, normalize};
pub use scheduler::{RefreshScheduler, SchedulerState};
pub use session::{ChartSession, QuerySpec};
pub use state::ChartFrame;
pub use stats::LegendStat;
pub use window::{TimeWindow, WindowSpec};
