//! 业务服务层

pub mod accountant;
pub mod alpha;
pub mod history;
pub mod reset;

pub use accountant::UsageAccountant;
pub use alpha::AlphaService;
pub use history::UsageHistoryService;
pub use reset::ResetService;
