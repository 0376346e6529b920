pub mod check_policy;
pub mod decide;
pub mod history;
pub mod scenario;
