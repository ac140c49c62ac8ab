pub mod audit;
pub mod email;
pub mod kdrive;
pub mod lease_expiry;
pub mod report_calc;
