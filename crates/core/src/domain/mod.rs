pub mod contract;
pub mod date;
pub mod recommendation;
