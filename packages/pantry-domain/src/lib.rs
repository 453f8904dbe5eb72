pub mod canonical;
pub mod query;
pub mod snippet;
