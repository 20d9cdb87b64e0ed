pub mod download;
pub mod evaluate;
pub mod serve;
pub mod train;
