pub mod health;
pub mod snapshots;
