pub mod aggregates;
pub mod assets;
pub mod calendar;
pub mod identity;
pub mod orders;
