pub mod branch;
pub mod corporation;
pub mod lease_company;
pub mod order;
pub mod partner;
pub mod synthetic_asset;
