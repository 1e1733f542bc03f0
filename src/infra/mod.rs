pub mod docker;
pub mod notify;
pub mod registry;
pub mod store;
pub mod web;
