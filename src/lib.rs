pub mod config;
pub mod error;
pub mod events;
pub mod processing;
pub mod platform {
    pub mod display_power;
}
pub mod tasks {
    pub mod catalog;
    pub mod prefetch;
    pub mod viewer;
}
