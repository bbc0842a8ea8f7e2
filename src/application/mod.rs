// Application layer - Duty-cycle logic and per-device orchestration
pub mod accumulator;
pub mod clock;
pub mod device_monitor;
pub mod device_service;
pub mod history;
pub mod publisher;
