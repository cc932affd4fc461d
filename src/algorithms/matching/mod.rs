//! Point-cloud registration.

mod icp;

pub use icp::{GicpConfig, GicpMatcher, RegistrationResult};
