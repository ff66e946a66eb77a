//! Configuration Subsystem
//!
//! Owns the effective output directory and its provenance. Four sources are
//! merged under a fixed precedence contract; readers get immutable snapshots
//! and changes fan out to observers on a dedicated dispatch thread.

mod provider;

pub use provider::{
    ChangeEvent, ConfigProvider, ConfigSource, EffectiveConfiguration, SubscriptionId,
};
