//! chainbridge-kafka: Kafka publisher for ChainBridge.
//!
//! ```rust,no_run
//! use chainbridge_kafka::{KafkaConfig, KafkaPublisher};
//!
//! # fn example() -> Result<(), chainbridge_core::error::BridgeError> {
//! let publisher = KafkaPublisher::new(&KafkaConfig {
//!     brokers: "kafka-1:9092,kafka-2:9092".into(),
//!     ..Default::default()
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod producer;

pub use producer::{KafkaConfig, KafkaPublisher};
