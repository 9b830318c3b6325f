//! Infoblox WAPI Client
//!
//! A Rust client library for the parts of the Infoblox WAPI used for IP address management:
//! network and DNS views, networks, and host records. On top of the raw client sits an
//! idempotent allocation engine that keeps one host record per hostname.
//!
//! # Example
//!
//! ```no_run
//! use infoblox_client::{Config, HostConfig, HostRecordIpam, InfobloxClient, IpamClient};
//!
//! # async fn example(config: Config) -> Result<(), Box<dyn std::error::Error>> {
//! let ipam = HostRecordIpam::new(InfobloxClient::new(&config)?);
//!
//! let subnet = "10.0.0.0/24".parse()?;
//! let address = ipam
//!     .get_or_allocate_address("default", "default", &subnet, "node-0.example.com", Some("example.com"))
//!     .await?;
//! println!("allocated {}", address);
//!
//! ipam.release_address("default", "default", &subnet, "node-0.example.com").await?;
//! # Ok(())
//! # }
//! ```

pub mod addresses;
pub mod client;
pub mod config;
pub mod error;
#[path = "trait.rs"]
pub mod infoblox_trait;
pub mod manager;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod models;

pub use addresses::{HostRecordIpam, IpamClient};
pub use client::InfobloxClient;
pub use config::{AuthConfig, Config, HostConfig, auth_config_from_secret_data};
pub use error::{InfobloxError, ResultExt};
pub use infoblox_trait::InfobloxClientTrait;
pub use manager::{ClientFactory, ClientManager};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockInfobloxClient, MockOperation};
pub use models::*;
