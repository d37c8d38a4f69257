//! GATMONEY Client SDK.
//!
//! This crate provides a client library for services that charge users
//! through the GATMONEY entitlement API.
//!
//! # Example
//!
//! ```no_run
//! use gatmoney_client::{ClientError, GatmoneyClient, UsageRequest};
//! use gatmoney_core::UserId;
//!
//! # async fn example(user_id: UserId) -> Result<(), ClientError> {
//! let client = GatmoneyClient::new(
//!     "http://gatmoney.internal:8080",
//!     "your-service-api-key",
//! )?;
//!
//! // Ask before doing expensive work...
//! match client.check(&UsageRequest::report(user_id)).await {
//!     Ok(_) => {}
//!     Err(ClientError::QuotaExceeded { prompt, .. }) => {
//!         println!("out of reports, suggest {prompt:?}");
//!         return Ok(());
//!     }
//!     Err(e) => return Err(e),
//! }
//!
//! // ...and charge once it succeeded.
//! let charged = client.consume(&UsageRequest::report(user_id)).await?;
//! println!("{} reports left", charged.entitlement.reports.remaining);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, GatmoneyClient};
pub use error::ClientError;
pub use types::*;
