//! rxfer - HTTP downloads and uploads as progress event streams.
//!
//! Every transfer is a stream of [`TransferEvent::Progress`] items followed by
//! exactly one terminal item: [`TransferEvent::Complete`] with the payload, or
//! an [`Error`]. Progress is rate-limited per transfer kind and never goes
//! backwards.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use rxfer::{TransferConfig, TransferEvent, TransferRequest, Transfers};
//!
//! # async fn example() -> rxfer::Result<()> {
//! let transfers = Transfers::new(TransferConfig::default())?;
//!
//! let request = TransferRequest::parse(reqwest::Method::GET, "https://example.com/data.bin")?;
//! let mut events = transfers.download(request);
//! while let Some(event) = events.next().await {
//!     match event? {
//!         TransferEvent::Progress(p) => println!("{}/{}", p.transferred, p.expected),
//!         TransferEvent::Complete(data) => println!("got {} bytes", data.len()),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

#[cfg(feature = "cli")]
pub mod cli;
pub mod combine;
pub mod config;
pub mod error;
pub mod event;
pub mod progress;
pub mod registry;
pub mod request;
pub mod stats;
pub mod transfer;
pub mod transport;

// Re-export main types for convenience
pub use combine::CombineLatest;
pub use config::TransferConfig;
pub use error::{BoxError, Error, HttpResponse, Result};
pub use event::{Progress, TransferEvent, TransferId, TransferKind};
pub use progress::{ProgressCounters, ProgressSink};
pub use registry::{ActiveTransfer, TransferRegistry};
pub use request::{RequestBody, TransferRequest};
pub use stats::TransferStats;
pub use transfer::{NoProgress, TransferProgress, TransferStream, Transfers};
pub use transport::{RawResponse, ReqwestTransport, Transport};
