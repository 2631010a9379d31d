//! Resilience engine for third-party cloud-storage connections: a closed error taxonomy,
//! per-connection health records, singleflight token refresh, recovery strategies, rate limits,
//! and throttled user notifications.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod classify;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod health;
#[cfg(feature = "reqwest")] pub mod http;
pub mod limit;
pub mod notify;
pub mod obs;
pub mod provider;
pub mod recovery;
pub mod refresh;
pub mod report;
pub mod store;
pub mod taxonomy;

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use time;
#[cfg(test)] use httpmock as _;
