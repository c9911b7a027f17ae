//! Download Transport Abstraction
//!
//! The core never performs network transfers itself. Each reading-order item
//! owns a download task in `core-book` that builds a [`DownloadRequest`] and
//! hands it to the host through this module:
//!
//! 1. Every registered [`DownloadExtension`] is asked, in order, whether it
//!    wants to take over the transfer (for example to attach a bearer token or
//!    to fetch through an alternate credential flow). The first extension that
//!    returns a future wins.
//! 2. Otherwise the default [`DownloadProvider`] performs the transfer.
//!
//! Providers report progress through the callback carried by the request and
//! resolve the returned future once the file at `output_path` is complete.
//! A provider that notices the transfer was aborted should resolve with
//! [`BridgeError::Cancelled`](crate::error::BridgeError::Cancelled).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::platform::{PlatformBoxFuture, PlatformSendSync};

/// Future resolved when a substituted download finishes.
pub type DownloadFuture = PlatformBoxFuture<Result<()>>;

/// Progress callback. Receives the completed fraction in `[0, 1]`.
#[cfg(not(target_arch = "wasm32"))]
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

#[cfg(target_arch = "wasm32")]
pub type ProgressCallback = Arc<dyn Fn(f64)>;

/// Link to the remote media of a reading-order item.
///
/// `expires` marks links whose URL or credentials have a finite lifetime.
/// A failed download through such a link is reported as expired rather than
/// failed, since retrying with the same link cannot succeed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadLink {
    pub href: String,
    #[serde(default)]
    pub expires: bool,
}

impl DownloadLink {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            expires: false,
        }
    }

    pub fn expiring(mut self, expires: bool) -> Self {
        self.expires = expires;
        self
    }
}

/// What a request is fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadKind {
    /// A single reading-order item.
    Chapter,
    /// A package holding every item of the book.
    WholeBook,
}

/// Request handed to providers and extensions.
#[derive(Clone)]
pub struct DownloadRequest {
    /// Identifier of the reading-order item (or package) being fetched.
    pub item_id: String,
    pub link: DownloadLink,
    /// Where the completed file must be written.
    pub output_path: PathBuf,
    pub kind: DownloadKind,
    /// Extra request headers. Extensions typically add credentials here.
    pub headers: HashMap<String, String>,
    progress: ProgressCallback,
}

impl DownloadRequest {
    pub fn new(
        item_id: impl Into<String>,
        link: DownloadLink,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            link,
            output_path: output_path.into(),
            kind: DownloadKind::Chapter,
            headers: HashMap::new(),
            progress: Arc::new(|_| {}),
        }
    }

    pub fn kind(mut self, kind: DownloadKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn bearer_token(self, token: impl Into<String>) -> Self {
        self.header("Authorization", format!("Bearer {}", token.into()))
    }

    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = callback;
        self
    }

    /// Report transfer progress. Values outside `[0, 1]` are clamped.
    pub fn report_progress(&self, fraction: f64) {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        (self.progress)(fraction);
    }

    /// The link URI.
    pub fn uri(&self) -> &str {
        &self.link.href
    }
}

impl fmt::Debug for DownloadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&String> = self.headers.keys().collect();
        f.debug_struct("DownloadRequest")
            .field("item_id", &self.item_id)
            .field("link", &self.link)
            .field("output_path", &self.output_path)
            .field("kind", &self.kind)
            .field("headers", &header_names)
            .finish()
    }
}

/// Default transport used when no extension claims a request.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::download::{DownloadProvider, DownloadRequest};
/// use bridge_traits::error::Result;
/// use async_trait::async_trait;
///
/// struct HttpDownloads { client: reqwest::Client }
///
/// #[async_trait]
/// impl DownloadProvider for HttpDownloads {
///     async fn download(&self, request: DownloadRequest) -> Result<()> {
///         // stream request.uri() into request.output_path,
///         // calling request.report_progress(..) as bytes arrive
///         todo!()
///     }
/// }
/// ```
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait DownloadProvider: PlatformSendSync {
    /// Transfer `request.link` into `request.output_path`.
    async fn download(&self, request: DownloadRequest) -> Result<()>;
}

/// Hook that may substitute the default download path.
pub trait DownloadExtension: PlatformSendSync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Return `Some(future)` to take over this request, or `None` to let the
    /// next extension (and finally the provider) handle it. The provider is
    /// passed in so extensions can decorate the request and delegate.
    fn on_download_link(
        &self,
        provider: Arc<dyn DownloadProvider>,
        request: &DownloadRequest,
    ) -> Option<DownloadFuture>;
}
