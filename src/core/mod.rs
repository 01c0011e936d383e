pub mod admission;
pub mod proxy;
pub mod rejection;
pub mod rewrite;
pub mod router;

pub use admission::{Admission, ClientInfo, RejectReason};
pub use proxy::{MirrorTarget, ProxyError, ProxyService};
pub use rejection::DecoyPage;
