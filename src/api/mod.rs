pub mod history;
pub mod orders;

pub use history::{native_resolution, HistoryClient, RawHistory};
pub use orders::{Credentials, DeltaOrderClient};
